//! Configuration for the lasko CLI
//!
//! CLI arguments and environment variable handling using clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use crate::callback::DeliveryConfig;
use crate::halo::{AuthorityConfig, TokenServiceConfig};
use crate::handshake::{CallbackPolicy, HandshakeConfig};
use crate::poller::PollConfig;

/// Lasko - cross-app authentication and signing handshake
#[derive(Parser, Debug, Clone)]
#[command(name = "lasko")]
#[command(about = "Cross-app authentication and signing handshake over a shared store")]
pub struct Args {
    /// Directory backing the shared store (visible to both applications)
    #[arg(long, env = "LASKO_STORE_DIR", default_value = "./lasko-store", global = true)]
    pub store_dir: PathBuf,

    /// Bundle identifier bound into challenge and post-sign messages
    #[arg(long, env = "LASKO_BUNDLE_ID", default_value = "com.lasko.app", global = true)]
    pub bundle_id: String,

    /// URL scheme allowed for callbacks (`<scheme>://auth/callback`)
    #[arg(long, env = "LASKO_CALLBACK_SCHEME", default_value = "lasko", global = true)]
    pub callback_scheme: String,

    /// Remote authority base URL for bearer tokens
    #[arg(long, env = "HALO_AUTHORITY_URL", global = true)]
    pub authority_url: Option<String>,

    /// Per-call timeout for authority requests in milliseconds
    #[arg(long, env = "LASKO_REQUEST_TIMEOUT_MS", default_value = "30000", global = true)]
    pub request_timeout_ms: u64,

    /// Shared store poll interval in milliseconds
    #[arg(long, env = "LASKO_POLL_INTERVAL_MS", default_value = "1000", global = true)]
    pub poll_interval_ms: u64,

    /// Encrypted identity key file
    #[arg(long, env = "LASKO_KEY_FILE", default_value = "./lasko-key.json", global = true)]
    pub key_file: PathBuf,

    /// Passphrase for the identity key file
    #[arg(long, env = "LASKO_KEY_PASSPHRASE", hide_env_values = true, global = true)]
    pub key_passphrase: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false", global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Generate an identity key and seal it into the key file
    Keygen {
        /// Overwrite an existing key file
        #[arg(long)]
        force: bool,
    },

    /// Print the identity address of the key file
    Address,

    /// Requester: write an auth request and wait for the answer
    Request {
        /// Requesting application name
        #[arg(long, default_value = "LASKO")]
        app_name: String,

        /// Requesting application id (defaults to the bundle id)
        #[arg(long)]
        app_id: Option<String>,

        /// Requested permissions
        #[arg(long, value_delimiter = ',', default_value = "read")]
        permissions: Vec<String>,

        /// Callback URL (defaults to `<scheme>://auth/callback`)
        #[arg(long)]
        callback: Option<String>,

        /// Username hint shown to the holder
        #[arg(long)]
        username: Option<String>,

        /// Print the inbound deep link instead of writing to the store
        #[arg(long)]
        print_url: bool,
    },

    /// Holder: poll for requests and answer them
    Holder {
        /// Answer every request without prompting
        #[arg(long, value_enum)]
        auto: Option<AutoDecision>,

        /// Exit after the first answered request
        #[arg(long)]
        once: bool,

        /// Do not launch callback URLs
        #[arg(long)]
        no_launch: bool,

        /// Program used to open callback URLs
        #[arg(long, env = "LASKO_URL_OPENER")]
        opener: Option<String>,
    },

    /// Requester: ask the holder to sign a content hash
    PostSign {
        /// Hex content hash to sign
        content_hash_hex: String,
    },

    /// Ensure a bearer token from the remote authority
    Token {
        /// Refresh even if the cached token is fresh
        #[arg(long)]
        force: bool,

        /// Ask the holder to refresh and wait for it
        #[arg(long, conflicts_with = "force")]
        request: bool,
    },

    /// Accept an inbound auth deep link
    Inbound {
        /// `<scheme>://auth?app=..&appId=..&permissions=..&callback=..`
        url: String,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoDecision {
    Approve,
    Deny,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.bundle_id.is_empty() || self.bundle_id.contains('|') || self.bundle_id.contains(':') {
            return Err("LASKO_BUNDLE_ID must be non-empty and contain no '|' or ':'".to_string());
        }

        let scheme_ok = self
            .callback_scheme
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && self
                .callback_scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !scheme_ok {
            return Err(format!("Invalid callback scheme: {}", self.callback_scheme));
        }

        if self.poll_interval_ms == 0 {
            return Err("LASKO_POLL_INTERVAL_MS must be greater than zero".to_string());
        }
        if self.request_timeout_ms == 0 {
            return Err("LASKO_REQUEST_TIMEOUT_MS must be greater than zero".to_string());
        }

        if let Some(url) = &self.authority_url {
            url::Url::parse(url).map_err(|e| format!("Invalid HALO_AUTHORITY_URL: {e}"))?;
        }
        if matches!(self.command, Command::Token { request: false, .. }) && self.authority_url.is_none() {
            return Err("HALO_AUTHORITY_URL is required for token".to_string());
        }

        if matches!(self.command, Command::Keygen { .. }) && self.key_passphrase.is_none() {
            return Err("LASKO_KEY_PASSPHRASE is required for keygen".to_string());
        }

        Ok(())
    }

    pub fn callback_policy(&self) -> CallbackPolicy {
        CallbackPolicy::new([self.callback_scheme.as_str()])
    }

    pub fn handshake_config(&self) -> HandshakeConfig {
        HandshakeConfig {
            bundle_id: self.bundle_id.clone(),
            callback_policy: self.callback_policy(),
            ..HandshakeConfig::default()
        }
    }

    pub fn token_config(&self) -> TokenServiceConfig {
        TokenServiceConfig {
            bundle_id: self.bundle_id.clone(),
            ..TokenServiceConfig::default()
        }
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig::default()
    }

    pub fn authority_config(&self) -> Option<AuthorityConfig> {
        self.authority_url.as_ref().map(|url| {
            AuthorityConfig::new(url.clone())
                .with_timeout(Duration::from_millis(self.request_timeout_ms))
        })
    }
}
