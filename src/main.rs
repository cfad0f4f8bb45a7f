//! Lasko - cross-app authentication and signing handshake
//!
//! Runs either side of the handshake against a shared store directory.

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lasko_handshake::{
    callback::{CallbackDelivery, CommandLauncher, UrlLauncher},
    clock::{Clock, SharedClock, SystemClock},
    config::{Args, AutoDecision, Command},
    halo::{HttpAuthorityClient, RefreshFlagTask, RefreshSignal, TokenService, TokenState},
    handshake::{build_auth_url, parse_auth_url, AuthRequest, HandshakeMessage, HandshakeStore},
    poller::PollLoop,
    protocol::{
        Decision, HolderEvent, HolderNotice, HolderProtocol, HolderTask, PostSignEvent,
        PostSignHolder, PostSignRequester, RequesterEvent, RequesterProtocol,
    },
    signing::SigningService,
    store::{FileStore, SharedStore},
    vault::{EncryptedKeyFile, LocalKeyVault},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("lasko_handshake={},lasko={},info", args.log_level, args.log_level).into());
    tracing_subscriber::registry()
        .with(filter)
        .with(args.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!args.log_json).then(tracing_subscriber::fmt::layer))
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    match args.command.clone() {
        Command::Keygen { force } => keygen(&args, force),
        Command::Address => address(&args),
        Command::Request {
            app_name,
            app_id,
            permissions,
            callback,
            username,
            print_url,
        } => {
            let mut request = AuthRequest::new(
                app_name,
                app_id.unwrap_or_else(|| args.bundle_id.clone()),
                permissions,
                callback
                    .or_else(|| args.callback_policy().canonical_callback())
                    .ok_or_else(|| anyhow!("No callback URL"))?,
            );
            if let Some(username) = username {
                request = request.with_username(username);
            }
            if print_url {
                request.prepare();
                println!("{}", build_auth_url(&request, &args.callback_scheme));
                return Ok(());
            }
            run_requester(&args, request).await
        }
        Command::Holder {
            auto,
            once,
            no_launch,
            opener,
        } => {
            let launcher = if no_launch {
                CliLauncher::Print
            } else {
                CliLauncher::Command(opener.map(CommandLauncher::new).unwrap_or_default())
            };
            run_holder(&args, auto, once, launcher).await
        }
        Command::PostSign { content_hash_hex } => run_post_sign(&args, &content_hash_hex).await,
        Command::Token { force, request } => run_token(&args, force, request).await,
        Command::Inbound { url } => inbound(&args, &url),
    }
}

fn shared_store(args: &Args) -> anyhow::Result<Arc<dyn SharedStore>> {
    let store = FileStore::open(&args.store_dir)
        .with_context(|| format!("Failed to open store at {}", args.store_dir.display()))?;
    Ok(Arc::new(store))
}

fn handshake_store(args: &Args) -> anyhow::Result<HandshakeStore> {
    let clock: SharedClock = Arc::new(SystemClock);
    Ok(HandshakeStore::new(
        shared_store(args)?,
        clock,
        args.handshake_config(),
    ))
}

/// Load the identity key, or an empty (locked) vault if there is no key file.
fn load_vault(args: &Args) -> anyhow::Result<Arc<LocalKeyVault>> {
    if !args.key_file.exists() {
        warn!("No key file at {}, identity is locked", args.key_file.display());
        return Ok(Arc::new(LocalKeyVault::empty()));
    }
    let passphrase = args
        .key_passphrase
        .as_deref()
        .ok_or_else(|| anyhow!("LASKO_KEY_PASSPHRASE is required to unlock the key file"))?;
    let vault = EncryptedKeyFile::load(&args.key_file)?
        .unseal(passphrase)
        .context("Failed to unlock identity key")?;
    Ok(Arc::new(vault))
}

fn keygen(args: &Args, force: bool) -> anyhow::Result<()> {
    if args.key_file.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            args.key_file.display()
        );
    }
    let passphrase = args
        .key_passphrase
        .as_deref()
        .ok_or_else(|| anyhow!("LASKO_KEY_PASSPHRASE is required"))?;

    let vault = Arc::new(LocalKeyVault::generate());
    EncryptedKeyFile::seal(&vault, passphrase)?.save(&args.key_file)?;

    let address = SigningService::new(vault).identity_address()?;
    info!("Sealed identity key into {}", args.key_file.display());
    println!("{address}");
    Ok(())
}

fn address(args: &Args) -> anyhow::Result<()> {
    let signer = SigningService::new(load_vault(args)?);
    println!("address: {}", signer.identity_address()?);
    println!("pubkey:  {}", signer.public_key_hex()?);
    Ok(())
}

fn inbound(args: &Args, url: &str) -> anyhow::Result<()> {
    let request = parse_auth_url(url, &args.callback_scheme)?;
    if !args.callback_policy().allows(&request.callback_url) {
        bail!("Callback URL not allowed: {}", request.callback_url);
    }
    let written = handshake_store(args)?.put(request)?;
    info!(app_id = %written.app_id, "Inbound auth request written");
    println!("{}", written.nonce);
    Ok(())
}

async fn run_requester(args: &Args, request: AuthRequest) -> anyhow::Result<()> {
    let mut requester = RequesterProtocol::new(handshake_store(args)?);
    let written = requester.submit(request)?;
    info!(
        "Waiting for holder to answer request {} (expires at {})",
        written.nonce, written.expires_at
    );

    let mut interval = tokio::time::interval(args.poll_config().interval);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                requester.cancel()?;
                bail!("Cancelled");
            }
        }

        match requester.poll() {
            RequesterEvent::Idle | RequesterEvent::Waiting => {}
            RequesterEvent::Approved(session) => {
                session.verify()?;
                println!("{}", serde_json::to_string_pretty(&session)?);
                return Ok(());
            }
            RequesterEvent::Denied => bail!("Request denied"),
            RequesterEvent::TimedOut => bail!("Request timed out"),
        }
    }
}

async fn run_post_sign(args: &Args, content_hash_hex: &str) -> anyhow::Result<()> {
    let mut requester = PostSignRequester::new(handshake_store(args)?);
    requester.submit(content_hash_hex)?;

    let mut interval = tokio::time::interval(args.poll_config().interval);
    loop {
        interval.tick().await;
        match requester.poll() {
            PostSignEvent::Idle | PostSignEvent::Waiting => {}
            PostSignEvent::Signed(response) => {
                println!("{}", serde_json::to_string_pretty(&response)?);
                return Ok(());
            }
            PostSignEvent::TimedOut => bail!("Post-sign request timed out"),
        }
    }
}

async fn run_token(args: &Args, force: bool, request: bool) -> anyhow::Result<()> {
    let clock: SharedClock = Arc::new(SystemClock);

    if request {
        let signal = RefreshSignal::new(shared_store(args)?);
        let asked_at = clock.now_secs();
        signal.request()?;
        info!("Refresh requested, waiting for holder");

        let mut interval = tokio::time::interval(args.poll_config().interval);
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(120);
        while tokio::time::Instant::now() < deadline {
            interval.tick().await;
            if signal.refreshed_since(asked_at) {
                println!("refreshed at {}", signal.last_refreshed_at().unwrap_or(asked_at));
                return Ok(());
            }
        }
        bail!("Holder did not answer the refresh request");
    }

    let authority_config = args
        .authority_config()
        .ok_or_else(|| anyhow!("HALO_AUTHORITY_URL is required"))?;
    let service = TokenService::new(
        shared_store(args)?,
        SigningService::new(load_vault(args)?),
        Arc::new(HttpAuthorityClient::new(authority_config)?),
        clock,
        args.token_config(),
    );

    let state = if force {
        service.refresh_now().await?
    } else {
        service.ensure_token().await?
    };
    match state {
        TokenState::Cached(token) | TokenState::Refreshed(token) => {
            println!("{}", token.token);
            info!(expires_at = token.expires_at, "Bearer token ready");
            Ok(())
        }
        TokenState::Degraded { fallback, reason } => {
            if let Some(token) = fallback {
                warn!("Refresh failed ({}), using cached token", reason);
                println!("{}", token.token);
                Ok(())
            } else {
                bail!("Not authenticated: {reason}")
            }
        }
    }
}

async fn run_holder(
    args: &Args,
    auto: Option<AutoDecision>,
    once: bool,
    launcher: CliLauncher,
) -> anyhow::Result<()> {
    let store = handshake_store(args)?;
    let signer = SigningService::new(load_vault(args)?);
    if !signer.is_available() {
        warn!("Identity is locked; requests will wait until they expire");
    } else {
        info!("Holding identity {}", signer.identity_address()?);
    }

    let auth = Arc::new(Mutex::new(HolderProtocol::new(store.clone(), signer.clone())));
    let post_sign = Arc::new(Mutex::new(PostSignHolder::new(store.clone(), signer.clone())));
    let (tx, mut notices) = mpsc::unbounded_channel();

    let task = HolderTask::new(Arc::clone(&auth), tx).with_post_sign(Arc::clone(&post_sign));
    let holder_loop = PollLoop::new(Arc::new(task), args.poll_config());
    holder_loop.start().await;

    let refresh_loop = match args.authority_config() {
        Some(config) => {
            let service = Arc::new(TokenService::new(
                Arc::clone(store.shared()),
                signer.clone(),
                Arc::new(HttpAuthorityClient::new(config)?),
                Arc::clone(store.clock()),
                args.token_config(),
            ));
            let poll = PollLoop::new(Arc::new(RefreshFlagTask::new(service)), args.poll_config());
            poll.start().await;
            Some(poll)
        }
        None => None,
    };

    let delivery = CallbackDelivery::new(launcher, args.delivery_config());

    loop {
        let notice = tokio::select! {
            notice = notices.recv() => notice,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(notice) = notice else { break };

        match notice {
            HolderNotice::Auth(HolderEvent::DecisionRequired(request)) => {
                let perms: Vec<&str> = request.permissions.iter().map(String::as_str).collect();
                let question = format!(
                    "{} ({}) requests [{}]{}. Approve?",
                    request.app_name,
                    request.app_id,
                    perms.join(", "),
                    request
                        .username
                        .as_deref()
                        .map(|u| format!(" for {u}"))
                        .unwrap_or_default()
                );
                let decision = match auto {
                    Some(AutoDecision::Approve) => Decision::Approve,
                    Some(AutoDecision::Deny) => Decision::Deny,
                    None if confirm(question).await? => Decision::Approve,
                    None => Decision::Deny,
                };

                let outcome = match auth.lock().await.decide(decision).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!("Could not answer request: {}", e);
                        continue;
                    }
                };

                let delivered = delivery
                    .deliver(&outcome.callback_url, outcome.status())
                    .await?;
                if delivered.needs_manual_return() {
                    println!("Could not return to {}", request.app_name);
                    if auto.is_none() && confirm(format!("Return to {}?", request.app_name)).await? {
                        if let Err(e) = delivery.manual_return(delivered.url()).await {
                            warn!("{}", e);
                            println!("Open manually: {}", delivered.url());
                        }
                    } else {
                        println!("Open manually: {}", delivered.url());
                    }
                }

                if once {
                    break;
                }
            }
            HolderNotice::Auth(HolderEvent::AwaitingUnlock) => {
                warn!("Auth request waiting, identity is locked");
            }
            HolderNotice::Auth(event) => info!("Auth handshake: {:?}", event),
            HolderNotice::PostSign(request) => {
                let approve = match auto {
                    Some(AutoDecision::Approve) => true,
                    Some(AutoDecision::Deny) => false,
                    None => confirm(format!("Sign content hash {}?", request.content_hash_hex)).await?,
                };
                let mut holder = post_sign.lock().await;
                if approve {
                    match holder.sign_request(&request).await {
                        Ok(Some(_)) => {}
                        Ok(None) => info!("Post-sign request was withdrawn"),
                        Err(e) => warn!("Could not sign post: {}", e),
                    }
                } else if !holder.decline_request(&request) {
                    info!("Post-sign request was withdrawn");
                }
            }
        }
    }

    holder_loop.stop().await;
    if let Some(poll) = refresh_loop {
        poll.stop().await;
    }
    Ok(())
}

/// Ask a yes/no question on the terminal.
async fn confirm(question: String) -> anyhow::Result<bool> {
    let answer = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        print!("{question} [y/N] ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok(line)
    })
    .await??;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

/// Launcher selected on the command line
enum CliLauncher {
    Command(CommandLauncher),
    Print,
}

#[async_trait::async_trait]
impl UrlLauncher for CliLauncher {
    async fn open(&self, url: &str) -> bool {
        match self {
            Self::Command(launcher) => launcher.open(url).await,
            Self::Print => {
                println!("{url}");
                true
            }
        }
    }
}
