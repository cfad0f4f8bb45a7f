//! Callback URL allowlist.
//!
//! A callback is trusted only if it is exactly `<scheme>://auth/callback`
//! for one of the configured schemes. Scheme and host compare
//! case-insensitively, the path compares exactly, and nothing else
//! (port, credentials, query, fragment) may be present.

use url::Url;

pub const CALLBACK_HOST: &str = "auth";
pub const CALLBACK_PATH: &str = "/callback";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackPolicy {
    schemes: Vec<String>,
}

impl CallbackPolicy {
    pub fn new<I, S>(schemes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            schemes: schemes
                .into_iter()
                .map(|s| s.into().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn schemes(&self) -> &[String] {
        &self.schemes
    }

    /// The canonical callback URL for the first allowed scheme.
    pub fn canonical_callback(&self) -> Option<String> {
        self.schemes
            .first()
            .map(|s| format!("{s}://{CALLBACK_HOST}{CALLBACK_PATH}"))
    }

    pub fn allows(&self, callback_url: &str) -> bool {
        let Ok(url) = Url::parse(callback_url) else {
            return false;
        };

        // Url lowercases the scheme; non-special hosts keep their case
        self.schemes.iter().any(|s| s == url.scheme())
            && url
                .host_str()
                .is_some_and(|h| h.eq_ignore_ascii_case(CALLBACK_HOST))
            && url.path() == CALLBACK_PATH
            && url.port().is_none()
            && url.username().is_empty()
            && url.password().is_none()
            && url.query().is_none()
            && url.fragment().is_none()
    }
}

impl Default for CallbackPolicy {
    fn default() -> Self {
        Self::new(["lasko"])
    }
}
