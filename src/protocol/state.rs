//! Auth handshake states.

use serde::{Deserialize, Serialize};

/// Where an auth handshake stands, as observed by one side.
///
/// ```text
/// NoRequest ─▶ RequestPending ─▶ UserDeciding ─▶ ResponseWritten ─▶ Consumed
///                    │                  │
///                    ▼                  └──(deny)──────────────────▶ Consumed
///                 Expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeState {
    NoRequest,
    RequestPending,
    UserDeciding,
    ResponseWritten,
    Consumed,
    Expired,
}

impl HandshakeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Consumed | Self::Expired)
    }

    /// Whether a request is live from this side's point of view.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::RequestPending | Self::UserDeciding)
    }
}

impl std::fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NoRequest => "no_request",
            Self::RequestPending => "request_pending",
            Self::UserDeciding => "user_deciding",
            Self::ResponseWritten => "response_written",
            Self::Consumed => "consumed",
            Self::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// The user's answer to an auth request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Deny,
}
