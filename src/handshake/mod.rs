//! Handshake Store
//!
//! Typed access to the shared store for every message kind. Both
//! applications read and write the same keys:
//!
//! | Key                        | Message              | TTL  |
//! |----------------------------|----------------------|------|
//! | `lasko_auth_request`       | [`AuthRequest`]      | 120s |
//! | `lasko_auth_response`      | [`AuthSession`]      | 24h  |
//! | `lasko_auth_denied`        | [`AuthDenied`]       | 120s |
//! | `lasko_post_sign_request`  | [`PostSignRequest`]  | 120s |
//! | `lasko_post_sign_response` | [`PostSignResponse`] | 120s |
//!
//! Each key holds at most one live message. A new `put` clobbers the old
//! one; reads validate or discard.

pub mod allowlist;
pub mod deeplink;
pub mod messages;
pub mod store;

pub use allowlist::CallbackPolicy;
pub use deeplink::{build_auth_url, parse_auth_url};
pub use messages::{
    generate_nonce, AuthDenied, AuthRequest, AuthSession, HandshakeMessage, MessageKind,
    PostSignRequest, PostSignResponse, ValidationContext,
};
pub use store::{HandshakeConfig, HandshakeStore};
