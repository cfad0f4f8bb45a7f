//! Halo bearer tokens
//!
//! ```text
//!  ensure_token()
//!    ├─ cached token, > 60s left ─────────────────────────▶ Cached
//!    └─ GET /challenge ─▶ sign "LASKO|nonce|ttl|bundle" ─▶ POST /verify ─▶ Refreshed
//!                         (any failure) ──────────────────▶ Degraded
//! ```
//!
//! The token and its expiry live in the shared store so they survive
//! restarts. A refresh can also be requested by the other application
//! through the `halo_token_refresh_request` flag.

pub mod client;
pub mod token;

pub use client::{
    AuthorityClient, AuthorityConfig, Challenge, HttpAuthorityClient, VerifyRequest,
    VerifyResponse,
};
pub use token::{
    BearerToken, RefreshFlagTask, RefreshSignal, TokenService, TokenServiceConfig, TokenState,
};
