//! Lasko - cross-app authentication and signing handshake
//!
//! Two applications with no shared process and no IPC channel authenticate
//! each other through a shared key-value store and best-effort URL
//! launches. Everything a step needs is re-read from the store, so any
//! step can be re-observed after a crash, restart, or abandoned prompt.
//!
//! ## Components
//!
//! - **Store**: the shared key-value store and its backends
//! - **Vault**: the secp256k1 identity key, optionally sealed to disk
//! - **Signing**: canonical messages and compact signatures
//! - **Handshake**: typed, TTL-checked, allowlisted message access
//! - **Protocol**: holder and requester state machines
//! - **Halo**: bearer tokens from a remote authority via challenge/verify
//! - **Callback**: retrying hand-back to the requesting application
//! - **Poller**: lifecycle-aware poll loop driving the above

pub mod callback;
pub mod clock;
pub mod config;
pub mod halo;
pub mod handshake;
pub mod poller;
pub mod protocol;
pub mod signing;
pub mod store;
pub mod types;
pub mod vault;

pub use config::Args;
pub use types::{HandshakeError, Result};
