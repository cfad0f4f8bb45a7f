//! Auth Handshake Protocol
//!
//! State machines for both sides of the cross-app handshake. Neither side
//! holds a connection to the other; each re-reads the handshake store on
//! every poll and acts on what it finds, so every step can be re-observed
//! from scratch after a crash or restart.
//!
//! - [`HolderProtocol`]: request → user decision → signed session or denial
//! - [`RequesterProtocol`]: submit → consume session / observe denial / time out
//! - [`PostSignHolder`] / [`PostSignRequester`]: content-hash signing

pub mod holder;
pub mod post_sign;
pub mod requester;
pub mod state;
pub mod task;

pub use holder::{DecisionOutcome, HolderEvent, HolderProtocol};
pub use post_sign::{PostSignEvent, PostSignHolder, PostSignRequester};
pub use requester::{RequesterEvent, RequesterProtocol};
pub use state::{Decision, HandshakeState};
pub use task::{HolderNotice, HolderTask};
