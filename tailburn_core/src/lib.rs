//! tail-burn: single-use, confirmed-delivery file transfer.
//!
//! A short-lived server exposes exactly one file behind an unguessable path to
//! one authorized login, serves it at most once and then shuts itself down.
//! The matching client downloads, verifies the byte count and acknowledges so
//! the server can burn the share immediately.

pub mod config;
pub mod error;
pub mod http_share;
pub mod identity;
pub mod session;
pub mod shutdown;
pub mod transfer;

pub use config::BurnConfig;
pub use error::{IdentityError, ReceiveError, StartupError};
pub use identity::IdentityResolver;
pub use session::{ClientKind, Session, SharedFile};
pub use shutdown::ShutdownReason;
