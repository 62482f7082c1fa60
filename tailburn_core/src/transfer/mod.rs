//! Both ends of a one-time transfer.
//!
//! This module provides:
//! - The session controller that hosts the file (`sender`)
//! - The cooperating retrieval client (`receiver`)
//! - Naming and formatting helpers shared by both

pub mod constants;
pub mod receiver;
pub mod sender;
pub mod utils;

// Re-export public API
pub use receiver::{AckOutcome, Receiver, Retrieval, receive};
pub use sender::{PreparedShare, ShareOptions, host_file, prepare_share};
pub use utils::{format_bytes, safe_output_path};
