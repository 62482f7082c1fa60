//! Error types shared by the sender and receiver sides.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to map a peer (or ourselves) to a login identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity lookup command failed: {0}")]
    Command(#[from] std::io::Error),

    #[error("identity lookup exited with status {status}: {stderr}")]
    LookupFailed { status: i32, stderr: String },

    #[error("malformed identity response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("no identity known for {0}")]
    Unknown(String),
}

/// Fatal problems detected before the share is exposed on the network.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("a target login is required")]
    MissingTarget,

    #[error("cannot stat {path:?}: {source}")]
    MissingFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0:?} is not a regular file")]
    NotAFile(PathBuf),

    #[error("cannot bind listener on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Hard failures of a retrieval. Acknowledgment problems are never reported here.
#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("bad request URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("connection failed: {0}")]
    Connection(#[source] reqwest::Error),

    #[error("server rejected request: HTTP {0}")]
    Rejected(u16),

    #[error("cannot create file {path:?}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("download interrupted after {received} bytes: {source}")]
    Interrupted {
        received: u64,
        #[source]
        source: reqwest::Error,
    },

    #[error("download incomplete: expected {expected} bytes, got {received}")]
    Incomplete { expected: u64, received: u64 },

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ReceiveError {
    /// True when the bytes on disk cannot be trusted to be the whole file.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, ReceiveError::Incomplete { .. })
    }
}
