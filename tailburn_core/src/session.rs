//! Single-use session state.
//!
//! A [`Session`] owns one file, one authorized login and the two flags that
//! make delivery at-most-once:
//!
//! - `used` only ever goes false -> true. Once set, no content is served.
//! - `in_progress` is claimed with a compare-and-set before a delivery starts
//!   and released when the attempt ends, whatever the outcome. A second
//!   attempt while it is held is rejected, never queued.

use crate::identity::IdentityResolver;
use crate::shutdown::{ShutdownReason, ShutdownSignal};
use axum::http::{HeaderMap, Method};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Header a cooperating client sends to identify itself
pub const CLIENT_HEADER: &str = "x-tail-burn-client";

/// Suffix of the acknowledgment route below the secret path
pub const ACK_SUFFIX: &str = "/ack";

/// Sender label used when the resolver cannot name us
pub const FALLBACK_SENDER: &str = "A Tailscale User";

/// Generate a random secret path segment (32 hex characters)
pub fn generate_secret_token() -> String {
    // Full UUID v4 entropy (122 random bits)
    Uuid::new_v4().simple().to_string()
}

/// Who is asking, decided once per request from the client header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    /// A browser. It cannot confirm that the bytes reached the disk.
    Interactive,
    /// `tail-burn receive`, which acknowledges after verifying the download
    Cooperating,
}

impl ClientKind {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let cooperating = headers
            .get(CLIENT_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == "true");
        if cooperating {
            ClientKind::Cooperating
        } else {
            ClientKind::Interactive
        }
    }
}

/// What the delivery route should do with an authorized request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryAction {
    /// Bare 410 for cooperating clients
    Gone,
    /// 410 with the human-readable burned page
    BurnedPage,
    /// Side-effect free landing page
    Landing,
    /// Try to claim the session and stream the file
    Download,
}

/// Heuristic used when a browser download completes.
///
/// A browser never tells us the file was saved, so after the response body
/// has been handed off the session waits `delay` and then shuts down. This is
/// best effort and separate from the acknowledgment path.
#[derive(Debug, Clone, Copy)]
pub struct BrowserCompletionPolicy {
    pub delay: Duration,
}

impl Default for BrowserCompletionPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
        }
    }
}

/// Immutable description of the shared file
#[derive(Debug, Clone)]
pub struct SharedFile {
    pub path: PathBuf,
    pub name: String,
    /// Human-readable size captured at startup, for display only
    pub size_display: String,
}

pub struct Session {
    secret_path: String,
    ack_path: String,
    target_identity: String,
    file: SharedFile,
    used: AtomicBool,
    in_progress: AtomicBool,
    resolver: Arc<dyn IdentityResolver>,
    shutdown: ShutdownSignal,
    browser_policy: BrowserCompletionPolicy,
}

impl Session {
    pub fn new(
        secret_token: &str,
        target_identity: impl Into<String>,
        file: SharedFile,
        resolver: Arc<dyn IdentityResolver>,
        shutdown: ShutdownSignal,
        browser_policy: BrowserCompletionPolicy,
    ) -> Self {
        let secret_path = format!("/{}", secret_token);
        let ack_path = format!("{}{}", secret_path, ACK_SUFFIX);
        Self {
            secret_path,
            ack_path,
            target_identity: target_identity.into(),
            file,
            used: AtomicBool::new(false),
            in_progress: AtomicBool::new(false),
            resolver,
            shutdown,
            browser_policy,
        }
    }

    pub fn secret_path(&self) -> &str {
        &self.secret_path
    }

    pub fn ack_path(&self) -> &str {
        &self.ack_path
    }

    pub fn target_identity(&self) -> &str {
        &self.target_identity
    }

    pub fn file(&self) -> &SharedFile {
        &self.file
    }

    pub fn resolver(&self) -> &dyn IdentityResolver {
        self.resolver.as_ref()
    }

    /// Case-insensitive match against the single authorized login
    pub fn is_authorized(&self, identity: &str) -> bool {
        identity.eq_ignore_ascii_case(&self.target_identity)
    }

    pub fn is_used(&self) -> bool {
        self.used.load(Ordering::SeqCst)
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Decide the branch for an authorized request. Claiming the session is
    /// a separate step, see [`Session::try_begin_delivery`].
    pub fn plan(&self, method: &Method, kind: ClientKind) -> DeliveryAction {
        if self.is_used() {
            return match kind {
                ClientKind::Cooperating => DeliveryAction::Gone,
                ClientKind::Interactive => DeliveryAction::BurnedPage,
            };
        }

        match (kind, method) {
            (ClientKind::Interactive, &Method::GET) => DeliveryAction::Landing,
            _ => DeliveryAction::Download,
        }
    }

    /// Claim the delivery slot. `None` means another attempt holds it.
    pub fn try_begin_delivery(self: &Arc<Self>, kind: ClientKind) -> Option<DeliveryGuard> {
        self.in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        // The session may have burned between `plan` and the claim
        if self.is_used() {
            self.in_progress.store(false, Ordering::SeqCst);
            return None;
        }
        Some(DeliveryGuard {
            session: Arc::clone(self),
            kind,
        })
    }

    /// Record the acknowledgment of a cooperating client and request shutdown
    pub fn acknowledge(&self) {
        self.used.store(true, Ordering::SeqCst);
        self.shutdown.trigger(ShutdownReason::ClientConfirmed);
    }

    fn finish_delivery(&self, kind: ClientKind) {
        match kind {
            ClientKind::Interactive => {
                // Mark used before the slot is released so no attempt can slip
                // in between.
                self.used.store(true, Ordering::SeqCst);
                tracing::info!(
                    "Browser transfer complete. Shutting down in {:?}",
                    self.browser_policy.delay
                );
                self.shutdown.trigger_after(
                    self.browser_policy.delay,
                    ShutdownReason::BrowserDownloadFinished,
                );
            }
            ClientKind::Cooperating => {
                tracing::info!("Transfer complete, waiting for client acknowledgment");
            }
        }
    }
}

/// Holds the delivery slot for one attempt.
///
/// Dropping the guard releases the slot without marking the session used, so
/// a failed stream leaves the session retriable. [`DeliveryGuard::complete`]
/// applies the success transition first.
pub struct DeliveryGuard {
    session: Arc<Session>,
    kind: ClientKind,
}

impl DeliveryGuard {
    pub fn kind(&self) -> ClientKind {
        self.kind
    }

    pub fn complete(self) {
        self.session.finish_delivery(self.kind);
    }
}

impl Drop for DeliveryGuard {
    fn drop(&mut self) {
        self.session.in_progress.store(false, Ordering::SeqCst);
    }
}
