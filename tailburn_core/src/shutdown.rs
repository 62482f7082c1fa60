//! Shutdown coordination.
//!
//! Three independent writers race to end the process: the absolute timeout,
//! the acknowledgment handler and the browser-completion timer. They share a
//! single-slot channel written with `try_send`, so the first reason wins and
//! later writers never block.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    TimeoutReached,
    ClientConfirmed,
    BrowserDownloadFinished,
    /// Every writer went away without sending a reason
    SignalClosed,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ShutdownReason::TimeoutReached => "Timeout reached",
            ShutdownReason::ClientConfirmed => "Client confirmed receipt",
            ShutdownReason::BrowserDownloadFinished => "Browser download finished",
            ShutdownReason::SignalClosed => "Shutdown signal closed",
        };
        f.write_str(text)
    }
}

/// Writer half of the shutdown slot
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: mpsc::Sender<ShutdownReason>,
}

/// Reader half of the shutdown slot
#[derive(Debug)]
pub struct ShutdownListener {
    rx: mpsc::Receiver<ShutdownReason>,
}

pub fn shutdown_channel() -> (ShutdownSignal, ShutdownListener) {
    let (tx, rx) = mpsc::channel(1);
    (ShutdownSignal { tx }, ShutdownListener { rx })
}

impl ShutdownSignal {
    /// Offer a reason without waiting. Returns false when another reason
    /// already occupies the slot or the listener is gone.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        match self.tx.try_send(reason) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!("Shutdown already requested, dropping '{}'", reason);
                false
            }
        }
    }

    /// Arm a one-shot timer that offers `reason` once `delay` elapses
    pub fn trigger_after(&self, delay: Duration, reason: ShutdownReason) -> JoinHandle<bool> {
        let signal = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            signal.trigger(reason)
        })
    }
}

impl ShutdownListener {
    /// Wait for the first reason
    pub async fn wait(&mut self) -> ShutdownReason {
        self.rx.recv().await.unwrap_or(ShutdownReason::SignalClosed)
    }
}

/// What to do once a reason arrives
#[derive(Debug, Clone)]
pub struct ShutdownPlan {
    /// Upper bound on draining in-flight connections
    pub drain_timeout: Duration,
    /// Source file to delete after the drain
    pub wipe: Option<PathBuf>,
}

/// Block until the first shutdown reason, then stop the server and clean up.
///
/// `server` is the task running `axum::serve` with graceful shutdown bound to
/// `cancel`. If it ends on its own before any reason arrives the error is
/// returned and nothing is wiped.
pub async fn run_until_burned(
    mut listener: ShutdownListener,
    cancel: CancellationToken,
    mut server: JoinHandle<anyhow::Result<()>>,
    plan: ShutdownPlan,
) -> anyhow::Result<ShutdownReason> {
    let reason = tokio::select! {
        reason = listener.wait() => reason,
        result = &mut server => {
            return match result {
                Ok(Ok(())) => Err(anyhow::anyhow!("HTTP server stopped unexpectedly")),
                Ok(Err(e)) => Err(e.context("HTTP server failed")),
                Err(e) => Err(anyhow::anyhow!("HTTP server task panicked: {}", e)),
            };
        }
    };

    tracing::info!("Shutting down: {}", reason);
    cancel.cancel();

    match tokio::time::timeout(plan.drain_timeout, &mut server).await {
        Ok(Ok(Ok(()))) => tracing::debug!("Connections drained"),
        Ok(Ok(Err(e))) => tracing::error!("Server error during drain: {}", e),
        Ok(Err(e)) => tracing::error!("Server task failed during drain: {}", e),
        Err(_) => {
            tracing::warn!(
                "Drain exceeded {:?}, dropping remaining connections",
                plan.drain_timeout
            );
            server.abort();
        }
    }

    if let Some(path) = plan.wipe {
        tracing::info!("Deleting source file {:?}", path);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::info!("Source file deleted"),
            Err(e) => tracing::error!("Failed to wipe file {:?}: {}", path, e),
        }
    }

    Ok(reason)
}
