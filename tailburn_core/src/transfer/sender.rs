//! Session controller: host one file until it burns.

use super::utils::format_bytes;
use crate::config::BurnConfig;
use crate::error::StartupError;
use crate::http_share;
use crate::identity::IdentityResolver;
use crate::session::{BrowserCompletionPolicy, Session, SharedFile, generate_secret_token};
use crate::shutdown::{
    ShutdownListener, ShutdownPlan, ShutdownReason, ShutdownSignal, run_until_burned,
    shutdown_channel,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Everything needed to start a share
pub struct ShareOptions {
    pub file_path: PathBuf,
    /// Login allowed to download
    pub target: String,
    /// Absolute lifetime of the share
    pub timeout: Duration,
    /// Delete the source file after shutdown
    pub wipe: bool,
    pub bind: SocketAddr,
    /// Host to advertise in the URL instead of the bind address
    pub public_host: Option<String>,
    pub browser_policy: BrowserCompletionPolicy,
    pub drain_timeout: Duration,
    pub resolver: Arc<dyn IdentityResolver>,
}

impl ShareOptions {
    pub fn from_config(
        config: &BurnConfig,
        file_path: PathBuf,
        target: String,
        resolver: Arc<dyn IdentityResolver>,
    ) -> Self {
        let ip = config.bind_address.unwrap_or_else(default_bind_ip);
        Self {
            file_path,
            target,
            timeout: config.timeout(),
            wipe: false,
            bind: SocketAddr::new(ip, config.port),
            public_host: config.public_host.clone(),
            browser_policy: BrowserCompletionPolicy {
                delay: config.browser_shutdown_delay(),
            },
            drain_timeout: config.drain_timeout(),
            resolver,
        }
    }
}

/// A share that is bound and ready, but not yet serving
pub struct PreparedShare {
    session: Arc<Session>,
    listener: TcpListener,
    signal: ShutdownSignal,
    shutdown: ShutdownListener,
    url: String,
    timeout: Duration,
    plan: ShutdownPlan,
}

/// Tailscale assigns addresses from 100.64.0.0/10 and fd7a:115c:a1e0::/48
pub fn is_tailnet_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            o[0] == 100 && (o[1] & 0xC0) == 64
        }
        IpAddr::V6(v6) => {
            let s = v6.segments();
            s[0] == 0xfd7a && s[1] == 0x115c && s[2] == 0xa1e0
        }
    }
}

/// Prefer the tailnet interface so the share is never exposed on the LAN,
/// falling back to loopback.
pub fn default_bind_ip() -> IpAddr {
    local_ip_address::list_afinet_netifas()
        .ok()
        .and_then(|ifaces| {
            let mut best = None;
            for (_name, ip) in ifaces {
                if !is_tailnet_ip(&ip) {
                    continue;
                }
                if ip.is_ipv4() {
                    return Some(ip); // Best match
                }
                best.get_or_insert(ip);
            }
            best
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn share_url(host: &str, port: u16, secret_path: &str) -> String {
    if port == 80 {
        format!("http://{}{}", host, secret_path)
    } else {
        format!("http://{}:{}{}", host, port, secret_path)
    }
}

fn url_host(public_host: Option<&str>, addr: &SocketAddr) -> String {
    if let Some(host) = public_host {
        return host.to_string();
    }
    match addr.ip() {
        ip if ip.is_unspecified() => hostname::get()
            .ok()
            .and_then(|s| s.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string()),
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{}]", v6),
    }
}

/// Validate the request, build the session and bind the listener.
///
/// Nothing is reachable over the network until [`PreparedShare::run`].
pub async fn prepare_share(options: ShareOptions) -> Result<PreparedShare, StartupError> {
    // 1. Configuration checks
    if options.target.trim().is_empty() {
        return Err(StartupError::MissingTarget);
    }
    let meta = tokio::fs::metadata(&options.file_path)
        .await
        .map_err(|source| StartupError::MissingFile {
            path: options.file_path.clone(),
            source,
        })?;
    if !meta.is_file() {
        return Err(StartupError::NotAFile(options.file_path));
    }

    let file = SharedFile {
        name: options
            .file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string()),
        size_display: format_bytes(meta.len()),
        path: options.file_path.clone(),
    };

    // 2. Session with a fresh capability path
    let (signal, shutdown) = shutdown_channel();
    let session = Arc::new(Session::new(
        &generate_secret_token(),
        options.target.trim(),
        file,
        options.resolver,
        signal.clone(),
        options.browser_policy,
    ));

    // 3. Listener
    let listener = TcpListener::bind(options.bind)
        .await
        .map_err(|source| StartupError::Bind {
            addr: options.bind,
            source,
        })?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| StartupError::Bind {
            addr: options.bind,
            source,
        })?;

    let host = url_host(options.public_host.as_deref(), &local_addr);
    let url = share_url(&host, local_addr.port(), session.secret_path());

    Ok(PreparedShare {
        session,
        listener,
        signal,
        shutdown,
        url,
        timeout: options.timeout,
        plan: ShutdownPlan {
            drain_timeout: options.drain_timeout,
            wipe: options.wipe.then_some(options.file_path),
        },
    })
}

impl PreparedShare {
    /// Browser link, also accepted by `tail-burn receive`
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn file(&self) -> &SharedFile {
        self.session.file()
    }

    pub fn target(&self) -> &str {
        self.session.target_identity()
    }

    pub fn wipe_enabled(&self) -> bool {
        self.plan.wipe.is_some()
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until the first shutdown trigger, then drain and clean up
    pub async fn run(self) -> anyhow::Result<ShutdownReason> {
        let cancel = CancellationToken::new();
        let router = http_share::create_router(self.session.clone());

        tracing::info!("HTTP server starting on {}", self.url);
        let server = tokio::spawn(http_share::serve(self.listener, router, cancel.clone()));

        // Doomsday timer
        let _timer = self
            .signal
            .trigger_after(self.timeout, ShutdownReason::TimeoutReached);

        run_until_burned(self.shutdown, cancel, server, self.plan).await
    }
}

/// Prepare and run a share in one call
pub async fn host_file(options: ShareOptions) -> anyhow::Result<ShutdownReason> {
    let share = prepare_share(options).await?;
    share.run().await
}
