//! Real listener plus the retrieval client, over loopback.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tailburn_core::ShutdownReason;
use tailburn_core::identity::StaticResolver;
use tailburn_core::session::BrowserCompletionPolicy;
use tailburn_core::ReceiveError;
use tailburn_core::transfer::{AckOutcome, ShareOptions, prepare_share, receive};
use tokio::task::JoinHandle;

const TARGET: &str = "alice@example.com";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn options(file_path: PathBuf, peer_login: &str) -> ShareOptions {
    let mut peers = HashMap::new();
    peers.insert(IpAddr::V4(Ipv4Addr::LOCALHOST), peer_login.to_string());

    ShareOptions {
        file_path,
        target: TARGET.to_string(),
        timeout: Duration::from_secs(30),
        wipe: false,
        bind: "127.0.0.1:0".parse().unwrap(),
        public_host: None,
        browser_policy: BrowserCompletionPolicy::default(),
        drain_timeout: Duration::from_secs(1),
        resolver: Arc::new(StaticResolver::new(peers, Some("bob@example.com".into()))),
    }
}

async fn start(options: ShareOptions) -> (String, JoinHandle<anyhow::Result<ShutdownReason>>) {
    init_tracing();
    let share = prepare_share(options).await.unwrap();
    let url = share.url().to_string();
    (url, tokio::spawn(share.run()))
}

fn write_source(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[tokio::test]
async fn test_receive_confirms_and_burns() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let path = write_source(&src, "report.pdf", b"twelve bytes");

    let (url, server) = start(options(path.clone(), TARGET)).await;

    let retrieval = receive(&url, out.path(), Duration::from_secs(10)).await.unwrap();
    assert_eq!(retrieval.bytes, 12);
    assert_eq!(retrieval.ack, AckOutcome::Confirmed);
    assert_eq!(retrieval.saved_path, out.path().join("report.pdf"));
    assert!(!retrieval.was_renamed());
    assert_eq!(std::fs::read(&retrieval.saved_path).unwrap(), b"twelve bytes");

    let reason = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reason, ShutdownReason::ClientConfirmed);

    // Without --wipe the source stays
    assert!(path.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_received_file_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let path = write_source(&src, "secret.txt", b"hunter2");

    let (url, _server) = start(options(path, TARGET)).await;
    let retrieval = receive(&url, out.path(), Duration::from_secs(10)).await.unwrap();

    let mode = std::fs::metadata(&retrieval.saved_path)
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[tokio::test]
async fn test_receive_never_overwrites() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let path = write_source(&src, "data.txt", b"new contents");
    std::fs::write(out.path().join("data.txt"), b"original").unwrap();

    let (url, _server) = start(options(path, TARGET)).await;
    let retrieval = receive(&url, out.path(), Duration::from_secs(10)).await.unwrap();

    assert_eq!(retrieval.saved_path, out.path().join("data-1.txt"));
    assert!(retrieval.was_renamed());
    assert_eq!(std::fs::read(out.path().join("data.txt")).unwrap(), b"original");
    assert_eq!(std::fs::read(&retrieval.saved_path).unwrap(), b"new contents");
}

#[tokio::test]
async fn test_wipe_removes_source_after_burn() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let path = write_source(&src, "once.bin", &[7u8; 4096]);

    let mut opts = options(path.clone(), TARGET);
    opts.wipe = true;
    let (url, server) = start(opts).await;

    let retrieval = receive(&url, out.path(), Duration::from_secs(10)).await.unwrap();
    assert_eq!(retrieval.bytes, 4096);

    let reason = server.await.unwrap().unwrap();
    assert_eq!(reason, ShutdownReason::ClientConfirmed);
    assert!(!path.exists());
}

#[tokio::test]
async fn test_unauthorized_peer_is_rejected() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let path = write_source(&src, "report.pdf", b"twelve bytes");

    let (url, _server) = start(options(path, "mallory@example.com")).await;

    let result = receive(&url, out.path(), Duration::from_secs(10)).await;
    assert!(matches!(result, Err(ReceiveError::Rejected(403))));
    // Nothing is written for a rejected request
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_second_receive_is_gone() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let path = write_source(&src, "report.pdf", b"twelve bytes");

    let mut opts = options(path, TARGET);
    opts.drain_timeout = Duration::from_secs(2);
    let (url, _server) = start(opts).await;

    receive(&url, out.path(), Duration::from_secs(10)).await.unwrap();

    // The listener may already be closed; either way the file is not served again
    match receive(&url, out.path(), Duration::from_secs(2)).await {
        Err(ReceiveError::Rejected(status)) => assert_eq!(status, 410),
        Err(ReceiveError::Connection(_)) => {}
        other => panic!("unexpected second retrieval: {:?}", other.map(|r| r.saved_path)),
    }
    assert!(!out.path().join("report-1.pdf").exists());
}

#[tokio::test]
async fn test_share_times_out() {
    let src = tempfile::tempdir().unwrap();
    let path = write_source(&src, "late.txt", b"never fetched");

    let mut opts = options(path, TARGET);
    opts.timeout = Duration::from_millis(50);
    let (_url, server) = start(opts).await;

    let reason = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reason, ShutdownReason::TimeoutReached);
}

#[tokio::test]
async fn test_browser_download_burns_over_socket() {
    let src = tempfile::tempdir().unwrap();
    let path = write_source(&src, "report.pdf", b"twelve bytes");

    let mut opts = options(path, TARGET);
    opts.browser_policy = BrowserCompletionPolicy {
        delay: Duration::from_millis(500),
    };
    let (url, server) = start(opts).await;
    let client = reqwest::Client::new();

    // Form submit from the landing page, no client header
    let response = client.post(&url).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(&response.bytes().await.unwrap()[..], b"twelve bytes");

    let again = client.post(&url).send().await.unwrap();
    assert_eq!(again.status(), reqwest::StatusCode::GONE);
    assert!(again.text().await.unwrap().contains("Link Burned"));

    let reason = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reason, ShutdownReason::BrowserDownloadFinished);
}
