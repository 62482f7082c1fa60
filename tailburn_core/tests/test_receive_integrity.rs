//! Retrieval client against hand-written HTTP responses.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tailburn_core::ReceiveError;
use tailburn_core::transfer::{AckOutcome, receive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Canned responses for the download and the acknowledgment
#[derive(Clone)]
struct Script {
    download: Vec<u8>,
    ack: &'static str,
}

async fn read_request_line(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    String::from_utf8_lossy(&buf)
        .lines()
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Serve `script` forever, counting acknowledgments
async fn spawn_server(script: Script) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let acks = Arc::new(AtomicUsize::new(0));

    let counter = acks.clone();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let script = script.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                let line = read_request_line(&mut stream).await;
                if line.contains("/ack") {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let _ = stream.write_all(script.ack.as_bytes()).await;
                } else {
                    let _ = stream.write_all(&script.download).await;
                }
                let _ = stream.shutdown().await;
            });
        }
    });

    (format!("http://{}/0123456789abcdef", addr), acks)
}

fn response(headers: &str, body: &[u8]) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 200 OK\r\n{}Connection: close\r\n\r\n", headers).into_bytes();
    out.extend_from_slice(body);
    out
}

const ACK_OK: &str = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nOK";

#[tokio::test]
async fn test_truncated_body_is_not_acknowledged() {
    let (url, acks) = spawn_server(Script {
        download: response(
            "Content-Length: 10\r\nContent-Disposition: attachment; filename=\"short.bin\"\r\n",
            b"12345",
        ),
        ack: ACK_OK,
    })
    .await;
    let out = tempfile::tempdir().unwrap();

    let err = receive(&url, out.path(), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(err.is_integrity_failure(), "got {:?}", err);
    assert!(matches!(
        err,
        ReceiveError::Incomplete {
            expected: 10,
            received: 5
        }
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(acks.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_complete_body_is_acknowledged() {
    let (url, acks) = spawn_server(Script {
        download: response(
            "Content-Length: 5\r\nContent-Disposition: attachment; filename=\"hello.txt\"\r\n",
            b"hello",
        ),
        ack: ACK_OK,
    })
    .await;
    let out = tempfile::tempdir().unwrap();

    let retrieval = receive(&url, out.path(), Duration::from_secs(5)).await.unwrap();
    assert_eq!(retrieval.ack, AckOutcome::Confirmed);
    assert_eq!(retrieval.suggested_name, "hello.txt");
    assert_eq!(std::fs::read(out.path().join("hello.txt")).unwrap(), b"hello");
    assert_eq!(acks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_disposition_uses_placeholder() {
    let (url, _acks) = spawn_server(Script {
        download: response("Content-Length: 3\r\n", b"abc"),
        ack: ACK_OK,
    })
    .await;
    let out = tempfile::tempdir().unwrap();

    let retrieval = receive(&url, out.path(), Duration::from_secs(5)).await.unwrap();
    assert_eq!(retrieval.saved_path, out.path().join("downloaded_file"));
}

#[tokio::test]
async fn test_hostile_file_name_stays_in_output_dir() {
    let (url, _acks) = spawn_server(Script {
        download: response(
            "Content-Length: 3\r\nContent-Disposition: attachment; filename=\"../../etc/passwd\"\r\n",
            b"abc",
        ),
        ack: ACK_OK,
    })
    .await;
    let out = tempfile::tempdir().unwrap();

    let retrieval = receive(&url, out.path(), Duration::from_secs(5)).await.unwrap();
    assert_eq!(retrieval.saved_path.parent().unwrap(), out.path());
    assert_eq!(retrieval.suggested_name, "passwd");
}

#[tokio::test]
async fn test_failed_ack_keeps_download() {
    let (url, acks) = spawn_server(Script {
        download: response(
            "Content-Length: 4\r\nContent-Disposition: attachment; filename=\"keep.txt\"\r\n",
            b"keep",
        ),
        ack: "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
    })
    .await;
    let out = tempfile::tempdir().unwrap();

    let retrieval = receive(&url, out.path(), Duration::from_secs(5)).await.unwrap();
    assert_eq!(retrieval.ack, AckOutcome::NotConfirmed(500));
    assert_eq!(std::fs::read(out.path().join("keep.txt")).unwrap(), b"keep");
    assert_eq!(acks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rejected_status_writes_nothing() {
    let (url, acks) = spawn_server(Script {
        download: b"HTTP/1.1 410 Gone\r\nContent-Length: 4\r\nConnection: close\r\n\r\nGone".to_vec(),
        ack: ACK_OK,
    })
    .await;
    let out = tempfile::tempdir().unwrap();

    let err = receive(&url, out.path(), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, ReceiveError::Rejected(410)));
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    assert_eq!(acks.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unreachable_server() {
    // Bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let out = tempfile::tempdir().unwrap();
    let err = receive(&format!("http://{}/abc", addr), out.path(), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, ReceiveError::Connection(_)));
}

#[tokio::test]
async fn test_invalid_url() {
    let out = tempfile::tempdir().unwrap();
    let err = receive("not a url", out.path(), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, ReceiveError::InvalidUrl(_)));
}
