//! Retrieval client: download once, verify, then confirm.
//!
//! The protocol is two-phase. The download request carries the cooperating
//! client header so the server keeps the session retriable, and only after the
//! byte count checks out is the acknowledgment posted to burn the share.

use super::constants::PLACEHOLDER_FILE_NAME;
use super::utils::{create_unique_file, parse_content_disposition, sanitize_file_name};
use crate::error::ReceiveError;
use crate::session::{ACK_SUFFIX, CLIENT_HEADER};
use reqwest::{Client, StatusCode, header};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use url::Url;

/// How the server answered the acknowledgment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// 200 from the kill switch
    Confirmed,
    /// The server answered but did not confirm
    NotConfirmed(u16),
    /// No answer, the server may already have timed out
    Unreachable(String),
}

/// Transcript of one retrieval
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub url: String,
    /// Name the server suggested, after sanitizing
    pub suggested_name: String,
    pub saved_path: PathBuf,
    pub bytes: u64,
    pub ack: AckOutcome,
}

impl Retrieval {
    /// True when the output was renamed to avoid an existing file
    pub fn was_renamed(&self) -> bool {
        self.saved_path
            .file_name()
            .is_none_or(|n| n.to_string_lossy() != self.suggested_name)
    }
}

pub struct Receiver {
    client: Client,
    output_dir: PathBuf,
}

impl Receiver {
    pub fn new(output_dir: PathBuf, timeout: Duration) -> Result<Self, ReceiveError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ReceiveError::Connection)?;
        Ok(Self { client, output_dir })
    }

    /// Run the full protocol against `url`
    pub async fn receive(&self, url: &str) -> Result<Retrieval, ReceiveError> {
        let target = Url::parse(url)?;
        tracing::info!("Connecting to tail-burn server at {}", target);

        // 1. Identified download request
        let mut resp = self
            .client
            .get(target.clone())
            .header(CLIENT_HEADER, "true")
            .send()
            .await
            .map_err(ReceiveError::Connection)?;

        if resp.status() != StatusCode::OK {
            return Err(ReceiveError::Rejected(resp.status().as_u16()));
        }

        // 2. File name from the disposition header, placeholder otherwise
        let suggested_name = resp
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_disposition)
            .map(|name| sanitize_file_name(&name))
            .unwrap_or_else(|| PLACEHOLDER_FILE_NAME.to_string());
        let expected = resp.content_length().unwrap_or(0);

        // 3. Collision-free output file
        let (saved_path, mut file) = create_unique_file(&self.output_dir, &suggested_name)
            .await
            .map_err(|source| ReceiveError::CreateFile {
                path: self.output_dir.join(&suggested_name),
                source,
            })?;
        if saved_path.file_name().is_some_and(|n| n != suggested_name.as_str()) {
            tracing::warn!(
                "File '{}' exists. Saving as {:?} instead",
                suggested_name,
                saved_path
            );
        }

        // 4. Stream the body to disk
        tracing::info!("Downloading to {:?}", saved_path);
        let mut received: u64 = 0;
        loop {
            let chunk = match resp.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) if expected > 0 => {
                    // A truncated body is an integrity problem, not a transport one
                    tracing::warn!("Body ended early after {} bytes: {}", received, e);
                    file.flush().await?;
                    return Err(ReceiveError::Incomplete { expected, received });
                }
                Err(source) => {
                    file.flush().await?;
                    return Err(ReceiveError::Interrupted { received, source });
                }
            };
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        // 5. Integrity check against the declared length
        if expected > 0 && received != expected {
            return Err(ReceiveError::Incomplete { expected, received });
        }
        tracing::info!("Download complete ({} bytes)", received);

        // 6. Kill switch. Failures here never undo the download.
        let ack = self.acknowledge(&target).await;

        Ok(Retrieval {
            url: url.to_string(),
            suggested_name,
            saved_path,
            bytes: received,
            ack,
        })
    }

    async fn acknowledge(&self, target: &Url) -> AckOutcome {
        let ack_url = ack_url(target);
        tracing::info!("Sending kill signal to {}", ack_url);

        match self
            .client
            .post(ack_url)
            .header(header::CONTENT_TYPE, "text/plain")
            .send()
            .await
        {
            Ok(resp) if resp.status() == StatusCode::OK => AckOutcome::Confirmed,
            Ok(resp) => {
                tracing::warn!("Server responded {} to acknowledgment", resp.status());
                AckOutcome::NotConfirmed(resp.status().as_u16())
            }
            Err(e) => {
                tracing::warn!("Acknowledgment failed: {}", e);
                AckOutcome::Unreachable(e.to_string())
            }
        }
    }
}

/// `<url>/ack`, tolerating a trailing slash on the share URL
pub fn ack_url(target: &Url) -> String {
    let mut ack = target.clone();
    let path = format!("{}{}", target.path().trim_end_matches('/'), ACK_SUFFIX);
    ack.set_path(&path);
    ack.set_query(None);
    ack.to_string()
}

/// Download `url` into `output_dir` with the given whole-request timeout
pub async fn receive(
    url: &str,
    output_dir: &Path,
    timeout: Duration,
) -> Result<Retrieval, ReceiveError> {
    Receiver::new(output_dir.to_path_buf(), timeout)?
        .receive(url)
        .await
}
