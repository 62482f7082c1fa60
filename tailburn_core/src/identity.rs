//! Mapping connecting peers to login identities.
//!
//! The share is only as private as this lookup: every request to the
//! delivery route goes through [`IdentityResolver::resolve`] before anything
//! else is decided.

use crate::config::IdentityProvider;
use crate::error::IdentityError;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Login identity of the peer behind `peer`
    async fn resolve(&self, peer: SocketAddr) -> Result<String, IdentityError>;

    /// Login identity of this process
    async fn self_identity(&self) -> Result<String, IdentityError>;
}

/// Build the resolver selected in the config
pub fn from_provider(
    provider: &IdentityProvider,
    self_identity: Option<String>,
) -> Arc<dyn IdentityResolver> {
    match provider {
        IdentityProvider::Tailscale { binary } => Arc::new(TailscaleResolver::new(binary.clone())),
        IdentityProvider::Static { peers } => {
            Arc::new(StaticResolver::new(peers.clone(), self_identity))
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserProfile {
    #[serde(rename = "LoginName")]
    login_name: String,
}

#[derive(Debug, Deserialize)]
struct WhoIsResponse {
    #[serde(rename = "UserProfile")]
    user_profile: Option<UserProfile>,
}

#[derive(Debug, Deserialize)]
struct SelfStatus {
    #[serde(rename = "UserID")]
    user_id: i64,
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(rename = "Self")]
    self_status: Option<SelfStatus>,
    #[serde(rename = "User", default)]
    users: Option<HashMap<String, UserProfile>>,
}

/// Resolver backed by the `tailscale` CLI of the local daemon
pub struct TailscaleResolver {
    binary: PathBuf,
}

impl TailscaleResolver {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    async fn run_json(&self, args: &[&str]) -> Result<Vec<u8>, IdentityError> {
        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(IdentityError::LookupFailed {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl IdentityResolver for TailscaleResolver {
    async fn resolve(&self, peer: SocketAddr) -> Result<String, IdentityError> {
        let addr = peer.ip().to_string();
        let stdout = self.run_json(&["whois", "--json", &addr]).await?;
        parse_whois(&stdout)?.ok_or(IdentityError::Unknown(addr))
    }

    async fn self_identity(&self) -> Result<String, IdentityError> {
        let stdout = self.run_json(&["status", "--json"]).await?;
        parse_self_login(&stdout)?.ok_or_else(|| IdentityError::Unknown("self".to_string()))
    }
}

fn parse_whois(raw: &[u8]) -> Result<Option<String>, IdentityError> {
    let who: WhoIsResponse = serde_json::from_slice(raw)?;
    Ok(who.user_profile.map(|p| p.login_name))
}

fn parse_self_login(raw: &[u8]) -> Result<Option<String>, IdentityError> {
    let status: Status = serde_json::from_slice(raw)?;
    let Some(me) = status.self_status else {
        return Ok(None);
    };
    Ok(status
        .users
        .and_then(|mut users| users.remove(&me.user_id.to_string()))
        .map(|p| p.login_name))
}

/// Resolver with a fixed table of peer addresses
pub struct StaticResolver {
    peers: HashMap<IpAddr, String>,
    self_login: Option<String>,
}

impl StaticResolver {
    pub fn new(peers: HashMap<IpAddr, String>, self_login: Option<String>) -> Self {
        Self { peers, self_login }
    }
}

#[async_trait]
impl IdentityResolver for StaticResolver {
    async fn resolve(&self, peer: SocketAddr) -> Result<String, IdentityError> {
        self.peers
            .get(&peer.ip())
            .cloned()
            .ok_or_else(|| IdentityError::Unknown(peer.ip().to_string()))
    }

    async fn self_identity(&self) -> Result<String, IdentityError> {
        self.self_login
            .clone()
            .ok_or_else(|| IdentityError::Unknown("self".to_string()))
    }
}
