use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "tailburn";
const APP_NAME: &str = "tail-burn";
const CONFIG_FILE: &str = "config.json";

/// Overrides the directory `config.json` is read from
pub const CONFIG_DIR_ENV: &str = "TAIL_BURN_CONFIG_DIR";

/// Default HTTP port for the share listener
pub const DEFAULT_PORT: u16 = 8080;

/// Where login identities come from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum IdentityProvider {
    /// Ask the local tailscale daemon through its CLI
    Tailscale {
        #[serde(default = "default_tailscale_binary")]
        binary: PathBuf,
    },
    /// Fixed peer address to login mapping
    Static {
        #[serde(default)]
        peers: HashMap<IpAddr, String>,
    },
}

fn default_tailscale_binary() -> PathBuf {
    PathBuf::from("tailscale")
}

impl Default for IdentityProvider {
    fn default() -> Self {
        IdentityProvider::Tailscale {
            binary: default_tailscale_binary(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BurnConfig {
    /// Minutes before the share burns itself unused
    pub timeout_minutes: u64,
    /// Grace period between a finished browser download and shutdown
    pub browser_shutdown_delay_secs: u64,
    /// Upper bound on draining in-flight connections during shutdown
    pub drain_timeout_secs: u64,
    pub port: u16,
    /// Bind address; when unset the tailnet interface is preferred
    pub bind_address: Option<IpAddr>,
    /// Host name advertised in the share URL
    pub public_host: Option<String>,
    pub identity: IdentityProvider,
    /// Sender label for the landing page when the resolver cannot provide one
    pub self_identity: Option<String>,
    /// Whole-request timeout used by `receive`
    pub client_timeout_secs: u64,
}

impl Default for BurnConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: 10,
            browser_shutdown_delay_secs: 5,
            drain_timeout_secs: 5,
            port: DEFAULT_PORT,
            bind_address: None,
            public_host: None,
            identity: IdentityProvider::default(),
            self_identity: None,
            client_timeout_secs: 60,
        }
    }
}

impl BurnConfig {
    /// Get the config file path
    fn get_config_path() -> Option<PathBuf> {
        if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
            return Some(PathBuf::from(dir).join(CONFIG_FILE));
        }

        get_config_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    /// Load config from disk or return default.
    ///
    /// A `.env` file in the working directory is applied first so that
    /// `TAIL_BURN_CONFIG_DIR` can be set there.
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();

        let path = match Self::get_config_path() {
            Some(p) => p,
            None => return Self::default(),
        };

        match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring invalid config {:?}: {}", path, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes * 60)
    }

    pub fn browser_shutdown_delay(&self) -> Duration {
        Duration::from_secs(self.browser_shutdown_delay_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }
}

/// Get the config directory path for this app
pub fn get_config_dir() -> Option<PathBuf> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
        .map(|dirs| dirs.config_dir().to_path_buf())
}
