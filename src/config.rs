//! Configuration handling for proton-connect
//!
//! Everything lives under one home directory (default `~/.proton-connect`):
//!
//! | Path | Contents |
//! |------|----------|
//! | `config.toml` | This configuration |
//! | `vpns/` | `*.ovpn` files from the ProtonVPN bundle |
//! | `credentials` | Saved credential strategy (see `credentials`) |

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const HOME_DIR_NAME: &str = ".proton-connect";
const CONFIG_FILE: &str = "config.toml";
const VPN_DIR: &str = "vpns";
const CREDENTIALS_FILE: &str = "credentials";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("Could not determine home directory")]
    NoHomeDir,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bundle: BundleConfig,
    pub catalog: CatalogConfig,
    pub session: SessionConfig,
    pub ip_lookup: IpLookupConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleConfig {
    /// Where `init` downloads the OpenVPN configuration archive from
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Transport of the `.ovpn` files to consider ("udp" or "tcp")
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// tmux session name
    pub name: String,
    /// Secret store binary used for one-line credential files
    pub secret_store: String,
    /// Command run before openvpn to bring the network up
    pub netcmd: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpLookupConfig {
    pub enabled: bool,
    pub url: String,
    pub delay_secs: u64,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            url: "https://protonvpn.com/download/ProtonVPN_server_configs.zip".to_string(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            protocol: "udp".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "proton-connect".to_string(),
            secret_store: "pass".to_string(),
            netcmd: None,
        }
    }
}

impl Default for IpLookupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "https://ipinfo.io/json".to_string(),
            delay_secs: 10,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Filesystem layout rooted at the proton-connect home directory
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// `~/.proton-connect`
    pub fn default_root() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(HOME_DIR_NAME))
            .ok_or(ConfigError::NoHomeDir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn vpn_dir(&self) -> PathBuf {
        self.root.join(VPN_DIR)
    }

    pub fn credentials_file(&self) -> PathBuf {
        self.root.join(CREDENTIALS_FILE)
    }
}
