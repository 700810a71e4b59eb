//! Configuration file support for portfwdd
//!
//! Loads and validates daemon configuration from TOML files.
//! Default location: /etc/portfwd/portfwdd.toml

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use portfwd_common::{shell, FwdError, FwdResult};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/portfwd/portfwdd.toml";

/// Control surface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP control surface binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

/// NAT backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatConfig {
    /// Public address of this host, matched by DNAT rules
    #[serde(default)]
    pub public_ip: Option<String>,

    /// iptables binary
    #[serde(default = "default_iptables_cmd")]
    pub iptables_cmd: String,

    /// Upper bound on a single iptables invocation, in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

/// Relay backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay binary (socat-compatible)
    #[serde(default = "default_socat_cmd")]
    pub socat_cmd: String,

    /// How long a new relay must survive before install succeeds, in
    /// milliseconds. 0 disables the check.
    #[serde(default = "default_startup_grace")]
    pub startup_grace_ms: u64,
}

/// Desired-state store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON table location
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

/// Complete portfwdd configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Log level used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub nat: NatConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

// Default functions
fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 392))
}

fn default_iptables_cmd() -> String {
    shell::IPTABLES_CMD.to_string()
}

fn default_command_timeout() -> u64 {
    10
}

fn default_socat_cmd() -> String {
    shell::SOCAT_CMD.to_string()
}

fn default_startup_grace() -> u64 {
    200
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./ports.json")
}

fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations
impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl Default for NatConfig {
    fn default() -> Self {
        Self {
            public_ip: None,
            iptables_cmd: default_iptables_cmd(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            socat_cmd: default_socat_cmd(),
            startup_grace_ms: default_startup_grace(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            server: ServerConfig::default(),
            nat: NatConfig::default(),
            relay: RelayConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> FwdResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                FwdError::invalid_config(
                    path.display().to_string(),
                    format!("failed to parse: {}", e),
                )
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Config file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(FwdError::invalid_config(
                path.display().to_string(),
                e.to_string(),
            )),
        }
    }

    /// Public IP, once validated
    pub fn public_ip(&self) -> FwdResult<&str> {
        self.nat
            .public_ip
            .as_deref()
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| FwdError::invalid_config("nat.public_ip", "must be set"))
    }

    /// Get iptables timeout as Duration
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.nat.command_timeout_secs)
    }

    /// Get relay startup grace as Duration
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.relay.startup_grace_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> FwdResult<()> {
        let public_ip = self.public_ip()?;
        if public_ip.parse::<IpAddr>().is_err() {
            return Err(FwdError::invalid_config(
                "nat.public_ip",
                format!("'{}' is not an IP address", public_ip),
            ));
        }

        if self.nat.iptables_cmd.is_empty() {
            return Err(FwdError::invalid_config("nat.iptables_cmd", "must not be empty"));
        }

        if self.nat.command_timeout_secs == 0 {
            return Err(FwdError::invalid_config(
                "nat.command_timeout_secs",
                "must be > 0",
            ));
        }

        if self.relay.socat_cmd.is_empty() {
            return Err(FwdError::invalid_config("relay.socat_cmd", "must not be empty"));
        }

        Ok(())
    }
}
