//! Server configuration.
//!
//! A server is configured from the command line (`fusion-server <NAME>
//! <PORT>`), optionally on top of a TOML file passed with `--config`.
//! Command-line values win over the file.
//!
//! ```toml
//! name = "alpha"
//! listen_addr = "0.0.0.0:7777"
//! advertised_addr = "192.168.1.10:7777"
//! ```

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
};

use clap::Parser;
use fusion_proto::limits::is_valid_server_name;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServerError};

/// Capacity of the readiness event buffer unless configured.
pub const DEFAULT_EVENTS_CAPACITY: usize = 1_024;

/// Command line of the `fusion-server` binary.
#[derive(Parser, Debug)]
#[command(name = "fusion-server")]
#[command(about = "ChatFusion federated chat server")]
#[command(version)]
pub struct Cli {
    /// Server name, unique within a federation
    pub name: Option<String>,

    /// Port to listen on
    pub port: Option<u16>,

    /// Address to bind the listener to
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Address other servers should use to reach this one
    #[arg(long)]
    pub advertise: Option<SocketAddr>,

    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Merge the command line with the optional configuration file.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the file cannot be loaded, if name or port are
    /// missing from both sources, or if the result is invalid.
    pub fn into_config(self) -> Result<Config> {
        let config = match &self.config {
            Some(path) => {
                let mut config = Config::from_file(path)?;
                if let Some(name) = self.name {
                    config.name = name;
                }
                if let Some(port) = self.port {
                    config.listen_addr = SocketAddr::new(self.bind, port);
                }
                if self.advertise.is_some() {
                    config.advertised_addr = self.advertise;
                }
                config
            },
            None => match (self.name, self.port) {
                (Some(name), Some(port)) => Config {
                    advertised_addr: self.advertise,
                    ..Config::new(name, SocketAddr::new(self.bind, port))
                },
                _ => return Err(ServerError::Config("server name and port are required".to_string())),
            },
        };

        config.validate()?;
        Ok(config)
    }
}

/// Settings of one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Server name
    pub name: String,
    /// Listener address
    pub listen_addr: SocketAddr,
    /// Address announced to other servers; derived from `listen_addr` when
    /// unset
    #[serde(default)]
    pub advertised_addr: Option<SocketAddr>,
    /// Readiness events handled per poll
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,
}

fn default_events_capacity() -> usize {
    DEFAULT_EVENTS_CAPACITY
}

impl Config {
    /// Configuration with defaults for everything but name and listener
    #[must_use]
    pub fn new(name: impl Into<String>, listen_addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            listen_addr,
            advertised_addr: None,
            events_capacity: DEFAULT_EVENTS_CAPACITY,
        }
    }

    /// Load a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, `Config` if it does not parse.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| ServerError::Config(format!("TOML parse error: {e}")))
    }

    /// Check the name and sizes.
    ///
    /// # Errors
    ///
    /// Returns `Config` describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_server_name(&self.name) {
            return Err(ServerError::Config(format!("invalid server name {:?}", self.name)));
        }
        if self.events_capacity == 0 {
            return Err(ServerError::Config("events_capacity must be positive".to_string()));
        }
        Ok(())
    }

    /// Address announced in fusion frames.
    ///
    /// Without an explicit setting this is the listener address, with an
    /// unspecified IP replaced by loopback.
    #[must_use]
    pub fn advertised(&self) -> SocketAddr {
        if let Some(addr) = self.advertised_addr {
            return addr;
        }
        let mut addr = self.listen_addr;
        if addr.ip().is_unspecified() {
            addr.set_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
        }
        addr
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("fusion-server").chain(args.iter().copied()))
    }

    #[test]
    fn positional_name_and_port() {
        let config = cli(&["alpha", "7777"]).into_config().unwrap();
        assert_eq!(config.name, "alpha");
        assert_eq!(config.listen_addr, "0.0.0.0:7777".parse().unwrap());
        assert_eq!(config.advertised(), "127.0.0.1:7777".parse().unwrap());
    }

    #[test]
    fn advertise_overrides_derived_address() {
        let config = cli(&["alpha", "7777", "--advertise", "10.0.0.5:7777"]).into_config().unwrap();
        assert_eq!(config.advertised(), "10.0.0.5:7777".parse().unwrap());
    }

    #[test]
    fn missing_port_is_rejected() {
        assert!(matches!(cli(&["alpha"]).into_config(), Err(ServerError::Config(_))));
    }

    #[test]
    fn invalid_name_is_rejected() {
        let long = "n".repeat(100);
        assert!(matches!(cli(&[long.as_str(), "7777"]).into_config(), Err(ServerError::Config(_))));
    }

    #[test]
    fn file_with_command_line_override() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(
            &path,
            r#"
name = "alpha"
listen_addr = "127.0.0.1:7777"
events_capacity = 64
"#,
        )
        .unwrap();

        let config = cli(&["--config", path.to_str().unwrap()]).into_config().unwrap();
        assert_eq!(config.name, "alpha");
        assert_eq!(config.events_capacity, 64);
        assert_eq!(config.advertised(), "127.0.0.1:7777".parse().unwrap());

        let config = cli(&["beta", "--config", path.to_str().unwrap()]).into_config().unwrap();
        assert_eq!(config.name, "beta");
        assert_eq!(config.listen_addr.port(), 7777);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(&path, "name = ").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ServerError::Config(_))));
    }
}
