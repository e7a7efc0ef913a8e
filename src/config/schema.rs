//! Configuration schema definitions.
//!
//! The config file holds one table per listening port:
//!
//! ```toml
//! [8080]
//! target = "http://localhost:9000"
//! hold = "2s"
//! nolog = ["^/health$"]
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// One proxied port: where to listen, where to forward, how to behave.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProxyConfig {
    /// Listening port. Filled from the table key when read from a file.
    #[serde(skip)]
    pub port: u16,

    /// Absolute upstream URL (`http` or `https`).
    pub target: String,

    /// Delay applied to every request before it is forwarded.
    #[serde(default, deserialize_with = "crate::config::duration::deserialize")]
    pub hold: Duration,

    /// Regular expressions; matching request targets are not captured.
    #[serde(default, rename = "nolog", alias = "exclude")]
    pub exclude_patterns: Vec<String>,
}

impl ProxyConfig {
    pub fn new(port: u16, target: impl Into<String>) -> Self {
        Self {
            port,
            target: target.into(),
            hold: Duration::ZERO,
            exclude_patterns: Vec::new(),
        }
    }

    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    pub fn with_exclude_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }
}

/// Process-wide settings shared by every proxy instance.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Root of the per-port log directories and access-log files.
    pub log_dir: PathBuf,

    /// Interface every listener binds to.
    pub bind_host: String,

    /// Prometheus scrape endpoint; disabled when `None`.
    pub metrics_address: Option<SocketAddr>,

    /// Bound on graceful shutdown.
    pub shutdown_deadline: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("log"),
            bind_host: "0.0.0.0".to_string(),
            metrics_address: None,
            shutdown_deadline: Duration::from_secs(60),
        }
    }
}
