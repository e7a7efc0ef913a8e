//! Command-line interface.
//!
//! With both `--port` and `--target` a single entry is built from the flags
//! and no file is read; otherwise the TOML config file supplies every entry.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::{duration::parse_duration, load_config, single_entry, ConfigError, GatewaySettings, ProxyConfig};

#[derive(Debug, Parser)]
#[command(name = "hdproxy")]
#[command(about = "Capturing reverse proxy: forwards each port to a target and dumps every exchange", long_about = None)]
pub struct Cli {
    /// Config file to read when no --port/--target pair is given
    #[arg(short, long, default_value = "hdproxy.toml")]
    pub config: PathBuf,

    /// Local port to listen on
    #[arg(short, long, default_value_t = 0)]
    pub port: u16,

    /// Target URL to proxy to
    #[arg(short, long, default_value = "")]
    pub target: String,

    /// How long to hold each request before forwarding (e.g. 500ms, 2s, 1m30s)
    #[arg(long, value_parser = parse_duration, default_value = "0")]
    pub hold: Duration,

    /// Request-target pattern to leave out of the capture (repeatable)
    #[arg(short = 'x', long = "exclude")]
    pub exclude: Vec<String>,

    /// Directory for access logs and dumps
    #[arg(long, default_value = "log")]
    pub log_dir: PathBuf,

    /// Interface to bind every listener to
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: String,

    /// Expose Prometheus metrics on this address
    #[arg(long)]
    pub metrics_address: Option<SocketAddr>,
}

impl Cli {
    /// Proxy entries from the flags, or from the config file.
    pub fn proxy_configs(&self) -> Result<Vec<ProxyConfig>, ConfigError> {
        let target = self.target.trim();
        if self.port != 0 && !target.is_empty() {
            return single_entry(
                ProxyConfig::new(self.port, target)
                    .with_hold(self.hold)
                    .with_exclude_patterns(self.exclude.iter().cloned()),
            );
        }
        load_config(&self.config)
    }

    pub fn settings(&self) -> GatewaySettings {
        GatewaySettings {
            log_dir: self.log_dir.clone(),
            bind_host: self.bind.clone(),
            metrics_address: self.metrics_address,
            ..GatewaySettings::default()
        }
    }
}
