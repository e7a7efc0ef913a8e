//! Configuration validation.
//!
//! # Responsibilities
//! - Port is non-zero and unique across entries
//! - Target parses as an absolute `http`/`https` URL with a host
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Pure function over the parsed entries
//! - Exclusion patterns are not validated here: invalid ones are tolerated
//!   and dropped when the instance compiles them

use std::collections::HashSet;

use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid port key {0:?}")]
    InvalidPortKey(String),
    #[error("port must be greater than zero")]
    ZeroPort,
    #[error("port {0} configured more than once")]
    DuplicatePort(u16),
    #[error("port {port}: invalid target url {target:?}: {reason}")]
    InvalidTarget { port: u16, target: String, reason: String },
}

/// Parse and check a target URL.
pub fn parse_target(target: &str) -> Result<Url, String> {
    let url = Url::parse(target.trim()).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("unsupported scheme {:?}", other)),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err("missing host".to_string());
    }
    Ok(url)
}

/// Validate a full set of proxy entries.
pub fn validate_config(configs: &[ProxyConfig]) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for config in configs {
        if config.port == 0 {
            errors.push(ValidationError::ZeroPort);
        } else if !seen.insert(config.port) {
            errors.push(ValidationError::DuplicatePort(config.port));
        }

        if let Err(reason) = parse_target(&config.target) {
            errors.push(ValidationError::InvalidTarget {
                port: config.port,
                target: config.target.clone(),
                reason,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
