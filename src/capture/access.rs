//! Access-log line formatting.
//!
//! Lines follow the combined-log layout, extended with the forwarded origin
//! and the correlated request timestamp:
//!
//! ```text
//! 127.0.0.1:51234 - - [18/October/2026:10:01:02 +0000] "GET /foo?q=1 HTTP/1.1" 200 42 "http://localhost:9000" "curl/8.0" 1792058462000000000
//! ```

use std::fmt;

use axum::http::{Method, StatusCode, Version};
use chrono::{DateTime, Local};

use crate::capture::correlation::Timestamp;

/// Date layout used inside the brackets.
const DATE_FORMAT: &str = "%d/%B/%Y:%H:%M:%S %z";

fn write_prefix(f: &mut fmt::Formatter<'_>, client_addr: &str, at: &DateTime<Local>) -> fmt::Result {
    write!(f, "{} - - [{}]", client_addr, at.format(DATE_FORMAT))
}

/// Outcome of a completed exchange.
#[derive(Debug, Clone)]
pub struct Completion {
    pub status: StatusCode,
    pub bytes: usize,
    /// `scheme://host` the request was forwarded to.
    pub origin: String,
    pub user_agent: String,
    /// Correlated arrival timestamp; `None` on a correlation miss.
    pub request_ts: Option<Timestamp>,
}

/// One HTTP exchange, completed or failed.
#[derive(Debug, Clone)]
pub struct AccessRecord {
    pub client_addr: String,
    pub at: DateTime<Local>,
    pub method: Method,
    pub target: String,
    pub version: Version,
    /// `None` when the upstream never produced a response.
    pub completion: Option<Completion>,
}

impl fmt::Display for AccessRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_prefix(f, &self.client_addr, &self.at)?;
        write!(f, " \"{} {} {:?}\"", self.method, self.target, self.version)?;

        if let Some(done) = &self.completion {
            write!(
                f,
                " {} {} \"{}\" \"{}\" ",
                done.status.as_u16(),
                done.bytes,
                done.origin,
                done.user_agent
            )?;
            match done.request_ts {
                Some(ts) => write!(f, "{}", ts)?,
                None => f.write_str("-")?,
            }
        }
        Ok(())
    }
}

/// Lifecycle stage of a WebSocket tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelEvent {
    /// Upgrade received; about to dial `upstream`.
    Attempt { upstream: String },
    Connected,
    Closed,
}

/// One tunnel lifecycle line.
#[derive(Debug, Clone)]
pub struct TunnelRecord {
    pub client_addr: String,
    pub at: DateTime<Local>,
    pub path: String,
    pub version: Version,
    pub event: TunnelEvent,
}

impl fmt::Display for TunnelRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_prefix(f, &self.client_addr, &self.at)?;
        match &self.event {
            TunnelEvent::Attempt { upstream } => {
                write!(f, " \"WS {} {:?}\" -> {}", self.path, self.version, upstream)
            }
            TunnelEvent::Connected => write!(f, " \"WS {}\" CONNECTED", self.path),
            TunnelEvent::Closed => write!(f, " \"WS {}\" CLOSED", self.path),
        }
    }
}
