//! Outbound stage: request rewriting and capture.
//!
//! # Responsibilities
//! - Identify the exchange (client, method, raw target, arrival time)
//! - Rewrite scheme, authority, path and `Host` toward the target
//! - Strip hop-by-hop headers and gzip acceptance before forwarding
//!
//! # Design Decisions
//! - Original request preserved for the dump; rewritten copy forwarded
//! - Path rewriting is prefix-append onto the target's base path, not a
//!   normalizing merge
//! - Upstream requests always go out as HTTP/1.1

use std::net::SocketAddr;
use std::time::Instant;

use axum::http::{
    header::{self, HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue},
    request::Parts,
    Method, Uri, Version,
};
use chrono::Local;
use thiserror::Error;
use url::Url;

use crate::capture::{AccessRecord, Completion, CorrelationKey, Timestamp};

/// Headers meaningful only for a single connection.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("invalid rewritten uri: {0}")]
    Uri(#[from] axum::http::Error),
    #[error("invalid host header: {0}")]
    Host(#[from] InvalidHeaderValue),
}

/// Raw request target as received: path plus query.
pub fn request_target(uri: &Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string())
}

/// `host[:port]` of the target, port only when explicit.
pub fn target_authority(target: &Url) -> String {
    let host = target.host_str().unwrap_or_default();
    match target.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Target base path with any trailing `/` dropped.
pub fn base_path(target: &Url) -> &str {
    target.path().trim_end_matches('/')
}

/// Map an inbound URI onto the target: `{scheme}://{authority}{base}{path}?{query}`.
pub fn rewrite_uri(target: &Url, uri: &Uri) -> Result<Uri, RewriteError> {
    let mut path_and_query = format!("{}{}", base_path(target), uri.path());
    if path_and_query.is_empty() {
        path_and_query.push('/');
    }
    if let Some(query) = uri.query() {
        path_and_query.push('?');
        path_and_query.push_str(query);
    }

    Ok(Uri::builder()
        .scheme(target.scheme())
        .authority(target_authority(target).as_str())
        .path_and_query(path_and_query.as_str())
        .build()?)
}

/// Point a request at `target`: URI, `Host`, version, hop-by-hop headers.
pub fn rewrite(parts: &mut Parts, target: &Url) -> Result<(), RewriteError> {
    parts.uri = rewrite_uri(target, &parts.uri)?;
    parts.version = Version::HTTP_11;
    remove_hop_by_hop(&mut parts.headers);
    parts
        .headers
        .insert(header::HOST, HeaderValue::from_str(&target_authority(target))?);
    Ok(())
}

/// Remove headers that apply to one connection only, including any
/// listed in `Connection`.
pub fn remove_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in &listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Drop `Accept-Encoding` when it advertises gzip so captured bodies stay
/// plaintext. Returns whether the header was removed.
pub fn strip_gzip(headers: &mut HeaderMap) -> bool {
    let advertises_gzip = headers
        .get_all(header::ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("gzip"));

    if advertises_gzip {
        headers.remove(header::ACCEPT_ENCODING);
    }
    advertises_gzip
}

/// Identity of one request/response exchange.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub client_addr: String,
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub user_agent: String,
    pub key: CorrelationKey,
    pub arrived: Timestamp,
    pub started: Instant,
    /// Matched an exclusion pattern: no dumps, no detailed log line.
    pub excluded: bool,
}

impl Exchange {
    /// Identify an inbound request, stamping its arrival time.
    pub fn new(client: SocketAddr, parts: &Parts, sequence: u64, excluded: bool) -> Self {
        let client_addr = client.to_string();
        let target = request_target(&parts.uri);
        let key = CorrelationKey::new(&client_addr, &parts.method, &target, sequence);
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        Self {
            client_addr,
            method: parts.method.clone(),
            target,
            version: parts.version,
            user_agent,
            key,
            arrived: Timestamp::now(),
            started: Instant::now(),
            excluded,
        }
    }

    /// Access record for an exchange the upstream never answered.
    pub fn failure_record(&self) -> AccessRecord {
        self.record(None)
    }

    /// Access record for a completed exchange.
    pub fn completion_record(&self, completion: Completion) -> AccessRecord {
        self.record(Some(completion))
    }

    fn record(&self, completion: Option<Completion>) -> AccessRecord {
        AccessRecord {
            client_addr: self.client_addr.clone(),
            at: Local::now(),
            method: self.method.clone(),
            target: self.target.clone(),
            version: self.version,
            completion,
        }
    }
}
