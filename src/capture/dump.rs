//! Wire-format dumps of requests and responses.
//!
//! Produces the raw text written into `{ts}-req` / `{ts}-resp` files: a
//! one-line summary followed by the message as it appeared on the wire
//! (start line, headers, blank line, body).

use axum::http::{HeaderMap, StatusCode, Uri, Version};

/// Serialize a request head and body as HTTP/1.x wire text.
///
/// `host` is emitted as a `Host` header when the header map lacks one
/// (HTTP/2 requests carry the authority in the URI instead).
pub fn request_wire(
    method: &axum::http::Method,
    uri: &Uri,
    version: Version,
    headers: &HeaderMap,
    body: &[u8],
) -> Vec<u8> {
    let target = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let mut out = format!("{} {} {:?}\r\n", method, target, version).into_bytes();

    if !headers.contains_key(axum::http::header::HOST) {
        if let Some(authority) = uri.authority() {
            out.extend_from_slice(format!("host: {}\r\n", authority).as_bytes());
        }
    }
    write_headers(&mut out, headers);
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

/// Serialize a response head and body as HTTP/1.x wire text.
pub fn response_wire(status: StatusCode, version: Version, headers: &HeaderMap, body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "{:?} {} {}\r\n",
        version,
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    )
    .into_bytes();
    write_headers(&mut out, headers);
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

fn write_headers(out: &mut Vec<u8>, headers: &HeaderMap) {
    for (name, value) in headers {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
}

/// One-line summary: `scheme | host | url | path | query | headers`.
pub fn summary_line(uri: &Uri, host: &str, headers: &HeaderMap) -> String {
    format!(
        "{} | {} | {} | {} | {} | {:?}\n",
        uri.scheme_str().unwrap_or(""),
        host,
        uri,
        uri.path(),
        uri.query().unwrap_or(""),
        headers
    )
}
