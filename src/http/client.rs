//! Upstream HTTP client.
//!
//! One pooled client per proxy instance, speaking HTTP/1.1 to `http` and
//! `https` targets. No request timeout: the upstream's latency is never
//! capped, so a slow backend (or a long `hold`) never truncates a response.

use axum::body::Body;
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

/// Type alias for the client used to forward requests.
pub type UpstreamClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Build the forwarding client.
pub fn build_client() -> UpstreamClient {
    // Pin the process-wide rustls provider; a second install is a no-op error.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut http_connector = HttpConnector::new();
    http_connector.enforce_http(false);
    http_connector.set_nodelay(true);

    let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .wrap_connector(http_connector);

    Client::builder(TokioExecutor::new()).build(https_connector)
}
