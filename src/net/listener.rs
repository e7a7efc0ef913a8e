//! TCP listener binding.
//!
//! # Responsibilities
//! - Resolve `{host}:{port}` and bind it
//! - Surface bind failures as fatal, typed errors
//!
//! Accepting is left to the HTTP server, which runs one task per
//! connection.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::{lookup_host, TcpListener};

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to resolve {address}: {source}")]
    Resolve { address: String, source: std::io::Error },
    #[error("no address found for {0}")]
    NoAddress(String),
    #[error("failed to bind {address}: {source}")]
    Bind { address: SocketAddr, source: std::io::Error },
}

/// Bind a listener on `host:port`.
pub async fn bind(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let address = format!("{}:{}", host, port);
    let resolved = lookup_host(&address)
        .await
        .map_err(|source| ListenerError::Resolve {
            address: address.clone(),
            source,
        })?
        .next()
        .ok_or_else(|| ListenerError::NoAddress(address.clone()))?;

    let listener = TcpListener::bind(resolved)
        .await
        .map_err(|source| ListenerError::Bind { address: resolved, source })?;

    tracing::info!(address = %resolved, "Listener bound");
    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binds_free_port() {
        let scratch = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = scratch.local_addr().unwrap().port();
        drop(scratch);

        let listener = bind("127.0.0.1", port).await.unwrap();
        assert_eq!(listener.local_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn port_in_use_is_bind_error() {
        let held = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = held.local_addr().unwrap().port();

        let err = bind("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, ListenerError::Bind { .. }));
    }
}
