//! WebSocket tunneling.
//!
//! # Responsibilities
//! - Detect WebSocket upgrade requests
//! - Dial the upstream before upgrading the client
//! - Relay messages in both directions until either side ends
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket frames ────→ Proxy ←──── WebSocket frames ────→ Backend
//! ```
//!
//! # Design Decisions
//! - The client is only upgraded once the upstream handshake succeeded, so
//!   a failed dial can still be answered with a plain HTTP status
//! - Message-level forwarding, type preserved, no payload inspection
//! - Close frames propagated in both directions; after one side closes, the
//!   other pump gets [`CLOSE_GRACE`] to relay the peer's Close reply
//! - Every tunnel holds a [`TunnelGuard`] so shutdown can wait for it

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{
        ws::{self, WebSocket, WebSocketUpgrade},
        FromRequestParts, Request,
    },
    http::{header, HeaderMap, StatusCode, Uri, Version},
    response::{IntoResponse, Response},
};
use chrono::Local;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::task::{JoinError, JoinHandle};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self,
        client::IntoClientRequest,
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message as UpstreamMessage,
    },
    MaybeTlsStream, WebSocketStream,
};
use url::Url;

use crate::capture::{CorrelationKey, Timestamp, TunnelEvent, TunnelRecord};
use crate::http::request;
use crate::http::server::ProxyState;
use crate::net::TunnelGuard;

/// Upper bound on the upstream opening handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the far side gets to answer a forwarded Close.
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("handshake timed out after {:?}", HANDSHAKE_TIMEOUT)]
    Timeout,
    #[error("upstream rejected handshake with {0}")]
    Rejected(StatusCode),
    #[error("dial failed: {0}")]
    Dial(#[from] tungstenite::Error),
}

impl TunnelError {
    /// Status returned to the client when the tunnel cannot be opened.
    pub fn client_status(&self) -> StatusCode {
        match self {
            Self::Rejected(status) if status.is_client_error() || status.is_server_error() => *status,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

/// `Connection: upgrade` (alone or in a token list) plus `Upgrade: websocket`.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    let upgrade_websocket = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    connection_upgrade && upgrade_websocket
}

/// Target URL with `http→ws` / `https→wss`, inbound path appended to the
/// base path, inbound query copied.
pub fn upstream_url(target: &Url, uri: &Uri) -> Url {
    let mut url = target.clone();
    let scheme = if target.scheme() == "https" { "wss" } else { "ws" };
    // http/https → ws/wss is always a permitted scheme change.
    let _ = url.set_scheme(scheme);
    url.set_path(&format!("{}{}", request::base_path(target), uri.path()));
    url.set_query(uri.query());
    url
}

/// Inbound headers safe to replay on the upstream dial.
pub fn upstream_headers(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| {
            let name = name.as_str();
            name != "upgrade" && name != "connection" && name != "host" && !name.starts_with("sec-websocket")
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Open the upstream WebSocket.
pub async fn dial(url: &Url, headers: &HeaderMap) -> Result<UpstreamSocket, TunnelError> {
    let mut request = url.as_str().into_client_request()?;
    for (name, value) in headers {
        request.headers_mut().append(name.clone(), value.clone());
    }

    match tokio::time::timeout(HANDSHAKE_TIMEOUT, connect_async(request)).await {
        Err(_) => Err(TunnelError::Timeout),
        Ok(Err(tungstenite::Error::Http(response))) => Err(TunnelError::Rejected(response.status())),
        Ok(Err(e)) => Err(TunnelError::Dial(e)),
        Ok(Ok((socket, _))) => Ok(socket),
    }
}

/// Handle an upgrade request end to end.
pub async fn tunnel(state: Arc<ProxyState>, client: SocketAddr, request: Request<Body>) -> Response {
    let (mut parts, _body) = request.into_parts();
    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let client_addr = client.to_string();
    let key = CorrelationKey::new(
        &client_addr,
        &parts.method,
        &request::request_target(&parts.uri),
        state.correlation.next_sequence(),
    );
    state.correlation.record(key.clone(), Timestamp::now());

    let url = upstream_url(&state.target, &parts.uri);
    let mut session = TunnelSession {
        state: Arc::clone(&state),
        key,
        client_addr,
        path: parts.uri.path().to_string(),
        version: parts.version,
        guard: None,
    };
    session
        .log(TunnelEvent::Attempt {
            upstream: url.to_string(),
        })
        .await;

    let upstream = match dial(&url, &upstream_headers(&parts.headers)).await {
        Ok(upstream) => upstream,
        Err(e) => {
            tracing::warn!(port = state.port, upstream = %url, error = %e, "WebSocket dial error");
            let status = e.client_status();
            return (status, format!("WebSocket upstream error: {}", status.as_u16())).into_response();
        }
    };

    session.guard = Some(state.tunnels.track());
    let port = state.port;
    upgrade
        .on_failed_upgrade(move |e| {
            tracing::warn!(port, error = %e, "WebSocket client upgrade error");
        })
        .on_upgrade(move |socket| session.relay(socket, upstream))
}

/// One tunnel from attempt to close. Dropping it releases the correlation
/// entry and the tracker slot.
struct TunnelSession {
    state: Arc<ProxyState>,
    key: CorrelationKey,
    client_addr: String,
    path: String,
    version: Version,
    guard: Option<TunnelGuard>,
}

impl TunnelSession {
    async fn log(&self, event: TunnelEvent) {
        let record = TunnelRecord {
            client_addr: self.client_addr.clone(),
            at: Local::now(),
            path: self.path.clone(),
            version: self.version,
            event,
        };
        self.state.logger.append(record).await;
    }

    async fn relay(mut self, client: WebSocket, upstream: UpstreamSocket) {
        self.log(TunnelEvent::Connected).await;

        let (client_tx, client_rx) = client.split();
        let (upstream_tx, upstream_rx) = upstream.split();
        let mut outbound = tokio::spawn(pump(client_rx, upstream_tx, client_to_upstream));
        let mut inbound = tokio::spawn(pump(upstream_rx, client_tx, upstream_to_client));

        let mut guard = self.guard.take();
        let tunnel_id = guard.as_ref().map(TunnelGuard::id);
        tracing::debug!(tunnel_id = ?tunnel_id, path = %self.path, "Tunnel relaying");
        let closed = async {
            match guard.as_mut() {
                Some(guard) => guard.closed().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            end = &mut outbound => {
                tracing::debug!(tunnel_id = ?tunnel_id, path = %self.path, ?end, "Client side of tunnel ended");
                settle(end, &mut inbound).await;
            }
            end = &mut inbound => {
                tracing::debug!(tunnel_id = ?tunnel_id, path = %self.path, ?end, "Upstream side of tunnel ended");
                settle(end, &mut outbound).await;
            }
            _ = closed => {
                tracing::info!(tunnel_id = ?tunnel_id, path = %self.path, "Force-closing tunnel");
                outbound.abort();
                inbound.abort();
                let _ = outbound.await;
                let _ = inbound.await;
            }
        }

        self.log(TunnelEvent::Closed).await;
    }
}

/// Stop the remaining pump once its partner has ended. After a forwarded
/// Close it may still carry the peer's reply, so it gets [`CLOSE_GRACE`].
async fn settle(end: Result<PumpEnd, JoinError>, peer: &mut JoinHandle<PumpEnd>) {
    if matches!(end, Ok(PumpEnd::Closed)) && tokio::time::timeout(CLOSE_GRACE, &mut *peer).await.is_ok() {
        return;
    }
    peer.abort();
    let _ = peer.await;
}

impl Drop for TunnelSession {
    fn drop(&mut self) {
        self.state.correlation.forget(&self.key);
    }
}

/// What a pump does with one incoming message.
enum Converted<M> {
    Data(M),
    /// Forward, then stop.
    Close(M),
    Skip,
}

/// Why a pump stopped.
#[derive(Debug)]
enum PumpEnd {
    Closed,
    SourceEnded,
    SourceError,
    SinkError,
}

async fn pump<S, K, M, N, E>(mut source: S, mut sink: K, convert: fn(M) -> Converted<N>) -> PumpEnd
where
    S: Stream<Item = Result<M, E>> + Unpin,
    E: Display,
    K: Sink<N> + Unpin,
    K::Error: Display,
{
    while let Some(next) = source.next().await {
        let message = match next {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "Tunnel read failed");
                let _ = sink.close().await;
                return PumpEnd::SourceError;
            }
        };

        match convert(message) {
            Converted::Data(message) => {
                if let Err(e) = sink.send(message).await {
                    tracing::debug!(error = %e, "Tunnel write failed");
                    return PumpEnd::SinkError;
                }
            }
            Converted::Close(message) => {
                let _ = sink.send(message).await;
                let _ = sink.close().await;
                return PumpEnd::Closed;
            }
            Converted::Skip => {}
        }
    }

    let _ = sink.close().await;
    PumpEnd::SourceEnded
}

fn client_to_upstream(message: ws::Message) -> Converted<UpstreamMessage> {
    match message {
        ws::Message::Text(text) => Converted::Data(UpstreamMessage::Text(text.as_str().to_owned().into())),
        ws::Message::Binary(data) => Converted::Data(UpstreamMessage::Binary(data)),
        ws::Message::Ping(data) => Converted::Data(UpstreamMessage::Ping(data)),
        ws::Message::Pong(data) => Converted::Data(UpstreamMessage::Pong(data)),
        ws::Message::Close(frame) => Converted::Close(UpstreamMessage::Close(frame.map(|frame| CloseFrame {
            code: CloseCode::from(frame.code),
            reason: frame.reason.as_str().to_owned().into(),
        }))),
    }
}

fn upstream_to_client(message: UpstreamMessage) -> Converted<ws::Message> {
    match message {
        UpstreamMessage::Text(text) => Converted::Data(ws::Message::Text(text.as_str().to_owned().into())),
        UpstreamMessage::Binary(data) => Converted::Data(ws::Message::Binary(data)),
        UpstreamMessage::Ping(data) => Converted::Data(ws::Message::Ping(data)),
        UpstreamMessage::Pong(data) => Converted::Data(ws::Message::Pong(data)),
        UpstreamMessage::Close(frame) => Converted::Close(ws::Message::Close(frame.map(|frame| ws::CloseFrame {
            code: u16::from(frame.code),
            reason: frame.reason.as_str().to_owned().into(),
        }))),
        UpstreamMessage::Frame(_) => Converted::Skip,
    }
}
