//! Proxy instance: one listening port forwarding to one target.
//!
//! # Responsibilities
//! - Build the Axum router around a single catch-all handler
//! - Route upgrade requests to the tunnel, everything else to forwarding
//! - Drive the instance state machine (Created → Listening → Draining → Closed)
//! - Serve until the shutdown signal, then drain in-flight work and tunnels

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use url::Url;

use crate::capture::{dump, CorrelationStore, DumpKind, ExclusionFilter, LoggerError, TrafficLogger};
use crate::config::{parse_target, GatewaySettings, ProxyConfig};
use crate::http::client::{build_client, UpstreamClient};
use crate::http::request::{self, Exchange};
use crate::http::{response, websocket};
use crate::lifecycle::ShutdownSignal;
use crate::net::{self, InstanceState, ListenerError, TunnelTracker};

/// Failure to create an instance.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("port {port}: invalid target url {target:?}: {reason}")]
    InvalidTarget { port: u16, target: String, reason: String },
    #[error(transparent)]
    Logger(#[from] LoggerError),
}

/// Per-instance state injected into handlers.
pub struct ProxyState {
    pub port: u16,
    pub target: Url,
    pub hold: Duration,
    pub exclusion: ExclusionFilter,
    pub correlation: CorrelationStore,
    pub logger: Arc<TrafficLogger>,
    pub client: UpstreamClient,
    pub tunnels: TunnelTracker,
}

/// A configured proxy listening on one port.
pub struct ProxyInstance {
    state: Arc<ProxyState>,
    bind_host: String,
    lifecycle: Arc<watch::Sender<InstanceState>>,
}

impl ProxyInstance {
    /// Parse the target, prepare the log directory and rotate the previous
    /// access log. The instance is `Created` but not yet bound.
    pub fn new(config: &ProxyConfig, settings: &GatewaySettings) -> Result<Self, ProxyError> {
        let port = config.port;
        let target = parse_target(&config.target).map_err(|reason| ProxyError::InvalidTarget {
            port,
            target: config.target.clone(),
            reason,
        })?;
        let logger = TrafficLogger::open(&settings.log_dir, port)?;

        let state = ProxyState {
            port,
            target,
            hold: config.hold,
            exclusion: ExclusionFilter::compile(port, &config.exclude_patterns),
            correlation: CorrelationStore::new(),
            logger: Arc::new(logger),
            client: build_client(),
            tunnels: TunnelTracker::new(),
        };
        let (lifecycle, _) = watch::channel(InstanceState::Created);

        Ok(Self {
            state: Arc::new(state),
            bind_host: settings.bind_host.clone(),
            lifecycle: Arc::new(lifecycle),
        })
    }

    pub fn port(&self) -> u16 {
        self.state.port
    }

    pub fn target(&self) -> &Url {
        &self.state.target
    }

    pub fn hold(&self) -> Duration {
        self.state.hold
    }

    pub fn logger(&self) -> &TrafficLogger {
        &self.state.logger
    }

    /// Open WebSocket tunnels.
    pub fn active_tunnels(&self) -> u64 {
        self.state.tunnels.active_count()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> InstanceState {
        *self.lifecycle.borrow()
    }

    /// Router with the catch-all proxy handler.
    pub fn router(&self) -> Router {
        Router::new()
            .fallback(proxy_handler)
            .with_state(Arc::clone(&self.state))
            .layer(TraceLayer::new_for_http())
    }

    /// Bind `{bind_host}:{port}`; the instance becomes `Listening`.
    pub async fn bind(&self) -> Result<TcpListener, ListenerError> {
        let listener = net::bind(&self.bind_host, self.state.port).await?;
        self.lifecycle.send_replace(InstanceState::Listening);
        Ok(listener)
    }

    /// Serve until `shutdown` fires, then drain requests and tunnels.
    pub async fn serve(&self, listener: TcpListener, mut shutdown: ShutdownSignal) -> std::io::Result<()> {
        let port = self.state.port;
        let lifecycle = Arc::clone(&self.lifecycle);
        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.recv().await;
                lifecycle.send_replace(InstanceState::Draining);
                tracing::info!(port, "Draining");
            })
            .await?;

        let open = self.state.tunnels.active_count();
        if open > 0 {
            tracing::info!(port, tunnels = open, "Waiting for tunnels to close");
        }
        self.state.tunnels.wait_idle().await;

        self.mark_closed();
        tracing::info!(port, "Closed");
        Ok(())
    }

    /// Past the shutdown deadline: close every open tunnel and abandon
    /// requests still holding or waiting on the upstream. Connection tasks
    /// outlive the serve task, so this is what actually ends them.
    pub fn force_close(&self) {
        self.state.tunnels.close_all();
    }

    pub fn mark_closed(&self) {
        self.lifecycle.send_replace(InstanceState::Closed);
    }
}

async fn proxy_handler(
    State(state): State<Arc<ProxyState>>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    if websocket::is_upgrade_request(request.headers()) {
        return websocket::tunnel(state, client, request).await;
    }
    forward(state, client, request).await
}

/// Outbound stage, upstream call, then hand-off to the inbound stage.
async fn forward(state: Arc<ProxyState>, client: SocketAddr, request: Request) -> Response {
    let (mut parts, body) = request.into_parts();
    let excluded = state.exclusion.is_excluded(&request::request_target(&parts.uri));

    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(e) => {
            let exchange = Exchange::new(client, &parts, state.correlation.next_sequence(), excluded);
            tracing::warn!(port = state.port, target = %exchange.target, error = %e, "Failed to read request body");
            state.logger.append(exchange.failure_record()).await;
            return (StatusCode::BAD_REQUEST, "Failed to read request body").into_response();
        }
    };

    let wire = dump::request_wire(&parts.method, &parts.uri, parts.version, &parts.headers, &body);
    let exchange = Exchange::new(client, &parts, state.correlation.next_sequence(), excluded);
    state.correlation.record(exchange.key.clone(), exchange.arrived);

    if let Err(e) = request::rewrite(&mut parts, &state.target) {
        return response::upstream_failed(&state, &exchange, &e).await;
    }

    if !excluded {
        let summary = dump::summary_line(&parts.uri, &request::target_authority(&state.target), &parts.headers);
        if let Err(e) = state.logger.save_dump(exchange.arrived, DumpKind::Request, summary, wire).await {
            tracing::warn!(port = state.port, ts = %exchange.arrived, error = %e, "Failed to write request dump");
        }
    }

    request::strip_gzip(&mut parts.headers);

    let forwarded_uri = parts.uri.clone();
    let upstream = async {
        if !state.hold.is_zero() {
            tracing::debug!(port = state.port, hold = ?state.hold, target = %exchange.target, "Holding request");
            tokio::time::sleep(state.hold).await;
        }
        state.client.request(Request::from_parts(parts, Body::from(body))).await
    };

    tokio::select! {
        result = upstream => match result {
            Ok(upstream_response) => response::inbound(&state, exchange, forwarded_uri, upstream_response),
            Err(e) => response::upstream_failed(&state, &exchange, &e).await,
        },
        _ = state.tunnels.closing() => response::abandoned(&state, &exchange).await,
    }
}
