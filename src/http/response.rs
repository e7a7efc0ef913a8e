//! Inbound stage: response capture and access logging.
//!
//! # Responsibilities
//! - Resolve the correlated request timestamp
//! - Tee the response body while it streams to the client
//! - Emit the access-log line and `{ts}-resp` dump once the body completes
//! - Answer transport failures with `502 Bad Gateway`, and requests cut
//!   off by the shutdown deadline with `503 Service Unavailable`
//!
//! # Data Flow
//! ```text
//! upstream Response<Incoming>
//!     → inbound() (hop-by-hop strip, correlation lookup, metrics)
//!     → CaptureBody (frames copied into a side buffer as they pass)
//!     → end of stream / drop → ResponseCapture::finish()
//!     → blocking pool: access line, then `{ts}-resp`
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    http::{HeaderMap, StatusCode, Uri, Version},
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use http_body::{Frame, SizeHint};
use hyper::body::Incoming;

use crate::capture::{dump, Completion, DumpKind, Timestamp, TrafficLogger};
use crate::http::request::{self, Exchange};
use crate::http::server::ProxyState;
use crate::observability::metrics;

/// Everything needed to log an exchange once its body has been seen.
#[derive(Debug)]
pub struct ResponseCapture {
    logger: Arc<TrafficLogger>,
    exchange: Exchange,
    request_ts: Option<Timestamp>,
    forwarded_uri: Uri,
    authority: String,
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
}

impl ResponseCapture {
    /// Hand the exchange to the blocking pool for logging. Runs inline when
    /// no runtime is available.
    pub fn finish(self, body: Bytes) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || self.write(&body));
            }
            Err(_) => self.write(&body),
        }
    }

    /// Log the exchange and write the response dump.
    ///
    /// The dump is only written when the request timestamp is known, since
    /// it names the file.
    fn write(self, body: &[u8]) {
        let origin = format!("{}://{}", self.forwarded_uri.scheme_str().unwrap_or("http"), self.authority);
        let completion = Completion {
            status: self.status,
            bytes: body.len(),
            origin,
            user_agent: self.exchange.user_agent.clone(),
            request_ts: self.request_ts,
        };
        self.logger.access(self.exchange.completion_record(completion));

        let Some(ts) = self.request_ts else {
            return;
        };
        let summary = dump::summary_line(&self.forwarded_uri, &self.authority, &self.headers);
        let wire = dump::response_wire(self.status, self.version, &self.headers, body);
        if let Err(e) = self.logger.write_dump(ts, DumpKind::Response, &summary, &wire) {
            tracing::warn!(port = self.logger.port(), ts = %ts, error = %e, "Failed to write response dump");
        }
    }
}

/// Response body that copies every data frame aside on its way to the
/// client, then hands the copy to a [`ResponseCapture`].
pub struct CaptureBody {
    inner: Body,
    captured: BytesMut,
    capture: Option<ResponseCapture>,
}

impl CaptureBody {
    pub fn new(inner: Body, capture: ResponseCapture) -> Self {
        Self {
            inner,
            captured: BytesMut::new(),
            capture: Some(capture),
        }
    }

    fn finish(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.finish(self.captured.split().freeze());
        }
    }
}

impl http_body::Body for CaptureBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        let polled = Pin::new(&mut this.inner).poll_frame(cx);

        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.captured.extend_from_slice(data);
                }
            }
            Poll::Ready(Some(Err(e))) => {
                tracing::warn!(error = %e, "Upstream response body failed mid-stream");
                this.finish();
            }
            Poll::Ready(None) => this.finish(),
            Poll::Pending => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for CaptureBody {
    fn drop(&mut self) {
        // Client went away before the end of the body; log what was relayed.
        self.finish();
    }
}

/// Turn the upstream response into the client response.
pub fn inbound(
    state: &ProxyState,
    exchange: Exchange,
    forwarded_uri: Uri,
    response: hyper::Response<Incoming>,
) -> Response {
    let (mut parts, body) = response.into_parts();
    request::remove_hop_by_hop(&mut parts.headers);
    metrics::record_request(state.port, parts.status.as_u16(), exchange.started);

    if exchange.excluded {
        state.correlation.forget(&exchange.key);
        return Response::from_parts(parts, Body::new(body));
    }

    let request_ts = state.correlation.take(&exchange.key);
    if request_ts.is_none() {
        tracing::warn!(port = state.port, key = %exchange.key.as_str(), "Correlation miss: request time not found");
    }

    let capture = ResponseCapture {
        logger: Arc::clone(&state.logger),
        exchange,
        request_ts,
        forwarded_uri,
        authority: request::target_authority(&state.target),
        status: parts.status,
        version: parts.version,
        headers: parts.headers.clone(),
    };
    let body = CaptureBody::new(Body::new(body), capture);
    Response::from_parts(parts, Body::new(body))
}

/// The upstream never produced a response: minimal log line and a 502.
pub async fn upstream_failed(state: &ProxyState, exchange: &Exchange, error: &(dyn std::fmt::Display + Sync)) -> Response {
    tracing::warn!(port = state.port, target = %exchange.target, error = %error, "Upstream request failed");
    state.correlation.forget(&exchange.key);
    metrics::record_upstream_error(state.port);
    state.logger.append(exchange.failure_record()).await;
    (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
}

/// Shutdown deadline passed while the request was held or waiting on the
/// upstream.
pub async fn abandoned(state: &ProxyState, exchange: &Exchange) -> Response {
    tracing::warn!(port = state.port, target = %exchange.target, "Request abandoned at shutdown deadline");
    state.correlation.forget(&exchange.key);
    state.logger.append(exchange.failure_record()).await;
    (StatusCode::SERVICE_UNAVAILABLE, "Proxy shutting down").into_response()
}
