//! Instance state machine and tunnel lifecycle tracking.
//!
//! # Responsibilities
//! - Track instance state (Created → Listening → Draining → Closed)
//! - Generate unique tunnel IDs for tracing
//! - Count open WebSocket tunnels so draining can wait for them
//! - Force-close every open tunnel (and in-flight forward) when the shutdown
//!   deadline passes

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Global atomic counter for tunnel IDs.
static TUNNEL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TunnelId(u64);

impl TunnelId {
    pub fn new() -> Self {
        Self(TUNNEL_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TunnelId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TunnelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tunnel-{}", self.0)
    }
}

/// Lifecycle of a proxy instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Configured, log files ready, not yet bound.
    Created,
    /// Listener bound and accepting.
    Listening,
    /// No new connections; in-flight requests and tunnels finishing.
    Draining,
    /// Listener released. Terminal.
    Closed,
}

/// Tracks open tunnels for one instance.
///
/// Each tunnel holds a [`TunnelGuard`]; the guard's receiver flips to
/// `true` when [`TunnelTracker::close_all`] is called.
#[derive(Debug, Clone)]
pub struct TunnelTracker {
    active_count: Arc<AtomicU64>,
    close_tx: Arc<watch::Sender<bool>>,
}

impl TunnelTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            active_count: Arc::new(AtomicU64::new(0)),
            close_tx: Arc::new(tx),
        }
    }

    /// Register a new tunnel. The count drops when the guard does.
    pub fn track(&self) -> TunnelGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        metrics::gauge!("hdproxy_active_tunnels").increment(1.0);
        TunnelGuard {
            active_count: Arc::clone(&self.active_count),
            close_rx: self.close_tx.subscribe(),
            id: TunnelId::new(),
        }
    }

    /// Current open tunnel count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until every tunnel has closed.
    pub async fn wait_idle(&self) {
        while self.active_count.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal every open (and future) tunnel to close.
    pub fn close_all(&self) {
        self.close_tx.send_replace(true);
    }

    /// Resolves once [`TunnelTracker::close_all`] has been called. Held
    /// requests wait on this too.
    pub async fn closing(&self) {
        let mut rx = self.close_tx.subscribe();
        let _ = rx.wait_for(|close| *close).await;
    }
}

impl Default for TunnelTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Held by a tunnel for its whole lifetime.
#[derive(Debug)]
pub struct TunnelGuard {
    active_count: Arc<AtomicU64>,
    close_rx: watch::Receiver<bool>,
    id: TunnelId,
}

impl TunnelGuard {
    pub fn id(&self) -> TunnelId {
        self.id
    }

    /// Resolves once the tracker asks tunnels to close.
    pub async fn closed(&mut self) {
        // An error means the tracker is gone, which also ends the tunnel.
        let _ = self.close_rx.wait_for(|close| *close).await;
    }
}

impl Drop for TunnelGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        metrics::gauge!("hdproxy_active_tunnels").decrement(1.0);
        tracing::trace!(tunnel_id = %self.id, "Tunnel released");
    }
}
