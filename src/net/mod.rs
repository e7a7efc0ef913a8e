//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! ProxyConfig.port
//!     → listener.rs (bind {host}:{port}, fatal on failure)
//!     → HTTP server (one task per connection)
//!     → connection.rs (instance state, open tunnel tracking)
//!
//! Instance States:
//!     Created → Listening → Draining → Closed
//! ```
//!
//! # Design Decisions
//! - No read/write timeouts: uploads may be slow and `hold` delays responses
//! - Upgraded (WebSocket) connections are tracked separately, since the
//!   HTTP server stops tracking a connection once it is upgraded

pub mod connection;
pub mod listener;

pub use connection::{InstanceState, TunnelGuard, TunnelId, TunnelTracker};
pub use listener::{bind, ListenerError};
