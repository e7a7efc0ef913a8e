//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (one task per connection, Axum)
//!     → server.rs (catch-all handler, upgrade detection)
//!     → request.rs (dump, correlation entry, rewrite, hold)
//!     → client.rs (HTTP/1.1 to the target)
//!     → response.rs (tee body, access line, response dump)
//!     → Send to client
//!
//! Upgrade requests:
//!     → websocket.rs (dial upstream, upgrade client, relay)
//! ```

pub mod client;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use server::{ProxyError, ProxyInstance, ProxyState};
pub use websocket::TunnelError;
