//! hdproxy: a capturing reverse proxy.
//!
//! Each configured port forwards to one target URL. Every exchange is
//! written to an access log and, unless excluded, dumped to disk as raw
//! request/response text named by the request's arrival timestamp.
//! WebSocket upgrades are tunneled.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request      ┌─────────┐    ┌─────────────┐    ┌──────────┐
//!     ───────────────────▶│   net   │───▶│    http     │───▶│  client  │───▶ Target
//!                         │listener │    │ server      │    │ (hyper)  │
//!                         └─────────┘    │ request.rs  │    └──────────┘
//!                                        │ response.rs │
//!                                        │ websocket.rs│
//!                                        └──────┬──────┘
//!                                               ▼
//!                                        ┌─────────────┐
//!                                        │   capture   │  log/{port}.log
//!                                        │ correlation │  log/{port}/{ts}-req
//!                                        │ dumps, log  │  log/{port}/{ts}-resp
//!                                        └─────────────┘
//!
//!     Cross-cutting: config, lifecycle (supervisor, shutdown, signals),
//!                    observability (tracing, metrics)
//! ```

pub mod capture;
pub mod cli;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::{GatewaySettings, ProxyConfig};
pub use http::ProxyInstance;
pub use lifecycle::{Gateway, RunningGateway, Shutdown};
