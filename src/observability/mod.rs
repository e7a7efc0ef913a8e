//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured diagnostics + mirrored access-log lines)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout
//!     → Metrics endpoint (Prometheus scrape, opt-in)
//! ```
//!
//! The traffic capture itself (dump files, per-port access logs) lives in
//! `capture`; this module only covers process-level diagnostics.

pub mod logging;
pub mod metrics;
