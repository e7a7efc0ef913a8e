//! Traffic capture subsystem.
//!
//! # Data Flow
//! ```text
//! outbound stage
//!     → correlation.rs (arrival timestamp under composite key)
//!     → exclusion.rs (skip capture for matching targets?)
//!     → dump.rs (wire text) → logger.rs ({ts}-req)
//!
//! inbound stage
//!     → correlation.rs (take timestamp back)
//!     → dump.rs → logger.rs ({ts}-resp)
//!     → access.rs (one line) → logger.rs ({port}.log + console)
//! ```

pub mod access;
pub mod correlation;
pub mod dump;
pub mod exclusion;
pub mod logger;

pub use access::{AccessRecord, Completion, TunnelEvent, TunnelRecord};
pub use correlation::{CorrelationKey, CorrelationStore, Timestamp};
pub use exclusion::ExclusionFilter;
pub use logger::{DumpKind, LoggerError, TrafficLogger};
