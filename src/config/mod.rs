//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! CLI flags (--port/--target/...)      config file (TOML, one table per port)
//!     → loader.rs::single_entry            → loader.rs::load_config
//!                  ↘                      ↙
//!                   validation.rs (ports, target URLs)
//!                   → Vec<ProxyConfig> (validated, immutable)
//!                   → one ProxyInstance per entry
//! ```
//!
//! # Design Decisions
//! - Entries are immutable once loaded; no hot reload
//! - Duplicate ports are a startup error rather than last-wins
//! - Validation separates syntactic (serde) from semantic checks

pub mod duration;
pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, single_entry, ConfigError};
pub use schema::{GatewaySettings, ProxyConfig};
pub use validation::{parse_target, validate_config, ValidationError};
