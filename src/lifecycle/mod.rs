//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (supervisor.rs):
//!     Build instances → Bind all ports → Serve each on its own task
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain requests and tunnels → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Startup is all or nothing: one failed port aborts the whole gateway
//! - One deadline shared by every instance
//! - Tunnels still open at the deadline are force-closed

pub mod shutdown;
pub mod signals;
pub mod supervisor;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use supervisor::{Gateway, GatewayError, RunningGateway, ShutdownOutcome};
