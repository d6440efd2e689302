//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → APISet → Endpoints (tokens, schemas) → Collectors → Listeners
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain in-flight requests → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!
//! Tasks (tasks.rs):
//!     Background work spawned with its failures logged
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Ordered shutdown: stop accept, drain, close
//! - Cancellation tokens, not channels, so late subscribers still observe
//!   a shutdown that already happened

pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod tasks;
