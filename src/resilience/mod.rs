//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Watch or list against the API server fails:
//!     → kubernetes/watch.rs (classify: transient, expired, fatal)
//!     → backoff.rs (delay before reconnect / re-list)
//! ```
//!
//! # Design Decisions
//! - Only watches and GC re-lists are retried; pod creation, log and attach
//!   failures are surfaced to the request
//! - Jitter keeps replicas from reconnecting in lockstep

pub mod backoff;
