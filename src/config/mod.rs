//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → APISET_* environment overrides
//!     → validation.rs (semantic checks)
//!     → DaemonConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the daemon is redeployed when its
//!   APISet changes
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    ApiSetRef, DaemonConfig, GcConfig, ListenerConfig, LogFormat, ObservabilityConfig,
    TimeoutConfig, WatchConfig,
};
