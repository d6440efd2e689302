//! Middleware wrapped around every API handler.
//!
//! # Data Flow
//! ```text
//! request
//!     → instrument.rs (metrics, outermost so rejections are counted)
//!     → auth.rs (pre-shared bearer token, when configured)
//!     → handler: drain body → validate.rs (JSON schema) → dispatch
//! ```

pub mod auth;
pub mod instrument;
pub mod validate;

pub use auth::require_bearer;
pub use instrument::{instrument, Instrumented};
pub use validate::{compile_schema, validate_json};
