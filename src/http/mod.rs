//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, one route per API path)
//!     → middleware/ (metrics, bearer token)
//!     → request.rs (request ID, body draining, request context)
//!     → middleware/validate.rs (JSON schema)
//!     → kubernetes::dispatch (pod round trip)
//!     → response.rs (error envelope) or the streamed script output
//!     → Send to client
//! ```

pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestContext, X_REQUEST_ID};
pub use response::ApiError;
pub use server::{HttpServer, ServedApi};
