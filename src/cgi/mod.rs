//! CGI protocol translation.
//!
//! # Data Flow
//! ```text
//! HTTP request parts + peer address
//!     → request.rs (CGI/1.1 meta-variables)
//!     → env.rs (size bound, `$` escaping for container env)
//!     → [pod runs the script]
//! pod log stream
//!     → response.rs (header block → status + headers, rest → body)
//! pod exit code
//!     → status.rs (default status for failed pods)
//! ```
//!
//! # Design Decisions
//! - Everything here is a pure function of its inputs; no Kubernetes types
//! - Response bodies are never buffered, only the header block is
//! - Local redirects are reported to the caller rather than written

pub mod env;
pub mod request;
pub mod response;
pub mod status;

use thiserror::Error;

pub use env::{escape_expansion, max_env_len, too_large, BODY_ENV_KEY};
pub use request::{vars_from_request, SERVER_SOFTWARE};
pub use response::{read_response, CgiResponse, Translated};
pub use status::exit_code_status;

/// Errors produced while reading a script's output.
#[derive(Debug, Error)]
pub enum CgiError {
    #[error("cannot read headers: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    #[error("header block not terminated before end of output")]
    UnterminatedHeaders,

    #[error("cannot decode status: {0:?}")]
    InvalidStatus(String),

    #[error("invalid header {name:?}")]
    InvalidHeader { name: String },
}
