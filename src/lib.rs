//! Kubernetes request-to-pod CGI gateway library.

pub mod api;
pub mod cgi;
pub mod config;
pub mod http;
pub mod kubernetes;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::DaemonConfig;
pub use http::HttpServer;
pub use lifecycle::shutdown::Shutdown;
