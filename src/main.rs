//! `kcgid`: serves an APISet by running one pod per request.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request      ┌──────────────────────────────────────────────────┐
//!     ────────────────────┼─▶ http server ─▶ auth ─▶ drain ─▶ validate      │
//!                         │                                   │              │
//!                         │                                   ▼              │
//!                         │                           kubernetes::dispatch   │
//!                         │          ┌──────────── create pod ─┼──────────┐  │
//!                         │          ▼                         ▼          ▼  │
//!                         │   events tail (bg)          watch phase   stdin  │
//!                         │                                   │     attach(bg)│
//!     Client Response     │                                   ▼              │
//!     ◀───────────────────┼──── cgi::read_response ◀──── follow pod logs     │
//!                         │                                                  │
//!                         │   gc: superseded cleanup, retention per phase    │
//!                         └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use kube_cgi::config::{load_config, LogFormat};
use kube_cgi::lifecycle::startup;
use kube_cgi::observability::logging;

#[derive(Parser, Debug)]
#[command(name = "kcgid", version, about = "Serve HTTP requests with one Kubernetes pod each")]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long, env = "KCGID_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured log format.
    #[arg(long, value_enum)]
    log_format: Option<CliLogFormat>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum CliLogFormat {
    Json,
    Pretty,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("kcgid: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(format) = cli.log_format {
        config.observability.log_format = match format {
            CliLogFormat::Json => LogFormat::Json,
            CliLogFormat::Pretty => LogFormat::Pretty,
        };
    }

    if let Err(e) = logging::init(&config.observability) {
        eprintln!("kcgid: cannot initialise logging: {}", e);
        return ExitCode::FAILURE;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        apiset = %config.apiset.name,
        namespace = %config.apiset.namespace,
        "kcgid starting"
    );

    match startup::run(config).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "kcgid failed");
            ExitCode::FAILURE
        }
    }
}
