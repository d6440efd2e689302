//! Request body delivery over the pod's attach subresource.
//!
//! Only the container's stdin is attached; its output is read separately
//! from the log stream, so the response never waits on this task.

use std::io;
use std::pin::Pin;

use axum::body::{Body, Bytes};
use futures_util::TryStreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum StdinError {
    #[error("attach failed: {0}")]
    Attach(#[from] kube::Error),

    #[error("attached process exposes no stdin")]
    NoStdin,

    #[error("stdin write failed: {0}")]
    Io(#[from] io::Error),

    #[error("attach session ended badly: {0}")]
    Session(String),
}

/// Where the bytes for stdin come from.
pub enum StdinSource {
    /// Body already read into memory.
    Drained(Bytes),
    /// Body still arriving from the client.
    Live(Body),
}

impl StdinSource {
    fn into_reader(self) -> Pin<Box<dyn AsyncRead + Send>> {
        match self {
            StdinSource::Drained(bytes) => Box::pin(io::Cursor::new(bytes)),
            StdinSource::Live(body) => Box::pin(StreamReader::new(
                body.into_data_stream().map_err(io::Error::other),
            )),
        }
    }
}

/// Attach to `container` in pod `name` and copy `source` into its stdin.
///
/// Returns the number of bytes written. Cancellation abandons the copy.
pub async fn stream_stdin(
    pods: Api<Pod>,
    name: String,
    container: String,
    source: StdinSource,
    cancel: CancellationToken,
) -> Result<u64, StdinError> {
    let params = AttachParams::default()
        .container(container)
        .stdin(true)
        .stdout(false)
        .stderr(false);
    let mut attached = pods.attach(&name, &params).await?;
    let mut stdin = attached.stdin().ok_or(StdinError::NoStdin)?;
    let mut reader = source.into_reader();

    let written = tokio::select! {
        _ = cancel.cancelled() => {
            tracing::debug!(pod = %name, "Stdin streaming cancelled");
            return Ok(0);
        }
        copied = tokio::io::copy(&mut reader, &mut stdin) => copied?,
    };
    stdin.shutdown().await?;
    drop(stdin);

    attached
        .join()
        .await
        .map_err(|e| StdinError::Session(e.to_string()))?;
    tracing::debug!(pod = %name, bytes = written, "Stdin delivered");
    Ok(written)
}
