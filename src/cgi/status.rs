//! Exit code to HTTP status mapping.

use axum::http::StatusCode;

/// Status reported for a script that exited with `code`.
///
/// Signal deaths (`code > 128`) are server errors; other non-zero codes land
/// at `code + 399` so exit 1 becomes 400 and each code stays distinguishable.
pub fn exit_code_status(code: i32) -> StatusCode {
    match code {
        0 => StatusCode::OK,
        c if c > 128 || c < 0 => StatusCode::INTERNAL_SERVER_ERROR,
        c => StatusCode::from_u16((c + 399) as u16).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    }
}
