//! CGI script output to HTTP response.
//!
//! # Responsibilities
//! - Read the MIME-style header block from the start of the output
//! - Turn `Status: <code> <reason>` into the response status
//! - Detect local redirects (a lone `Location: /...`)
//! - Hand back the rest of the stream untouched as the body
//!
//! # Design Decisions
//! - Only the header block is consumed before returning; the body reader is
//!   returned as-is so it can be streamed to the client as it is produced
//! - Header names are matched case-insensitively, values copied verbatim

use axum::http::{
    header::{self, HeaderName, HeaderValue},
    HeaderMap, StatusCode,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::cgi::CgiError;

/// A translated response with a not-yet-consumed body.
#[derive(Debug)]
pub struct CgiResponse<R> {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: R,
}

impl<R> CgiResponse<R> {
    /// Set `Content-Type` unless the script already did.
    pub fn with_default_content_type(mut self, content_type: &str) -> Self {
        if !self.headers.contains_key(header::CONTENT_TYPE) {
            if let Ok(value) = HeaderValue::from_str(content_type) {
                self.headers.insert(header::CONTENT_TYPE, value);
            }
        }
        self
    }
}

/// Outcome of reading a script's header block.
#[derive(Debug)]
pub enum Translated<R> {
    /// A response to stream back to the client.
    Response(CgiResponse<R>),
    /// The script asked for a server-side redirect to this path.
    LocalRedirect(String),
}

/// Read the header block from `reader`.
///
/// `default_status` applies when the script sets neither `Status` nor
/// `Location`.
pub async fn read_response<R>(
    mut reader: R,
    default_status: StatusCode,
) -> Result<Translated<R>, CgiError>
where
    R: AsyncBufRead + Unpin,
{
    let fields = read_header_block(&mut reader).await?;

    let mut status = None;
    let mut headers = HeaderMap::new();
    for (name, value) in fields {
        if name.eq_ignore_ascii_case("status") {
            if status.is_none() {
                status = Some(parse_status(&value)?);
            }
            continue;
        }

        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| CgiError::InvalidHeader { name: name.clone() })?;
        let header_value =
            HeaderValue::from_str(&value).map_err(|_| CgiError::InvalidHeader { name })?;
        headers.append(header_name, header_value);
    }

    let location = headers
        .get(header::LOCATION)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());

    if let Some(location) = &location {
        if headers.keys_len() == 1 && location.starts_with('/') {
            return Ok(Translated::LocalRedirect(location.clone()));
        }
    }

    let status = status.unwrap_or(if location.is_some() {
        StatusCode::FOUND
    } else {
        default_status
    });

    Ok(Translated::Response(CgiResponse {
        status,
        headers,
        body: reader,
    }))
}

/// Collect `(name, value)` pairs up to the blank line ending the block.
async fn read_header_block<R>(reader: &mut R) -> Result<Vec<(String, String)>, CgiError>
where
    R: AsyncBufRead + Unpin,
{
    let mut fields: Vec<(String, String)> = Vec::new();
    let mut raw = Vec::new();

    loop {
        raw.clear();
        if reader.read_until(b'\n', &mut raw).await? == 0 {
            return Err(CgiError::UnterminatedHeaders);
        }

        let line = std::str::from_utf8(&raw)
            .map_err(|_| CgiError::MalformedHeader(String::from_utf8_lossy(&raw).into_owned()))?
            .trim_end_matches(['\r', '\n']);

        if line.is_empty() {
            return Ok(fields);
        }

        // Obsolete line folding continues the previous value.
        if line.starts_with([' ', '\t']) {
            match fields.last_mut() {
                Some((_, value)) => {
                    value.push(' ');
                    value.push_str(line.trim());
                    continue;
                }
                None => return Err(CgiError::MalformedHeader(line.to_string())),
            }
        }

        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| CgiError::MalformedHeader(line.to_string()))?;
        if name.is_empty() || name.contains([' ', '\t']) {
            return Err(CgiError::MalformedHeader(line.to_string()));
        }
        fields.push((name.to_string(), value.trim().to_string()));
    }
}

fn parse_status(value: &str) -> Result<StatusCode, CgiError> {
    let code = value.split(' ').next().unwrap_or_default();
    code.parse::<u16>()
        .ok()
        .and_then(|c| StatusCode::from_u16(c).ok())
        .ok_or_else(|| CgiError::InvalidStatus(value.to_string()))
}
