//! HTTP request to CGI/1.1 meta-variables.
//!
//! Follows draft-robinson-www-interface-00, plus `REQUEST_URI` and
//! `REMOTE_PORT` which most CGI hosts also provide.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::http::{header, request::Parts};

/// Value of `SERVER_SOFTWARE`.
pub const SERVER_SOFTWARE: &str = "kcgid";

/// Build the CGI variables for a request.
///
/// `content_length` is `None` when the body length is unknown (chunked
/// uploads), in which case `CONTENT_LENGTH` is omitted.
pub fn vars_from_request(
    parts: &Parts,
    content_length: Option<u64>,
    remote: SocketAddr,
) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();

    if let Some(length) = content_length {
        vars.insert("CONTENT_LENGTH".to_string(), length.to_string());
    }
    vars.insert(
        "CONTENT_TYPE".to_string(),
        parts
            .headers
            .get(header::CONTENT_TYPE)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .unwrap_or_default(),
    );
    vars.insert("SCRIPT_NAME".to_string(), "/".to_string());

    let path = parts.uri.path();
    vars.insert(
        "PATH_INFO".to_string(),
        path.strip_prefix('/').unwrap_or(path).to_string(),
    );
    vars.insert(
        "QUERY_STRING".to_string(),
        parts.uri.query().unwrap_or_default().to_string(),
    );

    vars.insert("REMOTE_ADDR".to_string(), remote.ip().to_string());
    vars.insert("REMOTE_PORT".to_string(), remote.port().to_string());
    vars.insert("REQUEST_METHOD".to_string(), parts.method.to_string());
    vars.insert(
        "REQUEST_URI".to_string(),
        parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string()),
    );
    vars.insert("SERVER_NAME".to_string(), host(parts));
    vars.insert(
        "SERVER_PROTOCOL".to_string(),
        format!("{:?}", parts.version),
    );
    vars.insert("SERVER_SOFTWARE".to_string(), SERVER_SOFTWARE.to_string());

    for name in parts.headers.keys() {
        let joined = parts
            .headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect::<Vec<_>>()
            .join(", ");
        let key = format!(
            "HTTP_{}",
            name.as_str().to_ascii_uppercase().replace('-', "_")
        );
        vars.insert(key, joined);
    }

    vars
}

/// Host as the client addressed it: `Host` header, else the URI authority.
fn host(parts: &Parts) -> String {
    parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.authority().map(|a| a.as_str().to_string()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(request: Request<()>) -> Parts {
        request.into_parts().0
    }

    #[test]
    fn test_fixed_variables() {
        let req = Request::builder()
            .method("POST")
            .uri("/hello/world?a=1&b=2")
            .header("host", "api.example.com")
            .header("content-type", "application/json")
            .body(())
            .unwrap();
        let remote: SocketAddr = "10.0.0.7:41234".parse().unwrap();
        let vars = vars_from_request(&parts(req), Some(12), remote);

        assert_eq!(vars["CONTENT_LENGTH"], "12");
        assert_eq!(vars["CONTENT_TYPE"], "application/json");
        assert_eq!(vars["SCRIPT_NAME"], "/");
        assert_eq!(vars["PATH_INFO"], "hello/world");
        assert_eq!(vars["QUERY_STRING"], "a=1&b=2");
        assert_eq!(vars["REMOTE_ADDR"], "10.0.0.7");
        assert_eq!(vars["REMOTE_PORT"], "41234");
        assert_eq!(vars["REQUEST_METHOD"], "POST");
        assert_eq!(vars["REQUEST_URI"], "/hello/world?a=1&b=2");
        assert_eq!(vars["SERVER_NAME"], "api.example.com");
        assert_eq!(vars["SERVER_PROTOCOL"], "HTTP/1.1");
        assert_eq!(vars["SERVER_SOFTWARE"], SERVER_SOFTWARE);
    }

    #[test]
    fn test_unknown_length_omitted() {
        let req = Request::builder().uri("/x").body(()).unwrap();
        let vars = vars_from_request(&parts(req), None, "127.0.0.1:1".parse().unwrap());
        assert!(!vars.contains_key("CONTENT_LENGTH"));
        assert_eq!(vars["CONTENT_TYPE"], "");
        assert_eq!(vars["QUERY_STRING"], "");
    }

    #[test]
    fn test_repeated_headers_joined() {
        let req = Request::builder()
            .uri("/")
            .header("X-Forwarded-For", "1.1.1.1")
            .header("X-Forwarded-For", "2.2.2.2")
            .header("x-clacks-overhead", "GNU Terry Pratchett")
            .body(())
            .unwrap();
        let vars = vars_from_request(&parts(req), Some(0), "[::1]:8080".parse().unwrap());

        assert_eq!(vars["HTTP_X_FORWARDED_FOR"], "1.1.1.1, 2.2.2.2");
        assert_eq!(vars["HTTP_X_CLACKS_OVERHEAD"], "GNU Terry Pratchett");
        assert_eq!(vars["REMOTE_ADDR"], "::1");
        assert_eq!(vars["PATH_INFO"], "");
    }
}
