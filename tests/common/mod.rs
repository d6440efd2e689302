//! Shared utilities for integration tests.

#![allow(dead_code)]

pub mod apiserver;

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue, Method, Request, Version},
    routing::any,
    Router,
};
use kube_cgi::http::middleware::Instrumented;
use kube_cgi::http::server::protect;
use kube_cgi::observability::Metrics;

/// Request parts as axum would hand them to a handler.
pub fn parts(method: Method, uri: &str, headers: &[(&str, &str)]) -> Parts {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .version(Version::HTTP_11);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let (parts, _) = builder.body(()).unwrap().into_parts();
    parts
}

/// A request rebuilt from CGI variables, the way a CGI/1.1 host library
/// would see it.
#[derive(Debug)]
pub struct Decoded {
    pub method: Method,
    pub uri: String,
    pub protocol: String,
    pub content_length: Option<u64>,
    pub host: String,
    pub remote: String,
    pub headers: HeaderMap,
}

pub fn decode(vars: &BTreeMap<String, String>) -> Decoded {
    let mut headers = HeaderMap::new();
    for (key, value) in vars {
        let Some(name) = key.strip_prefix("HTTP_") else {
            continue;
        };
        let name = HeaderName::from_bytes(name.replace('_', "-").to_ascii_lowercase().as_bytes())
            .unwrap();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
    }

    Decoded {
        method: vars["REQUEST_METHOD"].parse().unwrap(),
        uri: vars["REQUEST_URI"].clone(),
        protocol: vars["SERVER_PROTOCOL"].clone(),
        content_length: vars.get("CONTENT_LENGTH").map(|v| v.parse().unwrap()),
        host: vars["SERVER_NAME"].clone(),
        remote: format!("{}:{}", vars["REMOTE_ADDR"], vars["REMOTE_PORT"]),
        headers,
    }
}

/// An API route answering "ok", wrapped in the production middleware.
pub fn protected_api(path: &str, token: Option<&str>, metrics: &Metrics) -> Router {
    let routes = Router::new().route(path, any(|| async { "ok" }));
    protect(
        routes,
        token.map(Arc::from),
        Instrumented {
            metrics: metrics.clone(),
            handler: Arc::from(path),
        },
    )
}

pub fn get(uri: &str, authorization: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(value) = authorization {
        builder = builder.header(header::AUTHORIZATION, value);
    }
    builder.body(Body::empty()).unwrap()
}
