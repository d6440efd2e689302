//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router: one route per API path, plus `/readyz`
//! - Wire up middleware (tracing, timeout, metrics, authentication)
//! - Drain, validate and hand each request to the dispatcher
//! - Serve until shutdown is triggered
//!
//! # Design Decisions
//! - Each API gets its own sub-router so its token and metrics label are
//!   bound once, at startup
//! - A path ending in `/` serves its whole subtree

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use jsonschema::Validator;
use kube::Client;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{Instrument, Span};

use crate::http::middleware::{instrument, require_bearer, validate_json, Instrumented};
use crate::http::request::{
    content_length, drain_body, generate_request_id, RequestBody, RequestContext, X_REQUEST_ID,
};
use crate::http::response::ApiError;
use crate::kubernetes::dispatch::{Dispatcher, Endpoint};
use crate::lifecycle::shutdown::Shutdown;
use crate::observability::tracing::request_span;
use crate::observability::Metrics;

/// Reserved for the readiness probe.
pub const READYZ_PATH: &str = "/readyz";

/// An API ready to be served.
pub struct ServedApi {
    pub endpoint: Endpoint,
    pub validator: Option<Validator>,
    /// Pre-shared bearer token, already read from its Secret.
    pub token: Option<String>,
}

/// Application state injected into API handlers.
#[derive(Clone)]
struct ApiState {
    endpoint: Arc<Endpoint>,
    validator: Option<Arc<Validator>>,
    dispatcher: Dispatcher,
}

/// HTTP server for the APISet.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(
        apis: Vec<ServedApi>,
        dispatcher: Dispatcher,
        client: Client,
        metrics: Metrics,
        request_timeout: Option<Duration>,
    ) -> Self {
        let mut router = Router::new()
            .route(READYZ_PATH, get(readyz))
            .with_state(client);

        for api in apis {
            let path = api.endpoint.api.path.clone();
            let state = ApiState {
                endpoint: Arc::new(api.endpoint),
                validator: api.validator.map(Arc::new),
                dispatcher: dispatcher.clone(),
            };
            let mut routes = Router::new();
            for route in route_paths(&path) {
                routes = routes.route(&route, any(serve_api));
            }
            let instrumented = Instrumented {
                metrics: metrics.clone(),
                handler: Arc::from(path.as_str()),
            };
            router = router.merge(protect(
                routes.with_state(state),
                api.token.map(Arc::from),
                instrumented,
            ));
            tracing::info!(path = %path, "Serving API");
        }

        Self {
            router: Self::build_router(router, request_timeout),
        }
    }

    #[allow(deprecated)]
    fn build_router(router: Router, request_timeout: Option<Duration>) -> Router {
        let router = match request_timeout {
            Some(timeout) => router.layer(TimeoutLayer::new(timeout)),
            None => router,
        };
        router.layer(TraceLayer::new_for_http())
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Routes registered for an API path.
pub fn route_paths(path: &str) -> Vec<String> {
    let mut routes = vec![path.to_string()];
    if path.ends_with('/') {
        routes.push(format!("{}{{*rest}}", path));
    }
    routes
}

/// Wrap an API's routes with authentication (innermost) and metrics.
pub fn protect(routes: Router, token: Option<Arc<str>>, instrumented: Instrumented) -> Router {
    let routes = match token {
        Some(token) => routes.layer(middleware::from_fn_with_state(token, require_bearer)),
        None => routes,
    };
    routes.layer(middleware::from_fn_with_state(instrumented, instrument))
}

/// Serve the Prometheus exposition until shutdown.
pub async fn run_metrics(
    listener: TcpListener,
    metrics: Metrics,
    shutdown: Shutdown,
) -> Result<(), std::io::Error> {
    let app = Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics);
    tracing::info!(address = %listener.local_addr()?, "Metrics server starting");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
}

async fn render_metrics(State(metrics): State<Metrics>) -> String {
    metrics.render()
}

async fn readyz(State(client): State<Client>) -> Response {
    match client.apiserver_version().await {
        Ok(_) => (StatusCode::OK, "ok").into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "API server unreachable");
            ApiError::status(StatusCode::SERVICE_UNAVAILABLE).into_response()
        }
    }
}

async fn serve_api(
    State(state): State<ApiState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let id = generate_request_id();
    let span = request_span(&id, &state.endpoint.api.path);

    let mut response = handle(state, remote, request, id.clone(), span.clone())
        .instrument(span)
        .await
        .unwrap_or_else(IntoResponse::into_response);

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().entry(X_REQUEST_ID).or_insert(value);
    }
    response
}

async fn handle(
    state: ApiState,
    remote: SocketAddr,
    request: Request,
    id: String,
    span: Span,
) -> Result<Response, ApiError> {
    let (parts, body) = request.into_parts();
    let length = content_length(&body);
    tracing::debug!(method = %parts.method, uri = %parts.uri, content_length = ?length, "Request received");

    let (drained, live): (_, Option<Body>) = match drain_body(body, length).await? {
        RequestBody::Drained(bytes) => (Some(bytes), None),
        RequestBody::Live(body) => (None, Some(body)),
    };

    if let Some(validator) = &state.validator {
        validate_json(validator, drained.as_ref())?;
    }

    let ctx = RequestContext {
        id,
        path: state.endpoint.api.path.clone(),
        body: drained,
        content_length: length,
        span,
        cancel: CancellationToken::new(),
    };

    Ok(state
        .dispatcher
        .dispatch(&state.endpoint, &ctx, &parts, remote, live)
        .await?)
}
