//! HTTP server that exchanges a proxy token for private file content.
//!
//! `/{token}[/{anything}]` resolves the token once, fetches the private
//! locator with the bot credential, and streams the body back. Everything
//! after the first path segment is decorative, so upload services can see a
//! real filename in the URL.

use super::registry::TokenRegistry;
use crate::workflow;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use std::net::SocketAddr;
use std::sync::Arc;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Shared state for proxy handlers.
#[derive(Clone)]
pub struct ProxyState {
    pub registry: Arc<TokenRegistry>,
    /// Client for upstream fetches. Reused so connections are pooled.
    pub http: reqwest::Client,
    /// Bearer credential attached to every upstream fetch.
    pub bearer_token: Arc<str>,
    /// Channel offered by the workflow join button.
    pub channel_id: Arc<str>,
    /// Path of the public base URL (e.g. `/files`), empty when mounted at the root.
    pub path_prefix: Arc<str>,
}

impl ProxyState {
    pub fn new(
        registry: Arc<TokenRegistry>,
        bearer_token: impl Into<Arc<str>>,
        channel_id: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            registry,
            http: reqwest::Client::new(),
            bearer_token: bearer_token.into(),
            channel_id: channel_id.into(),
            path_prefix: Arc::from(""),
        }
    }

    /// Accept token URLs that still carry the public base URL's path.
    pub fn with_path_prefix(mut self, path_prefix: impl Into<Arc<str>>) -> Self {
        self.path_prefix = path_prefix.into();
        self
    }
}

/// Failures of a single proxy request. Each one is terminal for that request.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("request path has no token")]
    BadRequest,

    #[error("no live proxy for token {token}")]
    NotFound { token: String },

    #[error("upstream fetch failed: {0}")]
    UpstreamFetch(#[from] reqwest::Error),

    #[error("upstream returned status {status}")]
    UpstreamStatus { status: u16 },
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match &self {
            Self::BadRequest => (StatusCode::BAD_REQUEST, "Bad request").into_response(),
            Self::NotFound { token } => {
                tracing::debug!(%token, "proxy not found for token");
                (StatusCode::NOT_FOUND, "File not found").into_response()
            }
            Self::UpstreamFetch(error) => {
                tracing::warn!(%error, "failed to fetch proxied file");
                (StatusCode::INTERNAL_SERVER_ERROR, "Error proxying file").into_response()
            }
            Self::UpstreamStatus { status } => {
                tracing::warn!(status, "upstream refused proxied file");
                let status = StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY);
                (status, "Error fetching file").into_response()
            }
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    live_tokens: usize,
}

/// Build the proxy router. Any path not claimed by a fixed route is a token lookup.
pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/workflow-button", get(workflow_button))
        .fallback(proxy_file)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the proxy server on the given address.
///
/// The server shuts down gracefully when `shutdown_rx` flips to true.
pub async fn start_proxy_server(
    bind: SocketAddr,
    state: ProxyState,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|error| anyhow::anyhow!("failed to bind file proxy to {}: {}", bind, error))?;
    tracing::info!(%bind, "file proxy listening");

    let handle = tokio::spawn(async move {
        let mut shutdown = shutdown_rx;
        if let Err(error) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|v| *v).await;
            })
            .await
        {
            tracing::error!(%error, "file proxy exited with error");
        }
    });

    Ok(handle)
}

async fn health(State(state): State<ProxyState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        live_tokens: state.registry.len().await,
    })
}

async fn workflow_button(State(state): State<ProxyState>) -> Json<serde_json::Value> {
    Json(workflow::join_channel_blocks(&state.channel_id))
}

async fn proxy_file(State(state): State<ProxyState>, uri: Uri) -> Result<Response, ProxyError> {
    let token =
        token_from_path(uri.path(), &state.path_prefix).ok_or(ProxyError::BadRequest)?;

    let locator = state
        .registry
        .resolve_and_consume(token)
        .await
        .ok_or_else(|| ProxyError::NotFound {
            token: token.to_string(),
        })?;

    tracing::debug!(%token, %locator, "proxying file");

    let upstream = state
        .http
        .get(&locator)
        .bearer_auth(&state.bearer_token)
        .send()
        .await
        .map_err(|error| ProxyError::UpstreamFetch(error.without_url()))?;

    let status = upstream.status();
    if !status.is_success() {
        return Err(ProxyError::UpstreamStatus {
            status: status.as_u16(),
        });
    }

    let content_type = upstream
        .headers()
        .get(CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    let content_length = upstream.headers().get(CONTENT_LENGTH).cloned();

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, content_type);
    if let Some(length) = content_length {
        headers.insert(CONTENT_LENGTH, length);
    }

    Ok(response)
}

/// First non-empty path segment after the optional mount prefix.
///
/// Paths that arrive with the prefix already stripped by a reverse proxy are
/// accepted as-is.
fn token_from_path<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path
        .strip_prefix(prefix)
        .filter(|rest| rest.is_empty() || rest.starts_with('/'))
        .unwrap_or(path);
    rest.split('/').find(|segment| !segment.is_empty())
}
