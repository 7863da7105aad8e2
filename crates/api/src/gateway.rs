//! Edge gateway: the only public entrypoint.
//!
//! ```text
//! request ─▶ edge_filter ─▶ TraceLayer ─▶ /auth/*, /health  (served here)
//!            │                         └▶ anything else     (proxied upstream)
//!            └─▶ 401 (empty body, WWW-Authenticate)
//! ```
//!
//! Inbound `X-Authenticated-*` headers are always stripped; they are only
//! ever set here, from a verified token.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Extension, Json, Router,
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use clubhub_auth::trust::IDENTITY_HEADERS;
use clubhub_auth::{EdgeDecision, EdgeTrustFilter, PublicPaths, RefreshToken, Rejection};
use clubhub_infra::{IdentityError, IdentityService};

use crate::app::dto;
use crate::app::errors::{identity_error_to_response, json_error};

/// Largest request body the proxy buffers before forwarding.
pub const MAX_PROXY_BODY: usize = 4 * 1024 * 1024;

// Connection-scoped headers never forwarded in either direction.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    HeaderName::from_static("keep-alive"),
];

/// Where accepted requests go.
#[derive(Debug, Clone)]
pub struct Upstream {
    client: reqwest::Client,
    base_url: String,
}

impl Upstream {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Debug, Clone)]
pub struct GatewayState {
    pub identity: Arc<IdentityService>,
    pub upstream: Upstream,
}

pub fn build_gateway(state: GatewayState) -> Router {
    let edge = Arc::new(EdgeTrustFilter::new(state.identity.tokens().clone(), PublicPaths::default()));

    Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .fallback(proxy)
        .layer(Extension(Arc::new(state)))
        // First layer added to the builder runs first: edge decision before tracing.
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn_with_state(edge, edge_filter))
                .layer(TraceLayer::new_for_http()),
        )
}

// ─────────────────────────────────────────────────────────────────────────────
// Edge filter
// ─────────────────────────────────────────────────────────────────────────────

fn unauthorized(rejection: Rejection) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, rejection.challenge())],
    )
        .into_response()
}

pub async fn edge_filter(
    State(filter): State<Arc<EdgeTrustFilter>>,
    mut req: Request,
    next: Next,
) -> Response {
    for name in IDENTITY_HEADERS {
        req.headers_mut().remove(name);
    }

    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    match filter.evaluate(req.method().as_str(), req.uri().path(), authorization.as_deref()) {
        EdgeDecision::Public => next.run(req).await,
        EdgeDecision::Forward(trust) => {
            for (name, value) in trust.entries() {
                let Ok(value) = HeaderValue::from_str(&value) else {
                    warn!(header = name, "trust header value not representable");
                    return unauthorized(Rejection::Invalid);
                };
                req.headers_mut().insert(HeaderName::from_static(name), value);
            }
            next.run(req).await
        }
        EdgeDecision::Reject(rejection) => {
            info!(
                method = %req.method(),
                path = %req.uri().path(),
                reason = ?rejection,
                "request rejected at the edge"
            );
            unauthorized(rejection)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Identity routes
// ─────────────────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "service": "gateway" }))
}

/// Run a password-hashing call off the async workers.
async fn blocking<F>(f: F) -> Response
where
    F: FnOnce() -> Result<Response, IdentityError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => identity_error_to_response(e),
        Err(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string()),
    }
}

pub async fn register(
    Extension(state): Extension<Arc<GatewayState>>,
    Json(body): Json<dto::RegisterRequest>,
) -> Response {
    let identity = state.identity.clone();
    blocking(move || {
        let account = identity.register(&body.email, &body.display_name, &body.password)?;
        Ok((StatusCode::CREATED, Json(dto::account_to_json(&account))).into_response())
    })
    .await
}

pub async fn login(
    Extension(state): Extension<Arc<GatewayState>>,
    Json(body): Json<dto::LoginRequest>,
) -> Response {
    let identity = state.identity.clone();
    blocking(move || {
        let tokens = identity.login(&body.email, &body.password)?;
        Ok((StatusCode::OK, Json(dto::tokens_to_json(&tokens))).into_response())
    })
    .await
}

pub async fn refresh(
    Extension(state): Extension<Arc<GatewayState>>,
    Json(body): Json<dto::RefreshRequest>,
) -> Response {
    let identity = state.identity.clone();
    blocking(move || {
        let tokens = identity.refresh(&RefreshToken::from_string(body.refresh_token))?;
        Ok((StatusCode::OK, Json(dto::tokens_to_json(&tokens))).into_response())
    })
    .await
}

// ─────────────────────────────────────────────────────────────────────────────
// Proxy
// ─────────────────────────────────────────────────────────────────────────────

fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in &HOP_BY_HOP {
        out.remove(name);
    }
    out.remove(header::HOST);
    out.remove(header::CONTENT_LENGTH);
    out
}

pub async fn proxy(Extension(state): Extension<Arc<GatewayState>>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", state.upstream.base_url, path);

    let body = match axum::body::to_bytes(body, MAX_PROXY_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return json_error(
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                format!("request body exceeds {MAX_PROXY_BODY} bytes"),
            );
        }
    };

    let sent = state
        .upstream
        .client
        .request(parts.method.clone(), &url)
        .headers(forwardable(&parts.headers))
        .body(body)
        .send()
        .await;

    let upstream = match sent {
        Ok(r) => r,
        Err(e) => {
            warn!(method = %parts.method, url = %url, error = %e, "upstream request failed");
            return json_error(StatusCode::BAD_GATEWAY, "bad_gateway", "upstream unavailable");
        }
    };

    let status = upstream.status();
    let headers = forwardable(upstream.headers());
    let bytes = match upstream.bytes().await {
        Ok(b) => b,
        Err(e) => {
            warn!(url = %url, error = %e, "upstream response could not be read");
            return json_error(StatusCode::BAD_GATEWAY, "bad_gateway", "upstream response incomplete");
        }
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
