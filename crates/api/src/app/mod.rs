//! Club portal application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store, workflows and consumers
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::downstream;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the portal router. Expects to sit behind the gateway, which is the
/// only thing allowed to set trust headers.
pub fn build_portal(services: Arc<services::PortalServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(Extension(services))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(downstream::trust_filter)),
        )
}
