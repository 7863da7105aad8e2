use axum::{Router, routing::get};

pub mod approvals;
pub mod clubs;
pub mod events;
pub mod system;

/// Every portal endpoint except `/health`. Public reads are public only
/// because the gateway lets them through without a token.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/approvals", approvals::router())
        .nest("/clubs", clubs::router())
        .nest("/events", events::router())
}
