use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::Path,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};

use clubhub_core::CampusEventId;

use crate::app::dto;
use crate::app::errors::{approval_error_to_response, parse_id};
use crate::app::services::PortalServices;

/// Approved campus events only; proposals go through `/approvals/event-approvals`.
pub fn router() -> Router {
    Router::new()
        .route("/", get(list_events))
        .route("/:id", get(get_event))
}

pub async fn list_events(Extension(services): Extension<Arc<PortalServices>>) -> Response {
    match services.clubs.public_events() {
        Ok(events) => {
            let items = events.iter().map(dto::event_to_json).collect::<Vec<_>>();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => approval_error_to_response(e),
    }
}

pub async fn get_event(
    Extension(services): Extension<Arc<PortalServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: CampusEventId = match parse_id(&id, "event") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.clubs.public_event(id) {
        Ok(event) => (StatusCode::OK, Json(dto::event_to_json(&event))).into_response(),
        Err(e) => approval_error_to_response(e),
    }
}
