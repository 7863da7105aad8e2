use axum::{Json, response::IntoResponse};

use crate::app::dto;
use crate::context::CurrentPrincipal;

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "service": "portal" }))
}

pub async fn whoami(CurrentPrincipal(principal): CurrentPrincipal) -> impl IntoResponse {
    Json(dto::principal_to_json(&principal))
}
