use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::Path,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, put},
};

use clubhub_clubs::Club;
use clubhub_core::ClubId;
use clubhub_infra::ApprovalError;

use crate::app::dto;
use crate::app::errors::{approval_error_to_response, parse_id};
use crate::app::services::PortalServices;
use crate::context::CurrentPrincipal;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_clubs))
        .route("/:id", get(get_club).patch(rename_club).delete(delete_club))
        .route("/:id/logo", put(upload_logo))
        .route("/:id/members", get(list_members))
}

fn club_json(services: &PortalServices, club: &Club) -> Result<serde_json::Value, ApprovalError> {
    Ok(dto::club_to_json(club, services.clubs.logo_url(club)?))
}

fn respond(status: StatusCode, services: &PortalServices, club: Result<Club, ApprovalError>) -> Response {
    match club.and_then(|c| club_json(services, &c)) {
        Ok(body) => (status, Json(body)).into_response(),
        Err(e) => approval_error_to_response(e),
    }
}

pub async fn list_clubs(Extension(services): Extension<Arc<PortalServices>>) -> Response {
    let items = services.clubs.list_active().and_then(|clubs| {
        clubs
            .iter()
            .map(|c| club_json(&services, c))
            .collect::<Result<Vec<_>, _>>()
    });
    match items {
        Ok(items) => (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response(),
        Err(e) => approval_error_to_response(e),
    }
}

pub async fn get_club(
    Extension(services): Extension<Arc<PortalServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: ClubId = match parse_id(&id, "club") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    respond(StatusCode::OK, &services, services.clubs.get(id))
}

pub async fn rename_club(
    Extension(services): Extension<Arc<PortalServices>>,
    principal: CurrentPrincipal,
    Path(id): Path<String>,
    Json(body): Json<dto::RenameClubRequest>,
) -> Response {
    let id: ClubId = match parse_id(&id, "club") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let result = principal
        .actor()
        .and_then(|actor| services.clubs.rename(&actor, id, &body.name));
    respond(StatusCode::OK, &services, result)
}

/// Answers 202: the club is deactivated now, its memberships and events go
/// once the cascade consumer has run.
pub async fn delete_club(
    Extension(services): Extension<Arc<PortalServices>>,
    principal: CurrentPrincipal,
    Path(id): Path<String>,
) -> Response {
    let id: ClubId = match parse_id(&id, "club") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let result = principal
        .actor()
        .and_then(|actor| services.clubs.retire(&actor, id));
    respond(StatusCode::ACCEPTED, &services, result)
}

pub async fn upload_logo(
    Extension(services): Extension<Arc<PortalServices>>,
    principal: CurrentPrincipal,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let id: ClubId = match parse_id(&id, "club") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");
    let result = principal
        .actor()
        .and_then(|actor| services.clubs.set_logo(&actor, id, body.to_vec(), content_type));
    respond(StatusCode::OK, &services, result)
}

pub async fn list_members(
    Extension(services): Extension<Arc<PortalServices>>,
    _principal: CurrentPrincipal,
    Path(id): Path<String>,
) -> Response {
    let id: ClubId = match parse_id(&id, "club") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.clubs.members(id) {
        Ok(members) => {
            let items = members.iter().map(dto::membership_to_json).collect::<Vec<_>>();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => approval_error_to_response(e),
    }
}
