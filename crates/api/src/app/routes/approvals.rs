//! `/approvals/{kind}` for the four request kinds.
//!
//! ```text
//! POST /                 submit      201
//! GET  /                 pending requests the caller can see
//! GET  /:id              one request
//! POST /:id/approve      decide      200 | 403 | 404 | 409
//! POST /:id/reject       decide      body {"reason": ...} optional
//! POST /:id/cancel       requester only
//! ```

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::Path,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::de::DeserializeOwned;

use clubhub_core::RequestId;
use clubhub_clubs::{ApprovalKind, ApprovalRequest};
use clubhub_infra::approvals::{
    Actor, ApprovalPolicy, ClubCreationPolicy, EventApprovalPolicy, MembershipPolicy,
    RoleChangePolicy, Workflow,
};

use crate::app::dto::{self, ChangeJson};
use crate::app::errors::{approval_error_to_response, parse_id};
use crate::app::services::PortalServices;
use crate::context::CurrentPrincipal;

/// Ties a policy to its workflow inside [`PortalServices`].
pub trait KindRoutes:
    ApprovalPolicy<Input: DeserializeOwned + Send + 'static, Change: ChangeJson> + Sized + 'static
{
    fn workflow(services: &PortalServices) -> &Workflow<Self>;
}

impl KindRoutes for ClubCreationPolicy {
    fn workflow(services: &PortalServices) -> &Workflow<Self> {
        &services.club_creations
    }
}

impl KindRoutes for MembershipPolicy {
    fn workflow(services: &PortalServices) -> &Workflow<Self> {
        &services.memberships
    }
}

impl KindRoutes for RoleChangePolicy {
    fn workflow(services: &PortalServices) -> &Workflow<Self> {
        &services.role_changes
    }
}

impl KindRoutes for EventApprovalPolicy {
    fn workflow(services: &PortalServices) -> &Workflow<Self> {
        &services.event_approvals
    }
}

pub fn router() -> Router {
    Router::new()
        .nest(
            &format!("/{}", ApprovalKind::ClubCreation.path_segment()),
            kind_router::<ClubCreationPolicy>(),
        )
        .nest(
            &format!("/{}", ApprovalKind::Membership.path_segment()),
            kind_router::<MembershipPolicy>(),
        )
        .nest(
            &format!("/{}", ApprovalKind::RoleChange.path_segment()),
            kind_router::<RoleChangePolicy>(),
        )
        .nest(
            &format!("/{}", ApprovalKind::EventApproval.path_segment()),
            kind_router::<EventApprovalPolicy>(),
        )
}

fn kind_router<P: KindRoutes>() -> Router {
    Router::new()
        .route("/", post(submit::<P>).get(list_pending::<P>))
        .route("/:id", get(get_request::<P>))
        .route("/:id/approve", post(approve::<P>))
        .route("/:id/reject", post(reject::<P>))
        .route("/:id/cancel", post(cancel::<P>))
}

fn actor(principal: &CurrentPrincipal) -> Result<Actor, Response> {
    principal.actor().map_err(approval_error_to_response)
}

/// Requester, target, or someone allowed to decide.
fn visible_to<P: KindRoutes>(wf: &Workflow<P>, actor: &Actor, r: &ApprovalRequest<P::Change>) -> bool {
    r.requester_id == actor.user_id
        || r.target_id == Some(actor.user_id)
        || wf.policy().can_decide(wf.store(), actor, r).is_ok()
}

fn decided(result: Result<ApprovalRequest<impl ChangeJson>, clubhub_infra::ApprovalError>) -> Response {
    match result {
        Ok(r) => (StatusCode::OK, Json(dto::request_to_json(&r))).into_response(),
        Err(e) => approval_error_to_response(e),
    }
}

pub async fn submit<P: KindRoutes>(
    Extension(services): Extension<Arc<PortalServices>>,
    principal: CurrentPrincipal,
    Json(body): Json<P::Input>,
) -> Response {
    let actor = match actor(&principal) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    match P::workflow(&services).submit(&actor, body) {
        Ok(r) => (StatusCode::CREATED, Json(dto::request_to_json(&r))).into_response(),
        Err(e) => approval_error_to_response(e),
    }
}

pub async fn list_pending<P: KindRoutes>(
    Extension(services): Extension<Arc<PortalServices>>,
    principal: CurrentPrincipal,
) -> Response {
    let actor = match actor(&principal) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let wf = P::workflow(&services);
    match wf.list_pending() {
        Ok(pending) => {
            let items = pending
                .iter()
                .filter(|r| visible_to(wf, &actor, r))
                .map(dto::request_to_json)
                .collect::<Vec<_>>();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => approval_error_to_response(e),
    }
}

pub async fn get_request<P: KindRoutes>(
    Extension(services): Extension<Arc<PortalServices>>,
    principal: CurrentPrincipal,
    Path(id): Path<String>,
) -> Response {
    let actor = match actor(&principal) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let id: RequestId = match parse_id(&id, "request") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let wf = P::workflow(&services);
    match wf.get(id) {
        Ok(r) if visible_to(wf, &actor, &r) => {
            (StatusCode::OK, Json(dto::request_to_json(&r))).into_response()
        }
        Ok(_) => approval_error_to_response(clubhub_infra::ApprovalError::not_found(format!("request {id}"))),
        Err(e) => approval_error_to_response(e),
    }
}

pub async fn approve<P: KindRoutes>(
    Extension(services): Extension<Arc<PortalServices>>,
    principal: CurrentPrincipal,
    Path(id): Path<String>,
) -> Response {
    let actor = match actor(&principal) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let id: RequestId = match parse_id(&id, "request") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    decided(P::workflow(&services).approve(&actor, id))
}

pub async fn reject<P: KindRoutes>(
    Extension(services): Extension<Arc<PortalServices>>,
    principal: CurrentPrincipal,
    Path(id): Path<String>,
    body: Option<Json<dto::RejectRequest>>,
) -> Response {
    let actor = match actor(&principal) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let id: RequestId = match parse_id(&id, "request") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let reason = body.and_then(|Json(b)| b.reason);
    decided(P::workflow(&services).reject(&actor, id, reason))
}

pub async fn cancel<P: KindRoutes>(
    Extension(services): Extension<Arc<PortalServices>>,
    principal: CurrentPrincipal,
    Path(id): Path<String>,
) -> Response {
    let actor = match actor(&principal) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let id: RequestId = match parse_id(&id, "request") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    decided(P::workflow(&services).cancel(&actor, id))
}
