use axum::{
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::Response,
};

use clubhub_auth::AuthenticatedPrincipal;
use clubhub_infra::{Actor, ApprovalError};

use crate::app::errors::json_error;

/// The authenticated caller for this request.
///
/// Extracting it fails with 401 when the downstream trust filter found no
/// identity, so handlers that take it are authenticated-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentPrincipal(pub AuthenticatedPrincipal);

impl CurrentPrincipal {
    pub fn principal(&self) -> &AuthenticatedPrincipal {
        &self.0
    }

    pub fn actor(&self) -> Result<Actor, ApprovalError> {
        Actor::from_principal(&self.0)
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentPrincipal
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedPrincipal>()
            .cloned()
            .map(CurrentPrincipal)
            .ok_or_else(|| {
                json_error(StatusCode::UNAUTHORIZED, "unauthenticated", "authentication required")
            })
    }
}
