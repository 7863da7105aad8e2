use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use clubhub_auth::TokenError;
use clubhub_infra::{ApprovalError, IdentityError};

pub fn approval_error_to_response(err: ApprovalError) -> axum::response::Response {
    match err {
        ApprovalError::Forbidden(msg) => json_error(StatusCode::FORBIDDEN, "forbidden", msg),
        ApprovalError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        ApprovalError::NotFound(what) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("{what} not found"))
        }
        ApprovalError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        ApprovalError::Lookup(e) => json_error(StatusCode::BAD_GATEWAY, "lookup_failed", e.to_string()),
        ApprovalError::Repository(e) => {
            tracing::error!(error = %e, "repository failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
    }
}

pub fn identity_error_to_response(err: IdentityError) -> axum::response::Response {
    match err {
        IdentityError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        IdentityError::DuplicateEmail(email) => json_error(
            StatusCode::CONFLICT,
            "duplicate_email",
            format!("an account already exists for {email}"),
        ),
        IdentityError::InvalidCredentials => {
            json_error(StatusCode::UNAUTHORIZED, "invalid_credentials", "invalid credentials")
        }
        IdentityError::Token(TokenError::Expired) => {
            json_error(StatusCode::UNAUTHORIZED, "expired", "refresh token has expired")
        }
        IdentityError::Token(TokenError::Invalid) => {
            json_error(StatusCode::UNAUTHORIZED, "invalid_token", "refresh token is invalid")
        }
        IdentityError::Token(e) => {
            tracing::error!(error = %e, "token service failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "token_error", e.to_string())
        }
        IdentityError::Repository(e) => {
            tracing::error!(error = %e, "repository failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path id, answering 400 with `what` in the message.
pub fn parse_id<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, axum::response::Response> {
    raw.parse::<T>()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id")))
}
