use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bearer token claims (wire format).
///
/// `roles` is the deterministic comma-joined claim produced by
/// [`RoleSet::to_claim`](crate::RoleSet::to_claim); timestamps are unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Login identifier (e-mail).
    pub sub: String,

    /// Stable user id.
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default)]
    pub roles: String,

    pub iat: i64,

    pub exp: i64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Well-formed and correctly signed, but past its expiry.
    #[error("token has expired")]
    Expired,

    /// Anything else: bad signature, malformed structure, unknown refresh id.
    #[error("token is invalid")]
    Invalid,

    /// The signing secret could not be resolved.
    #[error("invalid signing secret: {0}")]
    Config(String),

    #[error("failed to sign token: {0}")]
    Signing(String),

    /// Refresh sessions could not be read or written.
    #[error("refresh session store unavailable: {0}")]
    Store(String),
}

/// Deterministically validate the time window of already-verified claims.
///
/// There is no leeway: a token is expired from the very second `exp` is
/// reached.
pub fn validate_claims(claims: &TokenClaims, now: DateTime<Utc>) -> Result<(), TokenError> {
    if claims.exp <= claims.iat {
        return Err(TokenError::Invalid);
    }
    if now.timestamp() >= claims.exp {
        return Err(TokenError::Expired);
    }
    Ok(())
}
