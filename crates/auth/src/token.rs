//! Token Service: issues and verifies signed bearer tokens.
//!
//! Access tokens are short-lived HS256 JWTs. Refresh ids are opaque,
//! long-lived and single-use; a user holds at most one at a time.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::Serialize;
use tracing::{debug, warn};

use clubhub_core::UserId;

use crate::claims::{TokenClaims, TokenError, validate_claims};
use crate::refresh::{RefreshSession, RefreshStore, RefreshToken};
use crate::secret::SigningSecret;
use crate::{Identity, Principal, RoleSet};

/// Access token lifetime: 15 minutes.
pub const DEFAULT_ACCESS_TTL_SECS: i64 = 15 * 60;

/// Refresh id lifetime: 7 days.
pub const DEFAULT_REFRESH_TTL_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TokenConfig {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_ttl: Duration::seconds(DEFAULT_ACCESS_TTL_SECS),
            refresh_ttl: Duration::seconds(DEFAULT_REFRESH_TTL_SECS),
        }
    }
}

/// Result of a successful login or refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: RefreshToken,
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    config: TokenConfig,
    sessions: Arc<dyn RefreshStore>,
}

impl core::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(secret: &SigningSecret, config: TokenConfig, sessions: Arc<dyn RefreshStore>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            config,
            sessions,
        }
    }

    /// Resolve `secret` (see [`SigningSecret::resolve`]) and build a service.
    pub fn from_secret_value(
        secret: &str,
        config: TokenConfig,
        sessions: Arc<dyn RefreshStore>,
    ) -> Result<Self, TokenError> {
        let secret = SigningSecret::resolve(secret)?;
        debug!(encoding = ?secret.encoding(), "resolved token signing secret");
        Ok(Self::new(&secret, config, sessions))
    }

    pub fn config(&self) -> TokenConfig {
        self.config
    }

    pub fn issue(&self, identity: &Identity) -> Result<IssuedTokens, TokenError> {
        self.issue_at(identity, Utc::now())
    }

    /// Mint an access token and a fresh refresh id.
    ///
    /// Any refresh id previously issued to the same user stops working.
    pub fn issue_at(&self, identity: &Identity, now: DateTime<Utc>) -> Result<IssuedTokens, TokenError> {
        let (access_token, expires_at) = self.mint_access_at(identity, now)?;

        let refresh_expires_at = now + self.config.refresh_ttl;
        let refresh_token = RefreshToken::generate();
        self.sessions.replace_for_user(RefreshSession {
            token: refresh_token.clone(),
            user_id: identity.user_id,
            expires_at: refresh_expires_at,
        })?;

        Ok(IssuedTokens {
            access_token,
            refresh_token,
            expires_at,
            refresh_expires_at,
        })
    }

    /// Mint only the signed access token.
    pub fn mint_access_at(
        &self,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>), TokenError> {
        let expires_at = now + self.config.access_ttl;
        let claims = TokenClaims {
            sub: identity.subject.clone(),
            user_id: Some(identity.user_id.to_string()),
            roles: identity.roles.to_claim(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        Ok((token, expires_at))
    }

    pub fn verify(&self, token: &str) -> Result<Principal, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify signature first, then the time window.
    ///
    /// A forged token is `Invalid` even if it is also past its expiry.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Principal, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["sub", "exp"]);

        let data = decode::<TokenClaims>(token, &self.decoding, &validation)
            .map_err(|_| TokenError::Invalid)?;
        let claims = data.claims;
        validate_claims(&claims, now)?;

        let user_id = match claims.user_id.as_deref() {
            None => None,
            Some(raw) => Some(raw.parse::<UserId>().map_err(|_| TokenError::Invalid)?),
        };

        let (roles, unknown) = RoleSet::parse_claim(&claims.roles);
        if !unknown.is_empty() {
            warn!(subject = %claims.sub, ?unknown, "token carries roles this service does not know");
        }

        Ok(Principal {
            subject: claims.sub,
            user_id,
            roles,
            issued_at: DateTime::from_timestamp(claims.iat, 0).ok_or(TokenError::Invalid)?,
            expires_at: DateTime::from_timestamp(claims.exp, 0).ok_or(TokenError::Invalid)?,
        })
    }

    pub fn rotate(
        &self,
        refresh_token: &RefreshToken,
        load_identity: impl FnOnce(UserId) -> Option<Identity>,
    ) -> Result<IssuedTokens, TokenError> {
        self.rotate_at(refresh_token, Utc::now(), load_identity)
    }

    /// Exchange a refresh id for a new token pair.
    ///
    /// The presented id is consumed whether or not the exchange succeeds. The
    /// identity is reloaded so role changes applied since login show up in the
    /// new access token.
    pub fn rotate_at(
        &self,
        refresh_token: &RefreshToken,
        now: DateTime<Utc>,
        load_identity: impl FnOnce(UserId) -> Option<Identity>,
    ) -> Result<IssuedTokens, TokenError> {
        let session = self.sessions.take(refresh_token)?.ok_or(TokenError::Invalid)?;
        if now >= session.expires_at {
            return Err(TokenError::Expired);
        }
        let identity = load_identity(session.user_id).ok_or(TokenError::Invalid)?;
        self.issue_at(&identity, now)
    }
}
