//! Edge trust filter decision logic (transport-agnostic).
//!
//! Per request: `UNCHECKED -> PUBLIC`, or
//! `UNCHECKED -> AUTHENTICATING -> {FORWARDED, REJECTED}`.
//! The HTTP layer applies the decision; this module only decides.

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::token::TokenService;
use crate::trust::TrustHeaders;
use crate::TokenError;

static READ_ONLY_COLLECTIONS: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(r"^/clubs(?:/[0-9a-fA-F-]{36})?/?$").expect("static pattern"),
        Regex::new(r"^/events(?:/[0-9a-fA-F-]{36})?/?$").expect("static pattern"),
    ]
});

const PUBLIC_EXACT: [&str; 4] = ["/auth/login", "/auth/register", "/auth/refresh", "/health"];

/// Static allow-list of paths that bypass authentication.
#[derive(Debug, Clone)]
pub struct PublicPaths {
    exact: Vec<String>,
}

impl Default for PublicPaths {
    fn default() -> Self {
        Self {
            exact: PUBLIC_EXACT.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl PublicPaths {
    pub fn is_public(&self, method: &str, path: &str) -> bool {
        if self.exact.iter().any(|p| p == path) {
            return true;
        }
        method.eq_ignore_ascii_case("GET") && READ_ONLY_COLLECTIONS.iter().any(|re| re.is_match(path))
    }
}

/// Why the edge refused a request. Always surfaces as a bare 401.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// No `Authorization` header, wrong scheme, or empty token.
    MissingCredentials,
    Expired,
    Invalid,
}

impl Rejection {
    /// Value for the `WWW-Authenticate` challenge so clients can tell an
    /// expired token (refresh) from an invalid one (log in again).
    pub fn challenge(&self) -> &'static str {
        match self {
            Rejection::MissingCredentials => "Bearer",
            Rejection::Expired => "Bearer error=\"expired\"",
            Rejection::Invalid => "Bearer error=\"invalid\"",
        }
    }
}

impl From<TokenError> for Rejection {
    fn from(value: TokenError) -> Self {
        match value {
            TokenError::Expired => Rejection::Expired,
            _ => Rejection::Invalid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeDecision {
    Public,
    Forward(TrustHeaders),
    Reject(Rejection),
}

/// Extract the token from an `Authorization` header value.
///
/// The scheme is matched case-insensitively; whitespace and one layer of
/// surrounding single or double quotes around the token are trimmed.
pub fn extract_bearer(header: Option<&str>) -> Result<&str, Rejection> {
    let header = header.ok_or(Rejection::MissingCredentials)?.trim();
    let (scheme, rest) = header.split_once(char::is_whitespace).ok_or(Rejection::MissingCredentials)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(Rejection::MissingCredentials);
    }

    let mut token = rest.trim();
    for quote in ['"', '\''] {
        if token.len() >= 2 && token.starts_with(quote) && token.ends_with(quote) {
            token = token[1..token.len() - 1].trim();
            break;
        }
    }

    if token.is_empty() {
        return Err(Rejection::MissingCredentials);
    }
    Ok(token)
}

#[derive(Debug, Clone)]
pub struct EdgeTrustFilter {
    tokens: Arc<TokenService>,
    public: PublicPaths,
}

impl EdgeTrustFilter {
    pub fn new(tokens: Arc<TokenService>, public: PublicPaths) -> Self {
        Self { tokens, public }
    }

    pub fn evaluate(&self, method: &str, path: &str, authorization: Option<&str>) -> EdgeDecision {
        self.evaluate_at(method, path, authorization, Utc::now())
    }

    pub fn evaluate_at(
        &self,
        method: &str,
        path: &str,
        authorization: Option<&str>,
        now: DateTime<Utc>,
    ) -> EdgeDecision {
        if self.public.is_public(method, path) {
            return EdgeDecision::Public;
        }

        let token = match extract_bearer(authorization) {
            Ok(t) => t,
            Err(r) => return EdgeDecision::Reject(r),
        };

        match self.tokens.verify_at(token, now) {
            Ok(principal) => {
                // `extract_bearer` succeeded, so the header is present.
                let header = authorization.unwrap_or_default();
                EdgeDecision::Forward(TrustHeaders::for_principal(header, &principal))
            }
            Err(e) => EdgeDecision::Reject(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresh::InMemoryRefreshStore;
    use crate::token::TokenConfig;
    use crate::{Identity, Role, RoleSet};
    use clubhub_core::UserId;

    fn filter() -> (EdgeTrustFilter, Arc<TokenService>) {
        let tokens = Arc::new(
            TokenService::from_secret_value(
                "RAW:edge-secret",
                TokenConfig::default(),
                Arc::new(InMemoryRefreshStore::new()),
            )
            .unwrap(),
        );
        (EdgeTrustFilter::new(tokens.clone(), PublicPaths::default()), tokens)
    }

    const ID: &str = "0190c6f2-5a1e-7c3b-9d4e-123456789abc";

    #[test]
    fn public_paths() {
        let p = PublicPaths::default();
        assert!(p.is_public("POST", "/auth/login"));
        assert!(p.is_public("GET", "/health"));
        assert!(p.is_public("GET", "/clubs"));
        assert!(p.is_public("GET", &format!("/clubs/{ID}")));
        assert!(p.is_public("get", &format!("/events/{ID}")));

        assert!(!p.is_public("POST", "/clubs"));
        assert!(!p.is_public("DELETE", &format!("/events/{ID}")));
        assert!(!p.is_public("GET", "/clubs/not-an-id"));
        assert!(!p.is_public("GET", &format!("/clubs/{ID}/members")));
        assert!(!p.is_public("GET", "/approvals/memberships"));
    }

    #[test]
    fn bearer_parsing() {
        assert_eq!(extract_bearer(Some("Bearer abc")), Ok("abc"));
        assert_eq!(extract_bearer(Some("bearer   abc  ")), Ok("abc"));
        assert_eq!(extract_bearer(Some("BEARER \"abc\"")), Ok("abc"));
        assert_eq!(extract_bearer(Some("Bearer 'abc'")), Ok("abc"));

        assert_eq!(extract_bearer(None), Err(Rejection::MissingCredentials));
        assert_eq!(extract_bearer(Some("Basic abc")), Err(Rejection::MissingCredentials));
        assert_eq!(extract_bearer(Some("Bearer")), Err(Rejection::MissingCredentials));
        assert_eq!(extract_bearer(Some("Bearer \"\"")), Err(Rejection::MissingCredentials));
    }

    #[test]
    fn valid_token_is_forwarded_with_trust_headers() {
        let (filter, tokens) = filter();
        let identity = Identity {
            subject: "s@campus.edu".into(),
            user_id: UserId::new(),
            roles: RoleSet::from([Role::Student]),
        };
        let issued = tokens.issue(&identity).unwrap();
        let header = format!("Bearer {}", issued.access_token);

        let EdgeDecision::Forward(h) = filter.evaluate("POST", "/approvals/memberships", Some(&header)) else {
            panic!("expected forward");
        };
        assert_eq!(h.authorization, header);
        assert_eq!(h.email, "s@campus.edu");
        assert_eq!(h.user_id, Some(identity.user_id.to_string()));
        assert_eq!(h.roles.as_deref(), Some("ROLE_STUDENT"));
    }

    #[test]
    fn expired_and_invalid_are_distinguished() {
        let (filter, tokens) = filter();
        let identity = Identity {
            subject: "s@campus.edu".into(),
            user_id: UserId::new(),
            roles: RoleSet::new(),
        };
        let now = Utc::now();
        let (token, expires_at) = tokens.mint_access_at(&identity, now).unwrap();
        let header = format!("Bearer {token}");

        assert_eq!(
            filter.evaluate_at("GET", "/whoami", Some(&header), expires_at),
            EdgeDecision::Reject(Rejection::Expired)
        );
        assert_eq!(
            filter.evaluate_at("GET", "/whoami", Some("Bearer nope"), now),
            EdgeDecision::Reject(Rejection::Invalid)
        );
        assert_eq!(
            filter.evaluate_at("GET", "/whoami", None, now),
            EdgeDecision::Reject(Rejection::MissingCredentials)
        );
    }

    #[test]
    fn public_paths_skip_token_checks_entirely() {
        let (filter, _) = filter();
        assert_eq!(
            filter.evaluate("GET", "/clubs", Some("Bearer garbage")),
            EdgeDecision::Public
        );
    }
}
