//! Trust-header contract between the edge gateway and internal services.
//!
//! The edge verifies the bearer token and writes these headers. Internal
//! services read them and nothing else; they never re-verify the token.
//! Header names are lower-case so they can be used directly with `http`.

use tracing::warn;

use clubhub_core::UserId;

use crate::roles::normalize_authority;
use crate::{AuthenticatedPrincipal, Principal, Role, RoleSet};

pub const AUTHORIZATION_HEADER: &str = "authorization";
pub const USER_EMAIL_HEADER: &str = "x-authenticated-user-email";
pub const USER_ID_HEADER: &str = "x-authenticated-user-id";
pub const USER_ROLES_HEADER: &str = "x-authenticated-user-roles";

/// Headers a client must never be able to set on its own.
pub const IDENTITY_HEADERS: [&str; 3] = [USER_EMAIL_HEADER, USER_ID_HEADER, USER_ROLES_HEADER];

/// Outbound headers the edge writes after a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustHeaders {
    /// The inbound `Authorization` value, forwarded unchanged.
    pub authorization: String,
    pub email: String,
    pub user_id: Option<String>,
    pub roles: Option<String>,
}

impl TrustHeaders {
    pub fn for_principal(authorization: &str, principal: &Principal) -> Self {
        let roles = principal.roles.to_claim();
        Self {
            authorization: authorization.to_string(),
            email: principal.subject.clone(),
            user_id: principal.user_id.map(|id| id.to_string()),
            roles: (!roles.is_empty()).then_some(roles),
        }
    }

    /// `(name, value)` pairs to set, in a stable order.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![
            (AUTHORIZATION_HEADER, self.authorization.clone()),
            (USER_EMAIL_HEADER, self.email.clone()),
        ];
        if let Some(id) = &self.user_id {
            out.push((USER_ID_HEADER, id.clone()));
        }
        if let Some(roles) = &self.roles {
            out.push((USER_ROLES_HEADER, roles.clone()));
        }
        out
    }
}

/// Split a roles header into normalized `ROLE_*` authorities.
///
/// Splits on commas, trims, drops empties, adds the prefix where missing and
/// collapses duplicates (first occurrence wins).
pub fn parse_authorities(header: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for authority in header.split(',').filter_map(normalize_authority) {
        if !out.contains(&authority) {
            out.push(authority);
        }
    }
    out
}

/// Build the per-request principal from trust headers.
///
/// Returns `None` when the e-mail header is absent or blank: the request then
/// continues unauthenticated and route-level rules decide.
pub fn principal_from_headers(
    email: Option<&str>,
    user_id: Option<&str>,
    roles: Option<&str>,
) -> Option<AuthenticatedPrincipal> {
    let email = email.map(str::trim).filter(|e| !e.is_empty())?;

    let user_id = user_id.map(str::trim).filter(|v| !v.is_empty()).and_then(|raw| {
        raw.parse::<UserId>()
            .map_err(|e| warn!(header = USER_ID_HEADER, error = %e, "ignoring malformed user id header"))
            .ok()
    });

    let authorities = roles.map(parse_authorities).unwrap_or_default();
    let known: RoleSet = authorities
        .iter()
        .filter_map(|a| a.parse::<Role>().ok())
        .collect();

    Some(AuthenticatedPrincipal {
        email: email.to_string(),
        user_id,
        authorities,
        roles: known,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn authorities_are_normalized_and_deduplicated() {
        assert_eq!(
            parse_authorities(" student, ROLE_ADMIN,,role_student , club_official"),
            vec!["ROLE_STUDENT", "ROLE_ADMIN", "ROLE_CLUB_OFFICIAL"]
        );
        assert!(parse_authorities(" , ,").is_empty());
    }

    #[test]
    fn missing_email_means_unauthenticated() {
        assert!(principal_from_headers(None, Some("x"), Some("ROLE_ADMIN")).is_none());
        assert!(principal_from_headers(Some("  "), None, None).is_none());
    }

    #[test]
    fn builds_principal_without_any_verification() {
        let id = UserId::new();
        let p = principal_from_headers(
            Some("olga@campus.edu"),
            Some(&id.to_string()),
            Some("ROLE_CLUB_OFFICIAL,ROLE_MASCOT"),
        )
        .unwrap();

        assert_eq!(p.email, "olga@campus.edu");
        assert_eq!(p.user_id, Some(id));
        assert_eq!(p.authorities, vec!["ROLE_CLUB_OFFICIAL", "ROLE_MASCOT"]);
        assert_eq!(p.roles, RoleSet::from([Role::ClubOfficial]));
    }

    #[test]
    fn malformed_user_id_is_dropped_not_fatal() {
        let p = principal_from_headers(Some("a@b.c"), Some("42"), None).unwrap();
        assert_eq!(p.user_id, None);
        assert!(p.roles.is_empty());
    }

    #[test]
    fn headers_omit_absent_optionals() {
        let principal = Principal {
            subject: "a@b.c".into(),
            user_id: None,
            roles: RoleSet::new(),
            issued_at: Utc::now(),
            expires_at: Utc::now(),
        };
        let headers = TrustHeaders::for_principal("Bearer t", &principal);
        let names: Vec<_> = headers.entries().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec![AUTHORIZATION_HEADER, USER_EMAIL_HEADER]);
    }
}
