use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clubhub_core::UserId;

use crate::{Role, RoleSet};

/// What the Token Service mints a token for.
///
/// This is a view over the user account's *current* role set; it is built at
/// login/refresh time and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Login identifier (e-mail).
    pub subject: String,
    pub user_id: UserId,
    pub roles: RoleSet,
}

/// A verified bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub subject: String,
    pub user_id: Option<UserId>,
    pub roles: RoleSet,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Per-request principal reconstructed from trust headers inside an internal
/// service.
///
/// No signature is checked to build this; it is only as trustworthy as the
/// network path from the edge gateway. It lives for one request and is handed
/// down the call chain explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedPrincipal {
    pub email: String,
    pub user_id: Option<UserId>,
    /// Normalized `ROLE_*` authorities exactly as received (unknown names included).
    pub authorities: Vec<String>,
    /// The subset of `authorities` this service understands.
    pub roles: RoleSet,
}

impl AuthenticatedPrincipal {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(role)
    }

    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        self.roles.contains_any(roles)
    }

    pub fn is_admin(&self) -> bool {
        self.roles.contains(Role::Admin)
    }
}
