//! User accounts owned by the identity service.
//!
//! The role set here is the source of truth the Token Service mints from.
//! It changes only through admin actions or role-assignment facts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clubhub_core::{DomainError, DomainResult, Entity, UserId};

use crate::{Identity, Role, RoleSet};

/// bcrypt cost factor used outside tests.
pub const DEFAULT_BCRYPT_COST: u32 = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Password hash
// ─────────────────────────────────────────────────────────────────────────────

/// A bcrypt password hash. Never holds the plaintext.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub fn hash(password: &str, cost: u32) -> DomainResult<Self> {
        if password.len() < 8 {
            return Err(DomainError::validation("password must be at least 8 characters"));
        }
        bcrypt::hash(password, cost)
            .map(Self)
            .map_err(|e| DomainError::validation(format!("bcrypt hash: {e}")))
    }

    /// A malformed stored hash never verifies.
    pub fn verify(&self, password: &str) -> bool {
        bcrypt::verify(password, &self.0).unwrap_or(false)
    }
}

impl core::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("PasswordHash(..)")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// User account
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum UserStatus {
    #[default]
    Active,
    /// Cannot log in or refresh.
    Suspended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: UserId,
    /// Lower-cased login e-mail; the token subject.
    pub email: String,
    pub display_name: String,
    pub password_hash: PasswordHash,
    pub roles: RoleSet,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
}

impl UserAccount {
    /// New self-registered account. Every account starts as a student.
    pub fn register(
        id: UserId,
        email: &str,
        display_name: &str,
        password_hash: PasswordHash,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let email = normalize_email(email)?;
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(DomainError::validation("display name cannot be empty"));
        }

        Ok(Self {
            id,
            email,
            display_name: display_name.to_string(),
            password_hash,
            roles: RoleSet::from([Role::Student]),
            status: UserStatus::Active,
            created_at: now,
        })
    }

    pub fn can_authenticate(&self) -> bool {
        self.status == UserStatus::Active
    }

    pub fn check_password(&self, password: &str) -> bool {
        self.can_authenticate() && self.password_hash.verify(password)
    }

    /// Returns `true` when the role set changed. Redelivery is a no-op.
    pub fn grant_role(&mut self, role: Role) -> bool {
        self.roles.grant(role)
    }

    pub fn revoke_role(&mut self, role: Role) -> bool {
        self.roles.revoke(role)
    }

    pub fn suspend(&mut self) {
        self.status = UserStatus::Suspended;
    }

    /// What the Token Service mints for this account right now.
    pub fn identity(&self) -> Identity {
        Identity {
            subject: self.email.clone(),
            user_id: self.id,
            roles: self.roles.clone(),
        }
    }
}

impl Entity for UserAccount {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

pub fn normalize_email(raw: &str) -> DomainResult<String> {
    let email = raw.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(DomainError::validation("invalid email format")),
    }
}
