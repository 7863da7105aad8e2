use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clubhub_core::{ClubId, DomainError, DomainResult, Entity, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClubStatus {
    Active,
    Inactive,
}

/// A student club.
///
/// `advisor_id` and `president_id` point into the identity service; nothing
/// here checks that those users exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Club {
    pub id: ClubId,
    pub name: String,
    pub description: String,
    pub advisor_id: Option<UserId>,
    pub president_id: Option<UserId>,
    pub status: ClubStatus,
    /// Object storage key of the logo, if one was uploaded.
    pub logo_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Club {
    /// Found an active club with its first president.
    pub fn found(
        id: ClubId,
        name: &str,
        description: &str,
        advisor_id: Option<UserId>,
        president_id: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        Ok(Self {
            id,
            name: validate_name(name)?,
            description: description.trim().to_string(),
            advisor_id,
            president_id: Some(president_id),
            status: ClubStatus::Active,
            logo_key: None,
            created_at: now,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == ClubStatus::Active
    }

    pub fn is_advisor(&self, user: UserId) -> bool {
        self.advisor_id == Some(user)
    }

    pub fn is_president(&self, user: UserId) -> bool {
        self.president_id == Some(user)
    }

    pub fn rename(&mut self, name: &str) -> DomainResult<()> {
        self.name = validate_name(name)?;
        Ok(())
    }

    pub fn deactivate(&mut self) {
        self.status = ClubStatus::Inactive;
    }

    pub fn set_logo(&mut self, key: impl Into<String>) {
        self.logo_key = Some(key.into());
    }
}

impl Entity for Club {
    type Id = ClubId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

pub fn validate_name(raw: &str) -> DomainResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(DomainError::validation("club name cannot be empty"));
    }
    if name.chars().count() > 120 {
        return Err(DomainError::validation("club name is longer than 120 characters"));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn founding_sets_president_and_active() {
        let president = UserId::new();
        let club = Club::found(ClubId::new(), " Chess ", "", None, president, Utc::now()).unwrap();
        assert_eq!(club.name, "Chess");
        assert!(club.is_active());
        assert!(club.is_president(president));
        assert!(!club.is_advisor(president));
    }

    #[test]
    fn blank_names_are_rejected() {
        assert!(Club::found(ClubId::new(), "  ", "", None, UserId::new(), Utc::now()).is_err());
        assert!(validate_name(&"x".repeat(121)).is_err());
    }
}
