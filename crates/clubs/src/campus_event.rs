use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clubhub_core::{CampusEventId, ClubId, DomainError, DomainResult, Entity, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampusEventStatus {
    Pending,
    Approved,
    Rejected,
}

/// An event hosted by a club. Visible publicly once approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampusEvent {
    pub id: CampusEventId,
    pub club_id: ClubId,
    /// Denormalized; rewritten when the club is renamed.
    pub club_name: String,
    pub title: String,
    pub location: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: CampusEventStatus,
    pub created_by: UserId,
}

impl CampusEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn propose(
        id: CampusEventId,
        club_id: ClubId,
        club_name: &str,
        title: &str,
        location: Option<String>,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        created_by: UserId,
    ) -> DomainResult<Self> {
        let title = title.trim();
        if title.is_empty() {
            return Err(DomainError::validation("event title cannot be empty"));
        }
        if ends_at <= starts_at {
            return Err(DomainError::validation("event must end after it starts"));
        }

        Ok(Self {
            id,
            club_id,
            club_name: club_name.to_string(),
            title: title.to_string(),
            location: location.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()),
            starts_at,
            ends_at,
            status: CampusEventStatus::Pending,
            created_by,
        })
    }

    pub fn is_public(&self) -> bool {
        self.status == CampusEventStatus::Approved
    }

    pub fn approve(&mut self) -> DomainResult<()> {
        self.decide(CampusEventStatus::Approved)
    }

    pub fn reject(&mut self) -> DomainResult<()> {
        self.decide(CampusEventStatus::Rejected)
    }

    fn decide(&mut self, status: CampusEventStatus) -> DomainResult<()> {
        if self.status != CampusEventStatus::Pending {
            return Err(DomainError::conflict("event has already been decided"));
        }
        self.status = status;
        Ok(())
    }
}

impl Entity for CampusEvent {
    type Id = CampusEventId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
