//! Club memberships and positions.
//!
//! # Invariants
//! - One membership per (club, user).
//! - An exclusive position has at most one holder per club.
//! - A user never holds the same exclusive position in two clubs.
//!
//! The two position checks are plain functions over membership slices so a
//! workflow can re-run them against freshly loaded rows at decision time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clubhub_core::{ClubId, DomainError, DomainResult, Entity, MembershipId, UserId};

/// A member's position (club role).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClubPosition {
    Member,
    Official,
    Treasurer,
    VicePresident,
    President,
}

impl ClubPosition {
    pub const ALL: [ClubPosition; 5] = [
        ClubPosition::Member,
        ClubPosition::Official,
        ClubPosition::Treasurer,
        ClubPosition::VicePresident,
        ClubPosition::President,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClubPosition::Member => "MEMBER",
            ClubPosition::Official => "OFFICIAL",
            ClubPosition::Treasurer => "TREASURER",
            ClubPosition::VicePresident => "VICE_PRESIDENT",
            ClubPosition::President => "PRESIDENT",
        }
    }

    /// Named single-holder slots.
    pub fn is_exclusive(&self) -> bool {
        matches!(
            self,
            ClubPosition::President | ClubPosition::VicePresident | ClubPosition::Treasurer
        )
    }

    /// Positions that may submit events on behalf of the club.
    pub fn is_officer(&self) -> bool {
        !matches!(self, ClubPosition::Member)
    }
}

impl core::fmt::Display for ClubPosition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for ClubPosition {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        ClubPosition::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| DomainError::validation(format!("unknown club position '{s}'")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub id: MembershipId,
    pub club_id: ClubId,
    pub user_id: UserId,
    pub position: ClubPosition,
    pub joined_at: DateTime<Utc>,
}

impl Membership {
    pub fn join(id: MembershipId, club_id: ClubId, user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            club_id,
            user_id,
            position: ClubPosition::Member,
            joined_at: now,
        }
    }

    pub fn with_position(mut self, position: ClubPosition) -> Self {
        self.position = position;
        self
    }
}

impl Entity for Membership {
    type Id = MembershipId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Fails with `Conflict` if someone other than `candidate` holds `position`
/// in `club_id`.
pub fn ensure_slot_free<'a>(
    memberships: impl IntoIterator<Item = &'a Membership>,
    club_id: ClubId,
    position: ClubPosition,
    candidate: UserId,
) -> DomainResult<()> {
    if !position.is_exclusive() {
        return Ok(());
    }
    let taken = memberships
        .into_iter()
        .any(|m| m.club_id == club_id && m.position == position && m.user_id != candidate);
    if taken {
        return Err(DomainError::conflict(format!(
            "position {position} in club {club_id} is already held"
        )));
    }
    Ok(())
}

/// Fails with `Conflict` if `user` holds exclusive `position` in a club other
/// than `club_id`.
pub fn ensure_not_held_elsewhere<'a>(
    memberships: impl IntoIterator<Item = &'a Membership>,
    user: UserId,
    club_id: ClubId,
    position: ClubPosition,
) -> DomainResult<()> {
    if !position.is_exclusive() {
        return Ok(());
    }
    let elsewhere = memberships
        .into_iter()
        .find(|m| m.user_id == user && m.position == position && m.club_id != club_id);
    if let Some(m) = elsewhere {
        return Err(DomainError::conflict(format!(
            "user already holds {position} in club {}",
            m.club_id
        )));
    }
    Ok(())
}
