//! Denormalized read models owned by the portal, fed by facts.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use clubhub_core::{ClubId, CourseId, Entity, UserId};

/// Portal-side copy of a user, from `user.registered` and `club.role.change`.
///
/// A role-change fact may arrive before the registration fact; the entry is
/// then created with empty profile fields that registration fills in later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDirectoryEntry {
    pub user_id: UserId,
    pub email: String,
    pub display_name: String,
    /// Club → position name, as last reported.
    pub club_positions: BTreeMap<ClubId, String>,
}

impl UserDirectoryEntry {
    pub fn placeholder(user_id: UserId) -> Self {
        Self {
            user_id,
            email: String::new(),
            display_name: String::new(),
            club_positions: BTreeMap::new(),
        }
    }

    pub fn is_registered(&self) -> bool {
        !self.email.is_empty()
    }
}

impl Entity for UserDirectoryEntry {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.user_id
    }
}

/// Course enrollment summary mirrored from the course service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentSummary {
    pub course_id: CourseId,
    pub course_title: String,
    pub user_ids: BTreeSet<UserId>,
}

impl Entity for EnrollmentSummary {
    type Id = CourseId;

    fn id(&self) -> &Self::Id {
        &self.course_id
    }
}
