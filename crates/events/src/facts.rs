//! Fact payloads: flat, camelCase JSON records.
//!
//! Roles and club positions travel as plain strings; consumers parse them and
//! drop what they do not understand.

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use thiserror::Error;
use uuid::Uuid;

use clubhub_core::{ClubId, UserId};

use crate::topology::RoutingKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRegistered {
    pub user_id: UserId,
    pub email: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleToAssign {
    pub user_id: UserId,
    pub role_name: String,
    #[serde(default)]
    pub club_id: Option<ClubId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleToRevoke {
    pub user_id: UserId,
    pub role_name: String,
    #[serde(default)]
    pub club_id: Option<ClubId>,
}

/// A course or club was deleted in its owning service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDeleted {
    pub resource_id: Uuid,
}

/// A course or club was renamed in its owning service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUpdated {
    pub resource_id: Uuid,
    pub name: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionStatus {
    Approved,
    Rejected,
}

impl core::fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DecisionStatus::Approved => f.write_str("APPROVED"),
            DecisionStatus::Rejected => f.write_str("REJECTED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalOutcome {
    pub target_user_id: UserId,
    pub resource_id: Uuid,
    pub previous_state: String,
    pub new_state: String,
    pub status: DecisionStatus,
    pub human_message: String,
}

/// A member's position in a club changed. `None` means "no position".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClubRoleChanged {
    pub club_id: ClubId,
    pub user_id: UserId,
    #[serde(default)]
    pub previous_role: Option<String>,
    #[serde(default)]
    pub new_role: Option<String>,
}

/// Every fact the fabric carries, keyed by routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fact {
    UserRegistered(UserRegistered),
    RoleAssign(RoleToAssign),
    RoleRevoke(RoleToRevoke),
    CourseDeleted(ResourceDeleted),
    CourseUpdated(ResourceUpdated),
    ClubDeleted(ResourceDeleted),
    ClubUpdated(ResourceUpdated),
    ClubRoleChanged(ClubRoleChanged),
    ApprovalOutcome(ApprovalOutcome),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FactError {
    #[error("unknown routing key '{0}'")]
    UnknownRoutingKey(String),

    #[error("malformed payload for '{key}': {reason}")]
    Payload { key: String, reason: String },
}

impl Fact {
    pub fn routing_key(&self) -> RoutingKey {
        match self {
            Fact::UserRegistered(_) => RoutingKey::UserRegistered,
            Fact::RoleAssign(_) => RoutingKey::RoleAssign,
            Fact::RoleRevoke(_) => RoutingKey::RoleRevoke,
            Fact::CourseDeleted(_) => RoutingKey::CourseDeleted,
            Fact::CourseUpdated(_) => RoutingKey::CourseUpdated,
            Fact::ClubDeleted(_) => RoutingKey::ClubDeleted,
            Fact::ClubUpdated(_) => RoutingKey::ClubUpdated,
            Fact::ClubRoleChanged(_) => RoutingKey::ClubRoleChange,
            Fact::ApprovalOutcome(_) => RoutingKey::ApprovalOutcome,
        }
    }

    pub(crate) fn payload_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Fact::UserRegistered(p) => serde_json::to_value(p),
            Fact::RoleAssign(p) => serde_json::to_value(p),
            Fact::RoleRevoke(p) => serde_json::to_value(p),
            Fact::CourseDeleted(p) | Fact::ClubDeleted(p) => serde_json::to_value(p),
            Fact::CourseUpdated(p) | Fact::ClubUpdated(p) => serde_json::to_value(p),
            Fact::ClubRoleChanged(p) => serde_json::to_value(p),
            Fact::ApprovalOutcome(p) => serde_json::to_value(p),
        }
    }

    /// Decode a payload given its routing key.
    pub fn decode(routing_key: &str, payload: &serde_json::Value) -> Result<Self, FactError> {
        fn parse<T: DeserializeOwned>(key: &str, payload: &serde_json::Value) -> Result<T, FactError> {
            T::deserialize(payload).map_err(|e| FactError::Payload {
                key: key.to_string(),
                reason: e.to_string(),
            })
        }

        let k = routing_key;
        Ok(match routing_key {
            "user.registered" => Fact::UserRegistered(parse(k, payload)?),
            "user.role.assign" => Fact::RoleAssign(parse(k, payload)?),
            "user.role.revoke" => Fact::RoleRevoke(parse(k, payload)?),
            "course.deleted" => Fact::CourseDeleted(parse(k, payload)?),
            "course.updated" => Fact::CourseUpdated(parse(k, payload)?),
            "club.deleted" => Fact::ClubDeleted(parse(k, payload)?),
            "club.updated" => Fact::ClubUpdated(parse(k, payload)?),
            "club.role.change" => Fact::ClubRoleChanged(parse(k, payload)?),
            "approval.outcome" => Fact::ApprovalOutcome(parse(k, payload)?),
            other => return Err(FactError::UnknownRoutingKey(other.to_string())),
        })
    }
}
