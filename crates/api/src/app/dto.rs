use serde::Deserialize;
use serde_json::json;

use clubhub_auth::{AuthenticatedPrincipal, IssuedTokens, UserAccount};
use clubhub_clubs::{
    ApprovalRequest, CampusEvent, Club, ClubCreation, EventPublication, Membership,
    MembershipApplication, RoleChange,
};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub display_name: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameClubRequest {
    pub name: String,
}

// -------------------------
// Response mapping
// -------------------------

pub fn account_to_json(account: &UserAccount) -> serde_json::Value {
    json!({
        "id": account.id.to_string(),
        "email": account.email,
        "displayName": account.display_name,
        "roles": account.roles.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
    })
}

pub fn tokens_to_json(tokens: &IssuedTokens) -> serde_json::Value {
    json!({
        "tokenType": "Bearer",
        "accessToken": tokens.access_token,
        "refreshToken": tokens.refresh_token.as_str(),
        "expiresAt": tokens.expires_at.to_rfc3339(),
        "refreshExpiresAt": tokens.refresh_expires_at.to_rfc3339(),
    })
}

pub fn principal_to_json(principal: &AuthenticatedPrincipal) -> serde_json::Value {
    json!({
        "email": principal.email,
        "userId": principal.user_id.map(|id| id.to_string()),
        "authorities": principal.authorities,
        "roles": principal.roles.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
    })
}

/// JSON view of what a request asks for.
pub trait ChangeJson {
    fn change_json(&self) -> serde_json::Value;
}

impl ChangeJson for ClubCreation {
    fn change_json(&self) -> serde_json::Value {
        json!({
            "name": self.name,
            "description": self.description,
            "advisorId": self.advisor_id.map(|id| id.to_string()),
        })
    }
}

impl ChangeJson for MembershipApplication {
    fn change_json(&self) -> serde_json::Value {
        json!({
            "clubId": self.club_id.to_string(),
            "message": self.message,
        })
    }
}

impl ChangeJson for RoleChange {
    fn change_json(&self) -> serde_json::Value {
        json!({
            "clubId": self.club_id.to_string(),
            "from": self.from.as_str(),
            "to": self.to.as_str(),
            "replaces": self.replaces.map(|id| id.to_string()),
        })
    }
}

impl ChangeJson for EventPublication {
    fn change_json(&self) -> serde_json::Value {
        json!({
            "eventId": self.event_id.to_string(),
            "clubId": self.club_id.to_string(),
            "title": self.title,
        })
    }
}

pub fn request_to_json<C: ChangeJson>(r: &ApprovalRequest<C>) -> serde_json::Value {
    json!({
        "id": r.id.to_string(),
        "resourceId": r.resource_id.to_string(),
        "requesterId": r.requester_id.to_string(),
        "targetId": r.target_id.map(|id| id.to_string()),
        "change": r.change.change_json(),
        "status": r.status.as_str(),
        "decidedBy": r.decided_by.map(|id| id.to_string()),
        "decisionReason": r.decision_reason,
        "createdAt": r.created_at.to_rfc3339(),
        "decidedAt": r.decided_at.map(|t| t.to_rfc3339()),
    })
}

pub fn club_to_json(club: &Club, logo_url: Option<String>) -> serde_json::Value {
    json!({
        "id": club.id.to_string(),
        "name": club.name,
        "description": club.description,
        "advisorId": club.advisor_id.map(|id| id.to_string()),
        "presidentId": club.president_id.map(|id| id.to_string()),
        "status": club.status,
        "logoUrl": logo_url,
        "createdAt": club.created_at.to_rfc3339(),
    })
}

pub fn membership_to_json(m: &Membership) -> serde_json::Value {
    json!({
        "id": m.id.to_string(),
        "clubId": m.club_id.to_string(),
        "userId": m.user_id.to_string(),
        "position": m.position.as_str(),
        "joinedAt": m.joined_at.to_rfc3339(),
    })
}

pub fn event_to_json(e: &CampusEvent) -> serde_json::Value {
    json!({
        "id": e.id.to_string(),
        "clubId": e.club_id.to_string(),
        "clubName": e.club_name,
        "title": e.title,
        "location": e.location,
        "startsAt": e.starts_at.to_rfc3339(),
        "endsAt": e.ends_at.to_rfc3339(),
        "status": e.status,
    })
}
