//! Approval requests (pure state machine).
//!
//! ```text
//! PENDING ──approve──▶ APPROVED
//!    │
//!    ├────reject─────▶ REJECTED
//!    └────cancel─────▶ REJECTED ("cancelled by requester")
//! ```
//!
//! A request is decided exactly once. Terminal states are immutable and
//! requests are never deleted. Who may decide, and what a decision does to
//! other state, is the workflow's business; this module only guards the
//! transition itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use clubhub_core::{CampusEventId, ClubId, DomainError, DomainResult, Entity, RequestId, UserId};

use crate::membership::ClubPosition;

pub const CANCELLED_REASON: &str = "cancelled by requester";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "PENDING",
            ApprovalStatus::Approved => "APPROVED",
            ApprovalStatus::Rejected => "REJECTED",
        }
    }
}

impl core::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalKind {
    ClubCreation,
    Membership,
    RoleChange,
    EventApproval,
}

impl ApprovalKind {
    pub const ALL: [ApprovalKind; 4] = [
        ApprovalKind::ClubCreation,
        ApprovalKind::Membership,
        ApprovalKind::RoleChange,
        ApprovalKind::EventApproval,
    ];

    /// Collection segment under `/approvals`.
    pub fn path_segment(&self) -> &'static str {
        match self {
            ApprovalKind::ClubCreation => "club-creations",
            ApprovalKind::Membership => "memberships",
            ApprovalKind::RoleChange => "role-changes",
            ApprovalKind::EventApproval => "event-approvals",
        }
    }
}

impl core::fmt::Display for ApprovalKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.path_segment())
    }
}

/// The change a request asks for.
pub trait RequestedChange: Clone {
    const KIND: ApprovalKind;

    /// `(previous_state, new_state)` as reported in the approval outcome.
    fn outcome_states(&self, status: ApprovalStatus) -> (String, String);

    /// One-line description for notifications.
    fn describe(&self) -> String;
}

// ─────────────────────────────────────────────────────────────────────────────
// Generic request
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest<C> {
    pub id: RequestId,
    /// The club, event, or (for club creation) the id reserved for the new club.
    pub resource_id: Uuid,
    pub requester_id: UserId,
    /// The user the decision is about, when that is not the requester.
    pub target_id: Option<UserId>,
    pub change: C,
    pub status: ApprovalStatus,
    pub decided_by: Option<UserId>,
    pub decision_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl<C: RequestedChange> ApprovalRequest<C> {
    pub fn submit(
        id: RequestId,
        resource_id: Uuid,
        requester_id: UserId,
        target_id: Option<UserId>,
        change: C,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            resource_id,
            requester_id,
            target_id,
            change,
            status: ApprovalStatus::Pending,
            decided_by: None,
            decision_reason: None,
            created_at: now,
            decided_at: None,
        }
    }

    pub fn kind(&self) -> ApprovalKind {
        C::KIND
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    /// Who the outcome is addressed to.
    pub fn subject_user(&self) -> UserId {
        self.target_id.unwrap_or(self.requester_id)
    }

    pub fn ensure_pending(&self) -> DomainResult<()> {
        if self.is_pending() {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "request {} is already {}",
                self.id, self.status
            )))
        }
    }

    pub fn approve(&mut self, decider: UserId, now: DateTime<Utc>) -> DomainResult<()> {
        self.decide(ApprovalStatus::Approved, decider, None, now)
    }

    /// The reason is stored verbatim.
    pub fn reject(&mut self, decider: UserId, reason: Option<String>, now: DateTime<Utc>) -> DomainResult<()> {
        self.decide(ApprovalStatus::Rejected, decider, reason, now)
    }

    pub fn cancel(&mut self, requester: UserId, now: DateTime<Utc>) -> DomainResult<()> {
        if requester != self.requester_id {
            return Err(DomainError::forbidden("only the requester can cancel a request"));
        }
        self.decide(ApprovalStatus::Rejected, requester, Some(CANCELLED_REASON.to_string()), now)
    }

    fn decide(
        &mut self,
        status: ApprovalStatus,
        decider: UserId,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_pending()?;
        self.status = status;
        self.decided_by = Some(decider);
        self.decision_reason = reason;
        self.decided_at = Some(now);
        Ok(())
    }

    pub fn outcome_states(&self) -> (String, String) {
        self.change.outcome_states(self.status)
    }
}

impl<C> Entity for ApprovalRequest<C> {
    type Id = RequestId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// The four request kinds
// ─────────────────────────────────────────────────────────────────────────────

/// Found a new club with the requester as president.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClubCreation {
    pub name: String,
    pub description: String,
    pub advisor_id: Option<UserId>,
}

impl RequestedChange for ClubCreation {
    const KIND: ApprovalKind = ApprovalKind::ClubCreation;

    fn outcome_states(&self, status: ApprovalStatus) -> (String, String) {
        let new = match status {
            ApprovalStatus::Approved => "ACTIVE",
            other => other.as_str(),
        };
        ("PENDING".into(), new.into())
    }

    fn describe(&self) -> String {
        format!("club creation for '{}'", self.name)
    }
}

/// Join a club as a plain member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipApplication {
    pub club_id: ClubId,
    pub message: Option<String>,
}

impl RequestedChange for MembershipApplication {
    const KIND: ApprovalKind = ApprovalKind::Membership;

    fn outcome_states(&self, status: ApprovalStatus) -> (String, String) {
        let new = match status {
            ApprovalStatus::Approved => ClubPosition::Member.as_str(),
            other => other.as_str(),
        };
        ("PENDING".into(), new.into())
    }

    fn describe(&self) -> String {
        "membership".to_string()
    }
}

/// Move an existing member to another position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleChange {
    pub club_id: ClubId,
    /// Position at submission time.
    pub from: ClubPosition,
    pub to: ClubPosition,
    /// Sitting holder of `to` who steps down to member on approval. Only
    /// set when the sitting president hands the presidency over.
    #[serde(default)]
    pub replaces: Option<UserId>,
}

impl RequestedChange for RoleChange {
    const KIND: ApprovalKind = ApprovalKind::RoleChange;

    fn outcome_states(&self, status: ApprovalStatus) -> (String, String) {
        let new = match status {
            ApprovalStatus::Approved => self.to.as_str(),
            _ => self.from.as_str(),
        };
        (self.from.as_str().into(), new.into())
    }

    fn describe(&self) -> String {
        format!("role change from {} to {}", self.from, self.to)
    }
}

/// Publish a proposed campus event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPublication {
    pub event_id: CampusEventId,
    pub club_id: ClubId,
    pub title: String,
}

impl RequestedChange for EventPublication {
    const KIND: ApprovalKind = ApprovalKind::EventApproval;

    fn outcome_states(&self, status: ApprovalStatus) -> (String, String) {
        ("PENDING".into(), status.as_str().into())
    }

    fn describe(&self) -> String {
        format!("event '{}'", self.title)
    }
}

pub type ClubCreationRequest = ApprovalRequest<ClubCreation>;
pub type MembershipRequest = ApprovalRequest<MembershipApplication>;
pub type RoleChangeRequest = ApprovalRequest<RoleChange>;
pub type EventApprovalRequest = ApprovalRequest<EventPublication>;

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn request() -> MembershipRequest {
        let club_id = ClubId::new();
        ApprovalRequest::submit(
            RequestId::new(),
            *club_id.as_uuid(),
            UserId::new(),
            None,
            MembershipApplication { club_id, message: None },
            Utc::now(),
        )
    }

    #[test]
    fn approve_records_decision() {
        let mut r = request();
        let decider = UserId::new();
        r.approve(decider, Utc::now()).unwrap();
        assert_eq!(r.status, ApprovalStatus::Approved);
        assert_eq!(r.decided_by, Some(decider));
        assert!(r.decided_at.is_some());
        assert_eq!(r.outcome_states(), ("PENDING".into(), "MEMBER".into()));
    }

    #[test]
    fn terminal_states_are_immutable() {
        let mut r = request();
        r.reject(UserId::new(), Some("club is full".into()), Utc::now()).unwrap();
        let snapshot = r.clone();

        assert!(matches!(r.approve(UserId::new(), Utc::now()), Err(DomainError::Conflict(_))));
        assert!(r.reject(UserId::new(), None, Utc::now()).is_err());
        assert!(r.cancel(r.requester_id, Utc::now()).is_err());
        assert_eq!(r, snapshot);
        assert_eq!(r.decision_reason.as_deref(), Some("club is full"));
    }

    #[test]
    fn only_requester_can_cancel() {
        let mut r = request();
        assert!(matches!(r.cancel(UserId::new(), Utc::now()), Err(DomainError::Forbidden(_))));
        assert!(r.is_pending());

        r.cancel(r.requester_id, Utc::now()).unwrap();
        assert_eq!(r.status, ApprovalStatus::Rejected);
        assert_eq!(r.decision_reason.as_deref(), Some(CANCELLED_REASON));
    }

    #[test]
    fn role_change_outcome_reports_positions() {
        let change = RoleChange {
            club_id: ClubId::new(),
            from: ClubPosition::Member,
            to: ClubPosition::Treasurer,
            replaces: None,
        };
        assert_eq!(
            change.outcome_states(ApprovalStatus::Approved),
            ("MEMBER".into(), "TREASURER".into())
        );
        assert_eq!(
            change.outcome_states(ApprovalStatus::Rejected),
            ("MEMBER".into(), "MEMBER".into())
        );
    }

    #[test]
    fn kinds_serialize_as_path_segments() {
        for kind in ApprovalKind::ALL {
            let json = serde_json::to_value(kind).unwrap();
            let expected = match kind {
                ApprovalKind::ClubCreation => "club-creation",
                ApprovalKind::Membership => "membership",
                ApprovalKind::RoleChange => "role-change",
                ApprovalKind::EventApproval => "event-approval",
            };
            assert_eq!(json, expected);
        }
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Approve,
        Reject,
        Cancel,
    }

    proptest! {
        #[test]
        fn exactly_one_decision_sticks(ops in proptest::collection::vec(
            prop_oneof![Just(Op::Approve), Just(Op::Reject), Just(Op::Cancel)], 1..8)
        ) {
            let mut r = request();
            let requester = r.requester_id;
            let mut successes = 0;
            for op in &ops {
                let res = match op {
                    Op::Approve => r.approve(UserId::new(), Utc::now()),
                    Op::Reject => r.reject(UserId::new(), None, Utc::now()),
                    Op::Cancel => r.cancel(requester, Utc::now()),
                };
                if res.is_ok() {
                    successes += 1;
                }
            }
            prop_assert_eq!(successes, 1);
            let expected = match ops[0] {
                Op::Approve => ApprovalStatus::Approved,
                _ => ApprovalStatus::Rejected,
            };
            prop_assert_eq!(r.status, expected);
        }
    }
}
