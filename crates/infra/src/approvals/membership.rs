//! Membership: a student asks to join a club as a plain member.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use clubhub_clubs::{
    ApprovalRequest, Club, ClubPosition, Membership, MembershipApplication, MembershipRequest,
};
use clubhub_core::{ClubId, MembershipId, RequestId};
use clubhub_events::{ClubRoleChanged, Fact};

use super::workflow::{Actor, ApprovalPolicy, Workflow};
use super::ApprovalError;
use crate::outbox::Outbox;
use crate::store::{PortalStore, Repository};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMembership {
    pub club_id: ClubId,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MembershipPolicy;

pub type MembershipWorkflow = Workflow<MembershipPolicy>;

pub(crate) fn active_club(store: &PortalStore, club_id: ClubId) -> Result<Club, ApprovalError> {
    let club = store
        .clubs
        .find_by_id(&club_id)?
        .ok_or_else(|| ApprovalError::not_found(format!("club {club_id}")))?;
    if !club.is_active() {
        return Err(ApprovalError::conflict(format!("club {club_id} is not active")));
    }
    Ok(club)
}

impl ApprovalPolicy for MembershipPolicy {
    type Change = MembershipApplication;
    type Input = NewMembership;
    type Staged = ();

    fn requests<'a>(&self, store: &'a PortalStore) -> &'a Arc<dyn Repository<MembershipRequest>> {
        &store.membership_requests
    }

    fn prepare(
        &self,
        store: &PortalStore,
        actor: &Actor,
        input: NewMembership,
        now: DateTime<Utc>,
    ) -> Result<(MembershipRequest, ()), ApprovalError> {
        let club = active_club(store, input.club_id)?;
        let message = input.message.map(|m| m.trim().to_string()).filter(|m| !m.is_empty());
        Ok((
            ApprovalRequest::submit(
                RequestId::new(),
                *club.id.as_uuid(),
                actor.user_id,
                None,
                MembershipApplication {
                    club_id: club.id,
                    message,
                },
                now,
            ),
            (),
        ))
    }

    fn is_duplicate(&self, existing: &MembershipRequest, candidate: &MembershipRequest) -> bool {
        existing.resource_id == candidate.resource_id && existing.requester_id == candidate.requester_id
    }

    fn check_submit(&self, store: &PortalStore, request: &MembershipRequest) -> Result<(), ApprovalError> {
        if store.membership(request.change.club_id, request.requester_id)?.is_some() {
            return Err(ApprovalError::conflict("already a member of this club"));
        }
        Ok(())
    }

    fn can_decide(
        &self,
        store: &PortalStore,
        actor: &Actor,
        request: &MembershipRequest,
    ) -> Result<(), ApprovalError> {
        if actor.is_admin() {
            return Ok(());
        }
        let club_id = request.change.club_id;
        let club = store
            .clubs
            .find_by_id(&club_id)?
            .ok_or_else(|| ApprovalError::not_found(format!("club {club_id}")))?;
        if club.is_president(actor.user_id) || club.is_advisor(actor.user_id) {
            Ok(())
        } else {
            Err(ApprovalError::forbidden(
                "only the club president or advisor can decide memberships",
            ))
        }
    }

    fn apply_approval(
        &self,
        store: &PortalStore,
        request: &MembershipRequest,
        outbox: &mut Outbox,
        now: DateTime<Utc>,
    ) -> Result<(), ApprovalError> {
        let club = active_club(store, request.change.club_id)?;
        let user_id = request.requester_id;
        if store.membership(club.id, user_id)?.is_some() {
            return Err(ApprovalError::conflict("already a member of this club"));
        }

        store
            .memberships
            .save(Membership::join(MembershipId::new(), club.id, user_id, now))?;
        outbox.push(Fact::ClubRoleChanged(ClubRoleChanged {
            club_id: club.id,
            user_id,
            previous_role: None,
            new_role: Some(ClubPosition::Member.as_str().into()),
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use clubhub_clubs::ApprovalStatus;
    use clubhub_events::{DecisionStatus, Queue};

    use super::*;
    use crate::approvals::fixtures::{Harness, facts_on};

    fn join(club_id: ClubId) -> NewMembership {
        NewMembership {
            club_id,
            message: Some("I play on weekends".into()),
        }
    }

    #[test]
    fn president_approves_and_the_member_appears() {
        let h = Harness::new();
        let chess = h.seed_club("Chess Club");
        let wf = h.memberships();
        let student = h.student();

        let request = wf.submit(&student, join(chess.club.id)).unwrap();
        assert_eq!(request.status, ApprovalStatus::Pending);

        wf.approve(&chess.president, request.id).unwrap();
        let m = h.store.membership(chess.club.id, student.user_id).unwrap().unwrap();
        assert_eq!(m.position, ClubPosition::Member);

        let outcomes = facts_on(&h.broker, Queue::ApprovalNotifications);
        let [Fact::ApprovalOutcome(outcome)] = &outcomes[..] else {
            panic!("expected one outcome, got {outcomes:?}");
        };
        assert_eq!(outcome.status, DecisionStatus::Approved);
        assert_eq!(outcome.target_user_id, student.user_id);
        assert_eq!(outcome.new_state, "MEMBER");
        assert_eq!(outcome.human_message, "Your membership was approved");

        let second = wf.approve(&chess.president, request.id).unwrap_err();
        assert!(matches!(second, ApprovalError::Conflict(_)));
        assert!(facts_on(&h.broker, Queue::ApprovalNotifications).is_empty());
    }

    #[test]
    fn advisor_may_decide_but_an_unrelated_student_may_not() {
        let h = Harness::new();
        let chess = h.seed_club("Chess Club");
        let wf = h.memberships();
        let request = wf.submit(&h.student(), join(chess.club.id)).unwrap();

        assert!(matches!(wf.reject(&h.student(), request.id, None), Err(ApprovalError::Forbidden(_))));
        let rejected = wf.reject(&chess.advisor, request.id, Some("Club is full".into())).unwrap();
        assert_eq!(rejected.decision_reason.as_deref(), Some("Club is full"));
    }

    #[test]
    fn duplicate_pending_application_conflicts() {
        let h = Harness::new();
        let chess = h.seed_club("Chess Club");
        let wf = h.memberships();
        let student = h.student();
        wf.submit(&student, join(chess.club.id)).unwrap();
        assert!(matches!(wf.submit(&student, join(chess.club.id)), Err(ApprovalError::Conflict(_))));
    }

    #[test]
    fn existing_members_cannot_apply() {
        let h = Harness::new();
        let chess = h.seed_club("Chess Club");
        let member = h.seed_member(chess.club.id, ClubPosition::Member);
        let err = h.memberships().submit(&member, join(chess.club.id)).unwrap_err();
        assert!(matches!(err, ApprovalError::Conflict(_)));
    }

    #[test]
    fn unknown_club_is_not_found() {
        let h = Harness::new();
        let err = h.memberships().submit(&h.student(), join(ClubId::new())).unwrap_err();
        assert!(matches!(err, ApprovalError::NotFound(_)));
    }

    #[test]
    fn requester_can_cancel_without_an_outcome() {
        let h = Harness::new();
        let chess = h.seed_club("Chess Club");
        let wf = h.memberships();
        let student = h.student();
        let request = wf.submit(&student, join(chess.club.id)).unwrap();

        assert!(matches!(wf.cancel(&h.student(), request.id), Err(ApprovalError::Forbidden(_))));
        let cancelled = wf.cancel(&student, request.id).unwrap();
        assert_eq!(cancelled.status, ApprovalStatus::Rejected);
        assert!(facts_on(&h.broker, Queue::ApprovalNotifications).is_empty());
        assert!(wf.list_pending().unwrap().is_empty());
    }
}
