//! Event approval: a club officer proposes an event, which stays hidden
//! until the advisor or Student Affairs approves it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use clubhub_auth::Role;
use clubhub_clubs::{ApprovalRequest, CampusEvent, EventApprovalRequest, EventPublication};
use clubhub_core::{CampusEventId, ClubId, RequestId};

use super::membership::active_club;
use super::workflow::{Actor, ApprovalPolicy, Workflow};
use super::ApprovalError;
use crate::outbox::Outbox;
use crate::store::{PortalStore, Repository};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCampusEvent {
    pub club_id: ClubId,
    pub title: String,
    #[serde(default)]
    pub location: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EventApprovalPolicy;

pub type EventApprovalWorkflow = Workflow<EventApprovalPolicy>;

fn load_event(store: &PortalStore, request: &EventApprovalRequest) -> Result<Option<CampusEvent>, ApprovalError> {
    Ok(store.events.find_by_id(&request.change.event_id)?)
}

impl ApprovalPolicy for EventApprovalPolicy {
    type Change = EventPublication;
    type Input = NewCampusEvent;
    /// The PENDING event, stored together with the request.
    type Staged = CampusEvent;

    fn requests<'a>(&self, store: &'a PortalStore) -> &'a Arc<dyn Repository<EventApprovalRequest>> {
        &store.event_approvals
    }

    fn prepare(
        &self,
        store: &PortalStore,
        actor: &Actor,
        input: NewCampusEvent,
        now: DateTime<Utc>,
    ) -> Result<(EventApprovalRequest, CampusEvent), ApprovalError> {
        let club = active_club(store, input.club_id)?;
        let is_officer = store
            .membership(club.id, actor.user_id)?
            .is_some_and(|m| m.position.is_officer());
        if !is_officer && !actor.is_admin() {
            return Err(ApprovalError::forbidden("only club officials can propose events"));
        }

        let event = CampusEvent::propose(
            CampusEventId::new(),
            club.id,
            &club.name,
            &input.title,
            input.location,
            input.starts_at,
            input.ends_at,
            actor.user_id,
        )?;

        let request = ApprovalRequest::submit(
            RequestId::new(),
            *event.id.as_uuid(),
            actor.user_id,
            None,
            EventPublication {
                event_id: event.id,
                club_id: club.id,
                title: event.title.clone(),
            },
            now,
        );
        Ok((request, event))
    }

    fn is_duplicate(&self, existing: &EventApprovalRequest, candidate: &EventApprovalRequest) -> bool {
        existing.change.club_id == candidate.change.club_id
            && existing.change.title.eq_ignore_ascii_case(&candidate.change.title)
    }

    fn on_submit(
        &self,
        store: &PortalStore,
        _request: &EventApprovalRequest,
        event: CampusEvent,
        _outbox: &mut Outbox,
    ) -> Result<(), ApprovalError> {
        store.events.save(event)?;
        Ok(())
    }

    fn can_decide(
        &self,
        store: &PortalStore,
        actor: &Actor,
        request: &EventApprovalRequest,
    ) -> Result<(), ApprovalError> {
        if actor.is_admin() || actor.has_role(Role::StudentAffairs) {
            return Ok(());
        }
        let club_id = request.change.club_id;
        let club = store
            .clubs
            .find_by_id(&club_id)?
            .ok_or_else(|| ApprovalError::not_found(format!("club {club_id}")))?;
        if club.is_advisor(actor.user_id) {
            Ok(())
        } else {
            Err(ApprovalError::forbidden(
                "only the club advisor or student affairs can decide events",
            ))
        }
    }

    fn apply_approval(
        &self,
        store: &PortalStore,
        request: &EventApprovalRequest,
        _outbox: &mut Outbox,
        _now: DateTime<Utc>,
    ) -> Result<(), ApprovalError> {
        active_club(store, request.change.club_id)?;
        let mut event = load_event(store, request)?
            .ok_or_else(|| ApprovalError::not_found(format!("event {}", request.change.event_id)))?;
        event.approve()?;
        store.events.save(event)?;
        Ok(())
    }

    fn on_reject(
        &self,
        store: &PortalStore,
        request: &EventApprovalRequest,
        _outbox: &mut Outbox,
    ) -> Result<(), ApprovalError> {
        // Gone already (club deleted) is fine.
        if let Some(mut event) = load_event(store, request)? {
            if event.reject().is_ok() {
                store.events.save(event)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use clubhub_clubs::{CampusEventStatus, ClubPosition};
    use clubhub_events::{Fact, Queue};

    use super::*;
    use crate::approvals::fixtures::{Harness, facts_on};

    fn spring_fair(club_id: ClubId) -> NewCampusEvent {
        let starts_at = Utc::now() + Duration::days(7);
        NewCampusEvent {
            club_id,
            title: "Spring Fair".into(),
            location: Some("Main Quad".into()),
            starts_at,
            ends_at: starts_at + Duration::hours(3),
        }
    }

    #[test]
    fn event_stays_hidden_until_approved() {
        let h = Harness::new();
        let chess = h.seed_club("Chess Club");
        let official = h.seed_member(chess.club.id, ClubPosition::Official);
        let wf = h.event_approvals();

        let request = wf.submit(&official, spring_fair(chess.club.id)).unwrap();
        let event = h.store.events.find_by_id(&request.change.event_id).unwrap().unwrap();
        assert_eq!(event.status, CampusEventStatus::Pending);
        assert!(!event.is_public());
        assert_eq!(event.club_name, "Chess Club");

        wf.approve(&h.student_affairs(), request.id).unwrap();
        let event = h.store.events.find_by_id(&request.change.event_id).unwrap().unwrap();
        assert!(event.is_public());

        let outcomes = facts_on(&h.broker, Queue::ApprovalNotifications);
        assert!(matches!(&outcomes[..], [Fact::ApprovalOutcome(o)] if o.new_state == "APPROVED"));
    }

    #[test]
    fn plain_members_cannot_propose() {
        let h = Harness::new();
        let chess = h.seed_club("Chess Club");
        let member = h.seed_member(chess.club.id, ClubPosition::Member);
        let err = h.event_approvals().submit(&member, spring_fair(chess.club.id)).unwrap_err();
        assert!(matches!(err, ApprovalError::Forbidden(_)));
        assert!(h.store.events.list().unwrap().is_empty());
    }

    #[test]
    fn rejection_marks_the_event_rejected() {
        let h = Harness::new();
        let chess = h.seed_club("Chess Club");
        let wf = h.event_approvals();
        let request = wf.submit(&chess.president, spring_fair(chess.club.id)).unwrap();

        assert!(matches!(wf.approve(&h.student(), request.id), Err(ApprovalError::Forbidden(_))));
        wf.reject(&chess.advisor, request.id, Some("Quad is booked that week".into())).unwrap();

        let event = h.store.events.find_by_id(&request.change.event_id).unwrap().unwrap();
        assert_eq!(event.status, CampusEventStatus::Rejected);
    }

    #[test]
    fn duplicate_submission_leaves_no_orphan_event() {
        let h = Harness::new();
        let chess = h.seed_club("Chess Club");
        let wf = h.event_approvals();
        wf.submit(&chess.president, spring_fair(chess.club.id)).unwrap();

        let err = wf.submit(&chess.president, spring_fair(chess.club.id)).unwrap_err();
        assert!(matches!(err, ApprovalError::Conflict(_)));
        assert_eq!(h.store.events.list().unwrap().len(), 1);
    }

    #[test]
    fn event_must_end_after_it_starts() {
        let h = Harness::new();
        let chess = h.seed_club("Chess Club");
        let mut input = spring_fair(chess.club.id);
        input.ends_at = input.starts_at;
        let err = h.event_approvals().submit(&chess.president, input).unwrap_err();
        assert!(matches!(err, ApprovalError::Validation(_)));
    }
}
