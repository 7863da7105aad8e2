//! Shared setup for workflow tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use clubhub_auth::{Role, RoleSet};
use clubhub_clubs::{Club, ClubPosition, Membership};
use clubhub_core::{ClubId, MembershipId, UserId};
use clubhub_events::{Consumer, Fact, InMemoryBroker, Queue, Settlement};

use super::workflow::{Actor, Workflow};
use super::{ClubCreationPolicy, EventApprovalPolicy, MembershipPolicy, RoleChangePolicy};
use crate::external::InMemoryUserLookup;
use crate::store::{PortalStore, Repository};

pub(crate) struct Harness {
    pub store: PortalStore,
    pub broker: Arc<InMemoryBroker>,
    pub lookup: Arc<InMemoryUserLookup>,
}

pub(crate) struct SeededClub {
    pub club: Club,
    pub president: Actor,
    pub advisor: Actor,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: PortalStore::in_memory(),
            broker: Arc::new(InMemoryBroker::default()),
            lookup: Arc::new(InMemoryUserLookup::new()),
        }
    }

    pub fn actor(&self, roles: &[Role]) -> Actor {
        let mut set = RoleSet::new();
        for r in roles {
            set.grant(*r);
        }
        Actor::new(UserId::new(), set)
    }

    pub fn student(&self) -> Actor {
        self.actor(&[Role::Student])
    }

    pub fn admin(&self) -> Actor {
        self.actor(&[Role::Admin])
    }

    pub fn student_affairs(&self) -> Actor {
        self.actor(&[Role::StudentAffairs])
    }

    pub fn club_creations(&self) -> Workflow<ClubCreationPolicy> {
        Workflow::new(self.store.clone(), self.broker.clone(), ClubCreationPolicy)
    }

    pub fn memberships(&self) -> Workflow<MembershipPolicy> {
        Workflow::new(self.store.clone(), self.broker.clone(), MembershipPolicy)
    }

    pub fn role_changes(&self) -> Workflow<RoleChangePolicy> {
        Workflow::new(
            self.store.clone(),
            self.broker.clone(),
            RoleChangePolicy::new(self.lookup.clone()),
        )
    }

    pub fn event_approvals(&self) -> Workflow<EventApprovalPolicy> {
        Workflow::new(self.store.clone(), self.broker.clone(), EventApprovalPolicy)
    }

    /// An active club with a president member and an advisor.
    pub fn seed_club(&self, name: &str) -> SeededClub {
        let president = self.actor(&[Role::Student, Role::ClubPresident]);
        let advisor = self.actor(&[Role::AcademicAdvisor]);
        let club = Club::found(
            ClubId::new(),
            name,
            "",
            Some(advisor.user_id),
            president.user_id,
            Utc::now(),
        )
        .unwrap();
        self.store.clubs.save(club.clone()).unwrap();
        self.add_member(club.id, &president, ClubPosition::President);
        SeededClub {
            club,
            president,
            advisor,
        }
    }

    pub fn add_member(&self, club_id: ClubId, actor: &Actor, position: ClubPosition) {
        let m = Membership::join(MembershipId::new(), club_id, actor.user_id, Utc::now())
            .with_position(position);
        self.store.memberships.save(m).unwrap();
    }

    pub fn seed_member(&self, club_id: ClubId, position: ClubPosition) -> Actor {
        let actor = self.student();
        self.add_member(club_id, &actor, position);
        actor
    }
}

/// Drain `queue` and decode what was on it.
pub(crate) fn facts_on(broker: &InMemoryBroker, queue: Queue) -> Vec<Fact> {
    let mut facts = Vec::new();
    while let Some(d) = broker.receive(queue, Duration::ZERO).unwrap() {
        facts.push(d.envelope.decode().unwrap());
        broker.settle(&d, Settlement::Ack).unwrap();
    }
    facts
}
