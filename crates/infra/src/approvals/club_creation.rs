//! Club creation: a student proposes a club and becomes its president once
//! Student Affairs (or an admin) approves.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use clubhub_auth::Role;
use clubhub_clubs::{
    ApprovalRequest, Club, ClubCreation, ClubCreationRequest, ClubPosition, Membership,
    ensure_not_held_elsewhere,
};
use clubhub_clubs::club::validate_name;
use clubhub_core::{ClubId, MembershipId, RequestId, UserId};
use clubhub_events::{ClubRoleChanged, Fact, RoleToAssign, RoleToRevoke};

use super::workflow::{Actor, ApprovalPolicy, Workflow};
use super::ApprovalError;
use crate::outbox::Outbox;
use crate::store::{PortalStore, Repository};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewClub {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub advisor_id: Option<UserId>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ClubCreationPolicy;

pub type ClubCreationWorkflow = Workflow<ClubCreationPolicy>;

fn same_name(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

fn ensure_name_free(store: &PortalStore, name: &str) -> Result<(), ApprovalError> {
    if store.clubs.list()?.iter().any(|c| same_name(&c.name, name)) {
        return Err(ApprovalError::conflict(format!("a club named '{name}' already exists")));
    }
    Ok(())
}

impl ApprovalPolicy for ClubCreationPolicy {
    type Change = ClubCreation;
    type Input = NewClub;
    type Staged = ();

    fn requests<'a>(&self, store: &'a PortalStore) -> &'a Arc<dyn Repository<ClubCreationRequest>> {
        &store.club_creations
    }

    fn prepare(
        &self,
        _store: &PortalStore,
        actor: &Actor,
        input: NewClub,
        now: DateTime<Utc>,
    ) -> Result<(ClubCreationRequest, ()), ApprovalError> {
        let name = validate_name(&input.name)?;
        // The new club's id is reserved now so the outcome can point at it.
        let club_id = ClubId::new();
        Ok((
            ApprovalRequest::submit(
                RequestId::new(),
                *club_id.as_uuid(),
                actor.user_id,
                None,
                ClubCreation {
                    name,
                    description: input.description.trim().to_string(),
                    advisor_id: input.advisor_id,
                },
                now,
            ),
            (),
        ))
    }

    fn is_duplicate(&self, existing: &ClubCreationRequest, candidate: &ClubCreationRequest) -> bool {
        existing.requester_id == candidate.requester_id
            || same_name(&existing.change.name, &candidate.change.name)
    }

    fn check_submit(&self, store: &PortalStore, request: &ClubCreationRequest) -> Result<(), ApprovalError> {
        ensure_name_free(store, &request.change.name)?;
        let requester = request.requester_id;
        ensure_not_held_elsewhere(
            &store.memberships_of_user(requester)?,
            requester,
            ClubId::from_uuid(request.resource_id),
            ClubPosition::President,
        )?;
        Ok(())
    }

    fn on_submit(
        &self,
        _store: &PortalStore,
        request: &ClubCreationRequest,
        _staged: (),
        outbox: &mut Outbox,
    ) -> Result<(), ApprovalError> {
        outbox.push(Fact::RoleAssign(RoleToAssign {
            user_id: request.requester_id,
            role_name: Role::PendingClubPresident.as_str().into(),
            club_id: None,
        }));
        Ok(())
    }

    fn can_decide(
        &self,
        _store: &PortalStore,
        actor: &Actor,
        _request: &ClubCreationRequest,
    ) -> Result<(), ApprovalError> {
        if actor.is_admin() || actor.has_role(Role::StudentAffairs) {
            Ok(())
        } else {
            Err(ApprovalError::forbidden("only student affairs can decide club creation"))
        }
    }

    fn apply_approval(
        &self,
        store: &PortalStore,
        request: &ClubCreationRequest,
        outbox: &mut Outbox,
        now: DateTime<Utc>,
    ) -> Result<(), ApprovalError> {
        let change = &request.change;
        let club_id = ClubId::from_uuid(request.resource_id);
        let president = request.requester_id;

        ensure_name_free(store, &change.name)?;
        ensure_not_held_elsewhere(
            &store.memberships_of_user(president)?,
            president,
            club_id,
            ClubPosition::President,
        )?;

        let club = Club::found(
            club_id,
            &change.name,
            &change.description,
            change.advisor_id,
            president,
            now,
        )?;
        let membership = Membership::join(MembershipId::new(), club_id, president, now)
            .with_position(ClubPosition::President);
        store.clubs.save(club)?;
        store.memberships.save(membership)?;

        outbox.push(Fact::RoleAssign(RoleToAssign {
            user_id: president,
            role_name: Role::ClubPresident.as_str().into(),
            club_id: Some(club_id),
        }));
        outbox.push(Fact::ClubRoleChanged(ClubRoleChanged {
            club_id,
            user_id: president,
            previous_role: None,
            new_role: Some(ClubPosition::President.as_str().into()),
        }));
        Ok(())
    }

    fn on_reject(
        &self,
        _store: &PortalStore,
        request: &ClubCreationRequest,
        outbox: &mut Outbox,
    ) -> Result<(), ApprovalError> {
        outbox.push(Fact::RoleRevoke(RoleToRevoke {
            user_id: request.requester_id,
            role_name: Role::PendingClubPresident.as_str().into(),
            club_id: None,
        }));
        Ok(())
    }
}
