//! Role change: a club president asks to move a member to another position;
//! the club advisor (or an admin) decides.
//!
//! Exclusive positions (president, vice president, treasurer) have one
//! holder per club, and nobody holds the same exclusive position in two
//! clubs. Both are checked at submission and again at decision time.
//!
//! The one exception to "the slot must be free" is a presidency handover:
//! when the sitting president asks for a member to take over, the request
//! records who it replaces. On approval that person steps down to member,
//! provided they are still president.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use clubhub_auth::Role;
use clubhub_clubs::{
    ApprovalRequest, ClubPosition, RoleChange, RoleChangeRequest, ensure_not_held_elsewhere,
    ensure_slot_free,
};
use clubhub_core::{ClubId, RequestId, UserId};
use clubhub_events::{ClubRoleChanged, Fact, RoleToAssign, RoleToRevoke};

use super::membership::active_club;
use super::workflow::{Actor, ApprovalPolicy, Workflow};
use super::ApprovalError;
use crate::external::UserLookup;
use crate::outbox::Outbox;
use crate::store::{PortalStore, Repository};

/// Who the change is for: a user id, or a login e-mail resolved through
/// the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TargetUser {
    Id {
        #[serde(rename = "userId")]
        user_id: UserId,
    },
    Email { email: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRoleChange {
    pub club_id: ClubId,
    #[serde(flatten)]
    pub target: TargetUser,
    pub position: ClubPosition,
}

pub struct RoleChangePolicy {
    lookup: Arc<dyn UserLookup>,
}

impl core::fmt::Debug for RoleChangePolicy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RoleChangePolicy").finish_non_exhaustive()
    }
}

impl RoleChangePolicy {
    pub fn new(lookup: Arc<dyn UserLookup>) -> Self {
        Self { lookup }
    }

    /// A failed lookup is reported straight back; the caller decides whether
    /// to try again.
    fn resolve(&self, target: TargetUser) -> Result<UserId, ApprovalError> {
        match target {
            TargetUser::Id { user_id } => Ok(user_id),
            TargetUser::Email { email } => match self.lookup.find_by_email(&email) {
                Ok(Some(user_id)) => Ok(user_id),
                Ok(None) => Err(ApprovalError::not_found(format!("user {email}"))),
                Err(e) => {
                    warn!(error = %e, "user lookup failed");
                    Err(ApprovalError::Lookup(e))
                }
            },
        }
    }
}

pub type RoleChangeWorkflow = Workflow<RoleChangePolicy>;

fn role_fact_name(role: Role) -> String {
    role.as_str().to_string()
}

impl ApprovalPolicy for RoleChangePolicy {
    type Change = RoleChange;
    type Input = NewRoleChange;
    type Staged = ();

    fn requests<'a>(&self, store: &'a PortalStore) -> &'a Arc<dyn Repository<RoleChangeRequest>> {
        &store.role_changes
    }

    fn prepare(
        &self,
        store: &PortalStore,
        actor: &Actor,
        input: NewRoleChange,
        now: DateTime<Utc>,
    ) -> Result<(RoleChangeRequest, ()), ApprovalError> {
        let club = active_club(store, input.club_id)?;
        if !club.is_president(actor.user_id) && !actor.is_admin() {
            return Err(ApprovalError::forbidden(
                "only the club president can request a role change",
            ));
        }

        let target = self.resolve(input.target)?;
        let membership = store
            .membership(club.id, target)?
            .ok_or_else(|| ApprovalError::validation("target is not a member of this club"))?;
        if membership.position == input.position {
            return Err(ApprovalError::validation(format!(
                "target already holds {}",
                input.position
            )));
        }

        let replaces = match (input.position, club.president_id) {
            (ClubPosition::President, Some(holder)) if holder == actor.user_id && holder != target => {
                Some(holder)
            }
            _ => None,
        };

        Ok((
            ApprovalRequest::submit(
                RequestId::new(),
                *club.id.as_uuid(),
                actor.user_id,
                Some(target),
                RoleChange {
                    club_id: club.id,
                    from: membership.position,
                    to: input.position,
                    replaces,
                },
                now,
            ),
            (),
        ))
    }

    fn is_duplicate(&self, existing: &RoleChangeRequest, candidate: &RoleChangeRequest) -> bool {
        existing.change.club_id == candidate.change.club_id && existing.target_id == candidate.target_id
    }

    fn check_submit(&self, store: &PortalStore, request: &RoleChangeRequest) -> Result<(), ApprovalError> {
        let change = &request.change;
        let target = request.subject_user();
        if change.replaces.is_none() {
            ensure_slot_free(&store.memberships_of_club(change.club_id)?, change.club_id, change.to, target)?;
        }
        ensure_not_held_elsewhere(&store.memberships_of_user(target)?, target, change.club_id, change.to)?;
        Ok(())
    }

    fn can_decide(
        &self,
        store: &PortalStore,
        actor: &Actor,
        request: &RoleChangeRequest,
    ) -> Result<(), ApprovalError> {
        if actor.is_admin() {
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
            Err(ApprovalError::forbidden("only the club advisor can decide role changes"))
        }
    }

    fn apply_approval(
        &self,
        store: &PortalStore,
        request: &RoleChangeRequest,
        outbox: &mut Outbox,
        _now: DateTime<Utc>,
    ) -> Result<(), ApprovalError> {
        let change = &request.change;
        let target = request.subject_user();
        let mut club = active_club(store, change.club_id)?;

        let membership = store
            .membership(club.id, target)?
            .ok_or_else(|| ApprovalError::conflict("target is no longer a member of this club"))?;
        if membership.position != change.from {
            return Err(ApprovalError::conflict(format!(
                "target's position changed to {} since the request was made",
                membership.position
            )));
        }

        let club_rows = store.memberships_of_club(club.id)?;
        let stepping_down = match change.replaces {
            Some(holder) => {
                if !club.is_president(holder) {
                    return Err(ApprovalError::conflict(
                        "the presidency changed hands since the request was made",
                    ));
                }
                let row = club_rows
                    .iter()
                    .find(|m| m.user_id == holder)
                    .cloned()
                    .ok_or_else(|| ApprovalError::conflict("outgoing president is no longer a member"))?;
                Some(row)
            }
            None => {
                ensure_slot_free(&club_rows, club.id, change.to, target)?;
                None
            }
        };
        ensure_not_held_elsewhere(&store.memberships_of_user(target)?, target, club.id, change.to)?;

        // all guards passed; write
        if let Some(row) = &stepping_down {
            store.memberships.save(row.clone().with_position(ClubPosition::Member))?;
        }
        store.memberships.save(membership.with_position(change.to))?;

        if change.to == ClubPosition::President {
            club.president_id = Some(target);
        } else if change.from == ClubPosition::President {
            club.president_id = None;
        }
        store.clubs.save(club.clone())?;

        outbox.push(Fact::ClubRoleChanged(ClubRoleChanged {
            club_id: club.id,
            user_id: target,
            previous_role: Some(change.from.as_str().into()),
            new_role: Some(change.to.as_str().into()),
        }));
        if let Some(row) = &stepping_down {
            outbox.push(Fact::ClubRoleChanged(ClubRoleChanged {
                club_id: club.id,
                user_id: row.user_id,
                previous_role: Some(row.position.as_str().into()),
                new_role: Some(ClubPosition::Member.as_str().into()),
            }));
            outbox.push(Fact::RoleRevoke(RoleToRevoke {
                user_id: row.user_id,
                role_name: role_fact_name(Role::ClubPresident),
                club_id: Some(club.id),
            }));
        }
        if change.to == ClubPosition::President {
            outbox.push(Fact::RoleAssign(RoleToAssign {
                user_id: target,
                role_name: role_fact_name(Role::ClubPresident),
                club_id: Some(club.id),
            }));
        } else if change.from == ClubPosition::President {
            outbox.push(Fact::RoleRevoke(RoleToRevoke {
                user_id: target,
                role_name: role_fact_name(Role::ClubPresident),
                club_id: Some(club.id),
            }));
        }
        Ok(())
    }
}
