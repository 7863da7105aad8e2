//! Portal-side cascade for `club.deleted` / `club.updated`.

use std::sync::Arc;

use tracing::{debug, info, warn};

use clubhub_core::{ClubId, UserId};
use clubhub_events::{Fact, FactEnvelope, FactHandler, HandlerError, Queue, ResourceDeleted, ResourceUpdated};

use crate::external::ObjectStorage;
use crate::store::{Journal, PortalStore, Repository, RepositoryError};

fn transient(e: RepositoryError) -> HandlerError {
    HandlerError::transient(e.to_string())
}

/// Removes everything hanging off a deleted club and carries a rename into
/// the denormalized copies of the club name.
///
/// Both directions are idempotent: deleting what is already gone and renaming
/// to the current name are no-ops.
pub struct ClubCascadeHandler {
    store: PortalStore,
    storage: Arc<dyn ObjectStorage>,
}

impl ClubCascadeHandler {
    pub fn new(store: PortalStore, storage: Arc<dyn ObjectStorage>) -> Self {
        Self { store, storage }
    }

    /// Run `body` under the local transaction against a journaled view of the
    /// store, so a failed step leaves nothing half-removed for redelivery.
    fn in_transaction(
        &self,
        body: impl FnOnce(&PortalStore) -> Result<(), HandlerError>,
    ) -> Result<(), HandlerError> {
        let _tx = self.store.transaction().map_err(transient)?;
        let journal = Journal::new();
        let result = body(&self.store.journaled(&journal));
        if let Err(e) = &result {
            let failed = journal.rollback();
            warn!(error = %e, failed, "club cascade rolled back");
        }
        result
    }

    fn deleted(&self, fact: ResourceDeleted) -> Result<(), HandlerError> {
        let club_id = ClubId::from_uuid(fact.resource_id);
        self.in_transaction(|store| {
            // Logo first: if storage is down nothing else has been touched.
            let club = store.clubs.find_by_id(&club_id).map_err(transient)?;
            if let Some(key) = club.as_ref().and_then(|c| c.logo_key.as_deref()) {
                self.storage
                    .delete(key)
                    .map_err(|e| HandlerError::transient(e.to_string()))?;
            }

            let mut removed = 0usize;
            for m in store.memberships_of_club(club_id).map_err(transient)? {
                removed += usize::from(store.memberships.delete(&m.id).map_err(transient)?);
                clear_position(store, club_id, m.user_id)?;
            }
            for e in store.events_of_club(club_id).map_err(transient)? {
                removed += usize::from(store.events.delete(&e.id).map_err(transient)?);
            }
            removed += drop_pending_requests(store, club_id)?;

            if store.clubs.delete(&club_id).map_err(transient)? {
                info!(%club_id, removed, "club removed");
            } else {
                debug!(%club_id, removed, "club already gone");
            }
            Ok(())
        })
    }

    fn updated(&self, fact: ResourceUpdated) -> Result<(), HandlerError> {
        let club_id = ClubId::from_uuid(fact.resource_id);
        self.in_transaction(|store| {
            if let Some(mut club) = store.clubs.find_by_id(&club_id).map_err(transient)? {
                if club.name != fact.name {
                    club.rename(&fact.name)
                        .map_err(|e| HandlerError::malformed(e.to_string()))?;
                    store.clubs.save(club).map_err(transient)?;
                }
            }

            let mut renamed = 0usize;
            for mut event in store.events_of_club(club_id).map_err(transient)? {
                if event.club_name != fact.name {
                    event.club_name = fact.name.clone();
                    store.events.save(event).map_err(transient)?;
                    renamed += 1;
                }
            }
            debug!(%club_id, renamed, "club name propagated");
            Ok(())
        })
    }
}

fn clear_position(store: &PortalStore, club_id: ClubId, user_id: UserId) -> Result<(), HandlerError> {
    let Some(mut entry) = store.directory.find_by_id(&user_id).map_err(transient)? else {
        return Ok(());
    };
    if entry.club_positions.remove(&club_id).is_some() {
        store.directory.save(entry).map_err(transient)?;
    }
    Ok(())
}

/// Pending requests about the club can never be decided now.
fn drop_pending_requests(store: &PortalStore, club_id: ClubId) -> Result<usize, HandlerError> {
    let mut dropped = 0;
    for r in store.membership_requests.list().map_err(transient)? {
        if r.is_pending() && r.change.club_id == club_id {
            dropped += usize::from(store.membership_requests.delete(&r.id).map_err(transient)?);
        }
    }
    for r in store.role_changes.list().map_err(transient)? {
        if r.is_pending() && r.change.club_id == club_id {
            dropped += usize::from(store.role_changes.delete(&r.id).map_err(transient)?);
        }
    }
    for r in store.event_approvals.list().map_err(transient)? {
        if r.is_pending() && r.change.club_id == club_id {
            dropped += usize::from(store.event_approvals.delete(&r.id).map_err(transient)?);
        }
    }
    Ok(dropped)
}

impl FactHandler for ClubCascadeHandler {
    fn queue(&self) -> Queue {
        Queue::ClubCascade
    }

    fn handle(&self, envelope: &FactEnvelope) -> Result<(), HandlerError> {
        match envelope.decode()? {
            Fact::ClubDeleted(f) => self.deleted(f),
            Fact::ClubUpdated(f) => self.updated(f),
            other => Err(HandlerError::malformed(format!(
                "unexpected {} on {}",
                other.routing_key(),
                self.queue()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use clubhub_clubs::{CampusEvent, Club, ClubPosition};
    use clubhub_core::CampusEventId;

    use super::*;
    use crate::approvals::NewMembership;
    use crate::approvals::fixtures::Harness;
    use crate::external::InMemoryObjectStorage;
    use crate::store::{InMemoryRepository, UserDirectoryEntry};

    fn env(fact: Fact) -> FactEnvelope {
        FactEnvelope::for_fact(&fact, Utc::now()).unwrap()
    }

    fn seed_event(h: &Harness, club_id: ClubId, club_name: &str, by: clubhub_core::UserId) -> CampusEventId {
        let starts_at = Utc::now() + Duration::days(3);
        let event = CampusEvent::propose(
            CampusEventId::new(),
            club_id,
            club_name,
            "Blitz Night",
            None,
            starts_at,
            starts_at + Duration::hours(2),
            by,
        )
        .unwrap();
        let id = event.id;
        h.store.events.save(event).unwrap();
        id
    }

    #[test]
    fn deletion_removes_members_events_logo_and_pending_requests() {
        let h = Harness::new();
        let chess = h.seed_club("Chess Club");
        let other = h.seed_club("Go Club");
        let member = h.seed_member(chess.club.id, ClubPosition::Treasurer);
        seed_event(&h, chess.club.id, "Chess Club", chess.president.user_id);
        let kept_event = seed_event(&h, other.club.id, "Go Club", other.president.user_id);

        let mut entry = UserDirectoryEntry::placeholder(member.user_id);
        entry.club_positions.insert(chess.club.id, "TREASURER".into());
        h.store.directory.save(entry).unwrap();

        let storage = Arc::new(InMemoryObjectStorage::default());
        storage.put("logos/chess.png", vec![1, 2, 3], "image/png").unwrap();
        let mut club = chess.club.clone();
        club.set_logo("logos/chess.png");
        h.store.clubs.save(club).unwrap();

        h.memberships()
            .submit(&h.student(), NewMembership { club_id: chess.club.id, message: None })
            .unwrap();

        let handler = ClubCascadeHandler::new(h.store.clone(), storage.clone());
        let fact = env(Fact::ClubDeleted(ResourceDeleted {
            resource_id: *chess.club.id.as_uuid(),
        }));
        handler.handle(&fact).unwrap();
        handler.handle(&fact).unwrap();

        assert!(h.store.clubs.find_by_id(&chess.club.id).unwrap().is_none());
        assert!(h.store.memberships_of_club(chess.club.id).unwrap().is_empty());
        assert!(h.store.events_of_club(chess.club.id).unwrap().is_empty());
        assert!(h.store.membership_requests.list().unwrap().is_empty());
        assert!(storage.object("logos/chess.png").is_none());
        let entry = h.store.directory.find_by_id(&member.user_id).unwrap().unwrap();
        assert!(entry.club_positions.is_empty());

        assert!(h.store.clubs.find_by_id(&other.club.id).unwrap().is_some());
        assert!(h.store.events.find_by_id(&kept_event).unwrap().is_some());
    }

    #[test]
    fn failed_club_delete_puts_back_what_was_removed() {
        let mut h = Harness::new();
        let clubs = Arc::new(InMemoryRepository::<Club>::new());
        h.store.clubs = clubs.clone();
        let chess = h.seed_club("Chess Club");
        let member = h.seed_member(chess.club.id, ClubPosition::Treasurer);
        let event_id = seed_event(&h, chess.club.id, "Chess Club", chess.president.user_id);
        h.memberships()
            .submit(&h.student(), NewMembership { club_id: chess.club.id, message: None })
            .unwrap();

        let handler = ClubCascadeHandler::new(h.store.clone(), Arc::new(InMemoryObjectStorage::default()));
        let fact = env(Fact::ClubDeleted(ResourceDeleted {
            resource_id: *chess.club.id.as_uuid(),
        }));
        clubs.set_read_only(true);
        assert!(matches!(handler.handle(&fact), Err(HandlerError::Transient(_))));

        assert_eq!(h.store.memberships_of_club(chess.club.id).unwrap().len(), 2);
        assert!(h.store.membership(chess.club.id, member.user_id).unwrap().is_some());
        assert!(h.store.events.find_by_id(&event_id).unwrap().is_some());
        assert_eq!(h.store.membership_requests.list().unwrap().len(), 1);

        clubs.set_read_only(false);
        handler.handle(&fact).unwrap();
        assert!(h.store.clubs.find_by_id(&chess.club.id).unwrap().is_none());
        assert!(h.store.memberships_of_club(chess.club.id).unwrap().is_empty());
        assert!(h.store.events.find_by_id(&event_id).unwrap().is_none());
    }

    #[test]
    fn rename_reaches_club_and_its_events() {
        let h = Harness::new();
        let chess = h.seed_club("Chess Club");
        let event_id = seed_event(&h, chess.club.id, "Chess Club", chess.president.user_id);
        let handler = ClubCascadeHandler::new(h.store.clone(), Arc::new(InMemoryObjectStorage::default()));

        handler
            .handle(&env(Fact::ClubUpdated(ResourceUpdated {
                resource_id: *chess.club.id.as_uuid(),
                name: "Chess & Go Society".into(),
            })))
            .unwrap();

        let club = h.store.clubs.find_by_id(&chess.club.id).unwrap().unwrap();
        assert_eq!(club.name, "Chess & Go Society");
        let event = h.store.events.find_by_id(&event_id).unwrap().unwrap();
        assert_eq!(event.club_name, "Chess & Go Society");
    }

    #[test]
    fn unknown_club_is_a_no_op() {
        let h = Harness::new();
        let handler = ClubCascadeHandler::new(h.store.clone(), Arc::new(InMemoryObjectStorage::default()));
        let id = *ClubId::new().as_uuid();
        handler
            .handle(&env(Fact::ClubDeleted(ResourceDeleted { resource_id: id })))
            .unwrap();
        handler
            .handle(&env(Fact::ClubUpdated(ResourceUpdated {
                resource_id: id,
                name: "Ghost Club".into(),
            })))
            .unwrap();
    }
}
