//! Club administration outside the approval flows: rename, retire, logo,
//! and the public read side (active clubs, approved events).

use std::sync::Arc;

use tracing::info;

use clubhub_clubs::{CampusEvent, Club, Membership};
use clubhub_clubs::club::validate_name;
use clubhub_core::{CampusEventId, ClubId};
use clubhub_events::{Fact, Publisher, ResourceDeleted, ResourceUpdated};

use crate::approvals::membership::active_club;
use crate::approvals::{Actor, ApprovalError};
use crate::external::ObjectStorage;
use crate::outbox::Outbox;
use crate::store::{PortalStore, Repository};

/// Logo uploads larger than this are refused.
pub const MAX_LOGO_BYTES: usize = 1024 * 1024;

pub fn logo_key(club_id: ClubId) -> String {
    format!("clubs/{club_id}/logo")
}

pub struct ClubService {
    store: PortalStore,
    publisher: Arc<dyn Publisher>,
    storage: Arc<dyn ObjectStorage>,
}

impl core::fmt::Debug for ClubService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ClubService").finish_non_exhaustive()
    }
}

fn ensure_president_or_admin(club: &Club, actor: &Actor) -> Result<(), ApprovalError> {
    if actor.is_admin() || club.is_president(actor.user_id) {
        Ok(())
    } else {
        Err(ApprovalError::forbidden("only the club president or an admin may change the club"))
    }
}

impl ClubService {
    pub fn new(store: PortalStore, publisher: Arc<dyn Publisher>, storage: Arc<dyn ObjectStorage>) -> Self {
        Self {
            store,
            publisher,
            storage,
        }
    }

    /// Active clubs, by name.
    pub fn list_active(&self) -> Result<Vec<Club>, ApprovalError> {
        let mut clubs: Vec<_> = self
            .store
            .clubs
            .list()?
            .into_iter()
            .filter(Club::is_active)
            .collect();
        clubs.sort_by_key(|c| c.name.to_lowercase());
        Ok(clubs)
    }

    /// A retired club reads as gone; writes against it still get `Conflict`.
    pub fn get(&self, club_id: ClubId) -> Result<Club, ApprovalError> {
        self.store
            .clubs
            .find_by_id(&club_id)?
            .filter(Club::is_active)
            .ok_or_else(|| ApprovalError::not_found(format!("club {club_id}")))
    }

    pub fn logo_url(&self, club: &Club) -> Result<Option<String>, ApprovalError> {
        match club.logo_key.as_deref() {
            Some(key) => Ok(self.storage.get_url(key)?),
            None => Ok(None),
        }
    }

    pub fn members(&self, club_id: ClubId) -> Result<Vec<Membership>, ApprovalError> {
        self.get(club_id)?;
        let mut members = self.store.memberships_of_club(club_id)?;
        members.sort_by_key(|m| m.joined_at);
        Ok(members)
    }

    /// Rename a club and announce it on `club.updated`.
    pub fn rename(&self, actor: &Actor, club_id: ClubId, name: &str) -> Result<Club, ApprovalError> {
        let name = validate_name(name)?;
        let mut outbox = Outbox::new();
        let club = {
            let _tx = self.store.transaction()?;
            let mut club = active_club(&self.store, club_id)?;
            ensure_president_or_admin(&club, actor)?;
            if club.name == name {
                return Ok(club);
            }
            let taken = self
                .store
                .clubs
                .list()?
                .iter()
                .any(|c| c.id != club_id && c.name.trim().eq_ignore_ascii_case(&name));
            if taken {
                return Err(ApprovalError::conflict(format!("a club named '{name}' already exists")));
            }
            club.rename(&name)?;
            self.store.clubs.save(club.clone())?;
            outbox.push(Fact::ClubUpdated(ResourceUpdated {
                resource_id: *club_id.as_uuid(),
                name: club.name.clone(),
            }));
            club
        };

        info!(%club_id, name = %club.name, "club renamed");
        outbox.publish_all(&*self.publisher);
        Ok(club)
    }

    /// Deactivate a club and announce it on `club.deleted`. The cascade
    /// consumer removes its memberships, events and pending requests.
    pub fn retire(&self, actor: &Actor, club_id: ClubId) -> Result<Club, ApprovalError> {
        if !actor.is_admin() {
            return Err(ApprovalError::forbidden("only an admin may delete a club"));
        }
        let mut outbox = Outbox::new();
        let club = {
            let _tx = self.store.transaction()?;
            let mut club = active_club(&self.store, club_id)?;
            club.deactivate();
            self.store.clubs.save(club.clone())?;
            outbox.push(Fact::ClubDeleted(ResourceDeleted {
                resource_id: *club_id.as_uuid(),
            }));
            club
        };

        info!(%club_id, "club retired");
        outbox.publish_all(&*self.publisher);
        Ok(club)
    }

    /// Store a logo under the club's fixed key, replacing any previous one.
    pub fn set_logo(
        &self,
        actor: &Actor,
        club_id: ClubId,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<Club, ApprovalError> {
        if bytes.is_empty() {
            return Err(ApprovalError::validation("logo is empty"));
        }
        if bytes.len() > MAX_LOGO_BYTES {
            return Err(ApprovalError::validation(format!("logo exceeds {MAX_LOGO_BYTES} bytes")));
        }
        if !content_type.starts_with("image/") {
            return Err(ApprovalError::validation("logo must be an image"));
        }

        // Permission first so a refused caller never reaches storage.
        let club = active_club(&self.store, club_id)?;
        ensure_president_or_admin(&club, actor)?;

        let key = logo_key(club_id);
        self.storage.put(&key, bytes, content_type)?;

        let _tx = self.store.transaction()?;
        let mut club = active_club(&self.store, club_id)?;
        club.set_logo(key);
        self.store.clubs.save(club.clone())?;
        info!(%club_id, "club logo updated");
        Ok(club)
    }

    /// Approved events, soonest first.
    pub fn public_events(&self) -> Result<Vec<CampusEvent>, ApprovalError> {
        let mut events: Vec<_> = self
            .store
            .events
            .list()?
            .into_iter()
            .filter(CampusEvent::is_public)
            .collect();
        events.sort_by_key(|e| e.starts_at);
        Ok(events)
    }

    /// Unapproved events are reported as missing.
    pub fn public_event(&self, event_id: CampusEventId) -> Result<CampusEvent, ApprovalError> {
        self.store
            .events
            .find_by_id(&event_id)?
            .filter(CampusEvent::is_public)
            .ok_or_else(|| ApprovalError::not_found(format!("event {event_id}")))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use clubhub_clubs::ClubStatus;
    use clubhub_events::Queue;

    use super::*;
    use crate::approvals::NewCampusEvent;
    use crate::approvals::fixtures::{Harness, facts_on};
    use crate::external::InMemoryObjectStorage;

    fn service(h: &Harness) -> (ClubService, Arc<InMemoryObjectStorage>) {
        let storage = Arc::new(InMemoryObjectStorage::new("https://cdn.campus.edu"));
        (
            ClubService::new(h.store.clone(), h.broker.clone(), storage.clone()),
            storage,
        )
    }

    #[test]
    fn president_renames_and_the_cascade_hears_about_it() {
        let h = Harness::new();
        let chess = h.seed_club("Chess Club");
        let (svc, _) = service(&h);

        let club = svc.rename(&chess.president, chess.club.id, "  Chess & Go Club ").unwrap();
        assert_eq!(club.name, "Chess & Go Club");

        let facts = facts_on(&h.broker, Queue::ClubCascade);
        assert_eq!(
            facts,
            vec![Fact::ClubUpdated(ResourceUpdated {
                resource_id: *chess.club.id.as_uuid(),
                name: "Chess & Go Club".into(),
            })]
        );
    }

    #[test]
    fn rename_to_a_taken_name_conflicts() {
        let h = Harness::new();
        let chess = h.seed_club("Chess Club");
        h.seed_club("Go Club");
        let (svc, _) = service(&h);

        let err = svc.rename(&chess.president, chess.club.id, "go club").unwrap_err();
        assert!(matches!(err, ApprovalError::Conflict(_)));
        assert!(facts_on(&h.broker, Queue::ClubCascade).is_empty());
    }

    #[test]
    fn advisor_cannot_rename_and_only_admins_retire() {
        let h = Harness::new();
        let chess = h.seed_club("Chess Club");
        let (svc, _) = service(&h);

        let err = svc.rename(&chess.advisor, chess.club.id, "Other").unwrap_err();
        assert!(matches!(err, ApprovalError::Forbidden(_)));
        let err = svc.retire(&chess.president, chess.club.id).unwrap_err();
        assert!(matches!(err, ApprovalError::Forbidden(_)));

        let retired = svc.retire(&h.admin(), chess.club.id).unwrap();
        assert_eq!(retired.status, ClubStatus::Inactive);
        assert!(svc.list_active().unwrap().is_empty());
        assert!(matches!(svc.get(chess.club.id), Err(ApprovalError::NotFound(_))));
        assert!(matches!(svc.members(chess.club.id), Err(ApprovalError::NotFound(_))));
        assert_eq!(facts_on(&h.broker, Queue::ClubCascade).len(), 1);

        let err = svc.rename(&h.admin(), chess.club.id, "Chess Society").unwrap_err();
        assert!(matches!(err, ApprovalError::Conflict(_)));
    }

    #[test]
    fn logo_is_stored_under_the_club_key() {
        let h = Harness::new();
        let chess = h.seed_club("Chess Club");
        let (svc, storage) = service(&h);

        let err = svc
            .set_logo(&chess.president, chess.club.id, b"%PDF".to_vec(), "application/pdf")
            .unwrap_err();
        assert!(matches!(err, ApprovalError::Validation(_)));

        let club = svc
            .set_logo(&chess.president, chess.club.id, vec![0x89, b'P', b'N', b'G'], "image/png")
            .unwrap();
        let key = logo_key(chess.club.id);
        assert_eq!(club.logo_key.as_deref(), Some(key.as_str()));
        assert_eq!(storage.object(&key).unwrap().content_type, "image/png");
        assert_eq!(
            svc.logo_url(&club).unwrap(),
            Some(format!("https://cdn.campus.edu/{key}"))
        );
    }

    #[test]
    fn only_approved_events_are_public() {
        let h = Harness::new();
        let chess = h.seed_club("Chess Club");
        let (svc, _) = service(&h);
        let wf = h.event_approvals();
        let starts_at = Utc::now() + Duration::days(7);

        let request = wf
            .submit(
                &chess.president,
                NewCampusEvent {
                    club_id: chess.club.id,
                    title: "Blitz night".into(),
                    location: None,
                    starts_at,
                    ends_at: starts_at + Duration::hours(3),
                },
            )
            .unwrap();
        let event_id = request.change.event_id;
        assert!(svc.public_events().unwrap().is_empty());
        assert!(matches!(svc.public_event(event_id), Err(ApprovalError::NotFound(_))));

        wf.approve(&chess.advisor, request.id).unwrap();
        assert_eq!(svc.public_events().unwrap().len(), 1);
        assert_eq!(svc.public_event(event_id).unwrap().title, "Blitz night");
    }
}
