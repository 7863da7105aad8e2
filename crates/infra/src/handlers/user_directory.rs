use std::sync::Arc;

use tracing::{debug, warn};

use clubhub_core::UserId;
use clubhub_events::{ClubRoleChanged, Fact, FactEnvelope, FactHandler, HandlerError, Queue, UserRegistered};

use crate::store::{Repository, UserDirectoryEntry};

/// Keeps the portal's user directory in step with the identity service
/// (`user.registered`) and with club positions (`club.role.change`).
pub struct UserDirectoryHandler {
    directory: Arc<dyn Repository<UserDirectoryEntry>>,
}

impl UserDirectoryHandler {
    pub fn new(directory: Arc<dyn Repository<UserDirectoryEntry>>) -> Self {
        Self { directory }
    }

    fn load(&self, user_id: UserId) -> Result<UserDirectoryEntry, HandlerError> {
        Ok(self
            .directory
            .find_by_id(&user_id)
            .map_err(|e| HandlerError::transient(e.to_string()))?
            .unwrap_or_else(|| UserDirectoryEntry::placeholder(user_id)))
    }

    fn store(&self, entry: UserDirectoryEntry) -> Result<(), HandlerError> {
        self.directory
            .save(entry)
            .map_err(|e| HandlerError::transient(e.to_string()))
    }

    fn registered(&self, fact: UserRegistered) -> Result<(), HandlerError> {
        let mut entry = self.load(fact.user_id)?;
        if entry.email == fact.email && entry.display_name == fact.display_name {
            return Ok(());
        }
        entry.email = fact.email;
        entry.display_name = fact.display_name;
        self.store(entry)
    }

    fn role_changed(&self, fact: ClubRoleChanged) -> Result<(), HandlerError> {
        let mut entry = self.load(fact.user_id)?;
        let current = entry.club_positions.get(&fact.club_id).cloned();
        if current == fact.new_role {
            debug!(user_id = %fact.user_id, club_id = %fact.club_id, "position already recorded");
            return Ok(());
        }
        if current != fact.previous_role {
            warn!(
                user_id = %fact.user_id,
                club_id = %fact.club_id,
                recorded = ?current,
                expected = ?fact.previous_role,
                "directory position out of step; taking the reported one"
            );
        }
        match fact.new_role {
            Some(role) => entry.club_positions.insert(fact.club_id, role),
            None => entry.club_positions.remove(&fact.club_id),
        };
        self.store(entry)
    }
}

impl FactHandler for UserDirectoryHandler {
    fn queue(&self) -> Queue {
        Queue::UserDirectory
    }

    fn handle(&self, envelope: &FactEnvelope) -> Result<(), HandlerError> {
        match envelope.decode()? {
            Fact::UserRegistered(f) => self.registered(f),
            Fact::ClubRoleChanged(f) => self.role_changed(f),
            other => Err(HandlerError::malformed(format!(
                "unexpected {} on {}",
                other.routing_key(),
                self.queue()
            ))),
        }
    }
}
