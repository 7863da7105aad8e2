//! Identity-side consumer of `user.role.assign` / `user.role.revoke`.

use std::sync::Arc;

use tracing::{debug, info};

use clubhub_auth::{Role, UserAccount};
use clubhub_core::UserId;
use clubhub_events::{Fact, FactEnvelope, FactHandler, HandlerError, Queue};

use crate::store::Repository;

/// Applies role facts to the user's role set.
///
/// Grant and revoke are set operations, so redelivery changes nothing. A
/// fact for a user the identity service has not stored yet is retried: the
/// registration may still be on its way.
pub struct RoleAssignmentHandler {
    users: Arc<dyn Repository<UserAccount>>,
}

impl RoleAssignmentHandler {
    pub fn new(users: Arc<dyn Repository<UserAccount>>) -> Self {
        Self { users }
    }

    fn apply(
        &self,
        user_id: UserId,
        role_name: &str,
        change: impl FnOnce(&mut UserAccount, Role) -> bool,
    ) -> Result<(), HandlerError> {
        let role: Role = role_name
            .parse()
            .map_err(|_| HandlerError::malformed(format!("unknown role '{role_name}'")))?;

        let mut account = self
            .users
            .find_by_id(&user_id)
            .map_err(|e| HandlerError::transient(e.to_string()))?
            .ok_or_else(|| HandlerError::transient(format!("user {user_id} not known yet")))?;

        if !change(&mut account, role) {
            debug!(%user_id, %role, "role set already up to date");
            return Ok(());
        }
        let roles = account.roles.to_claim();
        self.users
            .save(account)
            .map_err(|e| HandlerError::transient(e.to_string()))?;
        info!(%user_id, %roles, "role set updated");
        Ok(())
    }
}

impl FactHandler for RoleAssignmentHandler {
    fn queue(&self) -> Queue {
        Queue::RoleAssignments
    }

    fn handle(&self, envelope: &FactEnvelope) -> Result<(), HandlerError> {
        match envelope.decode()? {
            Fact::RoleAssign(f) => self.apply(f.user_id, &f.role_name, UserAccount::grant_role),
            Fact::RoleRevoke(f) => self.apply(f.user_id, &f.role_name, UserAccount::revoke_role),
            other => Err(HandlerError::malformed(format!(
                "unexpected {} on {}",
                other.routing_key(),
                self.queue()
            ))),
        }
    }
}
