//! Notification-side consumer of `approval.*` outcomes.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};
use uuid::Uuid;

use clubhub_core::UserId;
use clubhub_events::{ApprovalOutcome, DecisionStatus, Fact, FactEnvelope, FactHandler, HandlerError, Queue};

use crate::external::Mailer;
use crate::store::{Repository, UserDirectoryEntry};

type SentKey = (UserId, Uuid, String, DecisionStatus);

/// E-mails the target user about an approval decision.
///
/// The recipient address comes from the user directory; an entry that has
/// not been filled by `user.registered` yet is retried. Each (target,
/// resource, new state, status) is mailed once, so redelivery after a
/// successful send is acked silently.
pub struct ApprovalNotificationHandler {
    directory: Arc<dyn Repository<UserDirectoryEntry>>,
    mailer: Arc<dyn Mailer>,
    sent: Mutex<HashSet<SentKey>>,
}

impl ApprovalNotificationHandler {
    pub fn new(directory: Arc<dyn Repository<UserDirectoryEntry>>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            directory,
            mailer,
            sent: Mutex::new(HashSet::new()),
        }
    }

    fn notify(&self, outcome: ApprovalOutcome) -> Result<(), HandlerError> {
        let key = (
            outcome.target_user_id,
            outcome.resource_id,
            outcome.new_state.clone(),
            outcome.status,
        );
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| HandlerError::transient("notification ledger poisoned"))?;
        if sent.contains(&key) {
            debug!(resource_id = %outcome.resource_id, "outcome already mailed");
            return Ok(());
        }

        let user_id = outcome.target_user_id;
        let recipient = self
            .directory
            .find_by_id(&user_id)
            .map_err(|e| HandlerError::transient(e.to_string()))?
            .filter(UserDirectoryEntry::is_registered)
            .ok_or_else(|| HandlerError::transient(format!("no address for user {user_id} yet")))?;

        let subject = match outcome.status {
            DecisionStatus::Approved => "Your request was approved",
            DecisionStatus::Rejected => "Your request was rejected",
        };
        let body = format!("Hi {},\n\n{}.\n", recipient.display_name, outcome.human_message);
        self.mailer
            .send(&recipient.email, subject, &body)
            .map_err(|e| HandlerError::transient(e.to_string()))?;

        info!(%user_id, resource_id = %outcome.resource_id, status = %outcome.status, "decision mailed");
        sent.insert(key);
        Ok(())
    }
}

impl FactHandler for ApprovalNotificationHandler {
    fn queue(&self) -> Queue {
        Queue::ApprovalNotifications
    }

    fn handle(&self, envelope: &FactEnvelope) -> Result<(), HandlerError> {
        match envelope.decode()? {
            Fact::ApprovalOutcome(outcome) => self.notify(outcome),
            other => Err(HandlerError::malformed(format!(
                "unexpected {} on {}",
                other.routing_key(),
                self.queue()
            ))),
        }
    }
}
