//! In-memory broker for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::broker::{BrokerError, Consumer, Delivery, PublishOutcome, Publisher, Settlement};
use crate::envelope::FactEnvelope;
use crate::topology::{Queue, Topology};

#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub queue: Queue,
    pub envelope: FactEnvelope,
    pub attempts: u32,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Queued {
    envelope: FactEnvelope,
    /// Deliveries so far.
    attempts: u32,
}

#[derive(Debug, Default)]
struct State {
    ready: HashMap<Queue, VecDeque<Queued>>,
    unacked: HashMap<u64, (Queue, Queued)>,
    next_tag: u64,
    dead_letters: Vec<DeadLetter>,
    nack_reason: Option<String>,
}

/// In-process broker with durable-in-memory queues.
///
/// - Topic routing over a fixed [`Topology`]
/// - Per-queue FIFO; requeued messages go back to the head
/// - Unacked deliveries stay parked until settled
#[derive(Debug)]
pub struct InMemoryBroker {
    topology: Topology,
    state: Mutex<State>,
    available: Condvar,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(Topology::standard())
    }
}

impl InMemoryBroker {
    pub fn new(topology: Topology) -> Self {
        let mut state = State::default();
        for q in topology.queues() {
            state.ready.entry(q).or_default();
        }
        Self {
            topology,
            state: Mutex::new(state),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, BrokerError> {
        self.state
            .lock()
            .map_err(|_| BrokerError::Connection("broker state poisoned".into()))
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Messages waiting in `queue` (not counting unacked deliveries).
    pub fn depth(&self, queue: Queue) -> usize {
        self.lock()
            .map(|s| s.ready.get(&queue).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }

    pub fn unacked(&self, queue: Queue) -> usize {
        self.lock()
            .map(|s| s.unacked.values().filter(|(q, _)| *q == queue).count())
            .unwrap_or(0)
    }

    pub fn dead_letters(&self, queue: Queue) -> Vec<DeadLetter> {
        self.lock()
            .map(|s| s.dead_letters.iter().filter(|d| d.queue == queue).cloned().collect())
            .unwrap_or_default()
    }

    /// Make every subsequent publish come back as `Nack(reason)`; `None` restores acks.
    pub fn set_nack(&self, reason: Option<String>) {
        if let Ok(mut s) = self.lock() {
            s.nack_reason = reason;
        }
    }
}

impl Publisher for InMemoryBroker {
    fn publish(&self, envelope: &FactEnvelope) -> Result<PublishOutcome, BrokerError> {
        let queues = self.topology.route(envelope.exchange(), envelope.routing_key());
        let mut s = self.lock()?;

        if let Some(reason) = &s.nack_reason {
            return Ok(PublishOutcome::Nack(reason.clone()));
        }
        if queues.is_empty() {
            return Ok(PublishOutcome::Returned);
        }

        for q in &queues {
            s.ready.entry(*q).or_default().push_back(Queued {
                envelope: envelope.clone(),
                attempts: 0,
            });
        }
        drop(s);

        debug!(
            message_id = %envelope.message_id(),
            routing_key = envelope.routing_key(),
            queues = queues.len(),
            "routed"
        );
        self.available.notify_all();
        Ok(PublishOutcome::Ack)
    }
}

impl Consumer for InMemoryBroker {
    fn receive(&self, queue: Queue, wait: Duration) -> Result<Option<Delivery>, BrokerError> {
        let deadline = Instant::now() + wait;
        let mut s = self.lock()?;

        loop {
            if let Some(mut msg) = s.ready.get_mut(&queue).and_then(VecDeque::pop_front) {
                msg.attempts += 1;
                s.next_tag += 1;
                let tag = s.next_tag;
                let delivery = Delivery {
                    queue,
                    tag: tag.to_string(),
                    attempt: msg.attempts,
                    envelope: msg.envelope.clone(),
                };
                s.unacked.insert(tag, (queue, msg));
                return Ok(Some(delivery));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            s = self
                .available
                .wait_timeout(s, deadline - now)
                .map_err(|_| BrokerError::Connection("broker state poisoned".into()))?
                .0;
        }
    }

    fn settle(&self, delivery: &Delivery, settlement: Settlement) -> Result<(), BrokerError> {
        let tag: u64 = delivery
            .tag
            .parse()
            .map_err(|_| BrokerError::UnknownDelivery(delivery.tag.clone()))?;

        let mut s = self.lock()?;
        let (queue, msg) = s
            .unacked
            .remove(&tag)
            .ok_or_else(|| BrokerError::UnknownDelivery(delivery.tag.clone()))?;

        match settlement {
            Settlement::Ack => {}
            Settlement::Requeue => {
                s.ready.entry(queue).or_default().push_front(msg);
                drop(s);
                self.available.notify_all();
            }
            Settlement::DeadLetter(reason) => {
                error!(
                    queue = %queue,
                    message_id = %msg.envelope.message_id(),
                    attempts = msg.attempts,
                    reason = %reason,
                    "message dead-lettered"
                );
                s.dead_letters.push(DeadLetter {
                    queue,
                    envelope: msg.envelope,
                    attempts: msg.attempts,
                    reason,
                    failed_at: Utc::now(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use clubhub_core::UserId;
    use serde_json::json;

    use super::*;
    use crate::facts::{Fact, RoleToAssign};
    use crate::topology::Exchange;

    fn role_fact(role: &str) -> FactEnvelope {
        FactEnvelope::for_fact(
            &Fact::RoleAssign(RoleToAssign {
                user_id: UserId::new(),
                role_name: role.into(),
                club_id: None,
            }),
            Utc::now(),
        )
        .unwrap()
    }

    const NOW: Duration = Duration::ZERO;

    #[test]
    fn routes_and_delivers_fifo() {
        let b = InMemoryBroker::default();
        let first = role_fact("ROLE_STUDENT");
        let second = role_fact("ROLE_ADMIN");
        assert_eq!(b.publish(&first).unwrap(), PublishOutcome::Ack);
        assert_eq!(b.publish(&second).unwrap(), PublishOutcome::Ack);

        let d1 = b.receive(Queue::RoleAssignments, NOW).unwrap().unwrap();
        let d2 = b.receive(Queue::RoleAssignments, NOW).unwrap().unwrap();
        assert_eq!(d1.envelope, first);
        assert_eq!(d2.envelope, second);
        assert_eq!(d1.attempt, 1);
        assert!(b.receive(Queue::RoleAssignments, NOW).unwrap().is_none());
    }

    #[test]
    fn unroutable_messages_are_returned() {
        let b = InMemoryBroker::default();
        let env = FactEnvelope::new(
            uuid::Uuid::now_v7(),
            Exchange::User,
            "user.deleted",
            json!({}),
            Utc::now(),
        );
        assert_eq!(b.publish(&env).unwrap(), PublishOutcome::Returned);
    }

    #[test]
    fn nack_mode_stores_nothing() {
        let b = InMemoryBroker::default();
        b.set_nack(Some("overloaded".into()));
        assert_eq!(
            b.publish(&role_fact("ROLE_STUDENT")).unwrap(),
            PublishOutcome::Nack("overloaded".into())
        );
        assert_eq!(b.depth(Queue::RoleAssignments), 0);
    }

    #[test]
    fn requeue_redelivers_at_head_with_higher_attempt() {
        let b = InMemoryBroker::default();
        let first = role_fact("ROLE_STUDENT");
        b.publish(&first).unwrap();
        b.publish(&role_fact("ROLE_ADMIN")).unwrap();

        let d = b.receive(Queue::RoleAssignments, NOW).unwrap().unwrap();
        assert_eq!(b.unacked(Queue::RoleAssignments), 1);
        b.settle(&d, Settlement::Requeue).unwrap();

        let again = b.receive(Queue::RoleAssignments, NOW).unwrap().unwrap();
        assert_eq!(again.envelope, first);
        assert_eq!(again.attempt, 2);
    }

    #[test]
    fn settling_twice_is_an_error() {
        let b = InMemoryBroker::default();
        b.publish(&role_fact("ROLE_STUDENT")).unwrap();
        let d = b.receive(Queue::RoleAssignments, NOW).unwrap().unwrap();
        b.settle(&d, Settlement::Ack).unwrap();
        assert!(matches!(
            b.settle(&d, Settlement::Ack),
            Err(BrokerError::UnknownDelivery(_))
        ));
    }

    #[test]
    fn dead_letters_are_kept_with_reason() {
        let b = InMemoryBroker::default();
        b.publish(&role_fact("ROLE_STUDENT")).unwrap();
        let d = b.receive(Queue::RoleAssignments, NOW).unwrap().unwrap();
        b.settle(&d, Settlement::DeadLetter("gave up".into())).unwrap();

        let dlq = b.dead_letters(Queue::RoleAssignments);
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].reason, "gave up");
        assert_eq!(b.depth(Queue::RoleAssignments), 0);
    }

    #[test]
    fn receive_wakes_up_on_publish() {
        let b = std::sync::Arc::new(InMemoryBroker::default());
        let publisher = b.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            publisher.publish(&role_fact("ROLE_STUDENT")).unwrap();
        });

        let d = b.receive(Queue::RoleAssignments, Duration::from_secs(5)).unwrap();
        assert!(d.is_some());
        t.join().unwrap();
    }
}
