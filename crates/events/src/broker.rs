//! Broker abstraction: confirmed publish and manual-ack consumption.
//!
//! The fabric is **at-least-once**:
//!
//! - A publisher learns whether the broker accepted (`Ack`), refused (`Nack`)
//!   or could not route (`Returned`) each message.
//! - A consumer settles every delivery explicitly. Anything not acked is
//!   delivered again, so handlers must be idempotent.
//! - Order is FIFO per queue; nothing is promised across queues.
//!
//! Both traits are synchronous. Async callers run consumers on blocking
//! worker threads.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::envelope::FactEnvelope;
use crate::facts::Fact;
use crate::topology::Queue;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Broker confirmed the message is stored in every bound queue.
    Ack,
    /// Broker refused the message.
    Nack(String),
    /// No binding matched; the message was dropped.
    Returned,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("broker command error: {0}")]
    Command(String),

    #[error("broker did not answer within {0:?}")]
    Timeout(Duration),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unknown delivery tag {0}")]
    UnknownDelivery(String),
}

pub trait Publisher: Send + Sync {
    fn publish(&self, envelope: &FactEnvelope) -> Result<PublishOutcome, BrokerError>;
}

impl<P> Publisher for Arc<P>
where
    P: Publisher + ?Sized,
{
    fn publish(&self, envelope: &FactEnvelope) -> Result<PublishOutcome, BrokerError> {
        (**self).publish(envelope)
    }
}

/// One delivery of a queued message.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub queue: Queue,
    /// Broker-specific handle used to settle this delivery.
    pub tag: String,
    /// 1 on first delivery, incremented on each redelivery.
    pub attempt: u32,
    pub envelope: FactEnvelope,
}

/// How a consumer settles a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    /// Put the message back at the head of its queue.
    Requeue,
    /// Remove from the queue and park it with a reason.
    DeadLetter(String),
}

pub trait Consumer: Send + Sync {
    /// Next delivery for `queue`, waiting up to `wait`. `Ok(None)` when idle.
    fn receive(&self, queue: Queue, wait: Duration) -> Result<Option<Delivery>, BrokerError>;

    fn settle(&self, delivery: &Delivery, settlement: Settlement) -> Result<(), BrokerError>;
}

impl<C> Consumer for Arc<C>
where
    C: Consumer + ?Sized,
{
    fn receive(&self, queue: Queue, wait: Duration) -> Result<Option<Delivery>, BrokerError> {
        (**self).receive(queue, wait)
    }

    fn settle(&self, delivery: &Delivery, settlement: Settlement) -> Result<(), BrokerError> {
        (**self).settle(delivery, settlement)
    }
}

/// Publish a fact and log anything other than a confirmed `Ack`.
///
/// Never fails the caller: the local state change that produced the fact has
/// already committed. Returns `true` only on `Ack`.
pub fn publish_fact<P>(publisher: &P, fact: &Fact) -> bool
where
    P: Publisher + ?Sized,
{
    let envelope = match FactEnvelope::for_fact(fact, chrono::Utc::now()) {
        Ok(e) => e,
        Err(e) => {
            error!(routing_key = %fact.routing_key(), error = %e, "failed to serialize fact");
            return false;
        }
    };

    match publisher.publish(&envelope) {
        Ok(PublishOutcome::Ack) => {
            debug!(
                message_id = %envelope.message_id(),
                routing_key = envelope.routing_key(),
                "fact published"
            );
            true
        }
        Ok(PublishOutcome::Nack(reason)) => {
            warn!(
                message_id = %envelope.message_id(),
                routing_key = envelope.routing_key(),
                reason = %reason,
                "fact publish nacked by broker"
            );
            false
        }
        Ok(PublishOutcome::Returned) => {
            warn!(
                message_id = %envelope.message_id(),
                exchange = %envelope.exchange(),
                routing_key = envelope.routing_key(),
                "fact returned as unroutable"
            );
            false
        }
        Err(e) => {
            error!(
                message_id = %envelope.message_id(),
                routing_key = envelope.routing_key(),
                error = %e,
                "fact publish failed"
            );
            false
        }
    }
}
