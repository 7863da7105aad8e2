//! Redis Streams broker (durable, at-least-once delivery).
//!
//! ## Layout
//!
//! - **Queue stream**: `clubhub:queue:{queue}`, one per queue in the topology.
//!   Publishing routes the envelope through the [`Topology`] and XADDs one
//!   entry per bound queue.
//! - **Consumer group**: one per service (e.g. `portal`), created lazily with
//!   `MKSTREAM`. Each queue is read by exactly one runner of that group.
//! - **Dead-letter stream**: `clubhub:dlq:{queue}`.
//!
//! Entry fields: `envelope` (JSON) and `attempt` (1-based delivery count).
//!
//! ## Settlement
//!
//! ```text
//!  Ack         ──► XACK + XDEL
//!  Requeue     ──► XADD (attempt + 1) to the tail, then XACK + XDEL
//!  DeadLetter  ──► XADD to the DLQ stream,        then XACK + XDEL
//! ```
//!
//! Entries delivered to this consumer but never settled (the process died
//! mid-handler) are picked up again on the next `receive`, before new ones.

use std::collections::HashMap;
use std::time::Duration;

use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::{Commands, Connection, RedisError};
use tracing::{debug, instrument, warn};

use clubhub_events::{
    BrokerError, Consumer, Delivery, FactEnvelope, PublishOutcome, Publisher, Queue, Settlement, Topology,
};

const KEY_PREFIX: &str = "clubhub";

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

fn queue_key(queue: Queue) -> String {
    format!("{KEY_PREFIX}:queue:{}", queue.as_str())
}

fn dlq_key(queue: Queue) -> String {
    format!("{KEY_PREFIX}:dlq:{}", queue.as_str())
}

fn command_error(op: &str, e: RedisError) -> BrokerError {
    if e.is_timeout() {
        BrokerError::Command(format!("{op} timed out: {e}"))
    } else if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        BrokerError::Connection(format!("{op}: {e}"))
    } else {
        BrokerError::Command(format!("{op} failed: {e}"))
    }
}

#[derive(Debug, Clone)]
pub struct RedisStreamsBroker {
    client: redis::Client,
    topology: Topology,
    group: String,
    consumer: String,
    command_timeout: Duration,
}

impl RedisStreamsBroker {
    /// `group` names the consuming service; `consumer` must be unique per
    /// process inside that group.
    pub fn new(
        redis_url: impl AsRef<str>,
        topology: Topology,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            topology,
            group: group.into(),
            consumer: consumer.into(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        })
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    fn connection(&self, read_timeout: Duration) -> Result<Connection, BrokerError> {
        let conn = self
            .client
            .get_connection_with_timeout(self.command_timeout)
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        conn.set_read_timeout(Some(read_timeout))
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        conn.set_write_timeout(Some(self.command_timeout))
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        Ok(conn)
    }

    /// Create the consumer group for `queue` if it does not exist yet.
    pub fn ensure_group(&self, conn: &mut Connection, queue: Queue) -> Result<(), BrokerError> {
        let created: Result<(), RedisError> = conn.xgroup_create_mkstream(queue_key(queue), &self.group, "0");
        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(command_error("XGROUP CREATE", e)),
        }
    }

    fn append(conn: &mut Connection, stream: &str, fields: &[(&str, String)]) -> Result<String, BrokerError> {
        conn.xadd(stream, "*", fields).map_err(|e| command_error("XADD", e))
    }

    fn retire(&self, conn: &mut Connection, queue: Queue, id: &str) -> Result<(), BrokerError> {
        let key = queue_key(queue);
        let acked: u64 = conn
            .xack(&key, &self.group, &[id])
            .map_err(|e| command_error("XACK", e))?;
        if acked == 0 {
            return Err(BrokerError::UnknownDelivery(id.to_string()));
        }
        let _: u64 = conn.xdel(&key, &[id]).map_err(|e| command_error("XDEL", e))?;
        Ok(())
    }

    fn read(
        &self,
        conn: &mut Connection,
        queue: Queue,
        start: &str,
        block: Option<Duration>,
    ) -> Result<Option<StreamId>, BrokerError> {
        let mut opts = StreamReadOptions::default().group(&self.group, &self.consumer).count(1);
        if let Some(wait) = block {
            opts = opts.block(wait.as_millis().max(1) as usize);
        }
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[queue_key(queue)], &[start], &opts)
            .map_err(|e| command_error("XREADGROUP", e))?;
        Ok(reply
            .and_then(|r| r.keys.into_iter().next())
            .and_then(|k| k.ids.into_iter().next()))
    }
}

/// Pull `envelope` and `attempt` out of a stream entry.
fn decode_entry(queue: Queue, entry: &StreamId) -> Result<Delivery, BrokerError> {
    let raw: String = entry
        .get("envelope")
        .ok_or_else(|| BrokerError::Serialization(format!("entry {} has no envelope", entry.id)))?;
    let envelope: FactEnvelope =
        serde_json::from_str(&raw).map_err(|e| BrokerError::Serialization(e.to_string()))?;
    let attempt = entry
        .get::<String>("attempt")
        .and_then(|a| a.parse().ok())
        .unwrap_or(1);
    Ok(Delivery {
        queue,
        tag: entry.id.clone(),
        attempt,
        envelope,
    })
}

fn entry_fields(envelope: &FactEnvelope, attempt: u32) -> Result<Vec<(&'static str, String)>, BrokerError> {
    let json = serde_json::to_string(envelope).map_err(|e| BrokerError::Serialization(e.to_string()))?;
    Ok(vec![("envelope", json), ("attempt", attempt.to_string())])
}

impl Publisher for RedisStreamsBroker {
    #[instrument(skip_all, fields(routing_key = envelope.routing_key(), message_id = %envelope.message_id()))]
    fn publish(&self, envelope: &FactEnvelope) -> Result<PublishOutcome, BrokerError> {
        let queues = self.topology.route(envelope.exchange(), envelope.routing_key());
        if queues.is_empty() {
            return Ok(PublishOutcome::Returned);
        }

        let fields = entry_fields(envelope, 1)?;
        let mut conn = self.connection(self.command_timeout)?;
        for queue in queues {
            let id = Self::append(&mut conn, &queue_key(queue), &fields)?;
            debug!(%queue, stream_id = %id, "appended");
        }
        Ok(PublishOutcome::Ack)
    }
}

impl Consumer for RedisStreamsBroker {
    fn receive(&self, queue: Queue, wait: Duration) -> Result<Option<Delivery>, BrokerError> {
        let mut conn = self.connection(self.command_timeout + wait)?;
        self.ensure_group(&mut conn, queue)?;

        // Own pending entries first: left over from a crash before settling.
        let entry = match self.read(&mut conn, queue, "0", None)? {
            Some(e) if !e.map.is_empty() => Some(e),
            _ => self.read(&mut conn, queue, ">", (!wait.is_zero()).then_some(wait))?,
        };
        let Some(entry) = entry else {
            return Ok(None);
        };

        match decode_entry(queue, &entry) {
            Ok(delivery) => Ok(Some(delivery)),
            Err(e) => {
                // Undecodable entries can never be handled; park them.
                warn!(%queue, stream_id = %entry.id, error = %e, "dead-lettering unreadable entry");
                let raw: String = entry.get("envelope").unwrap_or_default();
                Self::append(
                    &mut conn,
                    &dlq_key(queue),
                    &[("envelope", raw), ("reason", e.to_string())],
                )?;
                self.retire(&mut conn, queue, &entry.id)?;
                Ok(None)
            }
        }
    }

    fn settle(&self, delivery: &Delivery, settlement: Settlement) -> Result<(), BrokerError> {
        let mut conn = self.connection(self.command_timeout)?;
        let queue = delivery.queue;
        match settlement {
            Settlement::Ack => {}
            Settlement::Requeue => {
                let fields = entry_fields(&delivery.envelope, delivery.attempt + 1)?;
                Self::append(&mut conn, &queue_key(queue), &fields)?;
            }
            Settlement::DeadLetter(reason) => {
                let mut fields = entry_fields(&delivery.envelope, delivery.attempt)?;
                fields.push(("reason", reason));
                fields.push(("failed_at", chrono::Utc::now().to_rfc3339()));
                Self::append(&mut conn, &dlq_key(queue), &fields)?;
                warn!(%queue, attempt = delivery.attempt, "message dead-lettered");
            }
        }
        self.retire(&mut conn, queue, &delivery.tag)
    }
}

/// Entry counts per queue stream, for health endpoints.
pub fn queue_depths(broker: &RedisStreamsBroker) -> Result<HashMap<Queue, usize>, BrokerError> {
    let mut conn = broker.connection(broker.command_timeout)?;
    let mut depths = HashMap::new();
    for queue in broker.topology.queues() {
        let len: usize = conn.xlen(queue_key(queue)).map_err(|e| command_error("XLEN", e))?;
        depths.insert(queue, len);
    }
    Ok(depths)
}
