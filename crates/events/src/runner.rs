//! Consumer runner: pulls deliveries for one queue and drives a handler.
//!
//! Settlement rules:
//! - `Ok` → ack
//! - `Malformed` → ack, logged, dropped
//! - `Transient` → requeue, until `max_deliveries` is reached, then dead-letter

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use crate::broker::{BrokerError, Consumer, Delivery, Settlement};
use crate::handler::{FactHandler, HandlerError};

pub const DEFAULT_MAX_DELIVERIES: u32 = 5;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processed {
    Acked,
    Dropped(String),
    Requeued(String),
    DeadLettered(String),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub acked: usize,
    pub dropped: usize,
    pub requeued: usize,
    pub dead_lettered: usize,
}

impl RunStats {
    fn record(&mut self, p: &Processed) {
        match p {
            Processed::Acked => self.acked += 1,
            Processed::Dropped(_) => self.dropped += 1,
            Processed::Requeued(_) => self.requeued += 1,
            Processed::DeadLettered(_) => self.dead_lettered += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.acked + self.dropped + self.requeued + self.dead_lettered
    }
}

#[derive(Debug)]
pub struct ConsumerRunner<C, H> {
    consumer: C,
    handler: H,
    max_deliveries: u32,
    poll_interval: Duration,
}

impl<C, H> ConsumerRunner<C, H>
where
    C: Consumer,
    H: FactHandler,
{
    pub fn new(consumer: C, handler: H) -> Self {
        Self {
            consumer,
            handler,
            max_deliveries: DEFAULT_MAX_DELIVERIES,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_max_deliveries(mut self, max: u32) -> Self {
        self.max_deliveries = max.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Receive and settle at most one delivery.
    pub fn process_one(&self, wait: Duration) -> Result<Option<Processed>, BrokerError> {
        let Some(delivery) = self.consumer.receive(self.handler.queue(), wait)? else {
            return Ok(None);
        };
        let processed = self.dispatch(&delivery);
        let settlement = match &processed {
            Processed::Acked | Processed::Dropped(_) => Settlement::Ack,
            Processed::Requeued(_) => Settlement::Requeue,
            Processed::DeadLettered(reason) => Settlement::DeadLetter(reason.clone()),
        };
        self.consumer.settle(&delivery, settlement)?;
        Ok(Some(processed))
    }

    fn dispatch(&self, delivery: &Delivery) -> Processed {
        let env = &delivery.envelope;
        match self.handler.handle(env) {
            Ok(()) => Processed::Acked,
            Err(HandlerError::Malformed(reason)) => {
                warn!(
                    queue = %delivery.queue,
                    message_id = %env.message_id(),
                    routing_key = env.routing_key(),
                    reason = %reason,
                    "dropping malformed message"
                );
                Processed::Dropped(reason)
            }
            Err(HandlerError::Transient(reason)) if delivery.attempt >= self.max_deliveries => {
                error!(
                    queue = %delivery.queue,
                    message_id = %env.message_id(),
                    attempt = delivery.attempt,
                    reason = %reason,
                    "giving up on message"
                );
                Processed::DeadLettered(reason)
            }
            Err(HandlerError::Transient(reason)) => {
                warn!(
                    queue = %delivery.queue,
                    message_id = %env.message_id(),
                    attempt = delivery.attempt,
                    reason = %reason,
                    "requeueing after transient failure"
                );
                Processed::Requeued(reason)
            }
        }
    }

    /// Drain the queue until nothing is ready. Used by tests and one-shot jobs.
    pub fn run_until_idle(&self) -> Result<RunStats, BrokerError> {
        let mut stats = RunStats::default();
        while let Some(p) = self.process_one(Duration::ZERO)? {
            stats.record(&p);
        }
        Ok(stats)
    }

    /// Poll until `shutdown` is set. Broker errors are logged and retried
    /// after one poll interval.
    #[instrument(skip_all, fields(queue = %self.handler.queue()))]
    pub fn run_blocking(&self, shutdown: &AtomicBool) -> RunStats {
        info!("consumer started");
        let mut stats = RunStats::default();
        while !shutdown.load(Ordering::Relaxed) {
            match self.process_one(self.poll_interval) {
                Ok(Some(p)) => stats.record(&p),
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "consumer poll failed");
                    std::thread::sleep(self.poll_interval);
                }
            }
        }
        info!(processed = stats.total(), "consumer stopped");
        stats
    }
}
