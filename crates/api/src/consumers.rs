//! Background fact consumers.
//!
//! Each handler runs its own `ConsumerRunner` polling loop on a blocking
//! worker thread until shutdown is requested.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use clubhub_events::{Consumer, ConsumerRunner, FactHandler, RunStats};

#[derive(Debug)]
pub struct ConsumerSet {
    shutdown: Arc<AtomicBool>,
    handles: Vec<(String, JoinHandle<RunStats>)>,
}

impl Default for ConsumerSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumerSet {
    pub fn new() -> Self {
        Self {
            shutdown: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        }
    }

    pub fn spawn<C, H>(&mut self, consumer: C, handler: H)
    where
        C: Consumer + 'static,
        H: FactHandler + 'static,
    {
        let queue = handler.queue().to_string();
        let shutdown = self.shutdown.clone();
        let runner = ConsumerRunner::new(consumer, handler);
        let handle = tokio::task::spawn_blocking(move || runner.run_blocking(&shutdown));
        self.handles.push((queue, handle));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal every loop to stop and wait for them to finish their current delivery.
    pub async fn shutdown(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for (queue, handle) in self.handles {
            match handle.await {
                Ok(stats) => info!(%queue, processed = stats.total(), "consumer joined"),
                Err(e) => warn!(%queue, error = %e, "consumer task failed"),
            }
        }
    }
}
