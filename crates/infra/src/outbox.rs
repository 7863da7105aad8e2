//! Facts produced by a committed local transaction, waiting to be published.
//!
//! Workflows fill an `Outbox` while holding the transaction lock and drain it
//! after releasing it. A publish failure is logged by `publish_fact` and does
//! not undo the local change.

use clubhub_events::{Fact, Publisher, publish_fact};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Outbox {
    facts: Vec<Fact>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fact: Fact) {
        self.facts.push(fact);
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn facts(&self) -> &[Fact] {
        &self.facts
    }

    /// Publish everything in order. Returns how many were acked.
    pub fn publish_all<P>(self, publisher: &P) -> usize
    where
        P: Publisher + ?Sized,
    {
        self.facts
            .iter()
            .filter(|fact| publish_fact(publisher, fact))
            .count()
    }
}
