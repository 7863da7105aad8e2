//! `clubhub-events` — the message fabric.
//!
//! Topology, fact payloads and envelopes, the broker traits, an in-memory
//! broker, and the consumer runner. Durable backends live in `clubhub-infra`.

pub mod broker;
pub mod envelope;
pub mod facts;
pub mod handler;
pub mod in_memory;
pub mod runner;
pub mod topology;

pub use broker::{
    BrokerError, Consumer, Delivery, PublishOutcome, Publisher, Settlement, publish_fact,
};
pub use envelope::FactEnvelope;
pub use facts::{
    ApprovalOutcome, ClubRoleChanged, DecisionStatus, Fact, FactError, ResourceDeleted,
    ResourceUpdated, RoleToAssign, RoleToRevoke, UserRegistered,
};
pub use handler::{FactHandler, HandlerError};
pub use in_memory::{DeadLetter, InMemoryBroker};
pub use runner::{ConsumerRunner, DEFAULT_MAX_DELIVERIES, Processed, RunStats};
pub use topology::{Binding, Exchange, Queue, RoutingKey, Topology, topic_matches};
