use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::facts::{Fact, FactError};
use crate::topology::Exchange;

/// Envelope for a fact on the wire.
///
/// Notes:
/// - Immutable once built; published once per business event.
/// - `message_id` is for log correlation only. It is not a version and
///   consumers must not order by it.
/// - `routing_key` stays a string so consumers can receive (and drop) keys
///   they do not know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactEnvelope {
    message_id: Uuid,
    exchange: Exchange,
    routing_key: String,
    payload: serde_json::Value,
    published_at: DateTime<Utc>,
}

impl FactEnvelope {
    pub fn new(
        message_id: Uuid,
        exchange: Exchange,
        routing_key: impl Into<String>,
        payload: serde_json::Value,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id,
            exchange,
            routing_key: routing_key.into(),
            payload,
            published_at,
        }
    }

    /// Wrap a typed fact, addressed to its routing key's exchange.
    pub fn for_fact(fact: &Fact, published_at: DateTime<Utc>) -> Result<Self, serde_json::Error> {
        let key = fact.routing_key();
        Ok(Self::new(
            Uuid::now_v7(),
            key.exchange(),
            key.as_str(),
            fact.payload_json()?,
            published_at,
        ))
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn exchange(&self) -> Exchange {
        self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    pub fn decode(&self) -> Result<Fact, FactError> {
        Fact::decode(&self.routing_key, &self.payload)
    }
}
