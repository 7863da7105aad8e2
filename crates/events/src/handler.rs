use thiserror::Error;

use crate::envelope::FactEnvelope;
use crate::facts::FactError;
use crate::topology::Queue;

/// Why a handler did not complete a delivery.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The message can never succeed (bad payload, unknown key or role).
    /// It is acked and dropped.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Might succeed later (dependency down, data not converged yet).
    /// It is nacked and redelivered.
    #[error("transient failure: {0}")]
    Transient(String),
}

impl HandlerError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }
}

impl From<FactError> for HandlerError {
    fn from(value: FactError) -> Self {
        Self::Malformed(value.to_string())
    }
}

/// Consumes facts from one queue.
///
/// Delivery is at-least-once and may be out of order relative to other
/// queues, so `handle` must be idempotent: applying the same envelope twice
/// leaves the same state as applying it once.
pub trait FactHandler: Send + Sync {
    fn queue(&self) -> Queue;

    fn handle(&self, envelope: &FactEnvelope) -> Result<(), HandlerError>;
}

impl<H> FactHandler for std::sync::Arc<H>
where
    H: FactHandler + ?Sized,
{
    fn queue(&self) -> Queue {
        (**self).queue()
    }

    fn handle(&self, envelope: &FactEnvelope) -> Result<(), HandlerError> {
        (**self).handle(envelope)
    }
}
