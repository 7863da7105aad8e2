//! Durable broker backends.
//!
//! The broker traits and the in-memory broker live in `clubhub-events`.
//! This module provides infrastructure-backed implementations (Redis).

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsBroker, queue_depths};
