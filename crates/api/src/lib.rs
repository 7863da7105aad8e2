//! HTTP surfaces for ClubHub.
//!
//! ```text
//! client ──▶ gateway (edge trust filter, /auth/*, proxy) ──▶ portal (trust headers → principal)
//! ```
//!
//! - `gateway`: the only public entrypoint; verifies bearer tokens and
//!   forwards trust headers upstream.
//! - `downstream`: what every internal service runs to turn trust headers
//!   into a per-request principal.
//! - `app`: the club portal router and its wiring.

pub mod app;
pub mod config;
pub mod consumers;
pub mod context;
pub mod downstream;
pub mod gateway;
