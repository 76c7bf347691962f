//! Continuous double-auction matching.
//!
//! [`engine::MatchingEngine`] runs the price-time priority loop for one incoming order; [`worker::MatchWorker`] is
//! the single consumer that serialises those runs per process, so two orders for the same card can never match
//! concurrently.

pub mod engine;
pub mod worker;

pub use engine::MatchingEngine;
pub use worker::{MatchSender, MatchWorker};
