use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use log::*;
use sx_common::Cents;

use crate::traits::{GatewayError, PaymentGateway};

/// An in-memory [`PaymentGateway`] that behaves like the real thing: it deduplicates on the idempotency key, so a
/// replayed call returns the original reference without a second financial effect, and it can be told to decline
/// the next N charges to exercise the failure paths.
#[derive(Clone, Default)]
pub struct MemoryGateway {
    state: Arc<Mutex<GatewayState>>,
}

#[derive(Default)]
struct GatewayState {
    effects: HashMap<String, String>,
    attempts: HashMap<String, usize>,
    declines_remaining: usize,
    next_ref: u64,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declines the next `n` charge attempts, then recovers.
    pub fn decline_next_charges(&self, n: usize) {
        self.state.lock().unwrap().declines_remaining = n;
    }

    /// How many times any operation was attempted with this key, including declined attempts.
    pub fn attempts_for(&self, key: &str) -> usize {
        *self.state.lock().unwrap().attempts.get(key).unwrap_or(&0)
    }

    /// The number of distinct financial effects the gateway has recorded.
    pub fn effect_count(&self) -> usize {
        self.state.lock().unwrap().effects.len()
    }

    fn execute(&self, prefix: &str, key: &str, can_decline: bool) -> Result<String, GatewayError> {
        let mut state = self.state.lock().unwrap();
        *state.attempts.entry(key.to_string()).or_insert(0) += 1;
        if let Some(reference) = state.effects.get(key) {
            debug!("💳️ Gateway deduplicated key {key} -> {reference}");
            return Ok(reference.clone());
        }
        if can_decline && state.declines_remaining > 0 {
            state.declines_remaining -= 1;
            return Err(GatewayError::Declined("insufficient funds".to_string()));
        }
        state.next_ref += 1;
        let reference = format!("{prefix}-{}", state.next_ref);
        state.effects.insert(key.to_string(), reference.clone());
        Ok(reference)
    }
}

impl PaymentGateway for MemoryGateway {
    async fn charge(
        &self,
        _customer_ref: &str,
        _payment_method_ref: &str,
        amount: Cents,
        idempotency_key: &str,
    ) -> Result<String, GatewayError> {
        debug!("💳️ Charge of {amount} requested with key {idempotency_key}");
        self.execute("pay", idempotency_key, true)
    }

    async fn payout(&self, _destination_ref: &str, amount: Cents, idempotency_key: &str) -> Result<String, GatewayError> {
        debug!("💳️ Payout of {amount} requested with key {idempotency_key}");
        self.execute("po", idempotency_key, false)
    }

    async fn refund(
        &self,
        _payment_ref: &str,
        amount: Option<Cents>,
        idempotency_key: &str,
    ) -> Result<String, GatewayError> {
        debug!("💳️ Refund of {amount:?} requested with key {idempotency_key}");
        self.execute("re", idempotency_key, false)
    }
}
