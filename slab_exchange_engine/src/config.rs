//! Engine configuration, read from `SX_*` environment variables with sensible defaults.

use std::env;

use chrono::Duration;
use log::*;

const DEFAULT_FEE_RATE_BPS: i64 = 250;
const DEFAULT_SHIP_WARNING_BUSINESS_DAYS: i64 = 2;
const DEFAULT_SHIP_DEADLINE_BUSINESS_DAYS: i64 = 3;
const DEFAULT_PAYMENT_RETRY_INITIAL: Duration = Duration::hours(1);
const DEFAULT_PAYMENT_RETRY_CUTOFF: Duration = Duration::hours(24);
const DEFAULT_CLAIM_LEASE: Duration = Duration::hours(4);
const DEFAULT_SCHEDULER_POLL_SECONDS: i64 = 30;
const DEFAULT_SCHEDULER_CONCURRENCY: usize = 5;
const DEFAULT_REPUTATION_PENALTY: i64 = 10;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Exchange fee charged on every trade, in basis points of the gross amount.
    pub fee_rate_bps: i64,
    /// Business days after capture before the seller gets a shipping reminder.
    pub ship_warning_business_days: i64,
    /// Business days after capture before a sell-first trade is force-cancelled.
    pub ship_deadline_business_days: i64,
    /// Delay before the first payment-capture retry. Subsequent retries back off exponentially.
    pub payment_retry_initial: Duration,
    /// Hard wall-clock cutoff after the first capture failure; past it the trade is cancelled, not retried.
    pub payment_retry_cutoff: Duration,
    /// How long a verification claim is honoured before another verifier may take it over.
    pub claim_lease: Duration,
    pub scheduler_poll_interval: Duration,
    /// Bounded parallelism for deadline job execution across distinct trades.
    pub scheduler_concurrency: usize,
    /// Fixed reputation penalty applied to a seller who misses the ship-by deadline.
    pub reputation_penalty: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fee_rate_bps: DEFAULT_FEE_RATE_BPS,
            ship_warning_business_days: DEFAULT_SHIP_WARNING_BUSINESS_DAYS,
            ship_deadline_business_days: DEFAULT_SHIP_DEADLINE_BUSINESS_DAYS,
            payment_retry_initial: DEFAULT_PAYMENT_RETRY_INITIAL,
            payment_retry_cutoff: DEFAULT_PAYMENT_RETRY_CUTOFF,
            claim_lease: DEFAULT_CLAIM_LEASE,
            scheduler_poll_interval: Duration::seconds(DEFAULT_SCHEDULER_POLL_SECONDS),
            scheduler_concurrency: DEFAULT_SCHEDULER_CONCURRENCY,
            reputation_penalty: DEFAULT_REPUTATION_PENALTY,
        }
    }
}

impl EngineConfig {
    /// Builds the configuration from the environment. Unset or unparseable variables fall back to the defaults.
    pub fn from_env() -> Self {
        let mut config = EngineConfig::default();
        if let Some(bps) = env_i64("SX_FEE_RATE_BPS") {
            config.fee_rate_bps = bps;
        }
        if let Some(days) = env_i64("SX_SHIP_WARNING_BUSINESS_DAYS") {
            config.ship_warning_business_days = days;
        }
        if let Some(days) = env_i64("SX_SHIP_DEADLINE_BUSINESS_DAYS") {
            config.ship_deadline_business_days = days;
        }
        if let Some(mins) = env_i64("SX_PAYMENT_RETRY_INITIAL_MINUTES") {
            config.payment_retry_initial = Duration::minutes(mins);
        }
        if let Some(hours) = env_i64("SX_PAYMENT_RETRY_CUTOFF_HOURS") {
            config.payment_retry_cutoff = Duration::hours(hours);
        }
        if let Some(hours) = env_i64("SX_CLAIM_LEASE_HOURS") {
            config.claim_lease = Duration::hours(hours);
        }
        if let Some(secs) = env_i64("SX_SCHEDULER_POLL_SECONDS") {
            config.scheduler_poll_interval = Duration::seconds(secs);
        }
        if let Some(n) = env_i64("SX_SCHEDULER_CONCURRENCY") {
            config.scheduler_concurrency = n.max(1) as usize;
        }
        if let Some(penalty) = env_i64("SX_REPUTATION_PENALTY") {
            config.reputation_penalty = penalty;
        }
        config
    }
}

fn env_i64(var: &str) -> Option<i64> {
    let value = env::var(var).ok()?;
    match value.trim().parse::<i64>() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("⚙️ {var}={value} is not a valid integer ({e}). Using the default.");
            None
        },
    }
}
