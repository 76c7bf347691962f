//! Trade-scoped idempotency keys for gateway calls and deadline jobs.
//!
//! Every gateway operation for a trade uses a fixed key per operation type, so retries of the same logical operation
//! collapse to one financial movement at the gateway. Retried charges deliberately reuse the *same* charge key.

use crate::db_types::JobKind;

pub fn charge_key(trade_id: i64) -> String {
    format!("trade-{trade_id}-charge")
}

pub fn payout_key(trade_id: i64) -> String {
    format!("trade-{trade_id}-payout")
}

pub fn refund_key(trade_id: i64) -> String {
    format!("trade-{trade_id}-refund")
}

/// Job key for one deadline check. One job per trade and kind, ever.
pub fn job_key(trade_id: i64, kind: JobKind) -> String {
    format!("trade-{trade_id}-{kind}")
}

/// Payment retries are a sequence of jobs, one per attempt, so each gets its own key.
pub fn retry_job_key(trade_id: i64, attempt: i64) -> String {
    format!("trade-{trade_id}-{}-{attempt}", JobKind::PaymentRetry)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn keys_distinguish_operation_type() {
        assert_eq!(charge_key(7), "trade-7-charge");
        assert_eq!(payout_key(7), "trade-7-payout");
        assert_eq!(refund_key(7), "trade-7-refund");
        assert_eq!(job_key(7, JobKind::ShipDeadline), "trade-7-ShipDeadline");
        assert_eq!(retry_job_key(7, 2), "trade-7-PaymentRetry-2");
    }
}
