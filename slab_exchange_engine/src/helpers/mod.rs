mod business_days;
mod idempotency;

pub use business_days::{add_business_days, is_business_day};
pub use idempotency::{charge_key, job_key, payout_key, refund_key, retry_job_key};
