use sx_common::Cents;
use thiserror::Error;

/// The payment/transfer gateway contract.
///
/// The gateway is an at-least-once remote service that deduplicates on the idempotency key: repeated delivery of the
/// same logical operation must have exactly one financial effect. The engine is responsible for key correctness —
/// every call is issued with a trade-scoped key that distinguishes the operation type (see [`crate::helpers`]).
#[allow(async_fn_in_trait)]
pub trait PaymentGateway: Clone + Send + Sync {
    /// Charge the buyer. Returns an opaque payment reference used for later refunds.
    async fn charge(
        &self,
        customer_ref: &str,
        payment_method_ref: &str,
        amount: Cents,
        idempotency_key: &str,
    ) -> Result<String, GatewayError>;

    /// Pay out to a seller's destination account. Returns an opaque transfer reference.
    async fn payout(&self, destination_ref: &str, amount: Cents, idempotency_key: &str) -> Result<String, GatewayError>;

    /// Refund a previous charge, in full when `amount` is `None`. Returns an opaque refund reference.
    async fn refund(
        &self,
        payment_ref: &str,
        amount: Option<Cents>,
        idempotency_key: &str,
    ) -> Result<String, GatewayError>;
}

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("The charge was declined: {0}")]
    Declined(String),
    #[error("The customer has no usable payment method")]
    NoPaymentMethod,
    #[error("No payout destination is configured for this account")]
    NoPayoutDestination,
    #[error("The payment gateway is unavailable: {0}")]
    Unavailable(String),
}
