use chrono::{DateTime, Duration, Utc};
use sx_common::Cents;
use thiserror::Error;

use crate::db_types::{
    Account,
    AlertRule,
    AlertSeverity,
    CardInstance,
    CardStatus,
    JobKind,
    NewCardInstance,
    NewOrder,
    NewShipment,
    Order,
    ScheduledJob,
    Shipment,
    ShipmentStatus,
    Trade,
    TradeAlert,
};
use crate::traits::data_objects::{FillResult, OrderBookSnapshot, OrderQueryFilter};

/// Read-side queries shared by every API area.
#[allow(async_fn_in_trait)]
pub trait AccountManagement: Clone {
    async fn fetch_order(&self, order_id: i64) -> Result<Option<Order>, ExchangeError>;

    /// Fetches orders according to the criteria in the filter, ordered by `created_at` ascending.
    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, ExchangeError>;

    /// The aggregated book for one card: bids and asks grouped by price level, best price first.
    async fn order_book(&self, card_id: &str) -> Result<OrderBookSnapshot, ExchangeError>;

    async fn fetch_trade(&self, trade_id: i64) -> Result<Option<Trade>, ExchangeError>;

    async fn fetch_card_instance(&self, instance_id: i64) -> Result<Option<CardInstance>, ExchangeError>;

    async fn fetch_alerts_for_trade(&self, trade_id: i64) -> Result<Vec<TradeAlert>, ExchangeError>;

    /// Fetches the account for `user_id`, creating an empty one if it does not exist yet.
    async fn fetch_or_create_account(&self, user_id: &str) -> Result<Account, ExchangeError>;

    /// Records the gateway handles for a user. `None` values leave the stored reference unchanged.
    async fn update_account_gateway_refs(
        &self,
        user_id: &str,
        customer_ref: Option<&str>,
        payment_method_ref: Option<&str>,
        payout_account_ref: Option<&str>,
    ) -> Result<Account, ExchangeError>;
}

/// The physical-custody state machine: instance registration, shipments, claim-gated verification, redemption.
#[allow(async_fn_in_trait)]
pub trait CustodyManagement: Clone {
    /// Registers a new certified card instance. The (grading company, certificate number) pair is globally unique.
    async fn register_card_instance(&self, instance: NewCardInstance) -> Result<CardInstance, CustodyError>;

    /// Creates an inbound shipment for the instance and moves it to `InTransit`, in one transaction.
    ///
    /// Only the instance's current owner may ship, only from `PendingShipment`, and at most one inbound shipment
    /// may exist per trade.
    async fn create_inbound_shipment(&self, user_id: &str, shipment: NewShipment) -> Result<Shipment, CustodyError>;

    /// Advances a shipment's status. Shipments only move forward (`Created` -> `InTransit` -> `Delivered`); a
    /// replayed carrier event for the current status is a no-op. The first delivery of an inbound shipment moves an
    /// `InTransit` instance to `PendingVerification`; the instance is returned alongside the shipment.
    async fn update_shipment_status(
        &self,
        shipment_id: i64,
        status: ShipmentStatus,
    ) -> Result<(Shipment, CardInstance), CustodyError>;

    /// Takes the exclusive verification claim on an instance in `PendingVerification`.
    ///
    /// A claim older than `lease` counts as expired and may be taken over by another verifier.
    async fn claim_instance(&self, instance_id: i64, verifier_id: &str, lease: Duration)
        -> Result<CardInstance, CustodyError>;

    /// Releases a claim without resolving the verification.
    async fn unclaim_instance(&self, instance_id: i64, verifier_id: &str) -> Result<CardInstance, CustodyError>;

    /// Marks the instance `Verified` and clears the claim. If a captured sell-first trade is pending for this
    /// instance, ownership is transferred to the buyer in the same transaction and the trade is returned so the
    /// caller can release escrow (a gateway call, which must happen outside the transaction).
    async fn approve_verification(
        &self,
        instance_id: i64,
        verifier_id: &str,
    ) -> Result<(CardInstance, Option<Trade>), CustodyError>;

    /// Reverts the instance to `PendingShipment` (queued for return) and clears the claim. Any pending captured
    /// trade is returned so the caller can refund it.
    async fn reject_verification(
        &self,
        instance_id: i64,
        verifier_id: &str,
    ) -> Result<(CardInstance, Option<Trade>), CustodyError>;

    /// Transfers ownership. A `Listed` instance returns to `Verified`; other statuses are untouched. Used by
    /// vault-first settlement.
    async fn transfer_instance_owner(&self, instance_id: i64, new_owner: &str) -> Result<CardInstance, CustodyError>;

    /// Owner requests the physical card back. Only from `Verified`; blocked while the instance is bound to an open
    /// sell order or pledged as collateral. Moves the instance to `Redeemed` and creates the outbound shipment.
    async fn redeem_instance(
        &self,
        instance_id: i64,
        owner_id: &str,
        carrier: Option<&str>,
    ) -> Result<(CardInstance, Shipment), CustodyError>;
}

/// The highest level of behaviour for backends supporting the Slab Exchange engine: order admission, the matching
/// fill transaction, escrow transitions, deadline jobs, and surveillance bookkeeping.
#[allow(async_fn_in_trait)]
pub trait ExchangeDatabase: Clone + AccountManagement + CustodyManagement {
    /// The URL of the database.
    fn url(&self) -> &str;

    /// Persists a new order in a single atomic transaction. Idempotent on the order's idempotency key: if an order
    /// with the same key exists, it is returned with `false` in the second position.
    ///
    /// For sell orders the transaction also binds the card instance: ownership is checked, double-listing rejected,
    /// and an instance in `Verified` moves to `Listed`.
    async fn insert_order(&self, order: NewOrder) -> Result<(Order, bool), ExchangeError>;

    /// Cancels an order. Owner-only, and only from `Open` / `PartiallyFilled`. A bound card instance is released:
    /// back to `Verified` if it was ever verified, otherwise it stays `Listed` as a bare registration.
    async fn cancel_order(&self, user_id: &str, order_id: i64) -> Result<Order, ExchangeError>;

    /// The best price-compatible opposite-side order for the incoming order: excludes the same user, honours the
    /// buy side's grading filters, and orders candidates by best price then earliest creation (price-time priority).
    async fn best_opposite_order(&self, incoming: &Order) -> Result<Option<Order>, ExchangeError>;

    /// Executes one fill atomically: re-reads both orders, creates the trade at the *resting* order's price,
    /// increments both fill quantities, recomputes both statuses, and records the settlement path decided from the
    /// bound instance's status at this instant.
    async fn execute_fill(&self, incoming_id: i64, resting_id: i64, quantity: i64, fee_rate_bps: i64)
        -> Result<FillResult, ExchangeError>;

    /// Cancels the unfillable tail of a market order, returning the updated order.
    async fn cancel_market_remainder(&self, order_id: i64) -> Result<Order, ExchangeError>;

    //---------------------------------------   Escrow ledger   ------------------------------------------------------

    /// `Pending`/`PaymentFailed` → `Captured`, recording the gateway payment reference.
    async fn mark_escrow_captured(&self, trade_id: i64, payment_ref: &str) -> Result<Trade, ExchangeError>;

    /// → `PaymentFailed`, stamping the first failure time and counting the attempt.
    async fn mark_payment_failed(&self, trade_id: i64) -> Result<Trade, ExchangeError>;

    /// `Captured` → `Released`, recording the payout reference.
    async fn mark_escrow_released(&self, trade_id: i64, payout_ref: &str) -> Result<Trade, ExchangeError>;

    /// `Captured` → `Refunded`, recording the refund reference.
    async fn mark_escrow_refunded(&self, trade_id: i64, refund_ref: &str) -> Result<Trade, ExchangeError>;

    /// Retry cutoff exceeded: `PaymentFailed` → `Cancelled`, the sell order reopened (fill quantity decremented,
    /// status restored) and the instance reverted to `Listed`, in one transaction.
    async fn cancel_failed_trade(&self, trade_id: i64) -> Result<Trade, ExchangeError>;

    /// Ship-by deadline enforcement: `Captured` → `Refunded` with the refund reference, the sell order reopened,
    /// the instance reverted to `Listed` and the seller's reputation docked, in one transaction.
    async fn revert_stalled_trade(
        &self,
        trade_id: i64,
        refund_ref: &str,
        reputation_penalty: i64,
    ) -> Result<Trade, ExchangeError>;

    /// Starts the sell-first leg after capture: instance → `PendingShipment` and the ship-by deadline persisted.
    async fn begin_sell_first_settlement(&self, trade_id: i64, ship_by: DateTime<Utc>) -> Result<Trade, ExchangeError>;

    /// The captured, awaiting-shipment trade for this instance, if any.
    async fn pending_captured_trade_for_instance(&self, instance_id: i64) -> Result<Option<Trade>, ExchangeError>;

    async fn has_inbound_shipment(&self, trade_id: i64) -> Result<bool, ExchangeError>;

    //---------------------------------------   Deadline jobs   ------------------------------------------------------

    /// Schedules a job. Idempotent on `job_key`: an existing job with the same key is returned untouched, so
    /// re-scheduling never produces duplicate deadline enforcement.
    async fn schedule_job(
        &self,
        job_key: &str,
        trade_id: i64,
        kind: JobKind,
        due_at: DateTime<Utc>,
    ) -> Result<ScheduledJob, ExchangeError>;

    /// Atomically claims up to `limit` due, unexecuted jobs by stamping `executed_at`. A job is returned to exactly
    /// one caller, ever.
    async fn claim_due_jobs(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ScheduledJob>, ExchangeError>;

    //---------------------------------------   Surveillance    ------------------------------------------------------

    /// Trades between the two users (either direction) since the given time; restricted to one card when given.
    async fn count_pair_trades(
        &self,
        card_id: Option<&str>,
        user_a: &str,
        user_b: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, ExchangeError>;

    /// The execution price of the last trade for this card before the given trade.
    async fn previous_trade_price(&self, card_id: &str, before_trade_id: i64) -> Result<Option<Cents>, ExchangeError>;

    async fn insert_alert(
        &self,
        trade_id: i64,
        card_id: &str,
        rule: AlertRule,
        severity: AlertSeverity,
        detail: &str,
    ) -> Result<TradeAlert, ExchangeError>;

    async fn adjust_reputation(&self, user_id: &str, delta: i64) -> Result<Account, ExchangeError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), ExchangeError> {
        Ok(())
    }
}

//--------------------------------------     ExchangeError    --------------------------------------------------------
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    #[error("Internal database error: {0}")]
    DatabaseError(String),
    #[error("Invalid order: {0}")]
    InvalidOrder(String),
    #[error("The card {0} does not exist in the catalog")]
    UnknownCard(String),
    #[error("The requested order {0} does not exist")]
    OrderNotFound(i64),
    #[error("Order {0} does not belong to the requesting user")]
    NotOrderOwner(i64),
    #[error("Order {order_id} cannot be cancelled from status {status}")]
    OrderNotCancellable { order_id: i64, status: String },
    #[error("The requested trade {0} does not exist")]
    TradeNotFound(i64),
    #[error("Illegal escrow transition for trade {trade_id}: {from} -> {to}")]
    EscrowTransitionForbidden { trade_id: i64, from: String, to: String },
    #[error("The requested account for user {0} does not exist")]
    AccountNotFound(String),
    #[error("{0}")]
    CustodyError(#[from] CustodyError),
}

impl From<sqlx::Error> for ExchangeError {
    fn from(e: sqlx::Error) -> Self {
        ExchangeError::DatabaseError(e.to_string())
    }
}

//--------------------------------------      CustodyError    --------------------------------------------------------
#[derive(Debug, Clone, Error)]
pub enum CustodyError {
    #[error("Internal database error: {0}")]
    DatabaseError(String),
    #[error("The requested card instance {0} does not exist")]
    InstanceNotFound(i64),
    #[error("Card instance {0} does not belong to the requesting user")]
    NotInstanceOwner(i64),
    #[error("A card instance with certificate {company} #{cert_number} already exists")]
    DuplicateCertificate { company: String, cert_number: String },
    #[error("Card instance {instance_id} is already bound to an open sell order")]
    AlreadyListed { instance_id: i64 },
    #[error("Card instance {instance_id} has status {status}, expected {expected}")]
    WrongStatus { instance_id: i64, status: CardStatus, expected: CardStatus },
    #[error("Card instance {instance_id} is claimed by {claimed_by}")]
    AlreadyClaimed { instance_id: i64, claimed_by: String },
    #[error("Card instance {0} is not claimed by the requesting verifier")]
    NotClaimant(i64),
    #[error("The requested shipment {0} does not exist")]
    ShipmentNotFound(i64),
    #[error("Shipment {shipment_id} cannot move from {from} to {to}")]
    ShipmentTransitionForbidden { shipment_id: i64, from: String, to: String },
    #[error("An inbound shipment already exists for trade {0}")]
    InboundShipmentExists(i64),
    #[error("Redemption blocked: {0}")]
    RedemptionBlocked(String),
}

impl From<sqlx::Error> for CustodyError {
    fn from(e: sqlx::Error) -> Self {
        CustodyError::DatabaseError(e.to_string())
    }
}
