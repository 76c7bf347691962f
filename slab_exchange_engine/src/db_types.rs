//! Database row types and status enums for the Slab Exchange engine.
//!
//! Every status enum maps to a TEXT column and round-trips through its `Display` / `FromStr` implementations.

use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use sx_common::Cents;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid {0}: {1}")]
pub struct ConversionError(&'static str, String);

macro_rules! text_enum {
    ($name:ident, $label:literal, $($variant:ident => $text:literal),+ $(,)?) => {
        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $($name::$variant => write!(f, $text)),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ConversionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    s => Err(ConversionError($label, s.to_string())),
                }
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                value.parse().unwrap_or_else(|e| panic!("{e}"))
            }
        }
    };
}

//--------------------------------------      OrderSide       --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

text_enum!(OrderSide, "order side", Buy => "Buy", Sell => "Sell");

impl OrderSide {
    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

//--------------------------------------      OrderType       --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

text_enum!(OrderType, "order type", Limit => "Limit", Market => "Market");

//--------------------------------------     OrderStatus      --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum OrderStatus {
    /// The order is resting on the book with no fills against it yet.
    Open,
    /// The order has at least one fill, but quantity remains.
    PartiallyFilled,
    /// `filled_quantity == quantity`. Terminal.
    Filled,
    /// Cancelled by the owner, or an unfillable market-order remainder. Terminal; never gains further fills.
    Cancelled,
}

text_enum!(OrderStatus, "order status",
    Open => "Open",
    PartiallyFilled => "PartiallyFilled",
    Filled => "Filled",
    Cancelled => "Cancelled",
);

impl OrderStatus {
    /// Whether the matching engine may still fill against this order.
    pub fn is_matchable(&self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::PartiallyFilled)
    }

    /// The status an order with the given fill state must carry.
    pub fn for_fill_state(filled: i64, quantity: i64) -> OrderStatus {
        if filled >= quantity {
            OrderStatus::Filled
        } else if filled > 0 {
            OrderStatus::PartiallyFilled
        } else {
            OrderStatus::Open
        }
    }
}

//--------------------------------------     EscrowStatus     --------------------------------------------------------
/// The financial state machine for one trade's money movement.
///
/// `Pending → Captured → {Released | Refunded}`, with
/// `Pending/Captured → PaymentFailed → {Captured | Cancelled}` on the retry path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum EscrowStatus {
    Pending,
    Captured,
    Released,
    Refunded,
    PaymentFailed,
    Cancelled,
}

text_enum!(EscrowStatus, "escrow status",
    Pending => "Pending",
    Captured => "Captured",
    Released => "Released",
    Refunded => "Refunded",
    PaymentFailed => "PaymentFailed",
    Cancelled => "Cancelled",
);

//--------------------------------------   SettlementPath     --------------------------------------------------------
/// How a trade settles, decided once inside the fill transaction and threaded through the rest of the saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum SettlementPath {
    /// Vault-first: the card was already `Verified` and in custody at match time.
    AlreadyCustodied,
    /// Sell-first: the seller must still ship the physical card into custody.
    RequiresShipment,
}

text_enum!(SettlementPath, "settlement path",
    AlreadyCustodied => "AlreadyCustodied",
    RequiresShipment => "RequiresShipment",
);

//--------------------------------------      CardStatus      --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum CardStatus {
    /// Waiting for the owner to ship the card to the vault (or back out of it after a rejection).
    PendingShipment,
    /// Bound to an open sell order.
    Listed,
    /// An inbound shipment is on its way to the vault.
    InTransit,
    /// Delivered to the vault and queued for human verification.
    PendingVerification,
    /// Verified and in custody.
    Verified,
    /// Physically returned to its owner.
    Redeemed,
    /// Archived after an off-exchange disposal. Not assigned by any core flow.
    Sold,
}

text_enum!(CardStatus, "card status",
    PendingShipment => "PendingShipment",
    Listed => "Listed",
    InTransit => "InTransit",
    PendingVerification => "PendingVerification",
    Verified => "Verified",
    Redeemed => "Redeemed",
    Sold => "Sold",
);

//--------------------------------------  ShipmentDirection   --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum ShipmentDirection {
    /// Seller (or depositor) to the vault.
    Inbound,
    /// Vault to a buyer or redeemer.
    Outbound,
}

text_enum!(ShipmentDirection, "shipment direction", Inbound => "Inbound", Outbound => "Outbound");

//--------------------------------------   ShipmentStatus     --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum ShipmentStatus {
    Created,
    InTransit,
    Delivered,
}

text_enum!(ShipmentStatus, "shipment status",
    Created => "Created",
    InTransit => "InTransit",
    Delivered => "Delivered",
);

//--------------------------------------       JobKind        --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum JobKind {
    /// Pre-deadline reminder to the seller. Fires only if no inbound shipment exists yet.
    ShipWarning,
    /// Hard ship-by deadline. Force-cancels a stalled sell-first trade.
    ShipDeadline,
    /// Bounded payment-capture retry.
    PaymentRetry,
}

text_enum!(JobKind, "job kind",
    ShipWarning => "ShipWarning",
    ShipDeadline => "ShipDeadline",
    PaymentRetry => "PaymentRetry",
);

//--------------------------------------      AlertRule       --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum AlertRule {
    /// The same counterparties trading the same card back and forth.
    CircularTrading,
    /// Execution price far from the card's last-known reference price.
    PriceDeviation,
    /// Many trades between the same counterparty pair in a short window.
    HighFrequency,
}

text_enum!(AlertRule, "alert rule",
    CircularTrading => "CircularTrading",
    PriceDeviation => "PriceDeviation",
    HighFrequency => "HighFrequency",
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Type, Serialize, Deserialize)]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
}

text_enum!(AlertSeverity, "alert severity", Low => "Low", Medium => "Medium", High => "High");

//--------------------------------------        Order         --------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub user_id: String,
    /// Catalog key of the card being traded. Orders aggregate into one book per `card_id`.
    pub card_id: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    /// Limit price in cents. `None` for an unmatched market order.
    pub price: Option<Cents>,
    pub quantity: i64,
    pub filled_quantity: i64,
    pub status: OrderStatus,
    /// Buy-side filter: only match sell orders whose bound instance was graded by this company.
    pub grading_company: Option<String>,
    /// Buy-side filter: only match instances graded at least this.
    pub min_grade: Option<f64>,
    /// Sell-side binding to the physical instance being sold.
    pub card_instance_id: Option<i64>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn remaining(&self) -> i64 {
        self.quantity - self.filled_quantity
    }
}

//--------------------------------------       NewOrder       --------------------------------------------------------
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: String,
    pub card_id: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Option<Cents>,
    pub quantity: i64,
    pub grading_company: Option<String>,
    pub min_grade: Option<f64>,
    pub card_instance_id: Option<i64>,
    pub idempotency_key: Option<String>,
}

impl NewOrder {
    pub fn limit(user_id: &str, card_id: &str, side: OrderSide, price: Cents, quantity: i64) -> Self {
        Self {
            user_id: user_id.to_string(),
            card_id: card_id.to_string(),
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            quantity,
            grading_company: None,
            min_grade: None,
            card_instance_id: None,
            idempotency_key: None,
        }
    }

    pub fn market(user_id: &str, card_id: &str, side: OrderSide, quantity: i64) -> Self {
        Self {
            user_id: user_id.to_string(),
            card_id: card_id.to_string(),
            side,
            order_type: OrderType::Market,
            price: None,
            quantity,
            grading_company: None,
            min_grade: None,
            card_instance_id: None,
            idempotency_key: None,
        }
    }

    pub fn with_grading_filter(mut self, company: Option<&str>, min_grade: Option<f64>) -> Self {
        self.grading_company = company.map(String::from);
        self.min_grade = min_grade;
        self
    }

    pub fn with_instance(mut self, instance_id: i64) -> Self {
        self.card_instance_id = Some(instance_id);
        self
    }

    pub fn with_idempotency_key(mut self, key: &str) -> Self {
        self.idempotency_key = Some(key.to_string());
        self
    }
}

//--------------------------------------        Trade         --------------------------------------------------------
/// An immutable execution record. Only the escrow fields and gateway references ever change after insertion.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub buy_order_id: i64,
    pub sell_order_id: i64,
    pub card_id: String,
    pub card_instance_id: i64,
    pub buyer_id: String,
    pub seller_id: String,
    /// Always the resting (maker) order's price.
    pub price: Cents,
    pub quantity: i64,
    pub fee_amount: Cents,
    pub fee_rate_bps: i64,
    pub escrow_status: EscrowStatus,
    pub settlement_path: SettlementPath,
    pub payment_ref: Option<String>,
    pub payout_ref: Option<String>,
    pub refund_ref: Option<String>,
    pub payment_failed_at: Option<DateTime<Utc>>,
    pub payment_attempts: i64,
    pub ship_by: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trade {
    /// The amount captured from the buyer.
    pub fn gross(&self) -> Cents {
        self.price * self.quantity
    }

    /// The amount paid out to the seller on release.
    pub fn net_to_seller(&self) -> Cents {
        self.gross() - self.fee_amount
    }
}

//--------------------------------------     CardInstance     --------------------------------------------------------
/// One physical, certified card under (or headed for) custody. Owned by whichever user currently holds the IOU.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CardInstance {
    pub id: i64,
    pub card_id: String,
    pub owner_id: String,
    pub status: CardStatus,
    pub grading_company: String,
    /// Certificate number issued by the grading company. Globally unique together with `grading_company`.
    pub cert_number: String,
    pub grade: f64,
    pub verified_at: Option<DateTime<Utc>>,
    /// Exclusive verification claim. Acts as a lease; a claim older than the configured lease may be taken over.
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    /// Pledged as loan collateral; blocks redemption.
    pub collateralized: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCardInstance {
    pub card_id: String,
    pub owner_id: String,
    pub status: CardStatus,
    pub grading_company: String,
    pub cert_number: String,
    pub grade: f64,
}

//--------------------------------------       Shipment       --------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Shipment {
    pub id: i64,
    pub card_instance_id: i64,
    pub trade_id: Option<i64>,
    pub direction: ShipmentDirection,
    pub status: ShipmentStatus,
    pub carrier: Option<String>,
    pub tracking_number: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewShipment {
    pub card_instance_id: i64,
    pub trade_id: Option<i64>,
    pub direction: ShipmentDirection,
    pub carrier: Option<String>,
    pub tracking_number: Option<String>,
}

//--------------------------------------     ScheduledJob     --------------------------------------------------------
/// A durable, time-delayed check. `job_key` is unique per trade and kind, so re-scheduling is idempotent; claiming
/// the job (stamping `executed_at` where it was null) is the exactly-once execution guard.
#[derive(Debug, Clone, FromRow)]
pub struct ScheduledJob {
    pub id: i64,
    pub job_key: String,
    pub trade_id: i64,
    pub kind: JobKind,
    pub due_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------       Account        --------------------------------------------------------
#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub id: i64,
    pub user_id: String,
    /// Customer handle at the payment gateway.
    pub customer_ref: Option<String>,
    /// Chargeable payment method at the gateway. Absence makes every capture attempt fail.
    pub payment_method_ref: Option<String>,
    /// Destination for seller payouts.
    pub payout_account_ref: Option<String>,
    pub reputation: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------      TradeAlert      --------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TradeAlert {
    pub id: i64,
    pub trade_id: i64,
    pub card_id: String,
    pub rule: AlertRule,
    pub severity: AlertSeverity,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}
