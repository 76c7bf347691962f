use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db_types::Trade;

//--------------------------------------   NotificationEvent  --------------------------------------------------------
/// A user-facing notification. Delivery transport (email, push, socket fan-out) lives outside the engine; the engine
/// only emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub data: Value,
}

impl NotificationEvent {
    pub fn new(user_id: &str, kind: NotificationKind, title: &str, body: &str) -> Self {
        Self { user_id: user_id.to_string(), kind, title: title.to_string(), body: body.to_string(), data: Value::Null }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    OrderPartiallyCancelled,
    PaymentFailed,
    TradeCancelled,
    ShipmentReminder,
    ShipDeadlineMissed,
    TradeRefunded,
    TradeReleased,
    VerificationPassed,
    VerificationFailed,
    DepositVerified,
}

//--------------------------------------    BroadcastEvent    --------------------------------------------------------
/// A best-effort real-time broadcast (order book updates and the like). Failures are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastEvent {
    pub channel: String,
    pub payload: Value,
}

impl BroadcastEvent {
    pub fn new(channel: &str, payload: Value) -> Self {
        Self { channel: channel.to_string(), payload }
    }
}

//--------------------------------------   TradeSettledEvent  --------------------------------------------------------
/// Emitted when a trade's escrow reaches a terminal state (`Released`, `Refunded` or `Cancelled`).
#[derive(Debug, Clone)]
pub struct TradeSettledEvent {
    pub trade: Trade,
}
