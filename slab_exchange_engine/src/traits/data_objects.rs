use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sx_common::Cents;

use crate::db_types::{Order, OrderSide, OrderStatus, Trade};

//--------------------------------------     MatchOutcome     --------------------------------------------------------
/// The result of one matching run for a single incoming order.
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub trades: Vec<Trade>,
    /// Distinct orders whose fill state changed (incoming plus every resting order hit).
    pub orders_updated: usize,
    /// Quantity cancelled on an unfillable market-order tail. Zero for limit orders.
    pub cancelled_remainder: i64,
}

impl MatchOutcome {
    pub fn trades_created(&self) -> usize {
        self.trades.len()
    }
}

//--------------------------------------      FillResult      --------------------------------------------------------
/// The output of one atomic fill transaction.
#[derive(Debug, Clone)]
pub struct FillResult {
    pub trade: Trade,
    pub incoming: Order,
    pub resting: Order,
}

//--------------------------------------   OrderBookSnapshot  --------------------------------------------------------
/// One aggregated side level of the book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Cents,
    /// Total open (unfilled) quantity resting at this price.
    pub open_quantity: i64,
    pub order_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub card_id: String,
    /// Best price first (highest bid).
    pub bids: Vec<PriceLevel>,
    /// Best price first (lowest ask).
    pub asks: Vec<PriceLevel>,
    /// `best_ask - best_bid`, when both sides are populated.
    pub spread: Option<Cents>,
    pub last_trade_price: Option<Cents>,
}

//--------------------------------------   OrderQueryFilter   --------------------------------------------------------
/// Composable filter for order searches. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct OrderQueryFilter {
    pub card_id: Option<String>,
    pub user_id: Option<String>,
    pub side: Option<OrderSide>,
    pub status: Option<Vec<OrderStatus>>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl OrderQueryFilter {
    pub fn is_empty(&self) -> bool {
        self.card_id.is_none()
            && self.user_id.is_none()
            && self.side.is_none()
            && self.status.as_ref().map(|s| s.is_empty()).unwrap_or(true)
            && self.since.is_none()
            && self.until.is_none()
    }

    pub fn with_card_id(mut self, card_id: &str) -> Self {
        self.card_id = Some(card_id.to_string());
        self
    }

    pub fn with_user_id(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn with_side(mut self, side: OrderSide) -> Self {
        self.side = Some(side);
        self
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status.get_or_insert_with(Vec::new).push(status);
        self
    }

    pub fn since(mut self, t: DateTime<Utc>) -> Self {
        self.since = Some(t);
        self
    }

    pub fn until(mut self, t: DateTime<Utc>) -> Self {
        self.until = Some(t);
        self
    }
}
