//! Order intake and query surface.
//!
//! `OrderFlowApi` is the front door for orders: it validates an order against the card catalog and the order-shape
//! rules, persists it, and hands accepted orders to the matching worker. Matching itself is asynchronous; placement
//! returns as soon as the order is durably on the book.
use std::fmt::Debug;

use log::*;
use serde_json::json;

use crate::{
    db_types::{NewOrder, Order, OrderSide, OrderType},
    events::{BroadcastEvent, EventProducers},
    matching::MatchSender,
    traits::{CatalogLookup, ExchangeDatabase, ExchangeError, OrderBookSnapshot, OrderQueryFilter},
};

const MIN_GRADE: f64 = 1.0;
const MAX_GRADE: f64 = 10.0;

pub struct OrderFlowApi<B, C> {
    db: B,
    catalog: C,
    matcher: MatchSender,
    producers: EventProducers,
}

impl<B, C> Debug for OrderFlowApi<B, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderFlowApi")
    }
}

impl<B, C> Clone for OrderFlowApi<B, C>
where
    B: Clone,
    C: Clone,
{
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            catalog: self.catalog.clone(),
            matcher: self.matcher.clone(),
            producers: self.producers.clone(),
        }
    }
}

impl<B, C> OrderFlowApi<B, C>
where
    B: ExchangeDatabase,
    C: CatalogLookup,
{
    pub fn new(db: B, catalog: C, matcher: MatchSender, producers: EventProducers) -> Self {
        Self { db, catalog, matcher, producers }
    }

    /// Validates and places an order. Idempotent on the order's idempotency key: replaying a placement returns the
    /// original order with `false` and does not queue a second matching run.
    pub async fn place_order(&self, order: NewOrder) -> Result<(Order, bool), ExchangeError> {
        self.validate(&order).await?;
        let (order, inserted) = self.db.insert_order(order).await?;
        if inserted {
            self.matcher.submit(order.clone()).await;
            self.broadcast_book_change(&order.card_id).await;
        }
        Ok((order, inserted))
    }

    pub async fn cancel_order(&self, user_id: &str, order_id: i64) -> Result<Order, ExchangeError> {
        let order = self.db.cancel_order(user_id, order_id).await?;
        self.broadcast_book_change(&order.card_id).await;
        Ok(order)
    }

    pub async fn order_book(&self, card_id: &str) -> Result<OrderBookSnapshot, ExchangeError> {
        self.db.order_book(card_id).await
    }

    pub async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, ExchangeError> {
        self.db.search_orders(query).await
    }

    async fn validate(&self, order: &NewOrder) -> Result<(), ExchangeError> {
        if !self.catalog.card_exists(&order.card_id).await.map_err(|e| ExchangeError::DatabaseError(e.to_string()))? {
            return Err(ExchangeError::UnknownCard(order.card_id.clone()));
        }
        if order.quantity <= 0 {
            return Err(ExchangeError::InvalidOrder(format!("Quantity must be positive, got {}", order.quantity)));
        }
        match order.order_type {
            OrderType::Limit => match order.price {
                Some(p) if p.is_positive() => {},
                Some(p) => return Err(ExchangeError::InvalidOrder(format!("Limit price must be positive, got {p}"))),
                None => return Err(ExchangeError::InvalidOrder("A limit order requires a price".to_string())),
            },
            OrderType::Market => {
                if order.price.is_some() {
                    return Err(ExchangeError::InvalidOrder("A market order must not carry a price".to_string()));
                }
            },
        }
        match order.side {
            OrderSide::Buy => {
                if order.card_instance_id.is_some() {
                    return Err(ExchangeError::InvalidOrder(
                        "A buy order cannot be bound to a card instance".to_string(),
                    ));
                }
                if let Some(grade) = order.min_grade {
                    if !(MIN_GRADE..=MAX_GRADE).contains(&grade) {
                        return Err(ExchangeError::InvalidOrder(format!(
                            "Minimum grade must be between {MIN_GRADE} and {MAX_GRADE}, got {grade}"
                        )));
                    }
                }
            },
            OrderSide::Sell => {
                // The ownership and double-listing checks need the instance row and happen inside the insert
                // transaction. Shape errors are caught here.
                if order.card_instance_id.is_none() {
                    return Err(ExchangeError::InvalidOrder(
                        "A sell order must be bound to a card instance".to_string(),
                    ));
                }
                if order.grading_company.is_some() || order.min_grade.is_some() {
                    return Err(ExchangeError::InvalidOrder(
                        "Grading filters only apply to buy orders".to_string(),
                    ));
                }
            },
        }
        Ok(())
    }

    async fn broadcast_book_change(&self, card_id: &str) {
        match self.db.order_book(card_id).await {
            Ok(snapshot) => {
                let payload = match serde_json::to_value(&snapshot) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("📬️ Could not serialise the book snapshot for {card_id}: {e}");
                        json!({ "card_id": card_id })
                    },
                };
                self.producers.broadcast(BroadcastEvent::new(&format!("book.{card_id}"), payload)).await;
            },
            Err(e) => warn!("📬️ Could not load the book for {card_id} to broadcast: {e}"),
        }
    }
}
