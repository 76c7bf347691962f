use std::fmt::Debug;

use log::*;
use serde_json::json;

use crate::{
    config::EngineConfig,
    db_types::{Order, OrderType},
    events::{EventProducers, NotificationEvent, NotificationKind},
    traits::{ExchangeDatabase, ExchangeError, MatchOutcome},
};

/// The price-time priority matching loop.
///
/// The engine never holds the book in memory. Each iteration asks the backend for the single best price-compatible
/// opposite order and executes one fill against it in an atomic transaction, so the order of fills is exactly the
/// order the database reports candidates in: best price first, then earliest arrival.
pub struct MatchingEngine<B> {
    db: B,
    config: EngineConfig,
    producers: EventProducers,
}

impl<B> Debug for MatchingEngine<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MatchingEngine")
    }
}

impl<B> Clone for MatchingEngine<B>
where B: Clone
{
    fn clone(&self) -> Self {
        Self { db: self.db.clone(), config: self.config.clone(), producers: self.producers.clone() }
    }
}

impl<B> MatchingEngine<B>
where B: ExchangeDatabase
{
    pub fn new(db: B, config: EngineConfig, producers: EventProducers) -> Self {
        Self { db, config, producers }
    }

    /// Matches one incoming order against the resting book until it is filled or no compatible candidate remains.
    ///
    /// A limit order's unfilled remainder rests on the book. A market order's unfillable tail is cancelled
    /// immediately and the owner notified; market orders never rest.
    pub async fn match_order(&self, order: &Order) -> Result<MatchOutcome, ExchangeError> {
        let mut outcome = MatchOutcome::default();
        if !order.status.is_matchable() {
            debug!("🔄️ Order #{} is {}; nothing to match", order.id, order.status);
            return Ok(outcome);
        }
        let mut incoming = order.clone();
        while incoming.remaining() > 0 {
            let Some(candidate) = self.db.best_opposite_order(&incoming).await? else {
                break;
            };
            let quantity = incoming.remaining().min(candidate.remaining());
            let fill = self.db.execute_fill(incoming.id, candidate.id, quantity, self.config.fee_rate_bps).await?;
            debug!(
                "🔄️ Order #{} filled x{quantity} against #{} -> trade #{}",
                incoming.id, candidate.id, fill.trade.id
            );
            outcome.trades.push(fill.trade);
            incoming = fill.incoming;
        }
        if incoming.order_type == OrderType::Market && incoming.remaining() > 0 {
            let cancelled = self.db.cancel_market_remainder(incoming.id).await?;
            outcome.cancelled_remainder = cancelled.remaining();
            let event = NotificationEvent::new(
                &cancelled.user_id,
                NotificationKind::OrderPartiallyCancelled,
                "Market order partially cancelled",
                "Your market order could not be fully filled. The unfilled remainder has been cancelled.",
            )
            .with_data(json!({ "order_id": cancelled.id, "cancelled_quantity": outcome.cancelled_remainder }));
            self.producers.notify(event).await;
            incoming = cancelled;
        }
        // The incoming order plus one resting order per fill.
        outcome.orders_updated = outcome.trades.len() +
            usize::from(!outcome.trades.is_empty() || outcome.cancelled_remainder > 0);
        info!(
            "🔄️ Matching run for order #{} complete: {} trades, {} remaining",
            order.id,
            outcome.trades_created(),
            incoming.remaining()
        );
        Ok(outcome)
    }
}
