//! Post-trade surveillance heuristics.
//!
//! Every executed trade is checked for wash-trading patterns and price anomalies. Surveillance is advisory: it
//! records alerts for a compliance reviewer and never blocks or unwinds the trade it flags.
use std::fmt::Debug;

use chrono::{Duration, Utc};
use log::*;

use crate::{
    db_types::{AlertRule, AlertSeverity, Trade, TradeAlert},
    traits::{ExchangeDatabase, ExchangeError},
};

const CIRCULAR_WINDOW_DAYS: i64 = 7;
const CIRCULAR_PAIR_TRADES: i64 = 2;
const HIGH_FREQUENCY_WINDOW_HOURS: i64 = 24;
const HIGH_FREQUENCY_PAIR_TRADES: i64 = 5;
const DEVIATION_MEDIUM: f64 = 0.5;
const DEVIATION_HIGH: f64 = 1.0;

pub struct SurveillanceApi<B> {
    db: B,
}

impl<B> Debug for SurveillanceApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SurveillanceApi")
    }
}

impl<B> Clone for SurveillanceApi<B>
where B: Clone
{
    fn clone(&self) -> Self {
        Self { db: self.db.clone() }
    }
}

impl<B> SurveillanceApi<B>
where B: ExchangeDatabase
{
    pub fn new(db: B) -> Self {
        Self { db }
    }

    /// Runs every heuristic against one executed trade and records the alerts it raises.
    pub async fn check_trade(&self, trade: &Trade) -> Result<Vec<TradeAlert>, ExchangeError> {
        let mut alerts = Vec::new();
        if let Some(alert) = self.check_circular_trading(trade).await? {
            alerts.push(alert);
        }
        if let Some(alert) = self.check_price_deviation(trade).await? {
            alerts.push(alert);
        }
        if let Some(alert) = self.check_high_frequency(trade).await? {
            alerts.push(alert);
        }
        if !alerts.is_empty() {
            warn!("🚨️ Trade #{} raised {} surveillance alerts", trade.id, alerts.len());
        }
        Ok(alerts)
    }

    /// The same two users trading the same card back and forth inside the window. The count includes the trade under
    /// review, so the threshold fires on the first repeat.
    async fn check_circular_trading(&self, trade: &Trade) -> Result<Option<TradeAlert>, ExchangeError> {
        let since = Utc::now() - Duration::days(CIRCULAR_WINDOW_DAYS);
        let count =
            self.db.count_pair_trades(Some(&trade.card_id), &trade.buyer_id, &trade.seller_id, since).await?;
        if count < CIRCULAR_PAIR_TRADES {
            return Ok(None);
        }
        let detail = format!(
            "{} and {} traded card {} {count} times in the last {CIRCULAR_WINDOW_DAYS} days",
            trade.buyer_id, trade.seller_id, trade.card_id
        );
        let alert = self
            .db
            .insert_alert(trade.id, &trade.card_id, AlertRule::CircularTrading, AlertSeverity::High, &detail)
            .await?;
        Ok(Some(alert))
    }

    /// Execution price far from the card's previous trade. A card with no trading history cannot deviate.
    async fn check_price_deviation(&self, trade: &Trade) -> Result<Option<TradeAlert>, ExchangeError> {
        let Some(reference) = self.db.previous_trade_price(&trade.card_id, trade.id).await? else {
            return Ok(None);
        };
        if reference.value() <= 0 {
            return Ok(None);
        }
        let deviation = (trade.price.value() - reference.value()).abs() as f64 / reference.value() as f64;
        let severity = if deviation > DEVIATION_HIGH {
            AlertSeverity::High
        } else if deviation > DEVIATION_MEDIUM {
            AlertSeverity::Medium
        } else {
            return Ok(None);
        };
        let detail = format!(
            "Trade price {} deviates {:.0}% from the previous trade price {reference} for card {}",
            trade.price,
            deviation * 100.0,
            trade.card_id
        );
        let alert =
            self.db.insert_alert(trade.id, &trade.card_id, AlertRule::PriceDeviation, severity, &detail).await?;
        Ok(Some(alert))
    }

    /// An unusually busy pair across all cards inside the window.
    async fn check_high_frequency(&self, trade: &Trade) -> Result<Option<TradeAlert>, ExchangeError> {
        let since = Utc::now() - Duration::hours(HIGH_FREQUENCY_WINDOW_HOURS);
        let count = self.db.count_pair_trades(None, &trade.buyer_id, &trade.seller_id, since).await?;
        if count <= HIGH_FREQUENCY_PAIR_TRADES {
            return Ok(None);
        }
        let detail = format!(
            "{} and {} traded {count} times in the last {HIGH_FREQUENCY_WINDOW_HOURS} hours",
            trade.buyer_id, trade.seller_id
        );
        let alert = self
            .db
            .insert_alert(trade.id, &trade.card_id, AlertRule::HighFrequency, AlertSeverity::Medium, &detail)
            .await?;
        Ok(Some(alert))
    }
}
