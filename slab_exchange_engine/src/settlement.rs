//! Escrow settlement orchestration.
//!
//! `SettlementApi` drives a trade from execution to a terminal escrow state. Database transitions are atomic and
//! guarded; gateway calls happen strictly outside database transactions and carry trade-scoped idempotency keys, so
//! a crash between a gateway call and the matching database write is repaired by retrying the whole step.
use std::fmt::Debug;

use chrono::Utc;
use log::*;
use serde_json::json;
use thiserror::Error;

use crate::{
    config::EngineConfig,
    db_types::{EscrowStatus, JobKind, SettlementPath, Trade},
    events::{EventProducers, NotificationEvent, NotificationKind, TradeSettledEvent},
    helpers::{add_business_days, charge_key, job_key, payout_key, refund_key, retry_job_key},
    traits::{ExchangeDatabase, ExchangeError, GatewayError, PaymentGateway},
};

pub struct SettlementApi<B, G> {
    db: B,
    gateway: G,
    config: EngineConfig,
    producers: EventProducers,
}

impl<B, G> Debug for SettlementApi<B, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SettlementApi")
    }
}

impl<B, G> Clone for SettlementApi<B, G>
where
    B: Clone,
    G: Clone,
{
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            gateway: self.gateway.clone(),
            config: self.config.clone(),
            producers: self.producers.clone(),
        }
    }
}

impl<B, G> SettlementApi<B, G>
where
    B: ExchangeDatabase,
    G: PaymentGateway,
{
    pub fn new(db: B, gateway: G, config: EngineConfig, producers: EventProducers) -> Self {
        Self { db, gateway, config, producers }
    }

    /// Runs the capture step for a freshly executed trade and, on success, starts the leg matching its settlement
    /// path. A capture failure moves the trade to `PaymentFailed` and schedules a retry; it is not an error from
    /// this method's point of view.
    ///
    /// Replaying this method is safe at any point. A trade that is already `Captured` skips the charge and resumes
    /// the post-capture leg; a trade in a terminal state is returned untouched.
    pub async fn process_trade_payment(&self, trade: &Trade) -> Result<Trade, SettlementError> {
        // Re-read the trade so a replay resumes from the recorded state instead of the caller's snapshot.
        let Some(trade) = self.db.fetch_trade(trade.id).await? else {
            return Err(ExchangeError::TradeNotFound(trade.id).into());
        };
        match trade.escrow_status {
            EscrowStatus::Pending | EscrowStatus::PaymentFailed => {},
            // Captured, but a crash may have cut the previous run short before the post-capture leg. The leg is
            // idempotent (unique job keys, guarded transitions), so resume it rather than charging again.
            EscrowStatus::Captured => return self.after_capture(trade).await,
            status => {
                debug!("💰️ Trade #{} is already {status}; capture skipped", trade.id);
                return Ok(trade);
            },
        }
        let account = self.db.fetch_or_create_account(&trade.buyer_id).await?;
        let (customer_ref, method_ref) = match (account.customer_ref, account.payment_method_ref) {
            (Some(c), Some(m)) => (c, m),
            _ => {
                warn!("💰️ Buyer {} has no payment method on file for trade #{}", trade.buyer_id, trade.id);
                return self.handle_capture_failure(&trade, GatewayError::NoPaymentMethod).await;
            },
        };
        let key = charge_key(trade.id);
        match self.gateway.charge(&customer_ref, &method_ref, trade.gross(), &key).await {
            Ok(payment_ref) => {
                let trade = self.db.mark_escrow_captured(trade.id, &payment_ref).await?;
                self.after_capture(trade).await
            },
            Err(e) => self.handle_capture_failure(&trade, e).await,
        }
    }

    /// Runs one scheduled capture retry. A trade that has since been captured or cancelled is left alone; past the
    /// retry cutoff the trade is cancelled instead of charged.
    pub async fn retry_payment(&self, trade_id: i64) -> Result<Option<Trade>, SettlementError> {
        let Some(trade) = self.db.fetch_trade(trade_id).await? else {
            return Err(ExchangeError::TradeNotFound(trade_id).into());
        };
        if trade.escrow_status != EscrowStatus::PaymentFailed {
            debug!("💰️ Trade #{trade_id} is {}; payment retry skipped", trade.escrow_status);
            return Ok(None);
        }
        let first_failure = trade.payment_failed_at.unwrap_or_else(Utc::now);
        if Utc::now() - first_failure >= self.config.payment_retry_cutoff {
            let trade = self.cancel_after_retries(&trade).await?;
            return Ok(Some(trade));
        }
        let trade = self.process_trade_payment(&trade).await?;
        Ok(Some(trade))
    }

    async fn handle_capture_failure(&self, trade: &Trade, reason: GatewayError) -> Result<Trade, SettlementError> {
        let trade = self.db.mark_payment_failed(trade.id).await?;
        warn!("💰️ Payment capture for trade #{} failed (attempt {}): {reason}", trade.id, trade.payment_attempts);
        let event = NotificationEvent::new(
            &trade.buyer_id,
            NotificationKind::PaymentFailed,
            "Payment failed",
            "We could not charge your payment method for a trade. We will retry shortly.",
        )
        .with_data(json!({ "trade_id": trade.id, "attempt": trade.payment_attempts }));
        self.producers.notify(event).await;
        let first_failure = trade.payment_failed_at.unwrap_or_else(Utc::now);
        if Utc::now() - first_failure >= self.config.payment_retry_cutoff {
            return self.cancel_after_retries(&trade).await;
        }
        // Exponential backoff from the number of attempts so far. The exponent is clamped; past a few doublings the
        // cutoff fires first anyway.
        let exponent = (trade.payment_attempts - 1).clamp(0, 16) as u32;
        let delay = self.config.payment_retry_initial * 2_i32.pow(exponent);
        let due_at = Utc::now() + delay;
        let key = retry_job_key(trade.id, trade.payment_attempts);
        self.db.schedule_job(&key, trade.id, JobKind::PaymentRetry, due_at).await?;
        Ok(trade)
    }

    /// Retry cutoff exceeded: the trade is cancelled and the listing restored.
    async fn cancel_after_retries(&self, trade: &Trade) -> Result<Trade, SettlementError> {
        let trade = self.db.cancel_failed_trade(trade.id).await?;
        for user in [&trade.buyer_id, &trade.seller_id] {
            let event = NotificationEvent::new(
                user,
                NotificationKind::TradeCancelled,
                "Trade cancelled",
                "A trade was cancelled because the buyer's payment could not be captured.",
            )
            .with_data(json!({ "trade_id": trade.id }));
            self.producers.notify(event).await;
        }
        self.producers.trade_settled(TradeSettledEvent { trade: trade.clone() }).await;
        Ok(trade)
    }

    async fn after_capture(&self, trade: Trade) -> Result<Trade, SettlementError> {
        match trade.settlement_path {
            // The card is already in the vault. Ownership flips immediately and the seller is paid out.
            SettlementPath::AlreadyCustodied => {
                self.db
                    .transfer_instance_owner(trade.card_instance_id, &trade.buyer_id)
                    .await
                    .map_err(ExchangeError::from)?;
                self.release_escrow(&trade).await
            },
            // The seller still holds the card. Funds stay captured until vault verification; the deadline jobs make
            // sure a seller who never ships cannot hold the buyer's money forever.
            SettlementPath::RequiresShipment => {
                let now = Utc::now();
                let warn_at = add_business_days(now, self.config.ship_warning_business_days);
                let ship_by = add_business_days(now, self.config.ship_deadline_business_days);
                let trade = self.db.begin_sell_first_settlement(trade.id, ship_by).await?;
                self.db.schedule_job(&job_key(trade.id, JobKind::ShipWarning), trade.id, JobKind::ShipWarning, warn_at).await?;
                self.db
                    .schedule_job(&job_key(trade.id, JobKind::ShipDeadline), trade.id, JobKind::ShipDeadline, ship_by)
                    .await?;
                let event = NotificationEvent::new(
                    &trade.seller_id,
                    NotificationKind::ShipmentReminder,
                    "Your card sold. Ship it to the vault",
                    "Send the card to the vault for verification before the shipping deadline.",
                )
                .with_data(json!({ "trade_id": trade.id, "ship_by": trade.ship_by }));
                self.producers.notify(event).await;
                Ok(trade)
            },
        }
    }

    /// Pays the seller and closes escrow. Called once custody of the card is assured, either at capture time for a
    /// vaulted card or after verification for a shipped one.
    pub async fn release_escrow(&self, trade: &Trade) -> Result<Trade, SettlementError> {
        let account = self.db.fetch_or_create_account(&trade.seller_id).await?;
        let destination = account.payout_account_ref.ok_or(GatewayError::NoPayoutDestination)?;
        let payout_ref = self.gateway.payout(&destination, trade.net_to_seller(), &payout_key(trade.id)).await?;
        let trade = self.db.mark_escrow_released(trade.id, &payout_ref).await?;
        for (user, body) in [
            (&trade.buyer_id, "Your purchase is complete. The card is yours."),
            (&trade.seller_id, "Your sale is complete. The payout is on its way."),
        ] {
            let event = NotificationEvent::new(user, NotificationKind::TradeReleased, "Trade settled", body)
                .with_data(json!({ "trade_id": trade.id }));
            self.producers.notify(event).await;
        }
        self.producers.trade_settled(TradeSettledEvent { trade: trade.clone() }).await;
        Ok(trade)
    }

    /// Refunds the buyer in full after the shipped card failed vault verification. The sell order is not reopened;
    /// the seller gets the (misdescribed) card back instead.
    pub async fn refund_for_rejection(&self, trade: &Trade) -> Result<Trade, SettlementError> {
        let payment_ref = trade.payment_ref.clone().ok_or(SettlementError::NothingToRefund(trade.id))?;
        let refund_ref = self.gateway.refund(&payment_ref, None, &refund_key(trade.id)).await?;
        let trade = self.db.mark_escrow_refunded(trade.id, &refund_ref).await?;
        let event = NotificationEvent::new(
            &trade.buyer_id,
            NotificationKind::TradeRefunded,
            "Trade refunded",
            "The card you bought failed vault verification. Your payment has been refunded in full.",
        )
        .with_data(json!({ "trade_id": trade.id }));
        self.producers.notify(event).await;
        self.producers.trade_settled(TradeSettledEvent { trade: trade.clone() }).await;
        Ok(trade)
    }

    /// The shipping warning: a nudge, not an enforcement. Skipped once the seller has created the inbound shipment
    /// or the trade has left `Captured`.
    pub async fn send_ship_warning(&self, trade_id: i64) -> Result<(), SettlementError> {
        let Some(trade) = self.db.fetch_trade(trade_id).await? else {
            return Err(ExchangeError::TradeNotFound(trade_id).into());
        };
        if trade.escrow_status != EscrowStatus::Captured || self.db.has_inbound_shipment(trade_id).await? {
            debug!("⏰️ Ship warning for trade #{trade_id} skipped");
            return Ok(());
        }
        let event = NotificationEvent::new(
            &trade.seller_id,
            NotificationKind::ShipmentReminder,
            "Reminder: ship your sold card",
            "The shipping deadline for your sold card is approaching. Unshipped trades are cancelled and refunded.",
        )
        .with_data(json!({ "trade_id": trade.id, "ship_by": trade.ship_by }));
        self.producers.notify(event).await;
        Ok(())
    }

    /// The ship-by deadline: a seller who never created the inbound shipment forfeits the trade. The buyer is
    /// refunded, the listing restored and the seller's reputation docked.
    pub async fn enforce_ship_deadline(&self, trade_id: i64) -> Result<Option<Trade>, SettlementError> {
        let Some(trade) = self.db.fetch_trade(trade_id).await? else {
            return Err(ExchangeError::TradeNotFound(trade_id).into());
        };
        if trade.escrow_status != EscrowStatus::Captured || self.db.has_inbound_shipment(trade_id).await? {
            debug!("⏰️ Ship deadline for trade #{trade_id} satisfied; no action");
            return Ok(None);
        }
        let payment_ref = trade.payment_ref.clone().ok_or(SettlementError::NothingToRefund(trade_id))?;
        let refund_ref = self.gateway.refund(&payment_ref, None, &refund_key(trade_id)).await?;
        let trade = self.db.revert_stalled_trade(trade_id, &refund_ref, self.config.reputation_penalty).await?;
        let buyer_event = NotificationEvent::new(
            &trade.buyer_id,
            NotificationKind::TradeRefunded,
            "Trade refunded",
            "The seller did not ship the card in time. Your payment has been refunded in full.",
        )
        .with_data(json!({ "trade_id": trade.id }));
        self.producers.notify(buyer_event).await;
        let seller_event = NotificationEvent::new(
            &trade.seller_id,
            NotificationKind::ShipDeadlineMissed,
            "Trade cancelled: shipping deadline missed",
            "You did not ship the sold card in time. The trade was cancelled and your reputation reduced.",
        )
        .with_data(json!({ "trade_id": trade.id }));
        self.producers.notify(seller_event).await;
        self.producers.trade_settled(TradeSettledEvent { trade: trade.clone() }).await;
        Ok(Some(trade))
    }
}

#[derive(Debug, Clone, Error)]
pub enum SettlementError {
    #[error("{0}")]
    Database(#[from] ExchangeError),
    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("Trade {0} has no payment reference to refund")]
    NothingToRefund(i64),
}
