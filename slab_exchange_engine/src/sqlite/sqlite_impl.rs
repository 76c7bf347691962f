//! `SqliteDatabase` is a concrete implementation of a Slab Exchange engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the traits defined in the [`crate::traits`]
//! module. The low-level queries live in [`super::db`]; this module's job is to compose them into the atomic
//! multi-step operations the traits promise, holding a transaction open across each one. Every write, even a
//! single statement, runs inside an explicitly committed transaction: the change is durable before the method
//! returns and visible to the next pool connection.
use std::fmt::Debug;

use chrono::{DateTime, Duration, Utc};
use log::*;
use sqlx::SqlitePool;
use sx_common::Cents;

use super::db::{accounts, alerts, cards, db_url, jobs, new_pool, orders, shipments, trades};
use crate::{
    db_types::{
        Account,
        AlertRule,
        AlertSeverity,
        CardInstance,
        CardStatus,
        EscrowStatus,
        JobKind,
        NewCardInstance,
        NewOrder,
        NewShipment,
        Order,
        OrderSide,
        OrderStatus,
        ScheduledJob,
        SettlementPath,
        Shipment,
        ShipmentDirection,
        ShipmentStatus,
        Trade,
        TradeAlert,
    },
    traits::{
        AccountManagement,
        CustodyError,
        CustodyManagement,
        ExchangeDatabase,
        ExchangeError,
        FillResult,
        OrderBookSnapshot,
        OrderQueryFilter,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object using the database URL from the `SX_DATABASE_URL` environment variable.
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        Self::new_with_url(&url, max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl ExchangeDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn insert_order(&self, order: NewOrder) -> Result<(Order, bool), ExchangeError> {
        let mut tx = self.pool.begin().await?;
        // The instance binding happens in the same transaction as the insert so that a concurrent second listing of
        // the same instance cannot slip in between the check and the insert.
        if order.side == OrderSide::Sell {
            let instance_id = order.card_instance_id.ok_or_else(|| {
                ExchangeError::InvalidOrder("A sell order must be bound to a card instance".to_string())
            })?;
            let instance = cards::fetch_instance_required(instance_id, &mut tx).await?;
            if instance.owner_id != order.user_id {
                return Err(CustodyError::NotInstanceOwner(instance_id).into());
            }
            if instance.card_id != order.card_id {
                return Err(ExchangeError::InvalidOrder(format!(
                    "Card instance #{instance_id} is a {} card, not {}",
                    instance.card_id, order.card_id
                )));
            }
            if orders::open_sell_exists_for_instance(instance_id, &mut tx).await? {
                return Err(CustodyError::AlreadyListed { instance_id }.into());
            }
            match instance.status {
                CardStatus::Verified => {
                    cards::set_status(instance_id, CardStatus::Listed, &mut tx).await?;
                },
                CardStatus::Listed => {},
                status => {
                    return Err(CustodyError::WrongStatus {
                        instance_id,
                        status,
                        expected: CardStatus::Verified,
                    }
                    .into())
                },
            }
        }
        let (order, inserted) = orders::idempotent_insert(order, &mut tx).await?;
        tx.commit().await?;
        Ok((order, inserted))
    }

    async fn cancel_order(&self, user_id: &str, order_id: i64) -> Result<Order, ExchangeError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::fetch_order(order_id, &mut tx).await?.ok_or(ExchangeError::OrderNotFound(order_id))?;
        if order.user_id != user_id {
            return Err(ExchangeError::NotOrderOwner(order_id));
        }
        if !order.status.is_matchable() {
            return Err(ExchangeError::OrderNotCancellable { order_id, status: order.status.to_string() });
        }
        let order = orders::update_order_status(order_id, OrderStatus::Cancelled, &mut tx).await?;
        // Release the bound instance. An instance that has passed vault verification goes back to Verified; a
        // sell-first registration keeps its Listed status as a bare registration.
        if let Some(instance_id) = order.card_instance_id {
            let instance = cards::fetch_instance_required(instance_id, &mut tx).await?;
            if instance.status == CardStatus::Listed && instance.verified_at.is_some() {
                cards::set_status(instance_id, CardStatus::Verified, &mut tx).await?;
            }
        }
        tx.commit().await?;
        info!("📝️ Order #{order_id} cancelled by {user_id}");
        Ok(order)
    }

    async fn best_opposite_order(&self, incoming: &Order) -> Result<Option<Order>, ExchangeError> {
        let mut conn = self.pool.acquire().await?;
        let instance = match (incoming.side, incoming.card_instance_id) {
            (OrderSide::Sell, Some(id)) => Some(cards::fetch_instance_required(id, &mut conn).await?),
            _ => None,
        };
        let identity = instance.as_ref().map(|i| (i.grading_company.as_str(), i.grade));
        orders::best_opposite_order(incoming, identity, &mut conn).await
    }

    async fn execute_fill(
        &self,
        incoming_id: i64,
        resting_id: i64,
        quantity: i64,
        fee_rate_bps: i64,
    ) -> Result<FillResult, ExchangeError> {
        let mut tx = self.pool.begin().await?;
        // Both orders are re-read inside the transaction. The candidate was selected before the transaction began,
        // so its fill state may have moved; stale quantities must fail the fill rather than oversell.
        let incoming =
            orders::fetch_order(incoming_id, &mut tx).await?.ok_or(ExchangeError::OrderNotFound(incoming_id))?;
        let resting =
            orders::fetch_order(resting_id, &mut tx).await?.ok_or(ExchangeError::OrderNotFound(resting_id))?;
        if !incoming.status.is_matchable() || !resting.status.is_matchable() {
            return Err(ExchangeError::InvalidOrder(format!(
                "Cannot fill orders #{incoming_id} ({}) and #{resting_id} ({})",
                incoming.status, resting.status
            )));
        }
        if quantity <= 0 || quantity > incoming.remaining() || quantity > resting.remaining() {
            return Err(ExchangeError::InvalidOrder(format!(
                "Fill quantity {quantity} exceeds open quantity on order #{incoming_id} or #{resting_id}"
            )));
        }
        let price = resting
            .price
            .ok_or_else(|| ExchangeError::InvalidOrder(format!("Resting order #{resting_id} has no price")))?;
        let (buy, sell) = match incoming.side {
            OrderSide::Buy => (&incoming, &resting),
            OrderSide::Sell => (&resting, &incoming),
        };
        let instance_id = sell.card_instance_id.ok_or_else(|| {
            ExchangeError::InvalidOrder(format!("Sell order #{} has no bound card instance", sell.id))
        })?;
        // The settlement path is decided here, from the instance's status at fill time. Verified means the card is
        // already in the vault; anything else means the seller still has to ship it in.
        let instance = cards::fetch_instance_required(instance_id, &mut tx).await?;
        let path = if instance.status == CardStatus::Verified || instance.verified_at.is_some() {
            SettlementPath::AlreadyCustodied
        } else {
            SettlementPath::RequiresShipment
        };
        let trade = trades::insert_trade(buy, sell, instance_id, price, quantity, fee_rate_bps, path, &mut tx).await?;
        let incoming = orders::apply_fill(incoming_id, quantity, &mut tx).await?;
        let resting = orders::apply_fill(resting_id, quantity, &mut tx).await?;
        tx.commit().await?;
        info!(
            "💰️ Trade #{} executed: {} x{quantity} @ {price} between {} and {} ({path})",
            trade.id, trade.card_id, trade.buyer_id, trade.seller_id
        );
        Ok(FillResult { trade, incoming, resting })
    }

    async fn cancel_market_remainder(&self, order_id: i64) -> Result<Order, ExchangeError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::update_order_status(order_id, OrderStatus::Cancelled, &mut tx).await?;
        tx.commit().await?;
        debug!("📝️ Market order #{order_id} remainder of {} cancelled", order.remaining());
        Ok(order)
    }

    //---------------------------------------   Escrow ledger   ------------------------------------------------------

    async fn mark_escrow_captured(&self, trade_id: i64, payment_ref: &str) -> Result<Trade, ExchangeError> {
        let mut tx = self.pool.begin().await?;
        trades::transition_escrow(
            trade_id,
            &[EscrowStatus::Pending, EscrowStatus::PaymentFailed],
            EscrowStatus::Captured,
            &mut tx,
        )
        .await?;
        let trade = trades::set_payment_ref(trade_id, payment_ref, &mut tx).await?;
        tx.commit().await?;
        info!("💰️ Trade #{trade_id} escrow captured ({payment_ref})");
        Ok(trade)
    }

    async fn mark_payment_failed(&self, trade_id: i64) -> Result<Trade, ExchangeError> {
        let mut tx = self.pool.begin().await?;
        let trade = trades::record_payment_failure(trade_id, &mut tx).await?;
        tx.commit().await?;
        Ok(trade)
    }

    async fn mark_escrow_released(&self, trade_id: i64, payout_ref: &str) -> Result<Trade, ExchangeError> {
        let mut tx = self.pool.begin().await?;
        trades::transition_escrow(trade_id, &[EscrowStatus::Captured], EscrowStatus::Released, &mut tx).await?;
        let trade = trades::set_payout_ref(trade_id, payout_ref, &mut tx).await?;
        tx.commit().await?;
        info!("💰️ Trade #{trade_id} escrow released to seller ({payout_ref})");
        Ok(trade)
    }

    async fn mark_escrow_refunded(&self, trade_id: i64, refund_ref: &str) -> Result<Trade, ExchangeError> {
        let mut tx = self.pool.begin().await?;
        trades::transition_escrow(trade_id, &[EscrowStatus::Captured], EscrowStatus::Refunded, &mut tx).await?;
        let trade = trades::set_refund_ref(trade_id, refund_ref, &mut tx).await?;
        tx.commit().await?;
        info!("💰️ Trade #{trade_id} escrow refunded to buyer ({refund_ref})");
        Ok(trade)
    }

    async fn cancel_failed_trade(&self, trade_id: i64) -> Result<Trade, ExchangeError> {
        let mut tx = self.pool.begin().await?;
        let trade =
            trades::transition_escrow(trade_id, &[EscrowStatus::PaymentFailed], EscrowStatus::Cancelled, &mut tx)
                .await?;
        orders::reopen_order(trade.sell_order_id, trade.quantity, &mut tx).await?;
        cards::set_status(trade.card_instance_id, CardStatus::Listed, &mut tx).await?;
        tx.commit().await?;
        info!("💰️ Trade #{trade_id} cancelled after {} failed payment attempts", trade.payment_attempts);
        Ok(trade)
    }

    async fn revert_stalled_trade(
        &self,
        trade_id: i64,
        refund_ref: &str,
        reputation_penalty: i64,
    ) -> Result<Trade, ExchangeError> {
        let mut tx = self.pool.begin().await?;
        trades::transition_escrow(trade_id, &[EscrowStatus::Captured], EscrowStatus::Refunded, &mut tx).await?;
        let trade = trades::set_refund_ref(trade_id, refund_ref, &mut tx).await?;
        orders::reopen_order(trade.sell_order_id, trade.quantity, &mut tx).await?;
        cards::set_status(trade.card_instance_id, CardStatus::Listed, &mut tx).await?;
        accounts::adjust_reputation(&trade.seller_id, -reputation_penalty, &mut tx).await?;
        tx.commit().await?;
        warn!("💰️ Trade #{trade_id} reverted: seller {} missed the ship-by deadline", trade.seller_id);
        Ok(trade)
    }

    async fn begin_sell_first_settlement(&self, trade_id: i64, ship_by: DateTime<Utc>) -> Result<Trade, ExchangeError> {
        let mut tx = self.pool.begin().await?;
        let trade = trades::set_ship_by(trade_id, ship_by, &mut tx).await?;
        // A replayed settlement run must not pull the instance back once the seller has started shipping.
        let instance = cards::fetch_instance_required(trade.card_instance_id, &mut tx).await?;
        if matches!(instance.status, CardStatus::Listed | CardStatus::PendingShipment) {
            cards::set_status(trade.card_instance_id, CardStatus::PendingShipment, &mut tx).await?;
        }
        tx.commit().await?;
        debug!("💰️ Trade #{trade_id} awaiting seller shipment, due {}", trade.ship_by.unwrap_or(ship_by));
        Ok(trade)
    }

    async fn pending_captured_trade_for_instance(&self, instance_id: i64) -> Result<Option<Trade>, ExchangeError> {
        let mut conn = self.pool.acquire().await?;
        let trade = trades::pending_captured_for_instance(instance_id, &mut conn).await?;
        Ok(trade)
    }

    async fn has_inbound_shipment(&self, trade_id: i64) -> Result<bool, ExchangeError> {
        let mut conn = self.pool.acquire().await?;
        let exists = shipments::inbound_exists_for_trade(trade_id, &mut conn).await?;
        Ok(exists)
    }

    //---------------------------------------   Deadline jobs   ------------------------------------------------------

    async fn schedule_job(
        &self,
        job_key: &str,
        trade_id: i64,
        kind: JobKind,
        due_at: DateTime<Utc>,
    ) -> Result<ScheduledJob, ExchangeError> {
        let mut tx = self.pool.begin().await?;
        let job = jobs::idempotent_schedule(job_key, trade_id, kind, due_at, &mut tx).await?;
        tx.commit().await?;
        Ok(job)
    }

    async fn claim_due_jobs(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ScheduledJob>, ExchangeError> {
        let mut tx = self.pool.begin().await?;
        let jobs = jobs::claim_due(now, limit, &mut tx).await?;
        tx.commit().await?;
        Ok(jobs)
    }

    //---------------------------------------   Surveillance    ------------------------------------------------------

    async fn count_pair_trades(
        &self,
        card_id: Option<&str>,
        user_a: &str,
        user_b: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, ExchangeError> {
        let mut conn = self.pool.acquire().await?;
        let count = trades::count_pair_trades(card_id, user_a, user_b, since, &mut conn).await?;
        Ok(count)
    }

    async fn previous_trade_price(&self, card_id: &str, before_trade_id: i64) -> Result<Option<Cents>, ExchangeError> {
        let mut conn = self.pool.acquire().await?;
        let price = trades::previous_trade_price(card_id, before_trade_id, &mut conn).await?;
        Ok(price)
    }

    async fn insert_alert(
        &self,
        trade_id: i64,
        card_id: &str,
        rule: AlertRule,
        severity: AlertSeverity,
        detail: &str,
    ) -> Result<TradeAlert, ExchangeError> {
        let mut tx = self.pool.begin().await?;
        let alert = alerts::insert_alert(trade_id, card_id, rule, severity, detail, &mut tx).await?;
        tx.commit().await?;
        Ok(alert)
    }

    async fn adjust_reputation(&self, user_id: &str, delta: i64) -> Result<Account, ExchangeError> {
        let mut tx = self.pool.begin().await?;
        let account = accounts::adjust_reputation(user_id, delta, &mut tx).await?;
        tx.commit().await?;
        Ok(account)
    }

    async fn close(&mut self) -> Result<(), ExchangeError> {
        self.pool.close().await;
        Ok(())
    }
}

impl AccountManagement for SqliteDatabase {
    async fn fetch_order(&self, order_id: i64) -> Result<Option<Order>, ExchangeError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order(order_id, &mut conn).await?;
        Ok(order)
    }

    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, ExchangeError> {
        let mut conn = self.pool.acquire().await?;
        let orders = orders::search_orders(query, &mut conn).await?;
        Ok(orders)
    }

    async fn order_book(&self, card_id: &str) -> Result<OrderBookSnapshot, ExchangeError> {
        let mut conn = self.pool.acquire().await?;
        let bids = orders::book_levels(card_id, OrderSide::Buy, &mut conn).await?;
        let asks = orders::book_levels(card_id, OrderSide::Sell, &mut conn).await?;
        let spread = match (bids.first(), asks.first()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        };
        let last_trade_price = trades::last_trade_price(card_id, &mut conn).await?;
        Ok(OrderBookSnapshot { card_id: card_id.to_string(), bids, asks, spread, last_trade_price })
    }

    async fn fetch_trade(&self, trade_id: i64) -> Result<Option<Trade>, ExchangeError> {
        let mut conn = self.pool.acquire().await?;
        let trade = trades::fetch_trade(trade_id, &mut conn).await?;
        Ok(trade)
    }

    async fn fetch_card_instance(&self, instance_id: i64) -> Result<Option<CardInstance>, ExchangeError> {
        let mut conn = self.pool.acquire().await?;
        let instance = cards::fetch_instance(instance_id, &mut conn).await?;
        Ok(instance)
    }

    async fn fetch_alerts_for_trade(&self, trade_id: i64) -> Result<Vec<TradeAlert>, ExchangeError> {
        let mut conn = self.pool.acquire().await?;
        let alerts = alerts::fetch_alerts_for_trade(trade_id, &mut conn).await?;
        Ok(alerts)
    }

    async fn fetch_or_create_account(&self, user_id: &str) -> Result<Account, ExchangeError> {
        let mut tx = self.pool.begin().await?;
        let account = accounts::fetch_or_create_account(user_id, &mut tx).await?;
        tx.commit().await?;
        Ok(account)
    }

    async fn update_account_gateway_refs(
        &self,
        user_id: &str,
        customer_ref: Option<&str>,
        payment_method_ref: Option<&str>,
        payout_account_ref: Option<&str>,
    ) -> Result<Account, ExchangeError> {
        let mut tx = self.pool.begin().await?;
        let account =
            accounts::update_gateway_refs(user_id, customer_ref, payment_method_ref, payout_account_ref, &mut tx)
                .await?;
        tx.commit().await?;
        Ok(account)
    }
}

impl CustodyManagement for SqliteDatabase {
    async fn register_card_instance(&self, instance: NewCardInstance) -> Result<CardInstance, CustodyError> {
        let mut tx = self.pool.begin().await?;
        let instance = cards::insert_instance(instance, &mut tx).await?;
        tx.commit().await?;
        info!(
            "🎴️ Instance #{} registered: {} {} #{} (grade {})",
            instance.id, instance.card_id, instance.grading_company, instance.cert_number, instance.grade
        );
        Ok(instance)
    }

    async fn create_inbound_shipment(&self, user_id: &str, shipment: NewShipment) -> Result<Shipment, CustodyError> {
        let mut tx = self.pool.begin().await?;
        let instance = cards::fetch_instance_required(shipment.card_instance_id, &mut tx).await?;
        if instance.owner_id != user_id {
            return Err(CustodyError::NotInstanceOwner(instance.id));
        }
        if instance.status != CardStatus::PendingShipment {
            return Err(CustodyError::WrongStatus {
                instance_id: instance.id,
                status: instance.status,
                expected: CardStatus::PendingShipment,
            });
        }
        let shipment = NewShipment { direction: ShipmentDirection::Inbound, ..shipment };
        let shipment = shipments::insert_shipment(shipment, &mut tx).await?;
        cards::set_status(instance.id, CardStatus::InTransit, &mut tx).await?;
        tx.commit().await?;
        info!("📦️ Inbound shipment #{} created for instance #{}", shipment.id, instance.id);
        Ok(shipment)
    }

    async fn update_shipment_status(
        &self,
        shipment_id: i64,
        status: ShipmentStatus,
    ) -> Result<(Shipment, CardInstance), CustodyError> {
        let mut tx = self.pool.begin().await?;
        let (shipment, changed) = shipments::update_status(shipment_id, status, &mut tx).await?;
        let instance = cards::fetch_instance_required(shipment.card_instance_id, &mut tx).await?;
        // Only the first delivery of an inbound shipment feeds the verification queue, and only while the instance
        // is still in transit. A replayed carrier webhook must not pull a verified card back into the pipeline.
        let instance = if changed
            && shipment.direction == ShipmentDirection::Inbound
            && status == ShipmentStatus::Delivered
            && instance.status == CardStatus::InTransit
        {
            cards::set_status(shipment.card_instance_id, CardStatus::PendingVerification, &mut tx).await?
        } else {
            instance
        };
        tx.commit().await?;
        Ok((shipment, instance))
    }

    async fn claim_instance(
        &self,
        instance_id: i64,
        verifier_id: &str,
        lease: Duration,
    ) -> Result<CardInstance, CustodyError> {
        let mut tx = self.pool.begin().await?;
        let instance = cards::claim(instance_id, verifier_id, lease, &mut tx).await?;
        tx.commit().await?;
        Ok(instance)
    }

    async fn unclaim_instance(&self, instance_id: i64, verifier_id: &str) -> Result<CardInstance, CustodyError> {
        let mut tx = self.pool.begin().await?;
        let instance = cards::unclaim(instance_id, verifier_id, &mut tx).await?;
        tx.commit().await?;
        Ok(instance)
    }

    async fn approve_verification(
        &self,
        instance_id: i64,
        verifier_id: &str,
    ) -> Result<(CardInstance, Option<Trade>), CustodyError> {
        let mut tx = self.pool.begin().await?;
        let instance = cards::fetch_instance_required(instance_id, &mut tx).await?;
        if instance.claimed_by.as_deref() != Some(verifier_id) {
            return Err(CustodyError::NotClaimant(instance_id));
        }
        let mut instance = cards::mark_verified(instance_id, &mut tx).await?;
        // A captured sell-first trade was waiting for this card to arrive; hand the card to the buyer now. The
        // escrow release itself is a gateway call and stays outside this transaction.
        let pending = trades::pending_captured_for_instance(instance_id, &mut tx).await?;
        if let Some(trade) = &pending {
            instance = cards::transfer_owner(instance_id, &trade.buyer_id, &mut tx).await?;
        }
        tx.commit().await?;
        info!("🎴️ Instance #{instance_id} verification approved by {verifier_id}");
        Ok((instance, pending))
    }

    async fn reject_verification(
        &self,
        instance_id: i64,
        verifier_id: &str,
    ) -> Result<(CardInstance, Option<Trade>), CustodyError> {
        let mut tx = self.pool.begin().await?;
        let instance = cards::fetch_instance_required(instance_id, &mut tx).await?;
        if instance.claimed_by.as_deref() != Some(verifier_id) {
            return Err(CustodyError::NotClaimant(instance_id));
        }
        cards::set_status(instance_id, CardStatus::PendingShipment, &mut tx).await?;
        let instance = cards::clear_claim(instance_id, &mut tx).await?;
        let pending = trades::pending_captured_for_instance(instance_id, &mut tx).await?;
        tx.commit().await?;
        warn!("🎴️ Instance #{instance_id} verification rejected by {verifier_id}");
        Ok((instance, pending))
    }

    async fn transfer_instance_owner(&self, instance_id: i64, new_owner: &str) -> Result<CardInstance, CustodyError> {
        let mut tx = self.pool.begin().await?;
        let instance = cards::transfer_owner(instance_id, new_owner, &mut tx).await?;
        tx.commit().await?;
        Ok(instance)
    }

    async fn redeem_instance(
        &self,
        instance_id: i64,
        owner_id: &str,
        carrier: Option<&str>,
    ) -> Result<(CardInstance, Shipment), CustodyError> {
        let mut tx = self.pool.begin().await?;
        let instance = cards::fetch_instance_required(instance_id, &mut tx).await?;
        if instance.owner_id != owner_id {
            return Err(CustodyError::NotInstanceOwner(instance_id));
        }
        if orders::open_sell_exists_for_instance(instance_id, &mut tx).await? {
            return Err(CustodyError::RedemptionBlocked(format!(
                "instance #{instance_id} is bound to an open sell order"
            )));
        }
        if instance.collateralized {
            return Err(CustodyError::RedemptionBlocked(format!(
                "instance #{instance_id} is pledged as loan collateral"
            )));
        }
        if instance.status != CardStatus::Verified {
            return Err(CustodyError::WrongStatus {
                instance_id,
                status: instance.status,
                expected: CardStatus::Verified,
            });
        }
        let instance = cards::set_status(instance_id, CardStatus::Redeemed, &mut tx).await?;
        let shipment = shipments::insert_shipment(
            NewShipment {
                card_instance_id: instance_id,
                trade_id: None,
                direction: ShipmentDirection::Outbound,
                carrier: carrier.map(|c| c.to_string()),
                tracking_number: None,
            },
            &mut tx,
        )
        .await?;
        tx.commit().await?;
        info!("🎴️ Instance #{instance_id} redeemed by {owner_id}; outbound shipment #{} created", shipment.id);
        Ok((instance, shipment))
    }
}
