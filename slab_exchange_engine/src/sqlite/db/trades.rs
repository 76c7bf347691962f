use chrono::{DateTime, Utc};
use log::{debug, error, trace};
use sqlx::SqliteConnection;
use sx_common::Cents;

use crate::{
    db_types::{EscrowStatus, Order, SettlementPath, Trade},
    traits::ExchangeError,
};

/// Inserts the execution record for one fill. Called inside the fill transaction alongside the two order updates.
#[allow(clippy::too_many_arguments)]
pub async fn insert_trade(
    buy: &Order,
    sell: &Order,
    instance_id: i64,
    price: Cents,
    quantity: i64,
    fee_rate_bps: i64,
    path: SettlementPath,
    conn: &mut SqliteConnection,
) -> Result<Trade, ExchangeError> {
    let fee_amount = (price * quantity).fee_at_bps(fee_rate_bps);
    let trade = sqlx::query_as(
        r#"
            INSERT INTO trades (
                buy_order_id,
                sell_order_id,
                card_id,
                card_instance_id,
                buyer_id,
                seller_id,
                price,
                quantity,
                fee_amount,
                fee_rate_bps,
                settlement_path
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *;
        "#,
    )
    .bind(buy.id)
    .bind(sell.id)
    .bind(buy.card_id.clone())
    .bind(instance_id)
    .bind(buy.user_id.clone())
    .bind(sell.user_id.clone())
    .bind(price)
    .bind(quantity)
    .bind(fee_amount)
    .bind(fee_rate_bps)
    .bind(path)
    .fetch_one(conn)
    .await?;
    Ok(trade)
}

pub async fn fetch_trade(id: i64, conn: &mut SqliteConnection) -> Result<Option<Trade>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM trades WHERE id = $1").bind(id).fetch_optional(conn).await
}

/// Guarded escrow transition. The trade must currently be in one of `allowed_from`; anything else is an
/// [`ExchangeError::EscrowTransitionForbidden`], so repeated delivery of the same transition is rejected rather
/// than silently reapplied.
pub async fn transition_escrow(
    id: i64,
    allowed_from: &[EscrowStatus],
    to: EscrowStatus,
    conn: &mut SqliteConnection,
) -> Result<Trade, ExchangeError> {
    let trade = fetch_trade(id, conn).await?.ok_or(ExchangeError::TradeNotFound(id))?;
    let from = trade.escrow_status;
    if !allowed_from.contains(&from) {
        error!("💰️ Trade #{id} cannot be transitioned from {from} to {to}");
        return Err(ExchangeError::EscrowTransitionForbidden {
            trade_id: id,
            from: from.to_string(),
            to: to.to_string(),
        });
    }
    let updated: Option<Trade> = sqlx::query_as(
        "UPDATE trades SET escrow_status = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *",
    )
    .bind(to)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    trace!("💰️ Trade #{id} escrow {from} -> {to}");
    updated.ok_or(ExchangeError::TradeNotFound(id))
}

pub async fn set_payment_ref(id: i64, payment_ref: &str, conn: &mut SqliteConnection) -> Result<Trade, ExchangeError> {
    let updated: Option<Trade> =
        sqlx::query_as("UPDATE trades SET payment_ref = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *")
            .bind(payment_ref)
            .bind(id)
            .fetch_optional(conn)
            .await?;
    updated.ok_or(ExchangeError::TradeNotFound(id))
}

pub async fn set_payout_ref(id: i64, payout_ref: &str, conn: &mut SqliteConnection) -> Result<Trade, ExchangeError> {
    let updated: Option<Trade> =
        sqlx::query_as("UPDATE trades SET payout_ref = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *")
            .bind(payout_ref)
            .bind(id)
            .fetch_optional(conn)
            .await?;
    updated.ok_or(ExchangeError::TradeNotFound(id))
}

pub async fn set_refund_ref(id: i64, refund_ref: &str, conn: &mut SqliteConnection) -> Result<Trade, ExchangeError> {
    let updated: Option<Trade> =
        sqlx::query_as("UPDATE trades SET refund_ref = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *")
            .bind(refund_ref)
            .bind(id)
            .fetch_optional(conn)
            .await?;
    updated.ok_or(ExchangeError::TradeNotFound(id))
}

/// Records a capture failure: stamps the first failure time (only once, so the 24-hour cutoff is measured from the
/// first failure) and counts the attempt. Only `Pending` and `PaymentFailed` trades can record a failure; a late
/// gateway callback cannot knock a settled trade out of its terminal state.
pub async fn record_payment_failure(id: i64, conn: &mut SqliteConnection) -> Result<Trade, ExchangeError> {
    let trade = fetch_trade(id, conn).await?.ok_or(ExchangeError::TradeNotFound(id))?;
    let from = trade.escrow_status;
    if !matches!(from, EscrowStatus::Pending | EscrowStatus::PaymentFailed) {
        error!("💰️ Trade #{id} cannot record a payment failure from {from}");
        return Err(ExchangeError::EscrowTransitionForbidden {
            trade_id: id,
            from: from.to_string(),
            to: EscrowStatus::PaymentFailed.to_string(),
        });
    }
    let updated: Option<Trade> = sqlx::query_as(
        r#"
            UPDATE trades SET
                escrow_status = 'PaymentFailed',
                payment_failed_at = COALESCE(payment_failed_at, $1),
                payment_attempts = payment_attempts + 1,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $2
            RETURNING *;
        "#,
    )
    .bind(Utc::now())
    .bind(id)
    .fetch_optional(conn)
    .await?;
    debug!("💰️ Trade #{id} payment capture failed");
    updated.ok_or(ExchangeError::TradeNotFound(id))
}

/// Stamps the ship-by deadline. An already-stamped deadline is kept, so a replayed settlement run cannot push it
/// out.
pub async fn set_ship_by(id: i64, ship_by: DateTime<Utc>, conn: &mut SqliteConnection) -> Result<Trade, ExchangeError> {
    let updated: Option<Trade> = sqlx::query_as(
        "UPDATE trades SET ship_by = COALESCE(ship_by, $1), updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *",
    )
    .bind(ship_by)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    updated.ok_or(ExchangeError::TradeNotFound(id))
}

/// The captured, awaiting-shipment trade for this instance, if one exists. At most one can be pending because the
/// instance is bound to a single sell order at a time.
pub async fn pending_captured_for_instance(
    instance_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<Trade>, sqlx::Error> {
    sqlx::query_as(
        "SELECT * FROM trades WHERE card_instance_id = $1 AND escrow_status = 'Captured' \
         AND settlement_path = 'RequiresShipment' ORDER BY created_at DESC LIMIT 1",
    )
    .bind(instance_id)
    .fetch_optional(conn)
    .await
}

/// Trades between two users in either direction since the given time, optionally restricted to one card.
pub async fn count_pair_trades(
    card_id: Option<&str>,
    user_a: &str,
    user_b: &str,
    since: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<i64, sqlx::Error> {
    match card_id {
        Some(card_id) => {
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM trades WHERE card_id = $1 AND unixepoch(created_at) >= unixepoch($2) AND \
                 ((buyer_id = $3 AND seller_id = $4) OR (buyer_id = $4 AND seller_id = $3))",
            )
            .bind(card_id)
            .bind(since)
            .bind(user_a)
            .bind(user_b)
            .fetch_one(conn)
            .await
        },
        None => {
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM trades WHERE unixepoch(created_at) >= unixepoch($1) AND \
                 ((buyer_id = $2 AND seller_id = $3) OR (buyer_id = $3 AND seller_id = $2))",
            )
            .bind(since)
            .bind(user_a)
            .bind(user_b)
            .fetch_one(conn)
            .await
        },
    }
}

/// The execution price of the last trade for this card before the given trade.
pub async fn previous_trade_price(
    card_id: &str,
    before_trade_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<Cents>, sqlx::Error> {
    sqlx::query_scalar("SELECT price FROM trades WHERE card_id = $1 AND id < $2 ORDER BY id DESC LIMIT 1")
        .bind(card_id)
        .bind(before_trade_id)
        .fetch_optional(conn)
        .await
}

/// The most recent execution price for a card, for the order book snapshot.
pub async fn last_trade_price(card_id: &str, conn: &mut SqliteConnection) -> Result<Option<Cents>, sqlx::Error> {
    sqlx::query_scalar("SELECT price FROM trades WHERE card_id = $1 ORDER BY id DESC LIMIT 1")
        .bind(card_id)
        .fetch_optional(conn)
        .await
}
