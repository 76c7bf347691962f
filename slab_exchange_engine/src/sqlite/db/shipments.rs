use chrono::Utc;
use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{NewShipment, Shipment, ShipmentStatus},
    traits::CustodyError,
};

pub async fn insert_shipment(shipment: NewShipment, conn: &mut SqliteConnection) -> Result<Shipment, CustodyError> {
    let trade_id = shipment.trade_id;
    let result = sqlx::query_as(
        r#"
            INSERT INTO shipments (card_instance_id, trade_id, direction, carrier, tracking_number)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *;
        "#,
    )
    .bind(shipment.card_instance_id)
    .bind(shipment.trade_id)
    .bind(shipment.direction)
    .bind(shipment.carrier)
    .bind(shipment.tracking_number)
    .fetch_one(conn)
    .await;
    match result {
        Ok(shipment) => Ok(shipment),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            Err(CustodyError::InboundShipmentExists(trade_id.unwrap_or_default()))
        },
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_shipment(id: i64, conn: &mut SqliteConnection) -> Result<Option<Shipment>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM shipments WHERE id = $1").bind(id).fetch_optional(conn).await
}

/// Guarded shipment transition. Shipments only move forward (`Created` -> `InTransit` -> `Delivered`; a delivery
/// scan may arrive without a transit scan first). Re-delivering the current status is a no-op, flagged `false` in
/// the second position so callers skip their side effects on a replayed carrier event.
pub async fn update_status(
    id: i64,
    status: ShipmentStatus,
    conn: &mut SqliteConnection,
) -> Result<(Shipment, bool), CustodyError> {
    let shipment = fetch_shipment(id, conn).await?.ok_or(CustodyError::ShipmentNotFound(id))?;
    if shipment.status == status {
        debug!("📦️ Shipment #{id} is already {status}; carrier event ignored");
        return Ok((shipment, false));
    }
    let allowed = matches!(
        (shipment.status, status),
        (ShipmentStatus::Created, ShipmentStatus::InTransit)
            | (ShipmentStatus::Created, ShipmentStatus::Delivered)
            | (ShipmentStatus::InTransit, ShipmentStatus::Delivered)
    );
    if !allowed {
        return Err(CustodyError::ShipmentTransitionForbidden {
            shipment_id: id,
            from: shipment.status.to_string(),
            to: status.to_string(),
        });
    }
    let delivered_at = match status {
        ShipmentStatus::Delivered => Some(Utc::now()),
        _ => None,
    };
    let updated: Option<Shipment> = sqlx::query_as(
        "UPDATE shipments SET status = $1, delivered_at = COALESCE($2, delivered_at), \
         updated_at = CURRENT_TIMESTAMP WHERE id = $3 RETURNING *",
    )
    .bind(status)
    .bind(delivered_at)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    debug!("📦️ Shipment #{id} status -> {status}");
    Ok((updated.ok_or(CustodyError::ShipmentNotFound(id))?, true))
}

pub async fn inbound_exists_for_trade(trade_id: i64, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM shipments WHERE trade_id = $1 AND direction = 'Inbound'")
            .bind(trade_id)
            .fetch_one(conn)
            .await?;
    Ok(count > 0)
}
