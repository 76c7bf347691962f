use sqlx::SqliteConnection;

use crate::{
    db_types::{AlertRule, AlertSeverity, TradeAlert},
    traits::ExchangeError,
};

pub async fn insert_alert(
    trade_id: i64,
    card_id: &str,
    rule: AlertRule,
    severity: AlertSeverity,
    detail: &str,
    conn: &mut SqliteConnection,
) -> Result<TradeAlert, ExchangeError> {
    let alert = sqlx::query_as(
        "INSERT INTO trade_alerts (trade_id, card_id, rule, severity, detail) VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(trade_id)
    .bind(card_id)
    .bind(rule)
    .bind(severity)
    .bind(detail)
    .fetch_one(conn)
    .await?;
    Ok(alert)
}

pub async fn fetch_alerts_for_trade(trade_id: i64, conn: &mut SqliteConnection) -> Result<Vec<TradeAlert>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM trade_alerts WHERE trade_id = $1 ORDER BY id ASC")
        .bind(trade_id)
        .fetch_all(conn)
        .await
}
