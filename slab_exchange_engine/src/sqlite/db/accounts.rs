use log::debug;
use sqlx::SqliteConnection;

use crate::{db_types::Account, traits::ExchangeError};

pub async fn fetch_account(user_id: &str, conn: &mut SqliteConnection) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM accounts WHERE user_id = $1").bind(user_id).fetch_optional(conn).await
}

/// Fetches the account for the given user, creating an empty one on first sight.
pub async fn fetch_or_create_account(user_id: &str, conn: &mut SqliteConnection) -> Result<Account, ExchangeError> {
    if let Some(account) = fetch_account(user_id, conn).await? {
        return Ok(account);
    }
    let account = sqlx::query_as("INSERT INTO accounts (user_id) VALUES ($1) RETURNING *")
        .bind(user_id)
        .fetch_one(conn)
        .await?;
    debug!("👤️ Account created for {user_id}");
    Ok(account)
}

/// Updates gateway references. `None` values leave the stored reference unchanged.
pub async fn update_gateway_refs(
    user_id: &str,
    customer_ref: Option<&str>,
    payment_method_ref: Option<&str>,
    payout_account_ref: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<Account, ExchangeError> {
    fetch_or_create_account(user_id, conn).await?;
    let updated: Option<Account> = sqlx::query_as(
        r#"
            UPDATE accounts SET
                customer_ref = COALESCE($1, customer_ref),
                payment_method_ref = COALESCE($2, payment_method_ref),
                payout_account_ref = COALESCE($3, payout_account_ref),
                updated_at = CURRENT_TIMESTAMP
            WHERE user_id = $4
            RETURNING *;
        "#,
    )
    .bind(customer_ref)
    .bind(payment_method_ref)
    .bind(payout_account_ref)
    .bind(user_id)
    .fetch_optional(conn)
    .await?;
    updated.ok_or_else(|| ExchangeError::AccountNotFound(user_id.to_string()))
}

pub async fn adjust_reputation(
    user_id: &str,
    delta: i64,
    conn: &mut SqliteConnection,
) -> Result<Account, ExchangeError> {
    fetch_or_create_account(user_id, conn).await?;
    let updated: Option<Account> = sqlx::query_as(
        "UPDATE accounts SET reputation = reputation + $1, updated_at = CURRENT_TIMESTAMP WHERE user_id = $2 \
         RETURNING *",
    )
    .bind(delta)
    .bind(user_id)
    .fetch_optional(conn)
    .await?;
    debug!("👤️ Reputation for {user_id} adjusted by {delta}");
    updated.ok_or_else(|| ExchangeError::AccountNotFound(user_id.to_string()))
}
