use log::{debug, trace};
use sqlx::{QueryBuilder, SqliteConnection};
use sx_common::Cents;

use crate::{
    db_types::{NewOrder, Order, OrderSide, OrderStatus, OrderType},
    traits::{ExchangeError, OrderQueryFilter, PriceLevel},
};

/// Inserts the order, returning `false` in the second position if an order with the same idempotency key already
/// exists (in which case the existing order is returned untouched).
pub async fn idempotent_insert(order: NewOrder, conn: &mut SqliteConnection) -> Result<(Order, bool), ExchangeError> {
    if let Some(key) = order.idempotency_key.as_deref() {
        if let Some(existing) = fetch_order_by_idempotency_key(key, conn).await? {
            trace!("📝️ Order with idempotency key {key} already exists as #{}", existing.id);
            return Ok((existing, false));
        }
    }
    let order = insert_order(order, conn).await?;
    debug!("📝️ Order #{} inserted ({} {} x{} on {})", order.id, order.side, order.order_type, order.quantity, order.card_id);
    Ok((order, true))
}

/// Inserts a new order using the given connection. This is not atomic on its own; embed the call inside a
/// transaction if instance binding needs to happen alongside it.
async fn insert_order(order: NewOrder, conn: &mut SqliteConnection) -> Result<Order, ExchangeError> {
    let order = sqlx::query_as(
        r#"
            INSERT INTO orders (
                user_id,
                card_id,
                side,
                order_type,
                price,
                quantity,
                grading_company,
                min_grade,
                card_instance_id,
                idempotency_key
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *;
        "#,
    )
    .bind(order.user_id)
    .bind(order.card_id)
    .bind(order.side)
    .bind(order.order_type)
    .bind(order.price)
    .bind(order.quantity)
    .bind(order.grading_company)
    .bind(order.min_grade)
    .bind(order.card_instance_id)
    .bind(order.idempotency_key)
    .fetch_one(conn)
    .await?;
    Ok(order)
}

pub async fn fetch_order(id: i64, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM orders WHERE id = $1").bind(id).fetch_optional(conn).await
}

pub async fn fetch_order_by_idempotency_key(
    key: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM orders WHERE idempotency_key = $1").bind(key).fetch_optional(conn).await
}

/// Fetches orders according to criteria specified in the `OrderQueryFilter`, ordered by `created_at` ascending.
pub async fn search_orders(query: OrderQueryFilter, conn: &mut SqliteConnection) -> Result<Vec<Order>, sqlx::Error> {
    let mut builder = QueryBuilder::new("SELECT * FROM orders ");
    if !query.is_empty() {
        builder.push("WHERE ");
    }
    let mut where_clause = builder.separated(" AND ");
    if let Some(card_id) = query.card_id {
        where_clause.push("card_id = ");
        where_clause.push_bind_unseparated(card_id);
    }
    if let Some(user_id) = query.user_id {
        where_clause.push("user_id = ");
        where_clause.push_bind_unseparated(user_id);
    }
    if let Some(side) = query.side {
        where_clause.push("side = ");
        where_clause.push_bind_unseparated(side.to_string());
    }
    if let Some(statuses) = query.status.as_ref().filter(|s| !s.is_empty()) {
        let statuses = statuses.iter().map(|s| format!("'{s}'")).collect::<Vec<_>>().join(",");
        where_clause.push(format!("status IN ({statuses})"));
    }
    if let Some(since) = query.since {
        where_clause.push("unixepoch(created_at) >= unixepoch(");
        where_clause.push_bind_unseparated(since);
        where_clause.push_unseparated(")");
    }
    if let Some(until) = query.until {
        where_clause.push("unixepoch(created_at) <= unixepoch(");
        where_clause.push_bind_unseparated(until);
        where_clause.push_unseparated(")");
    }
    builder.push(" ORDER BY created_at ASC");
    trace!("📝️ Executing query: {}", builder.sql());
    builder.build_query_as::<Order>().fetch_all(conn).await
}

/// The best price-compatible opposite order for an incoming order, in strict price-time priority.
///
/// `instance` carries the grading identity of the incoming *sell* order's bound instance, so that resting buy
/// orders' grading filters can be evaluated against it. For an incoming buy, the filters on the incoming order are
/// applied against each candidate's bound instance via a join instead.
pub async fn best_opposite_order(
    incoming: &Order,
    instance: Option<(&str, f64)>,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, ExchangeError> {
    let mut builder = match incoming.side {
        // Incoming buy: walk the asks, cheapest first, filtering on the candidate's bound instance.
        OrderSide::Buy => {
            let mut b = QueryBuilder::new(
                "SELECT o.* FROM orders o JOIN card_instances ci ON o.card_instance_id = ci.id WHERE o.card_id = ",
            );
            b.push_bind(incoming.card_id.clone());
            b.push(" AND o.side = 'Sell' AND o.status IN ('Open','PartiallyFilled') AND o.price IS NOT NULL");
            b.push(" AND o.user_id <> ");
            b.push_bind(incoming.user_id.clone());
            if incoming.order_type == OrderType::Limit {
                b.push(" AND o.price <= ");
                b.push_bind(incoming.price);
            }
            if let Some(company) = incoming.grading_company.as_deref() {
                b.push(" AND ci.grading_company = ");
                b.push_bind(company.to_string());
            }
            if let Some(min_grade) = incoming.min_grade {
                b.push(" AND ci.grade >= ");
                b.push_bind(min_grade);
            }
            b.push(" ORDER BY o.price ASC, o.created_at ASC, o.id ASC LIMIT 1");
            b
        },
        // Incoming sell: walk the bids, highest first; resting buy filters run against the incoming instance.
        OrderSide::Sell => {
            let mut b = QueryBuilder::new("SELECT o.* FROM orders o WHERE o.card_id = ");
            b.push_bind(incoming.card_id.clone());
            b.push(" AND o.side = 'Buy' AND o.status IN ('Open','PartiallyFilled') AND o.price IS NOT NULL");
            b.push(" AND o.user_id <> ");
            b.push_bind(incoming.user_id.clone());
            if incoming.order_type == OrderType::Limit {
                b.push(" AND o.price >= ");
                b.push_bind(incoming.price);
            }
            let (company, grade) = instance.ok_or_else(|| {
                ExchangeError::InvalidOrder(format!("Sell order {} has no bound card instance", incoming.id))
            })?;
            b.push(" AND (o.grading_company IS NULL OR o.grading_company = ");
            b.push_bind(company.to_string());
            b.push(") AND (o.min_grade IS NULL OR o.min_grade <= ");
            b.push_bind(grade);
            b.push(")");
            b.push(" ORDER BY o.price DESC, o.created_at ASC, o.id ASC LIMIT 1");
            b
        },
    };
    trace!("📝️ Executing query: {}", builder.sql());
    let order = builder.build_query_as::<Order>().fetch_optional(conn).await?;
    Ok(order)
}

/// Applies one fill to an order: bumps the fill quantity and recomputes the status. The caller wraps this in the
/// fill transaction together with the trade insert.
pub async fn apply_fill(id: i64, fill_qty: i64, conn: &mut SqliteConnection) -> Result<Order, ExchangeError> {
    let order = fetch_order(id, conn).await?.ok_or(ExchangeError::OrderNotFound(id))?;
    let new_filled = order.filled_quantity + fill_qty;
    let status = OrderStatus::for_fill_state(new_filled, order.quantity);
    let updated: Option<Order> = sqlx::query_as(
        "UPDATE orders SET filled_quantity = $1, status = $2, updated_at = CURRENT_TIMESTAMP WHERE id = $3 \
         RETURNING *",
    )
    .bind(new_filled)
    .bind(status)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    updated.ok_or(ExchangeError::OrderNotFound(id))
}

/// Reverses one fill on an order: decrements the fill quantity and restores `Open`/`PartiallyFilled`. An order the
/// owner has since cancelled keeps its `Cancelled` status, but still gives the quantity back.
pub async fn reopen_order(id: i64, fill_qty: i64, conn: &mut SqliteConnection) -> Result<Order, ExchangeError> {
    let order = fetch_order(id, conn).await?.ok_or(ExchangeError::OrderNotFound(id))?;
    let new_filled = (order.filled_quantity - fill_qty).max(0);
    let status = if order.status == OrderStatus::Cancelled {
        OrderStatus::Cancelled
    } else {
        OrderStatus::for_fill_state(new_filled, order.quantity)
    };
    let updated: Option<Order> = sqlx::query_as(
        "UPDATE orders SET filled_quantity = $1, status = $2, updated_at = CURRENT_TIMESTAMP WHERE id = $3 \
         RETURNING *",
    )
    .bind(new_filled)
    .bind(status)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    updated.ok_or(ExchangeError::OrderNotFound(id))
}

pub async fn update_order_status(
    id: i64,
    status: OrderStatus,
    conn: &mut SqliteConnection,
) -> Result<Order, ExchangeError> {
    let result: Option<Order> =
        sqlx::query_as("UPDATE orders SET status = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *")
            .bind(status)
            .bind(id)
            .fetch_optional(conn)
            .await?;
    result.ok_or(ExchangeError::OrderNotFound(id))
}

/// Whether any open order still binds the given card instance.
pub async fn open_sell_exists_for_instance(instance_id: i64, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM orders WHERE card_instance_id = $1 AND status IN ('Open','PartiallyFilled')",
    )
    .bind(instance_id)
    .fetch_one(conn)
    .await?;
    Ok(count > 0)
}

/// One side of the aggregated book, best price first.
pub async fn book_levels(
    card_id: &str,
    side: OrderSide,
    conn: &mut SqliteConnection,
) -> Result<Vec<PriceLevel>, sqlx::Error> {
    let order_clause = match side {
        OrderSide::Buy => "ORDER BY price DESC",
        OrderSide::Sell => "ORDER BY price ASC",
    };
    let rows: Vec<(Cents, i64, i64)> = sqlx::query_as(
        format!(
            "SELECT price, SUM(quantity - filled_quantity), COUNT(*) FROM orders \
             WHERE card_id = $1 AND side = $2 AND status IN ('Open','PartiallyFilled') AND price IS NOT NULL \
             GROUP BY price {order_clause}"
        )
        .as_str(),
    )
    .bind(card_id)
    .bind(side)
    .fetch_all(conn)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(price, open_quantity, order_count)| PriceLevel { price, open_quantity, order_count })
        .collect())
}
