use chrono::{DateTime, Duration, Utc};
use log::{debug, trace};
use sqlx::SqliteConnection;

use crate::{
    db_types::{CardInstance, CardStatus, NewCardInstance},
    traits::CustodyError,
};

pub async fn insert_instance(
    instance: NewCardInstance,
    conn: &mut SqliteConnection,
) -> Result<CardInstance, CustodyError> {
    let result = sqlx::query_as(
        r#"
            INSERT INTO card_instances (card_id, owner_id, status, grading_company, cert_number, grade)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *;
        "#,
    )
    .bind(instance.card_id)
    .bind(instance.owner_id)
    .bind(instance.status)
    .bind(instance.grading_company.clone())
    .bind(instance.cert_number.clone())
    .bind(instance.grade)
    .fetch_one(conn)
    .await;
    match result {
        Ok(instance) => Ok(instance),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(CustodyError::DuplicateCertificate {
            company: instance.grading_company,
            cert_number: instance.cert_number,
        }),
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_instance(id: i64, conn: &mut SqliteConnection) -> Result<Option<CardInstance>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM card_instances WHERE id = $1").bind(id).fetch_optional(conn).await
}

pub async fn fetch_instance_required(id: i64, conn: &mut SqliteConnection) -> Result<CardInstance, CustodyError> {
    fetch_instance(id, conn).await?.ok_or(CustodyError::InstanceNotFound(id))
}

pub async fn set_status(
    id: i64,
    status: CardStatus,
    conn: &mut SqliteConnection,
) -> Result<CardInstance, CustodyError> {
    let updated: Option<CardInstance> = sqlx::query_as(
        "UPDATE card_instances SET status = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *",
    )
    .bind(status)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    trace!("🎴️ Instance #{id} status -> {status}");
    updated.ok_or(CustodyError::InstanceNotFound(id))
}

/// Transfers ownership. A `Listed` instance returns to `Verified`: the listing is consumed by the sale and the new
/// owner holds a plain vaulted card.
pub async fn transfer_owner(
    id: i64,
    new_owner: &str,
    conn: &mut SqliteConnection,
) -> Result<CardInstance, CustodyError> {
    let updated: Option<CardInstance> = sqlx::query_as(
        "UPDATE card_instances SET owner_id = $1, \
         status = CASE WHEN status = 'Listed' THEN 'Verified' ELSE status END, \
         updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *",
    )
    .bind(new_owner)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    debug!("🎴️ Instance #{id} ownership transferred to {new_owner}");
    updated.ok_or(CustodyError::InstanceNotFound(id))
}

/// Whether the claim on this instance is still live: present and younger than the lease.
pub fn claim_is_live(instance: &CardInstance, lease: Duration, now: DateTime<Utc>) -> bool {
    match (&instance.claimed_by, instance.claimed_at) {
        (Some(_), Some(at)) => now - at < lease,
        _ => false,
    }
}

/// Takes the exclusive verification claim. Fails if another verifier holds a live claim; an expired claim is
/// silently taken over.
pub async fn claim(
    id: i64,
    verifier_id: &str,
    lease: Duration,
    conn: &mut SqliteConnection,
) -> Result<CardInstance, CustodyError> {
    let instance = fetch_instance_required(id, conn).await?;
    if instance.status != CardStatus::PendingVerification {
        return Err(CustodyError::WrongStatus {
            instance_id: id,
            status: instance.status,
            expected: CardStatus::PendingVerification,
        });
    }
    if claim_is_live(&instance, lease, Utc::now()) && instance.claimed_by.as_deref() != Some(verifier_id) {
        return Err(CustodyError::AlreadyClaimed {
            instance_id: id,
            claimed_by: instance.claimed_by.unwrap_or_default(),
        });
    }
    let updated: Option<CardInstance> = sqlx::query_as(
        "UPDATE card_instances SET claimed_by = $1, claimed_at = $2, updated_at = CURRENT_TIMESTAMP \
         WHERE id = $3 RETURNING *",
    )
    .bind(verifier_id)
    .bind(Utc::now())
    .bind(id)
    .fetch_optional(conn)
    .await?;
    debug!("🎴️ Instance #{id} claimed by {verifier_id}");
    updated.ok_or(CustodyError::InstanceNotFound(id))
}

/// Clears the claim without resolving the verification. Only the claimant may release.
pub async fn unclaim(id: i64, verifier_id: &str, conn: &mut SqliteConnection) -> Result<CardInstance, CustodyError> {
    let instance = fetch_instance_required(id, conn).await?;
    if instance.claimed_by.as_deref() != Some(verifier_id) {
        return Err(CustodyError::NotClaimant(id));
    }
    clear_claim(id, conn).await
}

pub async fn clear_claim(id: i64, conn: &mut SqliteConnection) -> Result<CardInstance, CustodyError> {
    let updated: Option<CardInstance> = sqlx::query_as(
        "UPDATE card_instances SET claimed_by = NULL, claimed_at = NULL, updated_at = CURRENT_TIMESTAMP \
         WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    updated.ok_or(CustodyError::InstanceNotFound(id))
}

/// Marks the instance verified: status, timestamp, claim cleared, in one statement.
pub async fn mark_verified(id: i64, conn: &mut SqliteConnection) -> Result<CardInstance, CustodyError> {
    let updated: Option<CardInstance> = sqlx::query_as(
        r#"
            UPDATE card_instances SET
                status = 'Verified',
                verified_at = $1,
                claimed_by = NULL,
                claimed_at = NULL,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $2
            RETURNING *;
        "#,
    )
    .bind(Utc::now())
    .bind(id)
    .fetch_optional(conn)
    .await?;
    debug!("🎴️ Instance #{id} verified");
    updated.ok_or(CustodyError::InstanceNotFound(id))
}
