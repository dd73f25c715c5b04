use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::enrollment::Enrollment;
use crate::error::{decode_text_enum, is_unique_violation, InvalidEnumValue, RefundError};
use crate::ledger::LedgerEntry;
use crate::order::{Order, OrderItem, PaymentStatus};
use crate::payment::PaymentAttempt;
use crate::wallet::Wallet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Completed,
    Rejected,
    Failed,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Pending => "pending",
            RefundStatus::Completed => "completed",
            RefundStatus::Rejected => "rejected",
            RefundStatus::Failed => "failed",
        }
    }
}

impl FromStr for RefundStatus {
    type Err = InvalidEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RefundStatus::Pending),
            "completed" => Ok(RefundStatus::Completed),
            "rejected" => Ok(RefundStatus::Rejected),
            "failed" => Ok(RefundStatus::Failed),
            other => Err(InvalidEnumValue(other.to_string())),
        }
    }
}

/// A student's ask to undo an order. At most one pending request exists per
/// order; the partial unique index enforces it at the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    /// The payment attempt that funded the order, when checkout recorded one.
    pub payment_id: Option<Uuid>,
    pub requested_cents: i64,
    pub reason: String,
    pub status: RefundStatus,
    pub admin_note: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl<'r> FromRow<'r, PgRow> for RefundRequest {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            order_id: row.try_get("order_id")?,
            user_id: row.try_get("user_id")?,
            payment_id: row.try_get("payment_id")?,
            requested_cents: row.try_get("requested_cents")?,
            reason: row.try_get("reason")?,
            status: decode_text_enum(row, "status")?,
            admin_note: row.try_get("admin_note")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Audit record of the actual credit movement, one per approved refund.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundTransaction {
    pub id: Uuid,
    pub refund_request_id: Uuid,
    pub provider: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub raw_response: serde_json::Value,
    pub created_at: i64,
}

impl<'r> FromRow<'r, PgRow> for RefundTransaction {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            refund_request_id: row.try_get("refund_request_id")?,
            provider: row.try_get("provider")?,
            amount_cents: row.try_get("amount_cents")?,
            currency: row.try_get("currency")?,
            status: row.try_get("status")?,
            raw_response: row
                .try_get::<sqlx::types::Json<serde_json::Value>, _>("raw_response")?
                .0,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl RefundTransaction {
    pub async fn list_for_request(
        conn: &mut PgConnection,
        refund_request_id: Uuid,
    ) -> Result<Vec<RefundTransaction>, sqlx::Error> {
        sqlx::query_as::<_, RefundTransaction>(
            r#"SELECT * FROM "refund_transactions"
               WHERE "refund_request_id" = $1 ORDER BY "created_at""#,
        )
        .bind(refund_request_id)
        .fetch_all(conn)
        .await
    }
}

impl RefundRequest {
    pub async fn find_by_id(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<RefundRequest>, sqlx::Error> {
        sqlx::query_as::<_, RefundRequest>(r#"SELECT * FROM "refund_requests" WHERE "id" = $1"#)
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    async fn lock(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<RefundRequest>, sqlx::Error> {
        sqlx::query_as::<_, RefundRequest>(
            r#"SELECT * FROM "refund_requests" WHERE "id" = $1 FOR UPDATE"#,
        )
        .bind(id)
        .fetch_optional(conn)
        .await
    }
}

/// Reverses a paid order: credits the wallet, revokes enrollments, flips the
/// order and the originating payment attempt, and leaves an audit trail.
/// Refunds always settle to the wallet regardless of how the order was paid.
#[derive(Debug, Clone, Default)]
pub struct RefundEngine;

impl RefundEngine {
    /// Student-facing: opens a pending request for an order they own. The
    /// pending-per-order uniqueness is enforced by the database, so two
    /// concurrent requests collapse into one plus `AlreadyRequested`.
    pub async fn request(
        &self,
        pool: &PgPool,
        order_id: Uuid,
        user_id: Uuid,
        reason: &str,
    ) -> Result<RefundRequest, RefundError> {
        let mut conn = pool.acquire().await?;

        let order = Order::find_by_id(&mut conn, order_id)
            .await?
            .filter(|o| o.user_id == user_id)
            .ok_or(RefundError::OrderNotFound)?;
        if order.payment_status == PaymentStatus::Refunded {
            return Err(RefundError::AlreadyRefunded);
        }

        let inserted = sqlx::query_as::<_, RefundRequest>(
            r#"INSERT INTO "refund_requests"
               ("order_id", "user_id", "payment_id", "requested_cents", "reason", "status")
               VALUES ($1, $2, $3, $4, $5, 'pending')
               RETURNING *"#,
        )
        .bind(order_id)
        .bind(user_id)
        .bind(order.payment_attempt_id)
        .bind(order.total_cents)
        .bind(reason)
        .fetch_one(&mut *conn)
        .await;

        match inserted {
            Ok(request) => Ok(request),
            Err(e) if is_unique_violation(&e) => Err(RefundError::AlreadyRequested),
            Err(e) => Err(e.into()),
        }
    }

    /// Admin approval: moves the money and the entitlements in one
    /// transaction. If the reversal breaks mid-way (database failure, or the
    /// order row is gone) the transaction rolls back and the request is
    /// marked `failed` with the error outside it, so no funds move without
    /// the full reversal. `NotPending`/`AlreadyRefunded` are ordinary
    /// business answers and leave the request untouched.
    pub async fn approve(
        &self,
        pool: &PgPool,
        request_id: Uuid,
        admin_id: Uuid,
    ) -> Result<RefundRequest, RefundError> {
        match self.settle_approval(pool, request_id, admin_id).await {
            Ok(request) => Ok(request),
            Err(e @ (RefundError::Db(_) | RefundError::OrderNotFound)) => {
                tracing::error!(
                    "[RefundEngine::approve] request {} failed, marking: {}",
                    request_id,
                    e
                );
                let _ = sqlx::query(
                    r#"UPDATE "refund_requests" SET "status" = 'failed', "admin_note" = $2
                       WHERE "id" = $1 AND "status" = 'pending'"#,
                )
                .bind(request_id)
                .bind(e.to_string())
                .execute(pool)
                .await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn settle_approval(
        &self,
        pool: &PgPool,
        request_id: Uuid,
        admin_id: Uuid,
    ) -> Result<RefundRequest, RefundError> {
        let mut tx = pool.begin().await?;

        let request = RefundRequest::lock(&mut *tx, request_id)
            .await?
            .ok_or(RefundError::NotPending)?;
        if request.status != RefundStatus::Pending {
            return Err(RefundError::NotPending);
        }

        let order = Order::lock(&mut *tx, request.order_id)
            .await?
            .ok_or(RefundError::OrderNotFound)?;
        if order.payment_status == PaymentStatus::Refunded {
            return Err(RefundError::AlreadyRefunded);
        }

        sqlx::query(
            r#"INSERT INTO "refund_transactions"
               ("refund_request_id", "provider", "amount_cents", "currency", "status", "raw_response")
               VALUES ($1, 'wallet', $2, $3, 'completed', $4)"#,
        )
        .bind(request.id)
        .bind(order.total_cents)
        .bind(&order.currency)
        .bind(sqlx::types::Json(json!({ "approved_by": admin_id })))
        .execute(&mut *tx)
        .await?;

        Order::mark_refunded(&mut *tx, order.id).await?;
        if let Some(attempt_id) = order.payment_attempt_id {
            PaymentAttempt::mark_refunded(&mut *tx, attempt_id).await?;
        }

        Wallet::ensure(&mut *tx, order.user_id).await?;
        Wallet::lock(&mut *tx, order.user_id).await?;
        Wallet::credit(&mut *tx, order.user_id, order.total_cents).await?;

        let items = OrderItem::list_for_order(&mut *tx, order.id).await?;
        let course_ids: Vec<Uuid> = items.iter().map(|i| i.course_id).collect();
        Enrollment::delete_for_courses(&mut *tx, order.user_id, &course_ids).await?;

        LedgerEntry::record(
            &mut *tx,
            order.user_id,
            Some(order.id),
            "wallet_refund_credit",
            order.total_cents,
            &order.currency,
        )
        .await?;

        let request = sqlx::query_as::<_, RefundRequest>(
            r#"UPDATE "refund_requests" SET "status" = 'completed' WHERE "id" = $1 RETURNING *"#,
        )
        .bind(request.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            "[RefundEngine::approve] order {} refunded {} {} to wallet of {}",
            order.id,
            order.total_cents,
            order.currency,
            order.user_id
        );

        Ok(request)
    }

    /// Admin rejection: flips a pending request, moves no funds.
    pub async fn reject(
        &self,
        pool: &PgPool,
        request_id: Uuid,
        note: Option<&str>,
    ) -> Result<RefundRequest, RefundError> {
        sqlx::query_as::<_, RefundRequest>(
            r#"UPDATE "refund_requests"
               SET "status" = 'rejected', "admin_note" = $2
               WHERE "id" = $1 AND "status" = 'pending'
               RETURNING *"#,
        )
        .bind(request_id)
        .bind(note)
        .fetch_optional(pool)
        .await?
        .ok_or(RefundError::NotPending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            RefundStatus::Pending,
            RefundStatus::Completed,
            RefundStatus::Rejected,
            RefundStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<RefundStatus>().unwrap(), status);
        }
        assert!("approved".parse::<RefundStatus>().is_err());
    }
}
