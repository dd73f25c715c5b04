use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::error::{decode_text_enum, InvalidEnumValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Wallet,
    Paypal,
    Stripe,
    Nets,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::Paypal => "paypal",
            PaymentMethod::Stripe => "stripe",
            PaymentMethod::Nets => "nets",
        }
    }

    /// Tag recorded in provider-scoped ledger rows.
    pub fn provider_tag(&self) -> &'static str {
        match self {
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::Paypal => "paypal",
            PaymentMethod::Stripe => "stripe",
            PaymentMethod::Nets => "nets_qr",
        }
    }

    /// Ledger transaction type written on a successful checkout.
    pub fn checkout_txn_type(&self) -> String {
        format!("{}_checkout", self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = InvalidEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wallet" => Ok(PaymentMethod::Wallet),
            "paypal" => Ok(PaymentMethod::Paypal),
            "stripe" => Ok(PaymentMethod::Stripe),
            "nets" => Ok(PaymentMethod::Nets),
            other => Err(InvalidEnumValue(other.to_string())),
        }
    }
}

/// Lifecycle of one payment attempt. `Initiated` moves to exactly one of the
/// terminal states; `Refunded` is only ever set by the refund engine on a
/// previously succeeded attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Initiated,
    Succeeded,
    Failed,
    Refunded,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Initiated => "initiated",
            AttemptStatus::Succeeded => "succeeded",
            AttemptStatus::Failed => "failed",
            AttemptStatus::Refunded => "refunded",
        }
    }
}

impl FromStr for AttemptStatus {
    type Err = InvalidEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(AttemptStatus::Initiated),
            "succeeded" => Ok(AttemptStatus::Succeeded),
            "failed" => Ok(AttemptStatus::Failed),
            "refunded" => Ok(AttemptStatus::Refunded),
            other => Err(InvalidEnumValue(other.to_string())),
        }
    }
}

/// Durable record of a payment attempt against an external network (or the
/// wallet). Append/update only; rows are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub method: String,
    pub status: AttemptStatus,
    pub amount_cents: i64,
    pub currency: String,
    pub ip_address: String,
    pub provider_order_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl<'r> FromRow<'r, PgRow> for PaymentAttempt {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            provider: row.try_get("provider")?,
            method: row.try_get("method")?,
            status: decode_text_enum(row, "status")?,
            amount_cents: row.try_get("amount_cents")?,
            currency: row.try_get("currency")?,
            ip_address: row.try_get("ip_address")?,
            provider_order_id: row.try_get("provider_order_id")?,
            failure_reason: row.try_get("failure_reason")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl PaymentAttempt {
    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        conn: &mut PgConnection,
        user_id: Uuid,
        method: PaymentMethod,
        status: AttemptStatus,
        amount_cents: i64,
        currency: &str,
        ip_address: &str,
        failure_reason: Option<&str>,
    ) -> Result<PaymentAttempt, sqlx::Error> {
        sqlx::query_as::<_, PaymentAttempt>(
            r#"INSERT INTO "payment_attempts"
               ("user_id", "provider", "method", "status", "amount_cents", "currency", "ip_address", "failure_reason")
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               RETURNING *"#,
        )
        .bind(user_id)
        .bind(method.provider_tag())
        .bind(method.as_str())
        .bind(status.as_str())
        .bind(amount_cents)
        .bind(currency)
        .bind(ip_address)
        .bind(failure_reason)
        .fetch_one(conn)
        .await
    }

    /// Links the attempt to the provider's handle once the provider call
    /// has returned one.
    pub async fn attach_provider_order_id(
        conn: &mut PgConnection,
        attempt_id: Uuid,
        provider_order_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"UPDATE "payment_attempts" SET "provider_order_id" = $2 WHERE "id" = $1"#,
        )
        .bind(attempt_id)
        .bind(provider_order_id)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn find_by_provider_order_id(
        conn: &mut PgConnection,
        provider: &str,
        provider_order_id: &str,
    ) -> Result<Option<PaymentAttempt>, sqlx::Error> {
        sqlx::query_as::<_, PaymentAttempt>(
            r#"SELECT * FROM "payment_attempts"
               WHERE "provider" = $1 AND "provider_order_id" = $2"#,
        )
        .bind(provider)
        .bind(provider_order_id)
        .fetch_optional(conn)
        .await
    }

    /// Moves one of the user's `initiated` attempts to its terminal state.
    /// Idempotent: a repeat settlement for the same provider_order_id, or a
    /// settlement by anyone but the owner, matches zero rows and returns
    /// false, so the first terminal state sticks.
    pub async fn settle(
        conn: &mut PgConnection,
        user_id: Uuid,
        provider: &str,
        provider_order_id: &str,
        succeeded: bool,
        failure_reason: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let status = if succeeded {
            AttemptStatus::Succeeded
        } else {
            AttemptStatus::Failed
        };
        let result = sqlx::query(
            r#"UPDATE "payment_attempts"
               SET "status" = $4, "failure_reason" = $5
               WHERE "user_id" = $1 AND "provider" = $2 AND "provider_order_id" = $3
                 AND "status" = 'initiated'"#,
        )
        .bind(user_id)
        .bind(provider)
        .bind(provider_order_id)
        .bind(status.as_str())
        .bind(failure_reason)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Settles an attempt by id. Used for the wallet path, which never gets
    /// a provider handle; same idempotence rule as `settle`.
    pub async fn settle_by_id(
        conn: &mut PgConnection,
        attempt_id: Uuid,
        succeeded: bool,
        failure_reason: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let status = if succeeded {
            AttemptStatus::Succeeded
        } else {
            AttemptStatus::Failed
        };
        let result = sqlx::query(
            r#"UPDATE "payment_attempts"
               SET "status" = $2, "failure_reason" = $3
               WHERE "id" = $1 AND "status" = 'initiated'"#,
        )
        .bind(attempt_id)
        .bind(status.as_str())
        .bind(failure_reason)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Marks a settled attempt refunded; used only by refund approval.
    pub async fn mark_refunded(
        conn: &mut PgConnection,
        attempt_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(r#"UPDATE "payment_attempts" SET "status" = 'refunded' WHERE "id" = $1"#)
            .bind(attempt_id)
            .execute(conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_round_trips_through_text() {
        for method in [
            PaymentMethod::Wallet,
            PaymentMethod::Paypal,
            PaymentMethod::Stripe,
            PaymentMethod::Nets,
        ] {
            assert_eq!(method.as_str().parse::<PaymentMethod>().unwrap(), method);
        }
        assert!("venmo".parse::<PaymentMethod>().is_err());
    }

    #[test]
    fn checkout_txn_type_is_method_scoped() {
        assert_eq!(PaymentMethod::Wallet.checkout_txn_type(), "wallet_checkout");
        assert_eq!(PaymentMethod::Nets.checkout_txn_type(), "nets_checkout");
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            AttemptStatus::Initiated,
            AttemptStatus::Succeeded,
            AttemptStatus::Failed,
            AttemptStatus::Refunded,
        ] {
            assert_eq!(status.as_str().parse::<AttemptStatus>().unwrap(), status);
        }
    }
}
