use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::error::{decode_text_enum, InvalidEnumValue};
use crate::payment::PaymentMethod;

/// Server-side state of an external payment confirmation. Replaces the old
/// session-held "pending payment" blob: the provider round trip confirms the
/// intent, and checkout consumes it exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentState {
    Created,
    Confirmed,
    Consumed,
}

impl IntentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentState::Created => "created",
            IntentState::Confirmed => "confirmed",
            IntentState::Consumed => "consumed",
        }
    }
}

impl FromStr for IntentState {
    type Err = InvalidEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(IntentState::Created),
            "confirmed" => Ok(IntentState::Confirmed),
            "consumed" => Ok(IntentState::Consumed),
            other => Err(InvalidEnumValue(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub method: String,
    pub amount_cents: i64,
    pub currency: String,
    /// The provider's order/session/retrieval-ref handle.
    pub provider_ref: String,
    pub state: IntentState,
    pub confirmed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl<'r> FromRow<'r, PgRow> for PaymentIntent {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            provider: row.try_get("provider")?,
            method: row.try_get("method")?,
            amount_cents: row.try_get("amount_cents")?,
            currency: row.try_get("currency")?,
            provider_ref: row.try_get("provider_ref")?,
            state: decode_text_enum(row, "state")?,
            confirmed_at: row.try_get("confirmed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl PaymentIntent {
    pub async fn create(
        conn: &mut PgConnection,
        user_id: Uuid,
        method: PaymentMethod,
        amount_cents: i64,
        currency: &str,
        provider_ref: &str,
    ) -> Result<PaymentIntent, sqlx::Error> {
        sqlx::query_as::<_, PaymentIntent>(
            r#"INSERT INTO "payment_intents"
               ("user_id", "provider", "method", "amount_cents", "currency", "provider_ref", "state")
               VALUES ($1, $2, $3, $4, $5, $6, 'created')
               RETURNING *"#,
        )
        .bind(user_id)
        .bind(method.provider_tag())
        .bind(method.as_str())
        .bind(amount_cents)
        .bind(currency)
        .bind(provider_ref)
        .fetch_one(conn)
        .await
    }

    pub async fn find_by_provider_ref(
        conn: &mut PgConnection,
        provider: &str,
        provider_ref: &str,
    ) -> Result<Option<PaymentIntent>, sqlx::Error> {
        sqlx::query_as::<_, PaymentIntent>(
            r#"SELECT * FROM "payment_intents" WHERE "provider" = $1 AND "provider_ref" = $2"#,
        )
        .bind(provider)
        .bind(provider_ref)
        .fetch_optional(conn)
        .await
    }

    /// Marks the user's intent confirmed once the provider reports the funds
    /// captured. Re-confirming an already confirmed intent is a no-op; a
    /// consumed intent is never revived, and only the owner can confirm.
    pub async fn confirm_by_ref(
        conn: &mut PgConnection,
        user_id: Uuid,
        provider: &str,
        provider_ref: &str,
        confirmed_at: i64,
    ) -> Result<Option<PaymentIntent>, sqlx::Error> {
        sqlx::query_as::<_, PaymentIntent>(
            r#"UPDATE "payment_intents"
               SET "state" = 'confirmed',
                   "confirmed_at" = COALESCE("confirmed_at", $4)
               WHERE "user_id" = $1 AND "provider" = $2 AND "provider_ref" = $3
                 AND "state" IN ('created', 'confirmed')
               RETURNING *"#,
        )
        .bind(user_id)
        .bind(provider)
        .bind(provider_ref)
        .bind(confirmed_at)
        .fetch_optional(conn)
        .await
    }

    /// Row-locks the intent for consumption inside the checkout transaction.
    pub async fn lock(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<PaymentIntent>, sqlx::Error> {
        sqlx::query_as::<_, PaymentIntent>(
            r#"SELECT * FROM "payment_intents" WHERE "id" = $1 FOR UPDATE"#,
        )
        .bind(id)
        .fetch_optional(conn)
        .await
    }

    pub async fn mark_consumed(conn: &mut PgConnection, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(r#"UPDATE "payment_intents" SET "state" = 'consumed' WHERE "id" = $1"#)
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Validates the confirmation against what checkout is about to settle.
    /// The TTL closes the window where a stale confirmation from an earlier
    /// attempt could be replayed.
    pub fn is_consumable(
        &self,
        user_id: Uuid,
        method: PaymentMethod,
        total_cents: i64,
        currency: &str,
        now: i64,
        ttl_secs: i64,
    ) -> bool {
        if self.user_id != user_id
            || self.state != IntentState::Confirmed
            || self.method != method.as_str()
            || self.amount_cents != total_cents
            || self.currency != currency
        {
            return false;
        }
        match self.confirmed_at {
            Some(confirmed_at) => now - confirmed_at <= ttl_secs,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(state: IntentState, confirmed_at: Option<i64>) -> PaymentIntent {
        PaymentIntent {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            provider: "paypal".to_string(),
            method: "paypal".to_string(),
            amount_cents: 5000,
            currency: "USD".to_string(),
            provider_ref: "ORDER-1".to_string(),
            state,
            confirmed_at,
            created_at: 1_000,
            updated_at: 1_000,
        }
    }

    #[test]
    fn consumable_only_when_confirmed_and_matching() {
        let it = intent(IntentState::Confirmed, Some(1_000));
        let uid = it.user_id;
        assert!(it.is_consumable(uid, PaymentMethod::Paypal, 5000, "USD", 1_100, 1_800));
        // wrong user
        assert!(!it.is_consumable(Uuid::new_v4(), PaymentMethod::Paypal, 5000, "USD", 1_100, 1_800));
        // wrong method
        assert!(!it.is_consumable(uid, PaymentMethod::Stripe, 5000, "USD", 1_100, 1_800));
        // wrong amount
        assert!(!it.is_consumable(uid, PaymentMethod::Paypal, 4999, "USD", 1_100, 1_800));
        // wrong currency
        assert!(!it.is_consumable(uid, PaymentMethod::Paypal, 5000, "SGD", 1_100, 1_800));
    }

    #[test]
    fn unconfirmed_or_consumed_is_not_consumable() {
        let created = intent(IntentState::Created, None);
        assert!(!created.is_consumable(created.user_id, PaymentMethod::Paypal, 5000, "USD", 1_100, 1_800));

        let consumed = intent(IntentState::Consumed, Some(1_000));
        assert!(!consumed.is_consumable(consumed.user_id, PaymentMethod::Paypal, 5000, "USD", 1_100, 1_800));
    }

    #[test]
    fn stale_confirmation_expires() {
        let it = intent(IntentState::Confirmed, Some(1_000));
        let uid = it.user_id;
        assert!(it.is_consumable(uid, PaymentMethod::Paypal, 5000, "USD", 2_800, 1_800));
        assert!(!it.is_consumable(uid, PaymentMethod::Paypal, 5000, "USD", 2_801, 1_800));
    }
}
