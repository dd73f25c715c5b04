use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

/// Append-only money-movement audit row. Never updated, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_id: Option<Uuid>,
    pub txn_type: String,
    pub amount_cents: i64,
    pub currency: String,
    pub created_at: i64,
}

impl LedgerEntry {
    pub async fn record(
        conn: &mut PgConnection,
        user_id: Uuid,
        order_id: Option<Uuid>,
        txn_type: &str,
        amount_cents: i64,
        currency: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO "transactions" ("user_id", "order_id", "txn_type", "amount_cents", "currency")
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(user_id)
        .bind(order_id)
        .bind(txn_type)
        .bind(amount_cents)
        .bind(currency)
        .execute(conn)
        .await?;
        Ok(())
    }
}
