use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

/// Per-user balance in minor units. The schema enforces `balance_cents >= 0`;
/// every mutation happens inside an engine transaction while the row is held
/// under `FOR UPDATE`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Wallet {
    pub user_id: Uuid,
    pub balance_cents: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Wallet {
    /// Provisions the wallet row on first touch so it can be locked.
    pub async fn ensure(conn: &mut PgConnection, user_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO "wallets" ("user_id", "balance_cents")
               VALUES ($1, 0)
               ON CONFLICT ("user_id") DO NOTHING"#,
        )
        .bind(user_id)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Row-locks and returns the wallet. Callers must be inside a
    /// transaction and must have called `ensure` first.
    pub async fn lock(conn: &mut PgConnection, user_id: Uuid) -> Result<Wallet, sqlx::Error> {
        sqlx::query_as::<_, Wallet>(
            r#"SELECT * FROM "wallets" WHERE "user_id" = $1 FOR UPDATE"#,
        )
        .bind(user_id)
        .fetch_one(conn)
        .await
    }

    pub async fn debit(
        conn: &mut PgConnection,
        user_id: Uuid,
        amount_cents: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"UPDATE "wallets" SET "balance_cents" = "balance_cents" - $2 WHERE "user_id" = $1"#,
        )
        .bind(user_id)
        .bind(amount_cents)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn credit(
        conn: &mut PgConnection,
        user_id: Uuid,
        amount_cents: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"UPDATE "wallets" SET "balance_cents" = "balance_cents" + $2 WHERE "user_id" = $1"#,
        )
        .bind(user_id)
        .bind(amount_cents)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn balance_of(
        conn: &mut PgConnection,
        user_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        let balance: Option<i64> = sqlx::query_scalar(
            r#"SELECT "balance_cents" FROM "wallets" WHERE "user_id" = $1"#,
        )
        .bind(user_id)
        .fetch_optional(conn)
        .await?;
        Ok(balance.unwrap_or(0))
    }
}
