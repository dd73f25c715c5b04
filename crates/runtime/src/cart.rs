use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

/// One course in a user's cart. The cart itself is implicit: it exists
/// whenever the user has items, and quantity is fixed at 1 for the
/// supported purchase path.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CartItem {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub quantity: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl CartItem {
    /// Adds a course to the cart; re-adding an existing line is a no-op.
    pub async fn add(
        conn: &mut PgConnection,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO "cart_items" ("user_id", "course_id", "quantity")
               VALUES ($1, $2, 1)
               ON CONFLICT ("user_id", "course_id") DO NOTHING"#,
        )
        .bind(user_id)
        .bind(course_id)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn remove(
        conn: &mut PgConnection,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"DELETE FROM "cart_items" WHERE "user_id" = $1 AND "course_id" = $2"#,
        )
        .bind(user_id)
        .bind(course_id)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_for_user(
        conn: &mut PgConnection,
        user_id: Uuid,
    ) -> Result<Vec<CartItem>, sqlx::Error> {
        sqlx::query_as::<_, CartItem>(
            r#"SELECT * FROM "cart_items" WHERE "user_id" = $1 ORDER BY "created_at""#,
        )
        .bind(user_id)
        .fetch_all(conn)
        .await
    }
}
