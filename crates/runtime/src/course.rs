use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Course {
    pub id: Uuid,
    pub title: String,
    pub price_cents: i64,
    pub currency: String,
    pub stock: i64,
    pub pro_required: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Course {
    pub async fn find_by_id(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Course>, sqlx::Error> {
        sqlx::query_as::<_, Course>(r#"SELECT * FROM "courses" WHERE "id" = $1"#)
            .bind(id)
            .fetch_optional(conn)
            .await
    }
}
