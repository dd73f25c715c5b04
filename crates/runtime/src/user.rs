use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::error::{decode_text_enum, InvalidEnumValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    #[default]
    Student,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Student => "student",
        }
    }
}

impl FromStr for UserRole {
    type Err = InvalidEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserRole::Admin),
            "student" => Ok(UserRole::Student),
            other => Err(InvalidEnumValue(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// Identity from the auth layer, e.g. `email_alice@example.com`.
    pub user_id: String,
    pub user_aka: String,
    pub role: UserRole,
    pub is_pro: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl<'r> FromRow<'r, PgRow> for User {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            user_aka: row.try_get("user_aka")?,
            role: decode_text_enum(row, "role")?,
            is_pro: row.try_get("is_pro")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Provisions an account for an externally authenticated identity on
    /// first contact.
    pub async fn get_or_create(
        conn: &mut PgConnection,
        external_id: &str,
        aka: &str,
    ) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"INSERT INTO "users" ("user_id", "user_aka", "role")
               VALUES ($1, $2, $3)
               ON CONFLICT ("user_id") DO UPDATE SET "user_id" = EXCLUDED."user_id"
               RETURNING *"#,
        )
        .bind(external_id)
        .bind(aka)
        .bind(UserRole::Student.as_str())
        .fetch_one(conn)
        .await
    }
}
