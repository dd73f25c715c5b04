use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::error::{decode_text_enum, InvalidEnumValue};
use crate::payment::PaymentMethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = InvalidEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paid" => Ok(PaymentStatus::Paid),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(InvalidEnumValue(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Completed,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Completed => "completed",
            OrderStatus::Refunded => "refunded",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = InvalidEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(OrderStatus::Completed),
            "refunded" => Ok(OrderStatus::Refunded),
            other => Err(InvalidEnumValue(other.to_string())),
        }
    }
}

/// Snapshot of a settled cart. Item prices are fixed at purchase time and
/// never re-read from the live course; a refund flips the status fields and
/// `refunded_cents` but leaves `total_cents` and the item rows untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub total_cents: i64,
    pub currency: String,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    pub payment_method: String,
    pub payment_attempt_id: Option<Uuid>,
    pub refunded_cents: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl<'r> FromRow<'r, PgRow> for Order {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            total_cents: row.try_get("total_cents")?,
            currency: row.try_get("currency")?,
            payment_status: decode_text_enum(row, "payment_status")?,
            order_status: decode_text_enum(row, "order_status")?,
            payment_method: row.try_get("payment_method")?,
            payment_attempt_id: row.try_get("payment_attempt_id")?,
            refunded_cents: row.try_get("refunded_cents")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub course_id: Uuid,
    pub unit_price_cents: i64,
    pub quantity: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Order {
    pub async fn insert(
        conn: &mut PgConnection,
        user_id: Uuid,
        total_cents: i64,
        currency: &str,
        method: PaymentMethod,
        payment_attempt_id: Option<Uuid>,
    ) -> Result<Order, sqlx::Error> {
        sqlx::query_as::<_, Order>(
            r#"INSERT INTO "orders"
               ("user_id", "total_cents", "currency", "payment_status", "order_status", "payment_method", "payment_attempt_id")
               VALUES ($1, $2, $3, 'paid', 'completed', $4, $5)
               RETURNING *"#,
        )
        .bind(user_id)
        .bind(total_cents)
        .bind(currency)
        .bind(method.as_str())
        .bind(payment_attempt_id)
        .fetch_one(conn)
        .await
    }

    pub async fn find_by_id(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Order>, sqlx::Error> {
        sqlx::query_as::<_, Order>(r#"SELECT * FROM "orders" WHERE "id" = $1"#)
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// Row-locks the order for refund settlement.
    pub async fn lock(conn: &mut PgConnection, id: Uuid) -> Result<Option<Order>, sqlx::Error> {
        sqlx::query_as::<_, Order>(r#"SELECT * FROM "orders" WHERE "id" = $1 FOR UPDATE"#)
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    pub async fn mark_refunded(conn: &mut PgConnection, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"UPDATE "orders"
               SET "refunded_cents" = "total_cents",
                   "payment_status" = 'refunded',
                   "order_status" = 'refunded'
               WHERE "id" = $1"#,
        )
        .bind(id)
        .execute(conn)
        .await?;
        Ok(())
    }
}

impl OrderItem {
    pub async fn insert(
        conn: &mut PgConnection,
        order_id: Uuid,
        course_id: Uuid,
        unit_price_cents: i64,
        quantity: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO "order_items" ("order_id", "course_id", "unit_price_cents", "quantity")
               VALUES ($1, $2, $3, $4)"#,
        )
        .bind(order_id)
        .bind(course_id)
        .bind(unit_price_cents)
        .bind(quantity)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn list_for_order(
        conn: &mut PgConnection,
        order_id: Uuid,
    ) -> Result<Vec<OrderItem>, sqlx::Error> {
        sqlx::query_as::<_, OrderItem>(
            r#"SELECT * FROM "order_items" WHERE "order_id" = $1 ORDER BY "created_at""#,
        )
        .bind(order_id)
        .fetch_all(conn)
        .await
    }
}
