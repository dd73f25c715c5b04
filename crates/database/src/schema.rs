use anyhow::Result;
use sqlx::PgPool;

const TRIGGER_FN_SQL: &str = r#"
CREATE OR REPLACE FUNCTION set_updated_at_unix_timestamp()
RETURNS TRIGGER AS $$
BEGIN NEW.updated_at = floor(extract(epoch from now())); RETURN NEW; END;
$$ language 'plpgsql';
"#;

const TABLES: &[(&str, &str)] = &[
    (
        "users",
        r#"CREATE TABLE IF NOT EXISTS "users" (
            "id" UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            "user_id" TEXT NOT NULL,
            "user_aka" TEXT NOT NULL,
            "role" TEXT NOT NULL,
            "is_pro" BOOLEAN NOT NULL DEFAULT FALSE,
            "created_at" BIGINT NOT NULL DEFAULT floor(extract(epoch from now())),
            "updated_at" BIGINT NOT NULL DEFAULT floor(extract(epoch from now()))
        )"#,
    ),
    (
        "courses",
        r#"CREATE TABLE IF NOT EXISTS "courses" (
            "id" UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            "title" TEXT NOT NULL,
            "price_cents" BIGINT NOT NULL,
            "currency" TEXT NOT NULL,
            "stock" BIGINT NOT NULL DEFAULT 0,
            "pro_required" BOOLEAN NOT NULL DEFAULT FALSE,
            "created_at" BIGINT NOT NULL DEFAULT floor(extract(epoch from now())),
            "updated_at" BIGINT NOT NULL DEFAULT floor(extract(epoch from now()))
        )"#,
    ),
    (
        "cart_items",
        r#"CREATE TABLE IF NOT EXISTS "cart_items" (
            "id" UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            "user_id" UUID NOT NULL,
            "course_id" UUID NOT NULL,
            "quantity" BIGINT NOT NULL DEFAULT 1,
            "created_at" BIGINT NOT NULL DEFAULT floor(extract(epoch from now())),
            "updated_at" BIGINT NOT NULL DEFAULT floor(extract(epoch from now()))
        )"#,
    ),
    (
        "wallets",
        r#"CREATE TABLE IF NOT EXISTS "wallets" (
            "user_id" UUID PRIMARY KEY,
            "balance_cents" BIGINT NOT NULL DEFAULT 0 CHECK ("balance_cents" >= 0),
            "created_at" BIGINT NOT NULL DEFAULT floor(extract(epoch from now())),
            "updated_at" BIGINT NOT NULL DEFAULT floor(extract(epoch from now()))
        )"#,
    ),
    (
        "orders",
        r#"CREATE TABLE IF NOT EXISTS "orders" (
            "id" UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            "user_id" UUID NOT NULL,
            "total_cents" BIGINT NOT NULL,
            "currency" TEXT NOT NULL,
            "payment_status" TEXT NOT NULL,
            "order_status" TEXT NOT NULL,
            "payment_method" TEXT NOT NULL,
            "payment_attempt_id" UUID,
            "refunded_cents" BIGINT NOT NULL DEFAULT 0,
            "created_at" BIGINT NOT NULL DEFAULT floor(extract(epoch from now())),
            "updated_at" BIGINT NOT NULL DEFAULT floor(extract(epoch from now()))
        )"#,
    ),
    (
        "order_items",
        r#"CREATE TABLE IF NOT EXISTS "order_items" (
            "id" UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            "order_id" UUID NOT NULL,
            "course_id" UUID NOT NULL,
            "unit_price_cents" BIGINT NOT NULL,
            "quantity" BIGINT NOT NULL DEFAULT 1,
            "created_at" BIGINT NOT NULL DEFAULT floor(extract(epoch from now())),
            "updated_at" BIGINT NOT NULL DEFAULT floor(extract(epoch from now()))
        )"#,
    ),
    (
        "enrollments",
        r#"CREATE TABLE IF NOT EXISTS "enrollments" (
            "id" UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            "course_id" UUID NOT NULL,
            "student_id" UUID NOT NULL,
            "progress" BIGINT NOT NULL DEFAULT 0,
            "created_at" BIGINT NOT NULL DEFAULT floor(extract(epoch from now())),
            "updated_at" BIGINT NOT NULL DEFAULT floor(extract(epoch from now()))
        )"#,
    ),
    (
        "payment_attempts",
        r#"CREATE TABLE IF NOT EXISTS "payment_attempts" (
            "id" UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            "user_id" UUID NOT NULL,
            "provider" TEXT NOT NULL,
            "method" TEXT NOT NULL,
            "status" TEXT NOT NULL,
            "amount_cents" BIGINT NOT NULL,
            "currency" TEXT NOT NULL,
            "ip_address" TEXT NOT NULL,
            "provider_order_id" TEXT,
            "failure_reason" TEXT,
            "created_at" BIGINT NOT NULL DEFAULT floor(extract(epoch from now())),
            "updated_at" BIGINT NOT NULL DEFAULT floor(extract(epoch from now()))
        )"#,
    ),
    (
        "payment_intents",
        r#"CREATE TABLE IF NOT EXISTS "payment_intents" (
            "id" UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            "user_id" UUID NOT NULL,
            "provider" TEXT NOT NULL,
            "method" TEXT NOT NULL,
            "amount_cents" BIGINT NOT NULL,
            "currency" TEXT NOT NULL,
            "provider_ref" TEXT NOT NULL,
            "state" TEXT NOT NULL,
            "confirmed_at" BIGINT,
            "created_at" BIGINT NOT NULL DEFAULT floor(extract(epoch from now())),
            "updated_at" BIGINT NOT NULL DEFAULT floor(extract(epoch from now()))
        )"#,
    ),
    (
        "fraud_events",
        r#"CREATE TABLE IF NOT EXISTS "fraud_events" (
            "id" UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            "user_id" UUID NOT NULL,
            "rule_code" TEXT NOT NULL,
            "severity" TEXT NOT NULL,
            "details" JSONB NOT NULL,
            "created_at" BIGINT NOT NULL DEFAULT floor(extract(epoch from now()))
        )"#,
    ),
    (
        "refund_requests",
        r#"CREATE TABLE IF NOT EXISTS "refund_requests" (
            "id" UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            "order_id" UUID NOT NULL,
            "user_id" UUID NOT NULL,
            "payment_id" UUID,
            "requested_cents" BIGINT NOT NULL,
            "reason" TEXT NOT NULL,
            "status" TEXT NOT NULL,
            "admin_note" TEXT,
            "created_at" BIGINT NOT NULL DEFAULT floor(extract(epoch from now())),
            "updated_at" BIGINT NOT NULL DEFAULT floor(extract(epoch from now()))
        )"#,
    ),
    (
        "refund_transactions",
        r#"CREATE TABLE IF NOT EXISTS "refund_transactions" (
            "id" UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            "refund_request_id" UUID NOT NULL,
            "provider" TEXT NOT NULL,
            "amount_cents" BIGINT NOT NULL,
            "currency" TEXT NOT NULL,
            "status" TEXT NOT NULL,
            "raw_response" JSONB NOT NULL,
            "created_at" BIGINT NOT NULL DEFAULT floor(extract(epoch from now()))
        )"#,
    ),
    (
        "transactions",
        r#"CREATE TABLE IF NOT EXISTS "transactions" (
            "id" UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            "user_id" UUID NOT NULL,
            "order_id" UUID,
            "txn_type" TEXT NOT NULL,
            "amount_cents" BIGINT NOT NULL,
            "currency" TEXT NOT NULL,
            "created_at" BIGINT NOT NULL DEFAULT floor(extract(epoch from now()))
        )"#,
    ),
];

// Tables whose rows are mutated in place get the updated_at trigger.
const TRIGGERED_TABLES: &[&str] = &[
    "users",
    "courses",
    "cart_items",
    "wallets",
    "orders",
    "payment_attempts",
    "payment_intents",
    "refund_requests",
];

const INDEXES_SQL: &[&str] = &[
    r#"CREATE UNIQUE INDEX IF NOT EXISTS "idx_users_user_id" ON "users" ("user_id")"#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS "idx_cart_items_user_course" ON "cart_items" ("user_id", "course_id")"#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS "idx_enrollments_course_student" ON "enrollments" ("course_id", "student_id")"#,
    r#"CREATE INDEX IF NOT EXISTS "idx_payment_attempts_provider_order_id" ON "payment_attempts" ("provider_order_id")"#,
    r#"CREATE INDEX IF NOT EXISTS "idx_payment_attempts_user_created" ON "payment_attempts" ("user_id", "created_at")"#,
    r#"CREATE INDEX IF NOT EXISTS "idx_payment_attempts_ip_created" ON "payment_attempts" ("ip_address", "created_at")"#,
    r#"CREATE INDEX IF NOT EXISTS "idx_payment_intents_provider_ref" ON "payment_intents" ("provider_ref")"#,
    r#"CREATE INDEX IF NOT EXISTS "idx_orders_user_id" ON "orders" ("user_id")"#,
    r#"CREATE INDEX IF NOT EXISTS "idx_order_items_order_id" ON "order_items" ("order_id")"#,
    // At most one pending refund request per order, enforced by the database
    // rather than a lookup-before-insert check.
    r#"CREATE UNIQUE INDEX IF NOT EXISTS "idx_refund_requests_pending_order" ON "refund_requests" ("order_id") WHERE "status" = 'pending'"#,
    r#"CREATE INDEX IF NOT EXISTS "idx_transactions_user_id" ON "transactions" ("user_id")"#,
];

/// Creates (and optionally drops first) every table, trigger and index the
/// service uses. Safe to run repeatedly.
pub async fn bootstrap_schema(pool: &PgPool, drop_tables: bool, create_tables: bool) -> Result<()> {
    if drop_tables {
        for (name, _) in TABLES.iter().rev() {
            let drop_sql = format!("DROP TABLE IF EXISTS \"{}\" CASCADE", name);
            if let Err(e) = sqlx::query(&drop_sql).execute(pool).await {
                tracing::warn!("[bootstrap_schema] Failed to drop table '{}': {:?}", name, e);
            }
        }
    }

    if create_tables {
        sqlx::query(TRIGGER_FN_SQL).execute(pool).await?;

        for (_, create_sql) in TABLES {
            sqlx::query(create_sql).execute(pool).await?;
        }

        for name in TRIGGERED_TABLES {
            let trigger_sql = format!(
                "CREATE OR REPLACE TRIGGER \"set_updated_at_{name}\" \
                 BEFORE UPDATE ON \"{name}\" FOR EACH ROW \
                 EXECUTE FUNCTION set_updated_at_unix_timestamp()"
            );
            sqlx::query(&trigger_sql).execute(pool).await?;
        }

        for index_sql in INDEXES_SQL {
            sqlx::query(index_sql).execute(pool).await?;
        }
    }

    Ok(())
}
