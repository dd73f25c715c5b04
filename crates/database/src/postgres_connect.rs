use sqlx::PgPool;

static POOL: tokio::sync::OnceCell<PgPool> = tokio::sync::OnceCell::const_new();

/// Connects to the default database, creating tables on first use when asked.
///
/// The pool is process-wide; every caller after the first gets the same
/// `'static` handle regardless of the flags it passes.
pub async fn connect(drop_tables: bool, create_tables: bool) -> &'static PgPool {
    POOL.get_or_init(|| async {
        let database_url =
            std::env::var("DATABASE_URL").expect("DATABASE_URL environment variable not set");

        let pool = PgPool::connect(&database_url)
            .await
            .expect("Failed to connect to default database");

        if drop_tables || create_tables {
            crate::schema::bootstrap_schema(&pool, drop_tables, create_tables)
                .await
                .expect("Failed to bootstrap database schema");
        }

        pool
    })
    .await
}
