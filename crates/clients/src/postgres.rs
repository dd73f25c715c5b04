use coursehub_common::define_module_client;
use coursehub_database::connect;
use sqlx::PgPool;

define_module_client! {
    (struct PostgresClient, "postgres")
    client_type: &'static PgPool,
    env: ["DATABASE_URL"],
    setup: async {
        connect(false, true).await
    }
}
