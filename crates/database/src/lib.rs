mod postgres_connect;
mod schema;

pub use postgres_connect::connect;
pub use schema::bootstrap_schema;
