use anyhow::Result;
use axum::Router;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use coursehub_service_api::{
    cart_routes, checkout_routes, order_routes, payment_routes, refund_routes, setup_tracing,
    GlobalState,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    setup_tracing();

    let cors = CorsLayer::very_permissive();
    let trace = TraceLayer::new_for_http();

    // Connects and bootstraps the schema before anything takes traffic.
    let global_state = GlobalState::new().await?;

    let app = Router::new()
        .merge(cart_routes())
        .merge(checkout_routes())
        .merge(order_routes())
        .merge(payment_routes())
        .merge(refund_routes())
        .layer(TimeoutLayer::new(std::time::Duration::from_secs(60)))
        .layer(cors)
        .layer(trace)
        .with_state(global_state);

    let port: u16 = std::env::var("PORT")
        .unwrap_or("3033".into())
        .parse()
        .expect("failed to convert to number");

    let listener = tokio::net::TcpListener::bind(format!(":::{port}")).await?;

    tracing::info!("LISTENING ON {port}");
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
