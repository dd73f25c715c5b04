use anyhow::anyhow;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{middleware, Router};
use serde_json::json;
use uuid::Uuid;

use coursehub_runtime::{Order, OrderItem};

use crate::middleware::{authenticate, ensure_account};
use crate::response::{AppError, AppSuccess};
use crate::GlobalState;

pub fn order_routes() -> Router<GlobalState> {
    Router::new()
        .route("/orders/{order_id}", get(get_order))
        .route_layer(middleware::from_fn(authenticate))
}

async fn get_order(
    State(state): State<GlobalState>,
    Extension(user_id_str): Extension<String>,
    Path(order_id): Path<Uuid>,
) -> Result<AppSuccess, AppError> {
    let user = ensure_account(&state.db, &user_id_str).await?;

    let mut conn = state.pool().acquire().await?;
    let order = Order::find_by_id(&mut conn, order_id)
        .await?
        .filter(|o| o.user_id == user.id)
        .ok_or_else(|| {
            AppError::new(StatusCode::NOT_FOUND, anyhow!("[/orders] order not found"))
        })?;
    let items = OrderItem::list_for_order(&mut conn, order.id).await?;

    Ok(AppSuccess::new(
        StatusCode::OK,
        "Order found",
        json!({ "order": order, "items": items }),
    ))
}
