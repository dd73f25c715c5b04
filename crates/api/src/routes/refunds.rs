use anyhow::anyhow;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{middleware, Json, Router};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use coursehub_runtime::RefundError;

use crate::middleware::{authenticate, ensure_account, require_admin};
use crate::response::{AppError, AppSuccess};
use crate::GlobalState;

pub fn refund_routes() -> Router<GlobalState> {
    Router::new()
        .route("/orders/{order_id}/refund-request", post(request_refund))
        .route("/admin/refunds/{request_id}/approve", post(approve_refund))
        .route("/admin/refunds/{request_id}/reject", post(reject_refund))
        .route_layer(middleware::from_fn(authenticate))
}

fn refund_error(prefix: &str, e: RefundError) -> AppError {
    let status = match &e {
        RefundError::OrderNotFound => StatusCode::NOT_FOUND,
        RefundError::NotPending
        | RefundError::AlreadyRefunded
        | RefundError::AlreadyRequested => StatusCode::CONFLICT,
        RefundError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    AppError::new(status, anyhow!("{} {}", prefix, e))
}

#[derive(Debug, Deserialize)]
struct RefundRequestPayload {
    reason: String,
}

async fn request_refund(
    State(state): State<GlobalState>,
    Extension(user_id_str): Extension<String>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<RefundRequestPayload>,
) -> Result<AppSuccess, AppError> {
    let user = ensure_account(&state.db, &user_id_str).await?;

    let request = state
        .refunds
        .request(state.pool(), order_id, user.id, &payload.reason)
        .await
        .map_err(|e| refund_error("[/refund-request]", e))?;

    Ok(AppSuccess::new(
        StatusCode::OK,
        "Refund requested",
        json!({ "request": request }),
    ))
}

async fn approve_refund(
    State(state): State<GlobalState>,
    Extension(user_id_str): Extension<String>,
    Path(request_id): Path<Uuid>,
) -> Result<AppSuccess, AppError> {
    let admin = require_admin(&state.db, &user_id_str).await?;

    let request = state
        .refunds
        .approve(state.pool(), request_id, admin.id)
        .await
        .map_err(|e| refund_error("[/admin/refunds/approve]", e))?;

    Ok(AppSuccess::new(
        StatusCode::OK,
        "Refund approved",
        json!({ "request": request }),
    ))
}

#[derive(Debug, Deserialize)]
struct RejectPayload {
    note: Option<String>,
}

async fn reject_refund(
    State(state): State<GlobalState>,
    Extension(user_id_str): Extension<String>,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<RejectPayload>,
) -> Result<AppSuccess, AppError> {
    require_admin(&state.db, &user_id_str).await?;

    let request = state
        .refunds
        .reject(state.pool(), request_id, payload.note.as_deref())
        .await
        .map_err(|e| refund_error("[/admin/refunds/reject]", e))?;

    Ok(AppSuccess::new(
        StatusCode::OK,
        "Refund rejected",
        json!({ "request": request }),
    ))
}
