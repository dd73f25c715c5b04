use anyhow::anyhow;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{middleware, Router};
use serde_json::json;
use uuid::Uuid;

use coursehub_runtime::{CartItem, Course};

use crate::middleware::{authenticate, ensure_account};
use crate::response::{AppError, AppSuccess};
use crate::GlobalState;

pub fn cart_routes() -> Router<GlobalState> {
    Router::new()
        .route("/cart/add/{course_id}", post(add_to_cart))
        .route("/cart/remove/{course_id}", post(remove_from_cart))
        .route_layer(middleware::from_fn(authenticate))
}

async fn add_to_cart(
    State(state): State<GlobalState>,
    Extension(user_id_str): Extension<String>,
    Path(course_id): Path<Uuid>,
) -> Result<AppSuccess, AppError> {
    let user = ensure_account(&state.db, &user_id_str).await?;

    let mut conn = state.pool().acquire().await?;
    let course = Course::find_by_id(&mut conn, course_id).await?.ok_or_else(|| {
        AppError::new(
            StatusCode::NOT_FOUND,
            anyhow!("[/cart/add] course not found"),
        )
    })?;
    CartItem::add(&mut conn, user.id, course.id).await?;

    Ok(AppSuccess::new(
        StatusCode::OK,
        "Course added to cart",
        json!({ "course_id": course.id }),
    ))
}

async fn remove_from_cart(
    State(state): State<GlobalState>,
    Extension(user_id_str): Extension<String>,
    Path(course_id): Path<Uuid>,
) -> Result<AppSuccess, AppError> {
    let user = ensure_account(&state.db, &user_id_str).await?;

    let mut conn = state.pool().acquire().await?;
    let removed = CartItem::remove(&mut conn, user.id, course_id).await?;
    if !removed {
        return Err(AppError::new(
            StatusCode::NOT_FOUND,
            anyhow!("[/cart/remove] course not in cart"),
        ));
    }

    Ok(AppSuccess::new(
        StatusCode::OK,
        "Course removed from cart",
        json!({ "course_id": course_id }),
    ))
}
