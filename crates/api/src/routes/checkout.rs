use axum::extract::{Extension, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Redirect;
use axum::routing::post;
use axum::{middleware, Json, Router};
use anyhow::anyhow;
use serde::Deserialize;
use uuid::Uuid;

use coursehub_runtime::{AssessmentContext, CheckoutError, PaymentMethod};

use crate::middleware::{authenticate, ensure_account};
use crate::response::AppError;
use crate::utils::client_ip;
use crate::GlobalState;

pub fn checkout_routes() -> Router<GlobalState> {
    Router::new()
        .route("/checkout", post(checkout))
        .route_layer(middleware::from_fn(authenticate))
}

#[derive(Debug, Deserialize)]
struct CheckoutPayload {
    payment_method: String,
    payment_intent_id: Option<Uuid>,
}

fn error_redirect(code: &str) -> Redirect {
    Redirect::to(&format!("/cart?checkout_error={}", code))
}

/// The checkout endpoint always answers with a redirect: to the new order on
/// success, back to the cart with an error code otherwise. Database failures
/// are the one class surfaced as a plain 500.
async fn checkout(
    State(state): State<GlobalState>,
    Extension(user_id_str): Extension<String>,
    headers: HeaderMap,
    Json(payload): Json<CheckoutPayload>,
) -> Result<Redirect, AppError> {
    let user = ensure_account(&state.db, &user_id_str).await?;

    let method = match payload.payment_method.parse::<PaymentMethod>() {
        Ok(method) => method,
        Err(_) => return Ok(error_redirect(CheckoutError::InvalidPaymentMethod.as_code())),
    };

    // Pro-gated courses are checked up front; the engine itself is
    // subscription-agnostic.
    let mut conn = state.pool().acquire().await?;
    let needs_pro: bool = sqlx::query_scalar(
        r#"SELECT EXISTS(
               SELECT 1 FROM "cart_items"
               JOIN "courses" ON "courses"."id" = "cart_items"."course_id"
               WHERE "cart_items"."user_id" = $1 AND "courses"."pro_required"
           )"#,
    )
    .bind(user.id)
    .fetch_one(&mut *conn)
    .await?;
    drop(conn);
    if needs_pro && !user.is_pro {
        return Ok(error_redirect(CheckoutError::ProRequired.as_code()));
    }

    // The wallet path moves funds here, so it gets its own assessment and
    // attempt row; external methods were assessed when the provider round
    // trip started.
    let wallet_attempt_id = if method == PaymentMethod::Wallet {
        let (_, total_cents) = state
            .checkout
            .cart_preview(state.pool(), user.id)
            .await
            .map_err(checkout_db_error)?;
        let assessment = state
            .fraud
            .assess(
                state.pool(),
                user.id,
                &client_ip(&headers),
                &AssessmentContext {
                    amount_cents: total_cents,
                    currency: state.checkout.currency().to_string(),
                    method: Some(PaymentMethod::Wallet),
                },
            )
            .await
            .map_err(|e| AppError::new(StatusCode::INTERNAL_SERVER_ERROR, e))?;
        if assessment.is_blocked() {
            return Err(AppError::new(
                StatusCode::FORBIDDEN,
                anyhow!("[/checkout] payment blocked by risk rules"),
            ));
        }
        assessment.attempt.map(|a| a.id)
    } else {
        None
    };

    match state
        .checkout
        .checkout(
            state.pool(),
            user.id,
            method,
            payload.payment_intent_id,
            wallet_attempt_id,
        )
        .await
    {
        Ok(receipt) => Ok(Redirect::to(&format!(
            "/orders/{}?ordered=1",
            receipt.order_id
        ))),
        Err(e @ (CheckoutError::Db(_) | CheckoutError::Internal(_))) => Err(AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            anyhow!(e),
        )),
        Err(business) => Ok(error_redirect(business.as_code())),
    }
}

fn checkout_db_error(e: CheckoutError) -> AppError {
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, anyhow!(e))
}
