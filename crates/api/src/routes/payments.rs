use anyhow::anyhow;
use axum::extract::{Extension, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use coursehub_clients::{with_retries, ProviderPaymentState};
use coursehub_common::get_current_timestamp;
use coursehub_runtime::{
    Assessment, AssessmentContext, PaymentAttempt, PaymentIntent, PaymentMethod, User,
};

use crate::middleware::{authenticate, ensure_account};
use crate::response::{AppError, AppSuccess};
use crate::utils::client_ip;
use crate::GlobalState;

pub fn payment_routes() -> Router<GlobalState> {
    Router::new()
        .route("/api/paypal/create-order", post(paypal_create_order))
        .route("/api/paypal/capture-order", post(paypal_capture_order))
        .route(
            "/api/stripe/create-checkout-session",
            post(stripe_create_session),
        )
        .route("/payments/stripe/success", get(stripe_success))
        .route("/payments/nets/request", post(nets_request))
        .route("/payments/nets/status/{retrieval_ref}", get(nets_status))
        .route("/payments/nets/success", get(nets_success))
        .route("/payments/nets/fail", get(nets_fail))
        .route_layer(middleware::from_fn(authenticate))
}

/// Everything a provider round trip needs before the external call: the cart
/// total (server-side prices only) and a passed fraud assessment with its
/// attempt row.
async fn begin_provider_payment(
    state: &GlobalState,
    user: &User,
    headers: &HeaderMap,
    method: PaymentMethod,
) -> Result<(Assessment, i64, String), AppError> {
    let (items, total_cents) = state
        .checkout
        .cart_preview(state.pool(), user.id)
        .await
        .map_err(|e| AppError::new(StatusCode::INTERNAL_SERVER_ERROR, anyhow!(e)))?;
    if items.is_empty() || total_cents <= 0 {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            anyhow!("[payments] cart has nothing to charge"),
        ));
    }

    let currency = state.checkout.currency().to_string();
    let assessment = state
        .fraud
        .assess(
            state.pool(),
            user.id,
            &client_ip(headers),
            &AssessmentContext {
                amount_cents: total_cents,
                currency: currency.clone(),
                method: Some(method),
            },
        )
        .await
        .map_err(|e| AppError::new(StatusCode::INTERNAL_SERVER_ERROR, e))?;

    if assessment.is_blocked() {
        return Err(AppError::new(
            StatusCode::FORBIDDEN,
            anyhow!("[payments] payment blocked by risk rules"),
        ));
    }
    Ok((assessment, total_cents, currency))
}

/// Links the provider handle to the ledger row and opens the server-side
/// intent the eventual checkout will consume.
async fn record_provider_ref(
    state: &GlobalState,
    user: &User,
    assessment: &Assessment,
    method: PaymentMethod,
    total_cents: i64,
    currency: &str,
    provider_ref: &str,
) -> Result<PaymentIntent, AppError> {
    let mut conn = state.pool().acquire().await?;
    if let Some(attempt) = &assessment.attempt {
        PaymentAttempt::attach_provider_order_id(&mut conn, attempt.id, provider_ref).await?;
    }
    let intent =
        PaymentIntent::create(&mut conn, user.id, method, total_cents, currency, provider_ref)
            .await?;
    Ok(intent)
}

/// Applies a provider's answer to the ledger and the intent. Settlement only
/// moves the caller's own `initiated` rows, so replays, double callbacks and
/// refs learned by another user are no-ops.
async fn settle_and_confirm(
    state: &GlobalState,
    user_id: Uuid,
    provider: &str,
    provider_ref: &str,
    outcome: &ProviderPaymentState,
) -> Result<Option<PaymentIntent>, AppError> {
    let mut conn = state.pool().acquire().await?;
    match outcome {
        ProviderPaymentState::Succeeded { .. } => {
            PaymentAttempt::settle(&mut conn, user_id, provider, provider_ref, true, None).await?;
            let intent = PaymentIntent::confirm_by_ref(
                &mut conn,
                user_id,
                provider,
                provider_ref,
                get_current_timestamp(),
            )
            .await?;
            Ok(intent)
        }
        ProviderPaymentState::Failed { reason } => {
            PaymentAttempt::settle(&mut conn, user_id, provider, provider_ref, false, Some(reason))
                .await?;
            Ok(None)
        }
        ProviderPaymentState::Pending => Ok(None),
    }
}

fn outcome_json(outcome: &ProviderPaymentState, intent: &Option<PaymentIntent>) -> serde_json::Value {
    let state = match outcome {
        ProviderPaymentState::Succeeded { .. } => "succeeded",
        ProviderPaymentState::Pending => "pending",
        ProviderPaymentState::Failed { .. } => "failed",
    };
    json!({
        "state": state,
        "payment_intent_id": intent.as_ref().map(|i| i.id),
    })
}

// ---- PayPal ----

async fn paypal_create_order(
    State(state): State<GlobalState>,
    Extension(user_id_str): Extension<String>,
    headers: HeaderMap,
) -> Result<AppSuccess, AppError> {
    let user = ensure_account(&state.db, &user_id_str).await?;
    let (assessment, total_cents, currency) =
        begin_provider_payment(&state, &user, &headers, PaymentMethod::Paypal).await?;

    let created = with_retries("paypal create order", state.retry, || {
        state.paypal.create_order(total_cents, &currency)
    })
    .await
    .map_err(|e| AppError::new(StatusCode::BAD_GATEWAY, e))?;

    let intent = record_provider_ref(
        &state,
        &user,
        &assessment,
        PaymentMethod::Paypal,
        total_cents,
        &currency,
        &created.provider_ref,
    )
    .await?;

    Ok(AppSuccess::new(
        StatusCode::OK,
        "PayPal order created",
        json!({
            "order_id": created.provider_ref,
            "payment_intent_id": intent.id,
            "paypal": created.payload,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct CaptureOrderPayload {
    order_id: String,
}

async fn paypal_capture_order(
    State(state): State<GlobalState>,
    Extension(user_id_str): Extension<String>,
    Json(payload): Json<CaptureOrderPayload>,
) -> Result<AppSuccess, AppError> {
    let user = ensure_account(&state.db, &user_id_str).await?;

    let outcome = with_retries("paypal capture order", state.retry, || {
        state.paypal.capture_order(&payload.order_id)
    })
    .await
    .map_err(|e| AppError::new(StatusCode::BAD_GATEWAY, e))?;

    let intent = settle_and_confirm(&state, user.id, "paypal", &payload.order_id, &outcome).await?;
    Ok(AppSuccess::new(
        StatusCode::OK,
        "PayPal capture processed",
        outcome_json(&outcome, &intent),
    ))
}

// ---- Stripe ----

async fn stripe_create_session(
    State(state): State<GlobalState>,
    Extension(user_id_str): Extension<String>,
    headers: HeaderMap,
) -> Result<AppSuccess, AppError> {
    let user = ensure_account(&state.db, &user_id_str).await?;
    let (assessment, total_cents, currency) =
        begin_provider_payment(&state, &user, &headers, PaymentMethod::Stripe).await?;

    let created = with_retries("stripe create session", state.retry, || {
        state
            .stripe
            .create_session(total_cents, &currency, "Course order")
    })
    .await
    .map_err(|e| AppError::new(StatusCode::BAD_GATEWAY, e))?;

    let intent = record_provider_ref(
        &state,
        &user,
        &assessment,
        PaymentMethod::Stripe,
        total_cents,
        &currency,
        &created.provider_ref,
    )
    .await?;

    Ok(AppSuccess::new(
        StatusCode::OK,
        "Stripe checkout session created",
        json!({
            "session_id": created.provider_ref,
            "payment_intent_id": intent.id,
            "stripe": created.payload,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct StripeSuccessQuery {
    session_id: String,
}

async fn stripe_success(
    State(state): State<GlobalState>,
    Extension(user_id_str): Extension<String>,
    Query(query): Query<StripeSuccessQuery>,
) -> Result<AppSuccess, AppError> {
    let user = ensure_account(&state.db, &user_id_str).await?;

    let outcome = with_retries("stripe retrieve session", state.retry, || {
        state.stripe.retrieve_session(&query.session_id)
    })
    .await
    .map_err(|e| AppError::new(StatusCode::BAD_GATEWAY, e))?;

    let intent = settle_and_confirm(&state, user.id, "stripe", &query.session_id, &outcome).await?;
    Ok(AppSuccess::new(
        StatusCode::OK,
        "Stripe session checked",
        outcome_json(&outcome, &intent),
    ))
}

// ---- NETS QR ----

async fn nets_request(
    State(state): State<GlobalState>,
    Extension(user_id_str): Extension<String>,
    headers: HeaderMap,
) -> Result<AppSuccess, AppError> {
    let user = ensure_account(&state.db, &user_id_str).await?;
    let (assessment, total_cents, currency) =
        begin_provider_payment(&state, &user, &headers, PaymentMethod::Nets).await?;

    let order = with_retries("nets qr request", state.retry, || {
        state.nets.request_qr(total_cents, &currency)
    })
    .await
    .map_err(|e| AppError::new(StatusCode::BAD_GATEWAY, e))?;

    let intent = record_provider_ref(
        &state,
        &user,
        &assessment,
        PaymentMethod::Nets,
        total_cents,
        &currency,
        &order.retrieval_ref,
    )
    .await?;

    Ok(AppSuccess::new(
        StatusCode::OK,
        "NETS QR issued",
        json!({
            "retrieval_ref": order.retrieval_ref,
            "qr_code": order.qr_code,
            "payment_intent_id": intent.id,
        }),
    ))
}

async fn nets_status(
    State(state): State<GlobalState>,
    Extension(user_id_str): Extension<String>,
    Path(retrieval_ref): Path<String>,
) -> Result<AppSuccess, AppError> {
    let user = ensure_account(&state.db, &user_id_str).await?;

    let outcome = state
        .nets
        .query_status(&retrieval_ref)
        .await
        .map_err(|e| AppError::new(StatusCode::BAD_GATEWAY, e))?;

    let intent = settle_and_confirm(&state, user.id, "nets_qr", &retrieval_ref, &outcome).await?;
    Ok(AppSuccess::new(
        StatusCode::OK,
        "NETS status checked",
        outcome_json(&outcome, &intent),
    ))
}

#[derive(Debug, Deserialize)]
struct NetsCallbackQuery {
    retrieval_ref: String,
}

/// Redirect landing after a scan-and-pay. The provider is re-queried rather
/// than trusting the redirect, then the same settlement path runs.
async fn nets_success(
    State(state): State<GlobalState>,
    Extension(user_id_str): Extension<String>,
    Query(query): Query<NetsCallbackQuery>,
) -> Result<AppSuccess, AppError> {
    let user = ensure_account(&state.db, &user_id_str).await?;

    let outcome = state
        .nets
        .query_status(&query.retrieval_ref)
        .await
        .map_err(|e| AppError::new(StatusCode::BAD_GATEWAY, e))?;

    let intent =
        settle_and_confirm(&state, user.id, "nets_qr", &query.retrieval_ref, &outcome).await?;
    Ok(AppSuccess::new(
        StatusCode::OK,
        "NETS payment processed",
        outcome_json(&outcome, &intent),
    ))
}

async fn nets_fail(
    State(state): State<GlobalState>,
    Extension(user_id_str): Extension<String>,
    Query(query): Query<NetsCallbackQuery>,
) -> Result<AppSuccess, AppError> {
    let user = ensure_account(&state.db, &user_id_str).await?;

    let outcome = ProviderPaymentState::Failed {
        reason: "cancelled at provider".to_string(),
    };
    settle_and_confirm(&state, user.id, "nets_qr", &query.retrieval_ref, &outcome).await?;
    Ok(AppSuccess::new(
        StatusCode::OK,
        "NETS payment marked failed",
        outcome_json(&outcome, &None),
    ))
}
