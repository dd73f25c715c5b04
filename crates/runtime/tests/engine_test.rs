//! End-to-end engine flows against a throwaway Postgres database.
//!
//! Run with `DATABASE_URL` pointing at a scratch database:
//! `cargo test -p coursehub-runtime -- --ignored`

use std::collections::HashMap;

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use coursehub_runtime::{
    AssessmentContext, AttemptStatus, CheckoutEngine, CheckoutError, CurrencyConfig,
    CurrencyConverter, Enrollment, FraudAssessor, FraudConfig, Order, PaymentAttempt,
    PaymentIntent, PaymentMethod, PaymentStatus, RefundEngine, RefundError, RefundRequest,
    RefundStatus, RefundTransaction, RiskAction, User, Wallet,
};

/// Every test opens its own pool: each `#[tokio::test]` runs on its own
/// runtime, so a process-global pool would die with the first test.
async fn pool() -> Result<PgPool> {
    dotenv::dotenv().ok();
    let url = std::env::var("DATABASE_URL")?;
    let pool = PgPool::connect(&url).await?;
    coursehub_database::bootstrap_schema(&pool, false, true).await?;
    Ok(pool)
}

fn engine() -> CheckoutEngine {
    let converter = CurrencyConverter::new(CurrencyConfig::new("USD", HashMap::new()));
    CheckoutEngine::new(converter, 1800)
}

async fn new_user(pool: &PgPool) -> Result<User> {
    let mut conn = pool.acquire().await?;
    let external = format!("test-user-{}", Uuid::new_v4());
    Ok(User::get_or_create(&mut conn, &external, "tester").await?)
}

async fn new_course(pool: &PgPool, price_cents: i64, stock: i64) -> Result<Uuid> {
    let id: Uuid = sqlx::query_scalar(
        r#"INSERT INTO "courses" ("title", "price_cents", "currency", "stock", "pro_required")
           VALUES ($1, $2, 'USD', $3, false)
           RETURNING "id""#,
    )
    .bind(format!("course-{}", Uuid::new_v4()))
    .bind(price_cents)
    .bind(stock)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

async fn add_to_cart(pool: &PgPool, user_id: Uuid, course_id: Uuid) -> Result<()> {
    let mut conn = pool.acquire().await?;
    coursehub_runtime::CartItem::add(&mut conn, user_id, course_id).await?;
    Ok(())
}

async fn fund_wallet(pool: &PgPool, user_id: Uuid, amount_cents: i64) -> Result<()> {
    let mut conn = pool.acquire().await?;
    Wallet::ensure(&mut conn, user_id).await?;
    Wallet::credit(&mut conn, user_id, amount_cents).await?;
    Ok(())
}

async fn cart_len(pool: &PgPool, user_id: Uuid) -> Result<usize> {
    let mut conn = pool.acquire().await?;
    Ok(coursehub_runtime::CartItem::list_for_user(&mut conn, user_id)
        .await?
        .len())
}

async fn open_attempt(
    pool: &PgPool,
    user_id: Uuid,
    method: PaymentMethod,
    amount_cents: i64,
) -> Result<PaymentAttempt> {
    let mut conn = pool.acquire().await?;
    Ok(PaymentAttempt::insert(
        &mut conn,
        user_id,
        method,
        AttemptStatus::Initiated,
        amount_cents,
        "USD",
        "test",
        None,
    )
    .await?)
}

async fn attempt_state(pool: &PgPool, attempt_id: Uuid) -> Result<(String, Option<String>)> {
    Ok(sqlx::query_as(
        r#"SELECT "status", "failure_reason" FROM "payment_attempts" WHERE "id" = $1"#,
    )
    .bind(attempt_id)
    .fetch_one(pool)
    .await?)
}

async fn confirmed_intent(
    pool: &PgPool,
    user_id: Uuid,
    method: PaymentMethod,
    amount_cents: i64,
) -> Result<PaymentIntent> {
    let mut conn = pool.acquire().await?;
    let provider_ref = format!("REF-{}", Uuid::new_v4());
    let intent =
        PaymentIntent::create(&mut conn, user_id, method, amount_cents, "USD", &provider_ref)
            .await?;
    let confirmed = PaymentIntent::confirm_by_ref(
        &mut conn,
        user_id,
        &intent.provider,
        &intent.provider_ref,
        coursehub_common::get_current_timestamp(),
    )
    .await?
    .expect("intent just created");
    Ok(confirmed)
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch postgres"]
async fn wallet_checkout_debits_enrolls_and_clears_cart() -> Result<()> {
    let pool = pool().await?;
    let engine = engine();

    let user = new_user(&pool).await?;
    let course = new_course(&pool, 50_00, 5).await?;
    fund_wallet(&pool, user.id, 100_00).await?;
    add_to_cart(&pool, user.id, course).await?;

    let receipt = engine
        .checkout(&pool, user.id, PaymentMethod::Wallet, None, None)
        .await?;
    assert_eq!(receipt.total_cents, 50_00);

    let mut conn = pool.acquire().await?;
    assert_eq!(Wallet::balance_of(&mut conn, user.id).await?, 50_00);
    assert!(Enrollment::exists(&mut conn, user.id, course).await?);
    assert_eq!(cart_len(&pool, user.id).await?, 0);

    let order = Order::find_by_id(&mut conn, receipt.order_id)
        .await?
        .expect("order exists");
    assert_eq!(order.payment_status, PaymentStatus::Paid);

    let stock: i64 = sqlx::query_scalar(r#"SELECT "stock" FROM "courses" WHERE "id" = $1"#)
        .bind(course)
        .fetch_one(&pool)
        .await?;
    assert_eq!(stock, 4);
    Ok(())
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch postgres"]
async fn insufficient_balance_changes_nothing() -> Result<()> {
    let pool = pool().await?;
    let engine = engine();

    let user = new_user(&pool).await?;
    let course = new_course(&pool, 50_00, 5).await?;
    fund_wallet(&pool, user.id, 20_00).await?;
    add_to_cart(&pool, user.id, course).await?;
    let attempt = open_attempt(&pool, user.id, PaymentMethod::Wallet, 50_00).await?;

    let err = engine
        .checkout(&pool, user.id, PaymentMethod::Wallet, None, Some(attempt.id))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CheckoutError::WalletBalance {
            balance_cents: 20_00,
            required_cents: 50_00
        }
    ));

    let mut conn = pool.acquire().await?;
    assert_eq!(Wallet::balance_of(&mut conn, user.id).await?, 20_00);
    assert!(!Enrollment::exists(&mut conn, user.id, course).await?);
    assert_eq!(cart_len(&pool, user.id).await?, 1);

    // The assessment's attempt still reaches a terminal state.
    let (status, reason) = attempt_state(&pool, attempt.id).await?;
    assert_eq!(status, "failed");
    assert_eq!(reason.as_deref(), Some("wallet_balance"));
    Ok(())
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch postgres"]
async fn fully_owned_cart_is_rejected() -> Result<()> {
    let pool = pool().await?;
    let engine = engine();

    let user = new_user(&pool).await?;
    let course = new_course(&pool, 50_00, 5).await?;
    {
        let mut conn = pool.acquire().await?;
        Enrollment::insert_ignore(&mut conn, course, user.id).await?;
    }
    fund_wallet(&pool, user.id, 100_00).await?;
    add_to_cart(&pool, user.id, course).await?;

    let err = engine
        .checkout(&pool, user.id, PaymentMethod::Wallet, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::AlreadyEnrolled));

    let mut conn = pool.acquire().await?;
    assert_eq!(Wallet::balance_of(&mut conn, user.id).await?, 100_00);
    Ok(())
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch postgres"]
async fn mixed_cart_charges_only_unowned_courses() -> Result<()> {
    let pool = pool().await?;
    let engine = engine();

    let user = new_user(&pool).await?;
    let owned = new_course(&pool, 30_00, 5).await?;
    let fresh = new_course(&pool, 50_00, 5).await?;
    {
        let mut conn = pool.acquire().await?;
        Enrollment::insert_ignore(&mut conn, owned, user.id).await?;
    }
    fund_wallet(&pool, user.id, 100_00).await?;
    add_to_cart(&pool, user.id, owned).await?;
    add_to_cart(&pool, user.id, fresh).await?;

    let receipt = engine
        .checkout(&pool, user.id, PaymentMethod::Wallet, None, None)
        .await?;
    assert_eq!(receipt.total_cents, 50_00);

    let mut conn = pool.acquire().await?;
    assert_eq!(Wallet::balance_of(&mut conn, user.id).await?, 50_00);
    assert_eq!(cart_len(&pool, user.id).await?, 0);
    Ok(())
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch postgres"]
async fn mixed_cart_external_preview_matches_what_checkout_settles() -> Result<()> {
    let pool = pool().await?;
    let engine = engine();

    let user = new_user(&pool).await?;
    let owned = new_course(&pool, 30_00, 5).await?;
    let fresh = new_course(&pool, 50_00, 5).await?;
    {
        let mut conn = pool.acquire().await?;
        Enrollment::insert_ignore(&mut conn, owned, user.id).await?;
    }
    add_to_cart(&pool, user.id, owned).await?;
    add_to_cart(&pool, user.id, fresh).await?;

    // The preview excludes owned courses, so an intent created from it is
    // for exactly the amount the engine will accept.
    let (items, total_cents) = engine.cart_preview(&pool, user.id).await?;
    assert_eq!(items.len(), 2);
    assert_eq!(total_cents, 50_00);

    let intent = confirmed_intent(&pool, user.id, PaymentMethod::Paypal, total_cents).await?;
    let receipt = engine
        .checkout(&pool, user.id, PaymentMethod::Paypal, Some(intent.id), None)
        .await?;
    assert_eq!(receipt.total_cents, 50_00);

    let mut conn = pool.acquire().await?;
    assert!(Enrollment::exists(&mut conn, user.id, fresh).await?);
    Ok(())
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch postgres"]
async fn empty_cart_is_rejected() -> Result<()> {
    let pool = pool().await?;
    let engine = engine();
    let user = new_user(&pool).await?;

    let err = engine
        .checkout(&pool, user.id, PaymentMethod::Wallet, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::EmptyCart));
    Ok(())
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch postgres"]
async fn external_checkout_consumes_intent_exactly_once() -> Result<()> {
    let pool = pool().await?;
    let engine = engine();

    let user = new_user(&pool).await?;
    let course = new_course(&pool, 50_00, 5).await?;
    add_to_cart(&pool, user.id, course).await?;

    let intent = confirmed_intent(&pool, user.id, PaymentMethod::Paypal, 50_00).await?;
    let receipt = engine
        .checkout(&pool, user.id, PaymentMethod::Paypal, Some(intent.id), None)
        .await?;
    assert_eq!(receipt.total_cents, 50_00);

    // Wallet untouched by an external purchase.
    let mut conn = pool.acquire().await?;
    assert_eq!(Wallet::balance_of(&mut conn, user.id).await?, 0);
    drop(conn);

    // The consumed intent cannot buy a second course.
    let again = new_course(&pool, 50_00, 5).await?;
    add_to_cart(&pool, user.id, again).await?;
    let err = engine
        .checkout(&pool, user.id, PaymentMethod::Paypal, Some(intent.id), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::PaymentRequired));
    Ok(())
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch postgres"]
async fn mismatched_intent_is_payment_required() -> Result<()> {
    let pool = pool().await?;
    let engine = engine();

    let user = new_user(&pool).await?;
    let course = new_course(&pool, 50_00, 5).await?;
    add_to_cart(&pool, user.id, course).await?;

    // Confirmed for the wrong amount.
    let intent = confirmed_intent(&pool, user.id, PaymentMethod::Paypal, 10_00).await?;
    let err = engine
        .checkout(&pool, user.id, PaymentMethod::Paypal, Some(intent.id), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::PaymentRequired));

    // Confirmed for the wrong method.
    let intent = confirmed_intent(&pool, user.id, PaymentMethod::Stripe, 50_00).await?;
    let err = engine
        .checkout(&pool, user.id, PaymentMethod::Paypal, Some(intent.id), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::PaymentRequired));

    assert_eq!(cart_len(&pool, user.id).await?, 1);
    Ok(())
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch postgres"]
async fn settlement_is_scoped_to_the_owner() -> Result<()> {
    let pool = pool().await?;

    let owner = new_user(&pool).await?;
    let other = new_user(&pool).await?;
    let attempt = open_attempt(&pool, owner.id, PaymentMethod::Nets, 50_00).await?;

    let mut conn = pool.acquire().await?;
    let provider_ref = format!("REF-{}", Uuid::new_v4());
    PaymentAttempt::attach_provider_order_id(&mut conn, attempt.id, &provider_ref).await?;
    PaymentIntent::create(&mut conn, owner.id, PaymentMethod::Nets, 50_00, "USD", &provider_ref)
        .await?;

    // Another user who learns the ref cannot flip the owner's rows.
    assert!(
        !PaymentAttempt::settle(&mut conn, other.id, "nets_qr", &provider_ref, false, Some("x"))
            .await?
    );
    assert!(
        PaymentIntent::confirm_by_ref(&mut conn, other.id, "nets_qr", &provider_ref, 1_000)
            .await?
            .is_none()
    );
    let (status, _) = attempt_state(&pool, attempt.id).await?;
    assert_eq!(status, "initiated");

    // The owner can.
    assert!(
        PaymentAttempt::settle(&mut conn, owner.id, "nets_qr", &provider_ref, true, None).await?
    );
    assert!(
        PaymentIntent::confirm_by_ref(&mut conn, owner.id, "nets_qr", &provider_ref, 1_000)
            .await?
            .is_some()
    );
    Ok(())
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch postgres"]
async fn sixth_attempt_in_window_is_blocked() -> Result<()> {
    let pool = pool().await?;
    let user = new_user(&pool).await?;
    let ip = format!("ip-{}", Uuid::new_v4());

    let mut conn = pool.acquire().await?;
    for _ in 0..5 {
        PaymentAttempt::insert(
            &mut conn,
            user.id,
            PaymentMethod::Paypal,
            AttemptStatus::Initiated,
            10_00,
            "USD",
            &ip,
            None,
        )
        .await?;
    }
    drop(conn);

    let assessor = FraudAssessor::new(FraudConfig::default());
    let assessment = assessor
        .assess(
            &pool,
            user.id,
            &ip,
            &AssessmentContext {
                amount_cents: 10_00,
                currency: "USD".to_string(),
                method: Some(PaymentMethod::Paypal),
            },
        )
        .await?;

    assert_eq!(assessment.action, RiskAction::Block);
    assert!(assessment.is_blocked());
    assert!(assessment.flags.contains(&"velocity"));

    // The attempt is opened pre-failed, never handed to a provider.
    let attempt = assessment.attempt.expect("method supplied opens an attempt");
    assert_eq!(attempt.status, AttemptStatus::Failed);
    assert_eq!(attempt.failure_reason.as_deref(), Some("blocked_by_risk_rules"));

    let rule_code: String = sqlx::query_scalar(
        r#"SELECT "rule_code" FROM "fraud_events" WHERE "user_id" = $1 LIMIT 1"#,
    )
    .bind(user.id)
    .fetch_one(&pool)
    .await?;
    assert_eq!(rule_code, "velocity");
    Ok(())
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch postgres"]
async fn refund_credits_wallet_and_revokes_enrollment() -> Result<()> {
    let pool = pool().await?;
    let engine = engine();
    let refunds = RefundEngine;

    let user = new_user(&pool).await?;
    let admin = new_user(&pool).await?;
    let course = new_course(&pool, 50_00, 5).await?;
    fund_wallet(&pool, user.id, 50_00).await?;
    add_to_cart(&pool, user.id, course).await?;

    let receipt = engine
        .checkout(&pool, user.id, PaymentMethod::Wallet, None, None)
        .await?;

    let request = refunds
        .request(&pool, receipt.order_id, user.id, "changed my mind")
        .await?;

    // A second request while one is pending hits the partial unique index.
    let err = refunds
        .request(&pool, receipt.order_id, user.id, "again")
        .await
        .unwrap_err();
    assert!(matches!(err, RefundError::AlreadyRequested));

    refunds.approve(&pool, request.id, admin.id).await?;

    let mut conn = pool.acquire().await?;
    assert_eq!(Wallet::balance_of(&mut conn, user.id).await?, 50_00);
    assert!(!Enrollment::exists(&mut conn, user.id, course).await?);
    let order = Order::find_by_id(&mut conn, receipt.order_id)
        .await?
        .expect("order exists");
    assert_eq!(order.payment_status, PaymentStatus::Refunded);
    assert_eq!(order.refunded_cents, order.total_cents);

    let settled = RefundRequest::find_by_id(&mut conn, request.id)
        .await?
        .expect("request exists");
    assert_eq!(settled.status, RefundStatus::Completed);
    let movements = RefundTransaction::list_for_request(&mut conn, request.id).await?;
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].amount_cents, 50_00);
    assert_eq!(movements[0].provider, "wallet");
    drop(conn);

    // The order cannot be refunded twice, by either path.
    let err = refunds.approve(&pool, request.id, admin.id).await.unwrap_err();
    assert!(matches!(err, RefundError::NotPending));
    let err = refunds
        .request(&pool, receipt.order_id, user.id, "once more")
        .await
        .unwrap_err();
    assert!(matches!(err, RefundError::AlreadyRefunded));
    Ok(())
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch postgres"]
async fn approve_with_missing_order_marks_request_failed() -> Result<()> {
    let pool = pool().await?;
    let engine = engine();
    let refunds = RefundEngine;

    let user = new_user(&pool).await?;
    let admin = new_user(&pool).await?;
    let course = new_course(&pool, 50_00, 5).await?;
    fund_wallet(&pool, user.id, 50_00).await?;
    add_to_cart(&pool, user.id, course).await?;
    let receipt = engine
        .checkout(&pool, user.id, PaymentMethod::Wallet, None, None)
        .await?;
    let request = refunds
        .request(&pool, receipt.order_id, user.id, "lost order")
        .await?;

    sqlx::query(r#"DELETE FROM "orders" WHERE "id" = $1"#)
        .bind(receipt.order_id)
        .execute(&pool)
        .await?;

    let err = refunds.approve(&pool, request.id, admin.id).await.unwrap_err();
    assert!(matches!(err, RefundError::OrderNotFound));

    // The request is downgraded with the error, not left pending.
    let mut conn = pool.acquire().await?;
    let failed = RefundRequest::find_by_id(&mut conn, request.id)
        .await?
        .expect("request exists");
    assert_eq!(failed.status, RefundStatus::Failed);
    assert_eq!(failed.admin_note.as_deref(), Some("order not found"));
    assert_eq!(Wallet::balance_of(&mut conn, user.id).await?, 0);
    Ok(())
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch postgres"]
async fn rejected_refund_moves_no_funds() -> Result<()> {
    let pool = pool().await?;
    let engine = engine();
    let refunds = RefundEngine;

    let user = new_user(&pool).await?;
    let course = new_course(&pool, 50_00, 5).await?;
    fund_wallet(&pool, user.id, 50_00).await?;
    add_to_cart(&pool, user.id, course).await?;
    let receipt = engine
        .checkout(&pool, user.id, PaymentMethod::Wallet, None, None)
        .await?;

    let request = refunds
        .request(&pool, receipt.order_id, user.id, "mistake")
        .await?;
    let rejected = refunds
        .reject(&pool, request.id, Some("course already consumed"))
        .await?;
    assert_eq!(rejected.admin_note.as_deref(), Some("course already consumed"));

    let mut conn = pool.acquire().await?;
    assert_eq!(Wallet::balance_of(&mut conn, user.id).await?, 0);
    assert!(Enrollment::exists(&mut conn, user.id, course).await?);
    Ok(())
}
