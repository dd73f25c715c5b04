use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use coursehub_common::get_current_timestamp;

use crate::cart::CartItem;
use crate::currency::CurrencyConverter;
use crate::enrollment::Enrollment;
use crate::error::CheckoutError;
use crate::ledger::LedgerEntry;
use crate::order::{Order, OrderItem};
use crate::payment::{PaymentAttempt, PaymentMethod};
use crate::payment_intent::PaymentIntent;
use crate::wallet::Wallet;

/// Cart line joined with the live course row, both held under FOR UPDATE for
/// the rest of the transaction.
#[derive(Debug, Clone, FromRow)]
struct CheckoutLine {
    course_id: Uuid,
    quantity: i64,
    price_cents: i64,
    currency: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckoutReceipt {
    pub order_id: Uuid,
    pub total_cents: i64,
    pub currency: String,
}

/// Converts a cart into a paid order in one transaction. Prices and stock
/// are read under row locks; any failure rolls the whole thing back, so
/// there is never a debited wallet without an order or an order with a
/// stale cart.
#[derive(Debug, Clone)]
pub struct CheckoutEngine {
    converter: CurrencyConverter,
    intent_ttl_secs: i64,
}

impl CheckoutEngine {
    pub fn new(converter: CurrencyConverter, intent_ttl_secs: i64) -> Self {
        Self {
            converter,
            intent_ttl_secs,
        }
    }

    /// The checkout contract. `intent_id` is required for external methods
    /// and ignored for wallet; `wallet_attempt_id` is the attempt row the
    /// fraud assessment opened for a wallet purchase, settled here inside
    /// the transaction. The caller handles the pro-subscription gate; the
    /// engine is subscription-agnostic.
    pub async fn checkout(
        &self,
        pool: &PgPool,
        user_id: Uuid,
        method: PaymentMethod,
        intent_id: Option<Uuid>,
        wallet_attempt_id: Option<Uuid>,
    ) -> Result<CheckoutReceipt, CheckoutError> {
        match self
            .settle_cart(pool, user_id, method, intent_id, wallet_attempt_id)
            .await
        {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                // The transaction rolled back, but the attempt the wallet
                // assessment opened still has to reach a terminal state.
                if let Some(attempt_id) = wallet_attempt_id {
                    if let Ok(mut conn) = pool.acquire().await {
                        let _ = PaymentAttempt::settle_by_id(
                            &mut conn,
                            attempt_id,
                            false,
                            Some(e.as_code()),
                        )
                        .await;
                    }
                }
                Err(e)
            }
        }
    }

    async fn settle_cart(
        &self,
        pool: &PgPool,
        user_id: Uuid,
        method: PaymentMethod,
        intent_id: Option<Uuid>,
        wallet_attempt_id: Option<Uuid>,
    ) -> Result<CheckoutReceipt, CheckoutError> {
        let mut tx = pool.begin().await?;

        let lines = sqlx::query_as::<_, CheckoutLine>(
            r#"SELECT "cart_items"."course_id", "cart_items"."quantity",
                      "courses"."price_cents", "courses"."currency"
               FROM "cart_items"
               JOIN "courses" ON "courses"."id" = "cart_items"."course_id"
               WHERE "cart_items"."user_id" = $1
               ORDER BY "cart_items"."created_at"
               FOR UPDATE"#,
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;

        if lines.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let course_ids: Vec<Uuid> = lines.iter().map(|l| l.course_id).collect();
        let owned = Enrollment::enrolled_subset(&mut *tx, user_id, &course_ids).await?;
        let purchasable: Vec<&CheckoutLine> = lines
            .iter()
            .filter(|l| !owned.contains(&l.course_id))
            .collect();
        if purchasable.is_empty() {
            return Err(CheckoutError::AlreadyEnrolled);
        }

        // Total in the platform currency, from the locked prices only.
        let order_currency = self.converter.default_currency().to_string();
        let mut total_cents = 0i64;
        for line in &purchasable {
            let unit =
                self.converter
                    .convert_cents(line.price_cents, &line.currency, &order_currency)?;
            total_cents += unit * line.quantity;
        }

        let payment_attempt_id = match method {
            PaymentMethod::Wallet => {
                Wallet::ensure(&mut *tx, user_id).await?;
                let wallet = Wallet::lock(&mut *tx, user_id).await?;
                if wallet.balance_cents < total_cents {
                    return Err(CheckoutError::WalletBalance {
                        balance_cents: wallet.balance_cents,
                        required_cents: total_cents,
                    });
                }
                Wallet::debit(&mut *tx, user_id, total_cents).await?;
                if let Some(attempt_id) = wallet_attempt_id {
                    PaymentAttempt::settle_by_id(&mut *tx, attempt_id, true, None).await?;
                }
                wallet_attempt_id
            }
            _ => {
                self.consume_intent(&mut *tx, user_id, method, total_cents, &order_currency, intent_id)
                    .await?
            }
        };

        let order = Order::insert(
            &mut *tx,
            user_id,
            total_cents,
            &order_currency,
            method,
            payment_attempt_id,
        )
        .await?;

        for line in &purchasable {
            let unit =
                self.converter
                    .convert_cents(line.price_cents, &line.currency, &order_currency)?;
            OrderItem::insert(&mut *tx, order.id, line.course_id, unit, line.quantity).await?;
            Enrollment::insert_ignore(&mut *tx, line.course_id, user_id).await?;
            decrement_stock(&mut *tx, line.course_id).await?;
        }

        LedgerEntry::record(
            &mut *tx,
            user_id,
            Some(order.id),
            &method.checkout_txn_type(),
            total_cents,
            &order_currency,
        )
        .await?;

        sqlx::query(r#"DELETE FROM "cart_items" WHERE "user_id" = $1"#)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(
            "[CheckoutEngine::checkout] user {} paid {} {} via {} -> order {}",
            user_id,
            total_cents,
            order_currency,
            method.as_str(),
            order.id
        );

        Ok(CheckoutReceipt {
            order_id: order.id,
            total_cents,
            currency: order_currency,
        })
    }

    /// Locks, validates and consumes the payment intent for an external
    /// method. Any mismatch (owner, state, method, amount, currency, TTL)
    /// comes back as `PaymentRequired`; the caller never learns which check
    /// failed.
    async fn consume_intent(
        &self,
        conn: &mut PgConnection,
        user_id: Uuid,
        method: PaymentMethod,
        total_cents: i64,
        currency: &str,
        intent_id: Option<Uuid>,
    ) -> Result<Option<Uuid>, CheckoutError> {
        let intent_id = intent_id.ok_or(CheckoutError::PaymentRequired)?;
        let intent = PaymentIntent::lock(conn, intent_id)
            .await?
            .ok_or(CheckoutError::PaymentRequired)?;

        let now = get_current_timestamp();
        if !intent.is_consumable(user_id, method, total_cents, currency, now, self.intent_ttl_secs)
        {
            return Err(CheckoutError::PaymentRequired);
        }
        PaymentIntent::mark_consumed(conn, intent.id).await?;

        let attempt =
            PaymentAttempt::find_by_provider_order_id(conn, &intent.provider, &intent.provider_ref)
                .await?;
        Ok(attempt.map(|a| a.id))
    }

    /// Lists the cart with live prices, for display and for the pro gate the
    /// route applies before checkout. The total skips courses the user
    /// already owns, so a provider intent created from it is for exactly the
    /// amount checkout will settle.
    pub async fn cart_preview(
        &self,
        pool: &PgPool,
        user_id: Uuid,
    ) -> Result<(Vec<CartItem>, i64), CheckoutError> {
        let mut conn = pool.acquire().await?;
        let items = CartItem::list_for_user(&mut conn, user_id).await?;
        let course_ids: Vec<Uuid> = items.iter().map(|i| i.course_id).collect();
        let owned = Enrollment::enrolled_subset(&mut conn, user_id, &course_ids).await?;

        let order_currency = self.converter.default_currency().to_string();
        let mut total_cents = 0i64;
        for item in &items {
            if owned.contains(&item.course_id) {
                continue;
            }
            let (price_cents, currency): (i64, String) = sqlx::query_as(
                r#"SELECT "price_cents", "currency" FROM "courses" WHERE "id" = $1"#,
            )
            .bind(item.course_id)
            .fetch_one(&mut *conn)
            .await?;
            total_cents += self
                .converter
                .convert_cents(price_cents, &currency, &order_currency)?
                * item.quantity;
        }
        Ok((items, total_cents))
    }

    pub fn currency(&self) -> &str {
        self.converter.default_currency()
    }
}

async fn decrement_stock(conn: &mut PgConnection, course_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE "courses" SET "stock" = GREATEST("stock" - 1, 0) WHERE "id" = $1"#,
    )
    .bind(course_id)
    .execute(conn)
    .await?;
    Ok(())
}
