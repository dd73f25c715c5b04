use thiserror::Error;

/// Raised when a TEXT status column holds a value no enum variant maps to.
#[derive(Debug, Error)]
#[error("unknown enum value: {0}")]
pub struct InvalidEnumValue(pub String);

/// Business outcomes of the checkout engine. All of these are expected
/// results reported to the caller, not bugs; `Db` wraps the one class of
/// failure that is.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("cart is empty")]
    EmptyCart,

    #[error("every course in the cart is already enrolled")]
    AlreadyEnrolled,

    #[error("insufficient wallet balance: have {balance_cents}, need {required_cents}")]
    WalletBalance {
        balance_cents: i64,
        required_cents: i64,
    },

    #[error("a pro subscription is required for a course in the cart")]
    ProRequired,

    #[error("invalid payment method")]
    InvalidPaymentMethod,

    #[error("missing, mismatched or expired payment confirmation")]
    PaymentRequired,

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CheckoutError {
    /// Error code carried in the `?checkout_error=` redirect query.
    pub fn as_code(&self) -> &'static str {
        match self {
            CheckoutError::EmptyCart => "empty_cart",
            CheckoutError::AlreadyEnrolled => "already_enrolled",
            CheckoutError::WalletBalance { .. } => "wallet_balance",
            CheckoutError::ProRequired => "pro_required",
            CheckoutError::InvalidPaymentMethod => "invalid_payment_method",
            CheckoutError::PaymentRequired => "payment_required",
            CheckoutError::Db(_) | CheckoutError::Internal(_) => "internal_error",
        }
    }
}

#[derive(Debug, Error)]
pub enum RefundError {
    #[error("refund request is not pending")]
    NotPending,

    #[error("order is already refunded")]
    AlreadyRefunded,

    #[error("a pending refund request already exists for this order")]
    AlreadyRequested,

    #[error("order not found")]
    OrderNotFound,

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Reads a TEXT column and parses it into a status enum, surfacing bad
/// values as a column decode error.
pub(crate) fn decode_text_enum<T>(
    row: &sqlx::postgres::PgRow,
    col: &str,
) -> Result<T, sqlx::Error>
where
    T: std::str::FromStr<Err = InvalidEnumValue>,
{
    use sqlx::Row;
    let raw: String = row.try_get(col)?;
    raw.parse().map_err(|e: InvalidEnumValue| sqlx::Error::ColumnDecode {
        index: col.to_string(),
        source: Box::new(e),
    })
}

/// True when the database rejected an insert on a unique constraint.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}
