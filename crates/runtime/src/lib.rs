mod cart;
mod checkout;
mod course;
mod currency;
mod enrollment;
mod env;
mod error;
mod fraud;
mod ledger;
mod order;
mod payment;
mod payment_intent;
mod refund;
mod user;
mod wallet;

pub use cart::CartItem;
pub use checkout::{CheckoutEngine, CheckoutReceipt};
pub use course::Course;
pub use currency::{CurrencyConfig, CurrencyConverter};
pub use enrollment::Enrollment;
pub use env::RuntimeEnv;
pub use error::{CheckoutError, InvalidEnumValue, RefundError};
pub use fraud::{
    Assessment, AssessmentContext, FraudAssessor, FraudConfig, FraudEvent, RiskAction, Severity,
};
pub use ledger::LedgerEntry;
pub use order::{Order, OrderItem, OrderStatus, PaymentStatus};
pub use payment::{AttemptStatus, PaymentAttempt, PaymentMethod};
pub use payment_intent::{IntentState, PaymentIntent};
pub use refund::{RefundEngine, RefundRequest, RefundStatus, RefundTransaction};
pub use user::{User, UserRole};
pub use wallet::Wallet;
