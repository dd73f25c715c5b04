mod nets;
mod paypal;
mod postgres;
mod provider;
mod retry;
mod stripe_checkout;

pub use nets::{NetsClient, NetsQrOrder};
pub use paypal::PayPalClient;
pub use postgres::PostgresClient;
pub use provider::{PaymentProvider, ProviderIntent, ProviderPaymentState};
pub use retry::{with_retries, RetryPolicy};
pub use stripe_checkout::StripeCheckoutClient;
