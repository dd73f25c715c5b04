use anyhow::Result;
use sqlx::PgPool;

use coursehub_clients::{NetsClient, PayPalClient, PostgresClient, RetryPolicy, StripeCheckoutClient};
use coursehub_common::{EnvVars, ModuleClient};
use coursehub_runtime::{CheckoutEngine, CurrencyConverter, FraudAssessor, RefundEngine, RuntimeEnv};

#[derive(Clone)]
pub struct GlobalState {
    pub db: PostgresClient,
    pub paypal: PayPalClient,
    pub stripe: StripeCheckoutClient,
    pub nets: NetsClient,
    pub fraud: FraudAssessor,
    pub checkout: CheckoutEngine,
    pub refunds: RefundEngine,
    pub retry: RetryPolicy,
}

impl GlobalState {
    pub async fn new() -> Result<Self> {
        let env = RuntimeEnv::load();

        let db = PostgresClient::setup_connection().await;
        let paypal = PayPalClient::setup_connection().await;
        let stripe = StripeCheckoutClient::setup_connection().await;
        let nets = NetsClient::setup_connection().await;

        let converter = CurrencyConverter::new(env.currency_config());
        let checkout = CheckoutEngine::new(converter, env.intent_ttl_secs());
        let fraud = FraudAssessor::new(env.fraud_config());

        Ok(Self {
            db,
            paypal,
            stripe,
            nets,
            fraud,
            checkout,
            refunds: RefundEngine,
            retry: RetryPolicy::default(),
        })
    }

    pub fn pool(&self) -> &'static PgPool {
        **self.db.get_client()
    }
}
