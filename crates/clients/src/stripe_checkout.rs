use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde_json::json;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CheckoutSessionPaymentStatus, CheckoutSessionStatus,
    Client as StripeClient, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionLineItemsPriceData, CreateCheckoutSessionLineItemsPriceDataProductData,
    Currency,
};

use coursehub_common::{define_module_client, ModuleClient};

use crate::provider::{PaymentProvider, ProviderIntent, ProviderPaymentState};

define_module_client! {
    (struct StripeCheckoutClient, "stripe")
    client_type: StripeClient,
    env: ["STRIPE_SECRET_KEY", "STRIPE_SUCCESS_URL", "STRIPE_CANCEL_URL"],
    setup: async {
        StripeClient::new(std::env::var("STRIPE_SECRET_KEY").unwrap())
    }
}

impl StripeCheckoutClient {
    /// Opens a hosted checkout session for a one-off charge. The session id
    /// is the provider reference; the hosted URL goes back to the client.
    pub async fn create_session(
        &self,
        amount_cents: i64,
        currency: &str,
        description: &str,
    ) -> Result<ProviderIntent> {
        let currency = Currency::from_str(&currency.to_lowercase())
            .map_err(|_| anyhow!("unsupported stripe currency: {}", currency))?;
        let success_url = std::env::var("STRIPE_SUCCESS_URL")?;
        let cancel_url = std::env::var("STRIPE_CANCEL_URL")?;

        let params = CreateCheckoutSession {
            mode: Some(CheckoutSessionMode::Payment),
            line_items: Some(vec![CreateCheckoutSessionLineItems {
                price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                    currency,
                    unit_amount: Some(amount_cents),
                    product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                        name: description.to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                quantity: Some(1),
                ..Default::default()
            }]),
            success_url: Some(&success_url),
            cancel_url: Some(&cancel_url),
            ..Default::default()
        };

        let session = CheckoutSession::create(self.get_client(), params)
            .await
            .map_err(|e| anyhow!("stripe session create failed: {}", e))?;
        let url = session
            .url
            .clone()
            .ok_or_else(|| anyhow!("stripe session {} has no hosted url", session.id))?;

        tracing::info!(
            "[StripeCheckoutClient::create_session] created session {}",
            session.id
        );
        Ok(ProviderIntent {
            provider_ref: session.id.to_string(),
            payload: json!({ "session_id": session.id, "url": url }),
        })
    }

    /// Reads the session back. Stripe confirmation is poll/redirect driven:
    /// paid `payment_status` or a complete session counts as captured funds.
    pub async fn retrieve_session(&self, session_id: &str) -> Result<ProviderPaymentState> {
        let id = session_id
            .parse()
            .map_err(|_| anyhow!("malformed stripe session id: {}", session_id))?;
        let session = CheckoutSession::retrieve(self.get_client(), &id, &[])
            .await
            .map_err(|e| anyhow!("stripe session retrieve failed: {}", e))?;

        let paid = session.payment_status == CheckoutSessionPaymentStatus::Paid
            || session.status == Some(CheckoutSessionStatus::Complete);
        if paid {
            Ok(ProviderPaymentState::Succeeded {
                capture_id: session.payment_intent.as_ref().map(|pi| pi.id().to_string()),
            })
        } else if session.status == Some(CheckoutSessionStatus::Expired) {
            Ok(ProviderPaymentState::Failed {
                reason: "checkout session expired".to_string(),
            })
        } else {
            Ok(ProviderPaymentState::Pending)
        }
    }
}

#[async_trait::async_trait]
impl PaymentProvider for StripeCheckoutClient {
    fn tag(&self) -> &'static str {
        "stripe"
    }

    async fn create_intent(
        &self,
        amount_cents: i64,
        currency: &str,
        description: &str,
    ) -> Result<ProviderIntent> {
        self.create_session(amount_cents, currency, description).await
    }

    async fn confirm_or_query(&self, provider_ref: &str) -> Result<ProviderPaymentState> {
        self.retrieve_session(provider_ref).await
    }
}
