use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;

use coursehub_common::{define_module_client, get_current_timestamp, ModuleClient};

use crate::provider::{format_major_units, PaymentProvider, ProviderIntent, ProviderPaymentState};

/// Margin subtracted from the token lifetime so a token is never used right
/// at its expiry.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: i64,
}

pub struct PayPalInner {
    http: Client,
    token: RwLock<Option<CachedToken>>,
}

define_module_client! {
    (struct PayPalClient, "paypal")
    client_type: PayPalInner,
    env: ["PAYPAL_CLIENT_ID", "PAYPAL_CLIENT_SECRET", "PAYPAL_API_BASE"],
    setup: async {
        PayPalInner {
            http: Client::new(),
            token: RwLock::new(None),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    links: Vec<OrderLink>,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnit>,
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct OrderLink {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct PurchaseUnit {
    #[serde(default)]
    payments: Option<UnitPayments>,
}

#[derive(Debug, Deserialize)]
struct UnitPayments {
    #[serde(default)]
    captures: Vec<Capture>,
}

#[derive(Debug, Deserialize)]
struct Capture {
    id: String,
}

impl PayPalClient {
    fn api_base(&self) -> String {
        std::env::var("PAYPAL_API_BASE").expect("checked by validate_env")
    }

    /// Client-credentials token, cached until shortly before expiry.
    async fn access_token(&self) -> Result<String> {
        let inner = self.get_client();
        let now = get_current_timestamp();

        if let Some(cached) = inner.token.read().await.as_ref() {
            if cached.expires_at > now {
                return Ok(cached.access_token.clone());
            }
        }

        let client_id = std::env::var("PAYPAL_CLIENT_ID")?;
        let client_secret = std::env::var("PAYPAL_CLIENT_SECRET")?;

        let response = inner
            .http
            .post(format!("{}/v1/oauth2/token", self.api_base()))
            .basic_auth(&client_id, Some(&client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("paypal token request failed ({}): {}", status, body));
        }
        let token: TokenResponse = response.json().await?;

        let cached = CachedToken {
            access_token: token.access_token.clone(),
            expires_at: now + token.expires_in - TOKEN_EXPIRY_MARGIN_SECS,
        };
        *inner.token.write().await = Some(cached);
        Ok(token.access_token)
    }

    /// Creates a CAPTURE-intent order and returns its id plus approval links.
    pub async fn create_order(&self, amount_cents: i64, currency: &str) -> Result<ProviderIntent> {
        let token = self.access_token().await?;
        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "amount": {
                    "currency_code": currency,
                    "value": format_major_units(amount_cents),
                }
            }],
        });

        let response = self
            .get_client()
            .http
            .post(format!("{}/v2/checkout/orders", self.api_base()))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("paypal create order failed ({}): {}", status, body));
        }
        let order: OrderResponse = response.json().await?;

        tracing::info!("[PayPalClient::create_order] created order {}", order.id);
        Ok(ProviderIntent {
            provider_ref: order.id.clone(),
            payload: json!({
                "order_id": order.id,
                "links": order.links,
            }),
        })
    }

    /// Captures a buyer-approved order. Success requires `COMPLETED` status
    /// and a concrete capture id.
    pub async fn capture_order(&self, order_id: &str) -> Result<ProviderPaymentState> {
        let token = self.access_token().await?;
        let response = self
            .get_client()
            .http
            .post(format!(
                "{}/v2/checkout/orders/{}/capture",
                self.api_base(),
                order_id
            ))
            .bearer_auth(&token)
            .header("Content-Type", "application/json")
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Ok(ProviderPaymentState::Failed {
                reason: format!("capture failed ({}): {}", status, body),
            });
        }
        let order: OrderResponse = response.json().await?;

        let capture_id = order
            .purchase_units
            .iter()
            .filter_map(|u| u.payments.as_ref())
            .flat_map(|p| p.captures.iter())
            .map(|c| c.id.clone())
            .next();

        if order.status == "COMPLETED" && capture_id.is_some() {
            Ok(ProviderPaymentState::Succeeded { capture_id })
        } else {
            Ok(ProviderPaymentState::Failed {
                reason: format!("capture not completed, status {}", order.status),
            })
        }
    }
}

#[async_trait::async_trait]
impl PaymentProvider for PayPalClient {
    fn tag(&self) -> &'static str {
        "paypal"
    }

    async fn create_intent(
        &self,
        amount_cents: i64,
        currency: &str,
        _description: &str,
    ) -> Result<ProviderIntent> {
        self.create_order(amount_cents, currency).await
    }

    async fn confirm_or_query(&self, provider_ref: &str) -> Result<ProviderPaymentState> {
        self.capture_order(provider_ref).await
    }
}
