use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use coursehub_common::{define_module_client, ModuleClient};

use crate::provider::{format_major_units, PaymentProvider, ProviderIntent, ProviderPaymentState};

define_module_client! {
    (struct NetsClient, "nets_qr")
    client_type: Client,
    env: ["NETS_API_BASE", "NETS_API_KEY", "NETS_PROJECT_ID"],
    setup: async {
        Client::new()
    }
}

/// A QR order as handed to the client: the code to scan and the reference
/// to poll status with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetsQrOrder {
    pub retrieval_ref: String,
    /// Base64-encoded QR code image.
    pub qr_code: String,
}

#[derive(Debug, Deserialize)]
struct QrRequestResponse {
    response_code: String,
    #[serde(default)]
    txn_retrieval_ref: Option<String>,
    #[serde(default)]
    qr_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QrQueryResponse {
    response_code: String,
    #[serde(default)]
    txn_status: Option<i64>,
}

impl NetsClient {
    fn base(&self) -> String {
        std::env::var("NETS_API_BASE").expect("checked by validate_env")
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<reqwest::Response> {
        let api_key = std::env::var("NETS_API_KEY")?;
        let project_id = std::env::var("NETS_PROJECT_ID")?;
        let response = self
            .get_client()
            .post(format!("{}{}", self.base(), path))
            .header("api-key", api_key)
            .header("project-id", project_id)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("nets {} failed ({}): {}", path, status, text));
        }
        Ok(response)
    }

    /// Requests a scannable QR for the amount. The retrieval reference keys
    /// all later status polling.
    pub async fn request_qr(&self, amount_cents: i64, currency: &str) -> Result<NetsQrOrder> {
        let response = self
            .post(
                "/request",
                json!({
                    "amt": format_major_units(amount_cents),
                    "currency": currency,
                }),
            )
            .await?;
        let body: QrRequestResponse = response.json().await?;

        if body.response_code != "00" {
            return Err(anyhow!("nets qr request rejected: {}", body.response_code));
        }
        let retrieval_ref = body
            .txn_retrieval_ref
            .ok_or_else(|| anyhow!("nets qr response missing retrieval ref"))?;
        let qr_code = body
            .qr_code
            .ok_or_else(|| anyhow!("nets qr response missing qr code"))?;

        tracing::info!("[NetsClient::request_qr] issued qr {}", retrieval_ref);
        Ok(NetsQrOrder {
            retrieval_ref,
            qr_code,
        })
    }

    /// Polls the transaction. `"00"` with `txn_status == 1` is paid; any
    /// non-`"00"` code or `txn_status > 1` is a failure; everything else is
    /// still pending.
    pub async fn query_status(&self, retrieval_ref: &str) -> Result<ProviderPaymentState> {
        let response = self
            .post("/query", json!({ "txn_retrieval_ref": retrieval_ref }))
            .await?;
        let body: QrQueryResponse = response.json().await?;

        let state = match (body.response_code.as_str(), body.txn_status) {
            ("00", Some(1)) => ProviderPaymentState::Succeeded {
                capture_id: Some(retrieval_ref.to_string()),
            },
            (code, _) if code != "00" => ProviderPaymentState::Failed {
                reason: format!("response code {}", code),
            },
            (_, Some(status)) if status > 1 => ProviderPaymentState::Failed {
                reason: format!("txn status {}", status),
            },
            _ => ProviderPaymentState::Pending,
        };
        Ok(state)
    }
}

#[async_trait::async_trait]
impl PaymentProvider for NetsClient {
    fn tag(&self) -> &'static str {
        "nets_qr"
    }

    async fn create_intent(
        &self,
        amount_cents: i64,
        currency: &str,
        _description: &str,
    ) -> Result<ProviderIntent> {
        let order = self.request_qr(amount_cents, currency).await?;
        Ok(ProviderIntent {
            provider_ref: order.retrieval_ref.clone(),
            payload: json!({
                "retrieval_ref": order.retrieval_ref,
                "qr_code": order.qr_code,
            }),
        })
    }

    async fn confirm_or_query(&self, provider_ref: &str) -> Result<ProviderPaymentState> {
        self.query_status(provider_ref).await
    }
}
