use anyhow::Result;
use serde::{Deserialize, Serialize};

/// What an external payment network knows about a payment, reduced to the
/// three states the rest of the system cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProviderPaymentState {
    /// Funds captured. `capture_id` is the provider's settlement handle when
    /// it issues one distinct from the order reference.
    Succeeded { capture_id: Option<String> },
    Pending,
    Failed { reason: String },
}

impl ProviderPaymentState {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, ProviderPaymentState::Succeeded { .. })
    }
}

/// A freshly created provider-side payment, handed back to the client so it
/// can complete the approval flow (redirect URL, QR code).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderIntent {
    /// The provider's order/session/retrieval reference. This is the key the
    /// payment attempt ledger and payment intents are tracked under.
    pub provider_ref: String,
    /// Provider-specific material the client needs: approval links, hosted
    /// checkout URL, QR code image data.
    pub payload: serde_json::Value,
}

/// Uniform surface over PayPal, Stripe and NETS. Each adapter absorbs its
/// network's shape; callers only ever create and then confirm-or-query.
#[async_trait::async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Tag stored in `provider` columns, e.g. `paypal` / `stripe` / `nets_qr`.
    fn tag(&self) -> &'static str;

    async fn create_intent(
        &self,
        amount_cents: i64,
        currency: &str,
        description: &str,
    ) -> Result<ProviderIntent>;

    async fn confirm_or_query(&self, provider_ref: &str) -> Result<ProviderPaymentState>;
}

/// Renders minor units as the `"12.34"` decimal string every provider API
/// wants. Only valid for two-decimal currencies, which is all we sell in.
pub(crate) fn format_major_units(amount_cents: i64) -> String {
    format!("{}.{:02}", amount_cents / 100, (amount_cents % 100).abs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_minor_units() {
        assert_eq!(format_major_units(5000), "50.00");
        assert_eq!(format_major_units(5), "0.05");
        assert_eq!(format_major_units(199), "1.99");
    }

    #[test]
    fn succeeded_requires_the_variant_not_the_capture_id() {
        assert!(ProviderPaymentState::Succeeded { capture_id: None }.is_succeeded());
        assert!(!ProviderPaymentState::Pending.is_succeeded());
        assert!(!ProviderPaymentState::Failed {
            reason: "declined".into()
        }
        .is_succeeded());
    }
}
