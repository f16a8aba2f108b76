//! USDC settlement hand-off.
//!
//! Stands in for the call to an external settlement service. It only logs,
//! and the reconciliation pipeline runs it detached so it can never hold up
//! persistence or notification.

use crate::services::stripe::PaymentIntent;
use rust_decimal::Decimal;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct SettlementService {
    wallet_address: Option<String>,
}

impl SettlementService {
    pub fn new(wallet_address: Option<String>) -> Self {
        Self { wallet_address }
    }

    /// Destination wallet: the one recorded on the intent, else the configured one.
    pub fn destination<'a>(&'a self, intent: &'a PaymentIntent) -> Option<&'a str> {
        intent
            .metadata
            .get("wallet_address")
            .map(String::as_str)
            .filter(|address| !address.is_empty() && *address != "pending")
            .or(self.wallet_address.as_deref())
    }

    pub async fn process(&self, intent: &PaymentIntent, usdc_amount: Decimal) -> anyhow::Result<()> {
        let Some(wallet) = self.destination(intent) else {
            info!(
                payment_intent_id = %intent.id,
                usdc_amount = %usdc_amount,
                "No destination wallet; settlement deferred"
            );
            return Ok(());
        };

        info!(
            payment_intent_id = %intent.id,
            usdc_amount = %usdc_amount,
            wallet = %wallet,
            "Settling USDC purchase"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn intent(wallet: Option<&str>) -> PaymentIntent {
        let mut metadata = Metadata::new();
        if let Some(wallet) = wallet {
            metadata.insert("wallet_address".to_string(), wallet.to_string());
        }
        PaymentIntent {
            id: "pi_1".to_string(),
            amount: 1000,
            currency: "usd".to_string(),
            status: "succeeded".to_string(),
            client_secret: None,
            metadata,
            receipt_email: None,
            description: None,
            created: 0,
        }
    }

    #[test]
    fn intent_wallet_wins_over_configured_wallet() {
        let service = SettlementService::new(Some("0xconfigured".to_string()));
        assert_eq!(service.destination(&intent(Some("0xintent"))), Some("0xintent"));
        assert_eq!(service.destination(&intent(Some("pending"))), Some("0xconfigured"));
        assert_eq!(service.destination(&intent(None)), Some("0xconfigured"));
    }

    #[tokio::test]
    async fn missing_wallet_is_not_an_error() {
        let service = SettlementService::default();
        assert!(service.process(&intent(None), Decimal::TEN).await.is_ok());
    }
}
