use reqwest::Client;
use serde::Deserialize;

use crate::config::StripeConfig;
use crate::error::{AppError, AppResult};

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: String,
}

impl PaymentIntent {
    pub fn succeeded(&self) -> bool {
        self.status == "succeeded"
    }
}

/// Stripe REST（表单编码）客户端
#[derive(Clone)]
pub struct StripeService {
    client: Client,
    config: StripeConfig,
}

impl StripeService {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub async fn create_payment_intent(
        &self,
        amount_cents: i64,
        currency: &str,
        metadata: &[(&str, String)],
    ) -> AppResult<PaymentIntent> {
        let mut params = vec![
            ("amount".to_string(), amount_cents.to_string()),
            ("currency".to_string(), currency.to_lowercase()),
            ("automatic_payment_methods[enabled]".to_string(), "true".to_string()),
        ];
        params.extend(
            metadata
                .iter()
                .map(|(k, v)| (format!("metadata[{k}]"), v.clone())),
        );

        let response = self
            .client
            .post(format!("{STRIPE_API_BASE}/payment_intents"))
            .bearer_auth(&self.config.secret_key)
            .form(&params)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let error_text = response.text().await.unwrap_or_default();
            Err(AppError::ExternalApiError(format!(
                "Failed to create payment intent: {error_text}"
            )))
        }
    }

    pub async fn retrieve_payment_intent(&self, payment_intent_id: &str) -> AppResult<PaymentIntent> {
        validate_intent_id(payment_intent_id)?;

        let response = self
            .client
            .get(format!("{STRIPE_API_BASE}/payment_intents/{payment_intent_id}"))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let error_text = response.text().await.unwrap_or_default();
            Err(AppError::ExternalApiError(format!(
                "Failed to retrieve payment intent: {error_text}"
            )))
        }
    }

    /// 用客户端提交的 payment method 确认支付
    pub async fn confirm_payment_intent(
        &self,
        payment_intent_id: &str,
        payment_method_id: &str,
    ) -> AppResult<PaymentIntent> {
        validate_intent_id(payment_intent_id)?;

        let response = self
            .client
            .post(format!(
                "{STRIPE_API_BASE}/payment_intents/{payment_intent_id}/confirm"
            ))
            .bearer_auth(&self.config.secret_key)
            .form(&[("payment_method", payment_method_id)])
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let error_text = response.text().await.unwrap_or_default();
            Err(AppError::ExternalApiError(format!(
                "Failed to confirm payment intent: {error_text}"
            )))
        }
    }
}

fn validate_intent_id(payment_intent_id: &str) -> AppResult<()> {
    if payment_intent_id.is_empty()
        || !payment_intent_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(AppError::ValidationError("Invalid payment intent id".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_intent_deserialize() {
        let raw = r#"{"id":"pi_123","client_secret":"pi_123_secret","amount":8900,
                      "currency":"usd","status":"succeeded","object":"payment_intent"}"#;
        let intent: PaymentIntent = serde_json::from_str(raw).unwrap();
        assert!(intent.succeeded());
        assert_eq!(intent.amount, 8900);
    }

    #[tokio::test]
    async fn test_rejects_malformed_intent_id() {
        let service = StripeService::new(StripeConfig {
            secret_key: "sk_test_123".to_string(),
        });
        assert!(matches!(
            service.retrieve_payment_intent("../customers").await,
            Err(AppError::ValidationError(_))
        ));
    }
}
