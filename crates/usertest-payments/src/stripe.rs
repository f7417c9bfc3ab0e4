//! Stripe REST client. Form-encoded POSTs authenticated with the secret key.

use crate::error::{PaymentError, Result};
use crate::gateway::{
    AccountLink, AccountLinkRequest, CheckoutRequest, CheckoutSession, ConnectedAccount,
    ConnectedAccountRequest, PaymentGateway, Transfer, TransferRequest,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
    pub currency: String,
    /// Country for new Express accounts.
    pub connect_country: String,
    pub timeout_secs: u64,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: String::new(),
            api_base: "https://api.stripe.com".to_string(),
            currency: "usd".to_string(),
            connect_country: "US".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

pub struct StripeGateway {
    config: StripeConfig,
    client: reqwest::Client,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Result<Self> {
        if config.secret_key.is_empty() {
            return Err(PaymentError::NotConfigured(
                "stripe secret key is empty".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(String, String)],
        idempotency_key: Option<&str>,
    ) -> Result<T> {
        let start = Instant::now();
        let url = format!("{}{}", self.config.api_base.trim_end_matches('/'), path);

        let mut request = self
            .client
            .post(&url)
            .bearer_auth(&self.config.secret_key)
            .form(params);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        debug!(
            path,
            status = status.as_u16(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Stripe request finished"
        );

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .ok()
                .map(|b| {
                    let kind = b.error.kind.unwrap_or_default();
                    let message = b.error.message.unwrap_or_default();
                    if kind.is_empty() {
                        message
                    } else {
                        format!("{}: {}", kind, message)
                    }
                })
                .unwrap_or(body);
            warn!(path, status = status.as_u16(), error = %message, "Stripe request rejected");
            return Err(PaymentError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

fn param(key: &str, value: impl ToString) -> (String, String) {
    (key.to_string(), value.to_string())
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_transfer(&self, request: TransferRequest) -> Result<Transfer> {
        let params = vec![
            param("amount", request.amount.as_i64()),
            param("currency", &request.currency),
            param("destination", &request.destination),
            param("metadata[user_id]", &request.user_id),
            param("metadata[payout_id]", request.payout_id),
        ];
        // The payout id doubles as idempotency key so a retried request cannot pay twice.
        let key = format!("payout-{}", request.payout_id);
        let transfer: Transfer = self.post_form("/v1/transfers", &params, Some(&key)).await?;

        info!(
            payout_id = %request.payout_id,
            transfer_id = %transfer.id,
            amount_cents = request.amount.as_i64(),
            "🏦 Stripe transfer created"
        );
        Ok(transfer)
    }

    async fn create_connected_account(
        &self,
        request: ConnectedAccountRequest,
    ) -> Result<ConnectedAccount> {
        let mut params = vec![
            param("type", "express"),
            param("country", &request.country),
            param("metadata[user_id]", &request.user_id),
            param("capabilities[card_payments][requested]", "true"),
            param("capabilities[transfers][requested]", "true"),
        ];
        if let Some(email) = &request.email {
            params.push(param("email", email));
        }
        let account: ConnectedAccount = self.post_form("/v1/accounts", &params, None).await?;

        info!(user = %request.user_id, account_id = %account.id, "🏦 Connected account created");
        Ok(account)
    }

    async fn create_account_link(&self, request: AccountLinkRequest) -> Result<AccountLink> {
        let params = vec![
            param("account", &request.account_id),
            param("refresh_url", &request.refresh_url),
            param("return_url", &request.return_url),
            param("type", "account_onboarding"),
        ];
        self.post_form("/v1/account_links", &params, None).await
    }

    async fn create_checkout_session(&self, request: CheckoutRequest) -> Result<CheckoutSession> {
        let mut params = vec![
            param("mode", "payment"),
            param("payment_method_types[0]", "card"),
            param("line_items[0][price_data][currency]", &request.currency),
            param(
                "line_items[0][price_data][product_data][name]",
                "Add funds to wallet",
            ),
            param(
                "line_items[0][price_data][unit_amount]",
                request.amount.as_i64(),
            ),
            param("line_items[0][quantity]", 1),
            param("success_url", &request.success_url),
            param("cancel_url", &request.cancel_url),
            param("metadata[user_id]", &request.user_id),
            param("payment_intent_data[setup_future_usage]", "off_session"),
        ];
        match (&request.customer_id, &request.customer_email) {
            (Some(customer), _) => params.push(param("customer", customer)),
            (None, Some(email)) => params.push(param("customer_email", email)),
            (None, None) => {}
        }

        let session: CheckoutSession = self
            .post_form("/v1/checkout/sessions", &params, None)
            .await?;
        info!(
            user = %request.user_id,
            session_id = %session.id,
            amount_cents = request.amount.as_i64(),
            "🧾 Checkout session created"
        );
        Ok(session)
    }
}
