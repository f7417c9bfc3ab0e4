use crate::error::{MarketError, Result};
use crate::params::MarketParams;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use usertest_ledger::{
    Cents, EntryMetadata, LedgerError, LedgerStore, TransactionId, UserId, WalletManager,
};
use usertest_payments::webhook::{self, StripeEvent};
use usertest_payments::{CheckoutRequest, CheckoutSession, PaymentGateway};

/// How a webhook delivery was handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Deposited {
        user_id: UserId,
        #[serde(rename = "amount_cents")]
        amount: Cents,
        transaction_id: TransactionId,
    },
    /// The session was already credited by an earlier delivery.
    AlreadyCredited { session_id: String },
    Ignored { kind: String },
}

/// Wallet top-ups through hosted checkout and the processor's webhook.
pub struct DepositDesk {
    store: Arc<dyn LedgerStore>,
    wallets: Arc<WalletManager>,
    gateway: Arc<dyn PaymentGateway>,
    params: Arc<MarketParams>,
    webhook_secret: String,
}

impl DepositDesk {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        wallets: Arc<WalletManager>,
        gateway: Arc<dyn PaymentGateway>,
        params: Arc<MarketParams>,
        webhook_secret: String,
    ) -> Self {
        Self {
            store,
            wallets,
            gateway,
            params,
            webhook_secret,
        }
    }

    pub async fn create_checkout(
        &self,
        user: &UserId,
        amount: Cents,
        email: Option<String>,
        base_url: &str,
    ) -> Result<CheckoutSession> {
        if amount < self.params.min_checkout {
            return Err(MarketError::BelowMinimum {
                minimum: self.params.min_checkout,
                requested: amount,
            });
        }

        let profile = self.store.get_or_create_profile(user).await?;
        let base = base_url.trim_end_matches('/');
        let session = self
            .gateway
            .create_checkout_session(CheckoutRequest {
                user_id: user.clone(),
                amount,
                currency: self.params.currency.clone(),
                customer_email: if profile.stripe_customer_id.is_none() {
                    email.or(profile.email)
                } else {
                    None
                },
                customer_id: profile.stripe_customer_id,
                success_url: format!("{}/dev/payments?success=1", base),
                cancel_url: format!("{}/dev/payments?canceled=1", base),
            })
            .await?;
        Ok(session)
    }

    /// Authenticates and applies one webhook delivery. Completed checkouts
    /// credit the wallet once per session, however often they are delivered.
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome> {
        let event = webhook::construct_event(
            payload,
            signature,
            &self.webhook_secret,
            self.wallets.now().timestamp(),
            self.params.webhook_tolerance_secs,
        )?;

        let (event_id, session) = match event {
            StripeEvent::CheckoutCompleted { event_id, session } => (event_id, session),
            StripeEvent::Other { event_id, kind } => {
                debug!(event_id = %event_id, kind = %kind, "Webhook event ignored");
                return Ok(WebhookOutcome::Ignored { kind });
            }
        };

        let user = session
            .user_id()
            .map(UserId::from)
            .ok_or_else(|| MarketError::InvalidRequest("Missing user_id in metadata".to_string()))?;
        let amount = Cents::new(session.amount_total.unwrap_or(0));
        if !amount.is_positive() {
            return Err(MarketError::InvalidRequest("Invalid amount".to_string()));
        }

        let metadata = EntryMetadata {
            stripe_session_id: Some(session.id.clone()),
            stripe_payment_intent: session.payment_intent.clone(),
            ..EntryMetadata::default()
        };
        let key = format!("checkout:{}", session.id);

        let outcome = match self
            .wallets
            .deposit(&user, amount, metadata, Some(key))
            .await
        {
            Ok(tx) => {
                info!(
                    event_id = %event_id,
                    session_id = %session.id,
                    user = %user,
                    amount_cents = amount.as_i64(),
                    "💳 Checkout deposit applied"
                );
                WebhookOutcome::Deposited {
                    user_id: user.clone(),
                    amount,
                    transaction_id: tx.id,
                }
            }
            Err(LedgerError::DuplicateEntry(_)) => {
                info!(
                    event_id = %event_id,
                    session_id = %session.id,
                    "Checkout already credited, redelivery acknowledged"
                );
                WebhookOutcome::AlreadyCredited {
                    session_id: session.id.clone(),
                }
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(customer) = session.customer.as_deref().filter(|c| !c.is_empty()) {
            if self
                .store
                .set_stripe_customer_id_if_absent(&user, customer)
                .await?
            {
                debug!(user = %user, customer, "Stored processor customer id");
            }
        }

        Ok(outcome)
    }
}
