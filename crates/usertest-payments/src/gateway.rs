use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use usertest_ledger::{Cents, PayoutId, UserId};

/// Money movement to a tester's connected account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub payout_id: PayoutId,
    pub user_id: UserId,
    pub amount: Cents,
    pub currency: String,
    /// Connected account id (`acct_...`).
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedAccountRequest {
    pub user_id: UserId,
    pub email: Option<String>,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedAccount {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountLinkRequest {
    pub account_id: String,
    pub refresh_url: String,
    pub return_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountLink {
    pub url: String,
}

/// Hosted checkout for adding funds to a wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub user_id: UserId,
    pub amount: Cents,
    pub currency: String,
    /// Reused when the developer has paid before.
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

/// Thin pass-through to the payment processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_transfer(&self, request: TransferRequest) -> Result<Transfer>;

    async fn create_connected_account(
        &self,
        request: ConnectedAccountRequest,
    ) -> Result<ConnectedAccount>;

    async fn create_account_link(&self, request: AccountLinkRequest) -> Result<AccountLink>;

    async fn create_checkout_session(&self, request: CheckoutRequest) -> Result<CheckoutSession>;
}
