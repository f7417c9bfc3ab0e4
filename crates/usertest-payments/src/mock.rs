use crate::error::{PaymentError, Result};
use crate::gateway::{
    AccountLink, AccountLinkRequest, CheckoutRequest, CheckoutSession, ConnectedAccount,
    ConnectedAccountRequest, PaymentGateway, Transfer, TransferRequest,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

/// In-process gateway that records every call. Transfers can be made to fail
/// to exercise payout compensation.
#[derive(Default)]
pub struct MockGateway {
    fail_transfers: AtomicBool,
    counter: AtomicU64,
    transfers: RwLock<Vec<TransferRequest>>,
    accounts: RwLock<Vec<ConnectedAccountRequest>>,
    checkouts: RwLock<Vec<CheckoutRequest>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_transfers() -> Self {
        let gateway = Self::default();
        gateway.set_fail_transfers(true);
        gateway
    }

    pub fn set_fail_transfers(&self, fail: bool) {
        self.fail_transfers.store(fail, Ordering::SeqCst);
    }

    pub async fn transfers(&self) -> Vec<TransferRequest> {
        self.transfers.read().await.clone()
    }

    pub async fn accounts(&self) -> Vec<ConnectedAccountRequest> {
        self.accounts.read().await.clone()
    }

    pub async fn checkouts(&self) -> Vec<CheckoutRequest> {
        self.checkouts.read().await.clone()
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}_mock_{}", prefix, self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_transfer(&self, request: TransferRequest) -> Result<Transfer> {
        self.transfers.write().await.push(request);
        if self.fail_transfers.load(Ordering::SeqCst) {
            return Err(PaymentError::Api {
                status: 400,
                message: "insufficient_funds: platform balance too low".to_string(),
            });
        }
        Ok(Transfer {
            id: self.next_id("tr"),
        })
    }

    async fn create_connected_account(
        &self,
        request: ConnectedAccountRequest,
    ) -> Result<ConnectedAccount> {
        self.accounts.write().await.push(request);
        Ok(ConnectedAccount {
            id: self.next_id("acct"),
        })
    }

    async fn create_account_link(&self, request: AccountLinkRequest) -> Result<AccountLink> {
        Ok(AccountLink {
            url: format!("https://connect.example.test/setup/{}", request.account_id),
        })
    }

    async fn create_checkout_session(&self, request: CheckoutRequest) -> Result<CheckoutSession> {
        self.checkouts.write().await.push(request);
        let id = self.next_id("cs");
        Ok(CheckoutSession {
            url: Some(format!("https://checkout.example.test/pay/{}", id)),
            id,
        })
    }
}
