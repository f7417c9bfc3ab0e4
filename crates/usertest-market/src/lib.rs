pub mod deposits;
pub mod error;
pub mod params;
pub mod payout;
pub mod review;
pub mod tasks;

pub use deposits::{DepositDesk, WebhookOutcome};
pub use error::{MarketError, Result};
pub use params::MarketParams;
pub use payout::{Payout, PayoutAccountStatus, PayoutProcessor, PayoutState};
pub use review::{ApprovalReceipt, ReviewDesk};
pub use tasks::{PendingReview, SubmissionDraft, TaskBoard, TaskDraft};

use std::sync::Arc;
use usertest_ledger::LedgerEngine;
use usertest_payments::PaymentGateway;

/// Marketplace services sharing one ledger and one payment gateway.
pub struct Marketplace {
    pub ledger: Arc<LedgerEngine>,
    pub params: Arc<MarketParams>,
    pub tasks: Arc<TaskBoard>,
    pub reviews: Arc<ReviewDesk>,
    pub payouts: Arc<PayoutProcessor>,
    pub deposits: Arc<DepositDesk>,
}

impl Marketplace {
    pub fn new(
        ledger: Arc<LedgerEngine>,
        gateway: Arc<dyn PaymentGateway>,
        params: MarketParams,
        webhook_secret: String,
    ) -> Result<Self> {
        params.validate()?;
        let params = Arc::new(params);
        let store = ledger.store.clone();
        let wallets = ledger.wallets.clone();

        let tasks = Arc::new(TaskBoard::new(store.clone(), wallets.clone(), params.clone()));
        let reviews = Arc::new(ReviewDesk::new(store.clone(), wallets.clone(), params.clone()));
        let payouts = Arc::new(PayoutProcessor::new(
            store.clone(),
            wallets.clone(),
            gateway.clone(),
            params.clone(),
        ));
        let deposits = Arc::new(DepositDesk::new(
            store,
            wallets,
            gateway,
            params.clone(),
            webhook_secret,
        ));

        Ok(Self {
            ledger,
            params,
            tasks,
            reviews,
            payouts,
            deposits,
        })
    }
}
