use thiserror::Error;
use usertest_ledger::{Cents, LedgerError, StoreError};
use usertest_payments::PaymentError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarketError {
    #[error("Task already claimed by another tester")]
    TaskAlreadyClaimed,

    #[error("You already have a submission for this task")]
    AlreadySubmitted,

    #[error("Task is no longer accepting submissions")]
    TaskClosed,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Submission is no longer pending")]
    SubmissionNotPending,

    #[error("Minimum is {minimum}, requested {requested}")]
    BelowMinimum { minimum: Cents, requested: Cents },

    #[error("Add a payout method first")]
    PayoutMethodMissing,

    #[error("Only available in development")]
    DebugDisabled,

    #[error("Payment processor error: {0}")]
    ExternalProcessorError(String),

    #[error("Webhook rejected: {0}")]
    WebhookRejected(String),

    #[error("Invalid payout transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<StoreError> for MarketError {
    fn from(e: StoreError) -> Self {
        MarketError::Ledger(e.into())
    }
}

impl From<PaymentError> for MarketError {
    fn from(e: PaymentError) -> Self {
        if e.is_webhook_rejection() {
            MarketError::WebhookRejected(e.to_string())
        } else {
            MarketError::ExternalProcessorError(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, MarketError>;
