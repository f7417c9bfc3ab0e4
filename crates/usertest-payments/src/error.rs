use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    #[error("HTTP transport error: {0}")]
    Http(String),

    #[error("Processor rejected request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Missing Stripe-Signature header")]
    MissingSignature,

    #[error("Webhook signature does not match")]
    InvalidSignature,

    #[error("Webhook timestamp outside tolerance")]
    TimestampOutOfTolerance,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Payment processor not configured: {0}")]
    NotConfigured(String),
}

impl PaymentError {
    /// Errors raised while authenticating a webhook, as opposed to talking to the API.
    pub fn is_webhook_rejection(&self) -> bool {
        matches!(
            self,
            PaymentError::MissingSignature
                | PaymentError::InvalidSignature
                | PaymentError::TimestampOutOfTolerance
                | PaymentError::MalformedPayload(_)
        )
    }
}

impl From<reqwest::Error> for PaymentError {
    fn from(e: reqwest::Error) -> Self {
        PaymentError::Http(e.to_string())
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(e: serde_json::Error) -> Self {
        PaymentError::MalformedPayload(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;
