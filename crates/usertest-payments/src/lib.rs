pub mod error;
pub mod gateway;
pub mod mock;
pub mod stripe;
pub mod webhook;

pub use error::{PaymentError, Result};
pub use gateway::{
    AccountLink, AccountLinkRequest, CheckoutRequest, CheckoutSession, ConnectedAccount,
    ConnectedAccountRequest, PaymentGateway, Transfer, TransferRequest,
};
pub use mock::MockGateway;
pub use stripe::{StripeConfig, StripeGateway};
pub use webhook::{construct_event, CheckoutCompleted, StripeEvent};
