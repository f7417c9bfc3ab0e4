use crate::api::{ApiResult, AppState};
use crate::auth::AuthUser;
use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use usertest_ledger::Cents;
use usertest_market::{MarketError, Payout, PayoutAccountStatus, WebhookOutcome};
use usertest_payments::webhook::SIGNATURE_HEADER;

const DEFAULT_ONBOARDING_RETURN: &str = "/tester/earnings";

#[derive(Deserialize)]
pub struct CheckoutBody {
    pub amount_cents: Cents,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: Option<String>,
}

#[derive(Serialize)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(flatten)]
    pub outcome: WebhookOutcome,
}

#[derive(Default, Deserialize)]
pub struct CreateAccountBody {
    pub email: Option<String>,
}

#[derive(Serialize)]
pub struct CreateAccountResponse {
    pub account_id: String,
    pub created: bool,
}

#[derive(Default, Deserialize)]
pub struct AccountLinkBody {
    pub return_path: Option<String>,
}

#[derive(Serialize)]
pub struct AccountLinkResponse {
    pub url: String,
}

#[derive(Deserialize)]
pub struct PayoutBody {
    pub amount_cents: Cents,
}

pub fn stripe_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/stripe/create-checkout", post(create_checkout))
        .route("/api/stripe/webhook", post(webhook))
        .route("/api/stripe/connect/create-account", post(create_account))
        .route("/api/stripe/connect/account-link", post(account_link))
        .route("/api/stripe/connect/status", get(account_status))
        .route("/api/stripe/connect/request-payout", post(request_payout))
}

async fn create_checkout(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<CheckoutBody>,
) -> ApiResult<Json<CheckoutResponse>> {
    let session = state
        .market
        .deposits
        .create_checkout(&user.user_id, body.amount_cents, body.email, &state.public_url)
        .await?;
    Ok(Json(CheckoutResponse {
        session_id: session.id,
        url: session.url,
    }))
}

/// Processor callback. Authenticated by its signature, not a bearer token.
async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let _timer = state.time("deposit");
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let outcome = state
        .market
        .deposits
        .handle_webhook(&payload, signature)
        .await?;
    if matches!(outcome, WebhookOutcome::Deposited { .. }) {
        state.metrics.deposits_total.inc();
    }
    Ok(Json(WebhookAck {
        received: true,
        outcome,
    }))
}

async fn create_account(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    body: Option<Json<CreateAccountBody>>,
) -> ApiResult<Json<CreateAccountResponse>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let (account_id, created) = state
        .market
        .payouts
        .ensure_payout_account(&user.user_id, body.email)
        .await?;
    Ok(Json(CreateAccountResponse {
        account_id,
        created,
    }))
}

async fn account_link(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    body: Option<Json<AccountLinkBody>>,
) -> ApiResult<Json<AccountLinkResponse>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let return_path = body
        .return_path
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ONBOARDING_RETURN.to_string());
    let url = state
        .market
        .payouts
        .onboarding_link(&user.user_id, &state.public_url, &return_path)
        .await?;
    Ok(Json(AccountLinkResponse { url }))
}

async fn account_status(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> ApiResult<Json<PayoutAccountStatus>> {
    Ok(Json(state.market.payouts.account_status(&user.user_id).await?))
}

async fn request_payout(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<PayoutBody>,
) -> ApiResult<Json<Payout>> {
    let _timer = state.time("payout");
    match state
        .market
        .payouts
        .request_payout(&user.user_id, body.amount_cents)
        .await
    {
        Ok(payout) => {
            state
                .metrics
                .payouts_total
                .with_label_values(&["transferred"])
                .inc();
            Ok(Json(payout))
        }
        Err(e @ MarketError::ExternalProcessorError(_)) => {
            state
                .metrics
                .payouts_total
                .with_label_values(&["compensated"])
                .inc();
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}
