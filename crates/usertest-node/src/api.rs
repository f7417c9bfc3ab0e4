use crate::api_stripe::stripe_routes;
use crate::api_tasks::task_routes;
use crate::api_wallet::wallet_routes;
use crate::auth::AuthConfig;
use crate::metrics::Metrics;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Extension, Router,
};
use prometheus::HistogramTimer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use usertest_ledger::LedgerError;
use usertest_market::{MarketError, Marketplace};

#[derive(Clone)]
pub struct AppState {
    pub market: Arc<Marketplace>,
    pub metrics: Metrics,
    /// Origin the browser returns to after checkout or onboarding.
    pub public_url: String,
}

impl AppState {
    pub(crate) fn time(&self, operation: &str) -> HistogramTimer {
        self.metrics
            .ledger_op_duration
            .with_label_values(&[operation])
            .start_timer()
    }
}

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler error. Wraps [`MarketError`] and picks the HTTP status for it.
#[derive(Debug)]
pub struct ApiError(pub MarketError);

impl From<MarketError> for ApiError {
    fn from(e: MarketError) -> Self {
        ApiError(e)
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        ApiError(e.into())
    }
}

pub fn status_for(err: &MarketError) -> StatusCode {
    match err {
        MarketError::InvalidRequest(_)
        | MarketError::BelowMinimum { .. }
        | MarketError::PayoutMethodMissing
        | MarketError::WebhookRejected(_) => StatusCode::BAD_REQUEST,
        MarketError::Forbidden(_) | MarketError::DebugDisabled => StatusCode::FORBIDDEN,
        MarketError::NotFound(_) => StatusCode::NOT_FOUND,
        MarketError::TaskAlreadyClaimed
        | MarketError::AlreadySubmitted
        | MarketError::TaskClosed
        | MarketError::SubmissionNotPending => StatusCode::CONFLICT,
        MarketError::ExternalProcessorError(_) => StatusCode::BAD_GATEWAY,
        MarketError::InvalidTransition { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        MarketError::Ledger(ledger) => match ledger {
            LedgerError::InsufficientFunds { .. }
            | LedgerError::InsufficientBalance { .. }
            | LedgerError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::DuplicateEntry(_) => StatusCode::CONFLICT,
            LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self.0, "Request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Full HTTP surface. Everything except `/health`, `/metrics` and the
/// processor webhook requires a bearer token.
pub fn router(state: AppState, auth: AuthConfig) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(get_metrics))
        .merge(wallet_routes())
        .merge(task_routes())
        .merge(stripe_routes())
        .with_state(Arc::new(state))
        .layer(Extension(auth))
}

async fn health() -> &'static str {
    "OK"
}

async fn get_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.gather(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use usertest_ledger::Cents;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&MarketError::InvalidRequest("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&MarketError::BelowMinimum {
                minimum: Cents::new(100),
                requested: Cents::new(50)
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&MarketError::Ledger(LedgerError::InsufficientFunds {
                required: Cents::new(2500),
                available: Cents::ZERO
            })),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&MarketError::Forbidden("x".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(status_for(&MarketError::TaskAlreadyClaimed), StatusCode::CONFLICT);
        assert_eq!(status_for(&MarketError::AlreadySubmitted), StatusCode::CONFLICT);
        assert_eq!(status_for(&MarketError::TaskClosed), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&MarketError::SubmissionNotPending),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&MarketError::ExternalProcessorError("down".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&MarketError::Ledger(LedgerError::Storage("io".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
