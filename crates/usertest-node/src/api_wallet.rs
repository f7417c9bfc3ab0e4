use crate::api::{ApiResult, AppState};
use crate::auth::AuthUser;
use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use usertest_ledger::{Cents, Transaction};

#[derive(Serialize, Deserialize)]
pub struct BalanceResponse {
    pub balance_cents: Cents,
    pub pending_cents: Cents,
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Serialize)]
pub struct TransactionsResponse {
    pub transactions: Vec<Transaction>,
}

pub fn wallet_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/wallet/balance", get(get_balance))
        .route("/api/wallet/transactions", get(get_transactions))
}

/// Settles matured holds, then reports the balance.
async fn get_balance(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> ApiResult<Json<BalanceResponse>> {
    let _timer = state.time("balance");
    let (snapshot, settlement) = state
        .market
        .ledger
        .wallets
        .settled_balance(&user.user_id)
        .await?;
    state.metrics.record_settled(settlement.settled);

    Ok(Json(BalanceResponse {
        balance_cents: snapshot.balance,
        pending_cents: snapshot.pending,
    }))
}

async fn get_transactions(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<TransactionsResponse>> {
    let transactions = state
        .market
        .ledger
        .wallets
        .transactions(&user.user_id, page.limit, page.offset)
        .await?;
    Ok(Json(TransactionsResponse { transactions }))
}
