use crate::api::{ApiResult, AppState};
use crate::auth::AuthUser;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use usertest_ledger::{
    CancelOutcome, Cents, Submission, SubmissionId, Task, TaskId, Transaction, TrustLevel,
};
use usertest_market::{MarketError, PendingReview, SubmissionDraft, TaskDraft};

#[derive(Serialize)]
pub struct TasksResponse {
    pub tasks: Vec<Task>,
}

#[derive(Serialize)]
pub struct PendingReviewsResponse {
    pub reviews: Vec<PendingReview>,
}

#[derive(Serialize, Deserialize)]
pub struct SubmitResponse {
    pub submission_id: SubmissionId,
}

#[derive(Serialize)]
pub struct SubmissionsResponse {
    pub submissions: Vec<Submission>,
}

#[derive(Default, Deserialize)]
pub struct ApproveRequest {
    pub rating: Option<u8>,
}

#[derive(Serialize)]
pub struct ApproveResponse {
    pub submission: Submission,
    pub earnings_cents: Cents,
    pub release: Transaction,
    pub tester_trust_level: TrustLevel,
}

#[derive(Default, Deserialize)]
pub struct RejectRequest {
    pub feedback: Option<String>,
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub removed_entries: usize,
    pub task_reopened: bool,
}

pub fn task_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tasks", post(create_task).get(list_posted))
        .route("/api/tasks/mine", get(list_mine))
        .route("/api/tasks/pending-reviews", get(pending_reviews))
        .route("/api/tasks/:id", get(get_task))
        .route("/api/tasks/:id/submissions", post(submit).get(list_submissions))
        .route("/api/tasks/:id/submissions/:sid/approve", post(approve))
        .route("/api/tasks/:id/submissions/:sid/reject", post(reject))
        .route("/api/tasks/:id/submissions/:sid", delete(cancel))
}

async fn create_task(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(draft): Json<TaskDraft>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let _timer = state.time("reserve");
    let task = state.market.tasks.create_task(&user.user_id, draft).await?;
    state.metrics.reservations_total.inc();
    Ok((StatusCode::CREATED, Json(task)))
}

async fn list_posted(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
) -> ApiResult<Json<TasksResponse>> {
    let tasks = state.market.tasks.posted_tasks().await?;
    Ok(Json(TasksResponse { tasks }))
}

async fn list_mine(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> ApiResult<Json<TasksResponse>> {
    let tasks = state.market.tasks.tasks_for_developer(&user.user_id).await?;
    Ok(Json(TasksResponse { tasks }))
}

async fn pending_reviews(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> ApiResult<Json<PendingReviewsResponse>> {
    let reviews = state.market.tasks.pending_reviews(&user.user_id).await?;
    Ok(Json(PendingReviewsResponse { reviews }))
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(id): Path<TaskId>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.market.tasks.get_task(id).await?))
}

async fn submit(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<TaskId>,
    Json(draft): Json<SubmissionDraft>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let _timer = state.time("claim");
    match state.market.tasks.submit(&user.user_id, id, draft).await {
        Ok(submission) => Ok((
            StatusCode::CREATED,
            Json(SubmitResponse {
                submission_id: submission.id,
            }),
        )),
        Err(e @ MarketError::TaskAlreadyClaimed) => {
            state.metrics.claim_conflicts_total.inc();
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn list_submissions(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<TaskId>,
) -> ApiResult<Json<SubmissionsResponse>> {
    let submissions = state
        .market
        .tasks
        .submissions_for_task(&user.user_id, id)
        .await?;
    Ok(Json(SubmissionsResponse { submissions }))
}

async fn approve(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((id, sid)): Path<(TaskId, SubmissionId)>,
    body: Option<Json<ApproveRequest>>,
) -> ApiResult<Json<ApproveResponse>> {
    let _timer = state.time("release");
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let receipt = state
        .market
        .reviews
        .approve(&user.user_id, id, sid, request.rating)
        .await?;
    state.metrics.record_release(receipt.release.status);

    Ok(Json(ApproveResponse {
        submission: receipt.submission,
        earnings_cents: receipt.earnings,
        release: receipt.release,
        tester_trust_level: receipt.tester.trust_level,
    }))
}

async fn reject(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((id, sid)): Path<(TaskId, SubmissionId)>,
    body: Option<Json<RejectRequest>>,
) -> ApiResult<Json<Submission>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let submission = state
        .market
        .reviews
        .reject(&user.user_id, id, sid, request.feedback)
        .await?;
    Ok(Json(submission))
}

/// Development-only withdrawal of the caller's own submission.
async fn cancel(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((id, sid)): Path<(TaskId, SubmissionId)>,
) -> ApiResult<Json<CancelResponse>> {
    match state
        .market
        .tasks
        .cancel_for_debug(&user.user_id, id, sid)
        .await?
    {
        CancelOutcome::Cancelled {
            removed_entries,
            task_reopened,
        } => {
            debug!(
                task_id = %id,
                submission_id = %sid,
                removed_entries,
                task_reopened,
                "Submission cancelled"
            );
            Ok(Json(CancelResponse {
                removed_entries,
                task_reopened,
            }))
        }
        CancelOutcome::NotFound => {
            Err(MarketError::NotFound("Submission not found or not yours".to_string()).into())
        }
    }
}
