use crate::error::{MarketError, Result};
use crate::params::MarketParams;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use usertest_ledger::{
    CancelOutcome, Cents, ClaimOutcome, LedgerStore, Submission, SubmissionId, SubmissionStatus,
    Task, TaskId, TaskStatus, UserId, WalletManager,
};

/// What a developer sends to post a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDraft {
    #[serde(default)]
    pub title: Option<String>,
    pub app_url: String,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub steps: Vec<String>,
    /// Reward per tester.
    #[serde(rename = "budget_cents")]
    pub budget: Cents,
    #[serde(default)]
    pub max_testers: Option<u32>,
    #[serde(default)]
    pub platform_fee_percent: Option<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionDraft {
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub video_duration_seconds: Option<u32>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A task with submissions waiting on its developer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingReview {
    pub task_id: TaskId,
    pub title: String,
    pub testers: usize,
    #[serde(rename = "cost_cents")]
    pub cost: Cents,
}

/// Task posting, listings, submissions and the claim guard.
pub struct TaskBoard {
    store: Arc<dyn LedgerStore>,
    wallets: Arc<WalletManager>,
    params: Arc<MarketParams>,
}

impl TaskBoard {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        wallets: Arc<WalletManager>,
        params: Arc<MarketParams>,
    ) -> Self {
        Self {
            store,
            wallets,
            params,
        }
    }

    fn validate_draft(&self, draft: &TaskDraft) -> Result<()> {
        let has_steps = draft.steps.iter().any(|s| !s.trim().is_empty());
        let has_instructions = draft
            .instructions
            .as_ref()
            .map(|i| i.chars().count() >= self.params.min_instructions_len)
            .unwrap_or(false);
        if !has_steps && !has_instructions {
            return Err(MarketError::InvalidRequest(
                "Add at least one step or provide detailed instructions".to_string(),
            ));
        }
        if draft.app_url.trim().is_empty() {
            return Err(MarketError::InvalidRequest("app_url is required".to_string()));
        }
        if !draft.budget.is_positive() {
            return Err(MarketError::InvalidRequest(
                "budget must be positive".to_string(),
            ));
        }
        if draft.max_testers == Some(0) {
            return Err(MarketError::InvalidRequest(
                "max_testers must be at least 1".to_string(),
            ));
        }
        if draft.platform_fee_percent.map_or(false, |fee| fee > 100) {
            return Err(MarketError::InvalidRequest(
                "platform_fee_percent must be at most 100".to_string(),
            ));
        }
        Ok(())
    }

    /// Validates the draft, escrows `budget × max_testers` and posts the task.
    /// On shortfall nothing is created.
    pub async fn create_task(&self, developer: &UserId, draft: TaskDraft) -> Result<Task> {
        self.validate_draft(&draft)?;

        let now = self.wallets.now();
        let task = Task {
            id: TaskId::new(),
            developer_id: developer.clone(),
            title: draft
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| "Test".to_string()),
            app_url: draft.app_url,
            instructions: draft.instructions,
            steps: draft
                .steps
                .into_iter()
                .filter(|s| !s.trim().is_empty())
                .collect(),
            budget: draft.budget,
            max_testers: draft.max_testers.unwrap_or(self.params.default_max_testers),
            platform_fee_percent: draft
                .platform_fee_percent
                .unwrap_or(self.params.platform_fee_percent),
            status: TaskStatus::Posted,
            assigned_tester_id: None,
            created_at: now,
            updated_at: now,
        };

        let (task, _) = self.wallets.reserve_for_task(task).await?;
        info!(
            task_id = %task.id,
            developer = %developer,
            budget_cents = task.budget.as_i64(),
            max_testers = task.max_testers,
            "📝 Task created"
        );
        Ok(task)
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Task> {
        self.store
            .get_task(id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("task {}", id)))
    }

    /// Tasks open to testers.
    pub async fn posted_tasks(&self) -> Result<Vec<Task>> {
        Ok(self.store.list_tasks_by_status(TaskStatus::Posted).await?)
    }

    pub async fn tasks_for_developer(&self, developer: &UserId) -> Result<Vec<Task>> {
        Ok(self.store.list_tasks_by_developer(developer).await?)
    }

    pub async fn pending_reviews(&self, developer: &UserId) -> Result<Vec<PendingReview>> {
        let tasks = self.store.list_tasks_by_developer(developer).await?;
        let mut reviews = Vec::new();
        for task in tasks.into_iter().filter(|t| t.status.awaits_review()) {
            let pending = self
                .store
                .list_submissions_by_task(task.id)
                .await?
                .into_iter()
                .filter(|s| s.status == SubmissionStatus::Pending)
                .count();
            if pending == 0 {
                continue;
            }
            reviews.push(PendingReview {
                task_id: task.id,
                title: task.title,
                testers: pending,
                cost: task
                    .budget
                    .checked_mul(pending as i64)
                    .unwrap_or(Cents::new(i64::MAX)),
            });
        }
        Ok(reviews)
    }

    /// Claims the task for `tester` and records the submission in one store
    /// call. Refused once the task is completed, while another tester holds
    /// it, or while `tester` has a pending or approved submission on it.
    pub async fn submit(
        &self,
        tester: &UserId,
        task_id: TaskId,
        draft: SubmissionDraft,
    ) -> Result<Submission> {
        let video_url = draft
            .video_url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| MarketError::InvalidRequest("Video URL is required".to_string()))?;

        let now = self.wallets.now();
        let submission = Submission {
            id: SubmissionId::new(),
            task_id,
            tester_id: tester.clone(),
            video_url,
            video_duration_seconds: draft
                .video_duration_seconds
                .unwrap_or(self.params.default_video_duration_secs),
            notes: draft.notes,
            status: SubmissionStatus::Pending,
            developer_rating: None,
            developer_feedback: None,
            submitted_at: now,
            reviewed_at: None,
        };

        let submission = match self.store.claim_and_submit(submission).await? {
            ClaimOutcome::Claimed { submission, .. } => submission,
            ClaimOutcome::AlreadyClaimed => {
                warn!(task_id = %task_id, tester = %tester, "⛔ Claim conflict");
                return Err(MarketError::TaskAlreadyClaimed);
            }
            ClaimOutcome::AlreadySubmitted => return Err(MarketError::AlreadySubmitted),
            ClaimOutcome::Closed => return Err(MarketError::TaskClosed),
            ClaimOutcome::NotFound => {
                return Err(MarketError::NotFound(format!("task {}", task_id)));
            }
        };

        info!(
            task_id = %task_id,
            tester = %tester,
            submission_id = %submission.id,
            "🎬 Submission received"
        );
        Ok(submission)
    }

    /// Submissions of a task, visible to its developer only.
    pub async fn submissions_for_task(
        &self,
        requester: &UserId,
        task_id: TaskId,
    ) -> Result<Vec<Submission>> {
        let task = self.get_task(task_id).await?;
        if &task.developer_id != requester {
            return Err(MarketError::Forbidden("not the task owner".to_string()));
        }
        Ok(self.store.list_submissions_by_task(task_id).await?)
    }

    /// Development-only: a tester withdraws their own submission. Linked wallet
    /// entries go with it and the task reopens once no submission is left.
    pub async fn cancel_for_debug(
        &self,
        tester: &UserId,
        task_id: TaskId,
        submission_id: SubmissionId,
    ) -> Result<CancelOutcome> {
        if !self.params.allow_debug_cancel {
            return Err(MarketError::DebugDisabled);
        }

        let not_yours = || MarketError::NotFound("Submission not found or not yours".to_string());
        let submission = self
            .store
            .get_submission(submission_id)
            .await?
            .ok_or_else(not_yours)?;
        if &submission.tester_id != tester || submission.task_id != task_id {
            return Err(not_yours());
        }

        let outcome = self
            .store
            .cancel_submission(submission_id, self.wallets.now())
            .await?;
        debug!(submission_id = %submission_id, ?outcome, "Debug cancellation finished");
        Ok(outcome)
    }
}
