use crate::error::{MarketError, Result};
use crate::params::MarketParams;
use std::sync::Arc;
use tracing::info;
use usertest_ledger::{
    tester_earnings, Cents, EntryMetadata, LedgerStore, Profile, Submission, SubmissionId,
    SubmissionStatus, Task, TaskId, TaskStatus, Transaction, UserId, WalletManager,
};

/// Everything an approval wrote.
#[derive(Debug, Clone)]
pub struct ApprovalReceipt {
    pub task: Task,
    pub submission: Submission,
    pub release: Transaction,
    pub earnings: Cents,
    pub tester: Profile,
}

/// Developer-side review of submissions.
pub struct ReviewDesk {
    store: Arc<dyn LedgerStore>,
    wallets: Arc<WalletManager>,
    params: Arc<MarketParams>,
}

impl ReviewDesk {
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

    /// Loads the task and submission and checks `developer` owns the task.
    async fn load_for_review(
        &self,
        developer: &UserId,
        task_id: TaskId,
        submission_id: SubmissionId,
    ) -> Result<(Task, Submission)> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("task {}", task_id)))?;
        if &task.developer_id != developer {
            return Err(MarketError::Forbidden("Not authorized".to_string()));
        }

        let submission = self
            .store
            .get_submission(submission_id)
            .await?
            .filter(|s| s.task_id == task_id)
            .ok_or_else(|| MarketError::NotFound("Submission not found".to_string()))?;
        if submission.status != SubmissionStatus::Pending {
            return Err(MarketError::SubmissionNotPending);
        }
        Ok((task, submission))
    }

    /// Approves a pending submission and pays the tester their share of the
    /// task budget, held according to the tester's trust level.
    ///
    /// The status flip and the release entry are one store operation, so a
    /// repeated or concurrent approval fails with
    /// [`MarketError::SubmissionNotPending`] without paying twice.
    pub async fn approve(
        &self,
        developer: &UserId,
        task_id: TaskId,
        submission_id: SubmissionId,
        rating: Option<u8>,
    ) -> Result<ApprovalReceipt> {
        let rating = rating.unwrap_or(self.params.default_rating);
        if !(1..=5).contains(&rating) {
            return Err(MarketError::InvalidRequest(
                "rating must be between 1 and 5".to_string(),
            ));
        }

        let (task, submission) = self.load_for_review(developer, task_id, submission_id).await?;
        let tester = submission.tester_id.clone();
        let earnings = tester_earnings(task.budget, task.platform_fee_percent);
        let profile = self.store.get_or_create_profile(&tester).await?;

        let approved = self
            .wallets
            .release_for_submission(
                submission_id,
                &tester,
                earnings,
                profile.trust_level,
                EntryMetadata::for_submission(task_id, submission_id, task.title.clone()),
                rating,
            )
            .await?
            .ok_or(MarketError::SubmissionNotPending)?;

        let task = self
            .store
            .set_task_status(task_id, TaskStatus::Completed, self.wallets.now())
            .await?;
        let tester_profile = self.store.record_completion(&tester, self.params.trust).await?;

        if tester_profile.trust_level != profile.trust_level {
            info!(
                tester = %tester,
                from = profile.trust_level.as_str(),
                to = tester_profile.trust_level.as_str(),
                completed = tester_profile.completed_tasks_count,
                "⭐ Tester promoted"
            );
        }
        info!(
            task_id = %task_id,
            submission_id = %submission_id,
            tester = %tester,
            earnings_cents = earnings.as_i64(),
            rating,
            "✅ Submission approved"
        );

        Ok(ApprovalReceipt {
            task,
            submission: approved.submission,
            release: approved.release,
            earnings,
            tester: tester_profile,
        })
    }

    /// Rejects a pending submission. The escrowed share stays reserved.
    pub async fn reject(
        &self,
        developer: &UserId,
        task_id: TaskId,
        submission_id: SubmissionId,
        feedback: Option<String>,
    ) -> Result<Submission> {
        self.load_for_review(developer, task_id, submission_id).await?;
        let feedback = feedback.filter(|f| !f.trim().is_empty());

        let rejected = self
            .store
            .reject_submission(submission_id, feedback, self.wallets.now())
            .await?
            .ok_or(MarketError::SubmissionNotPending)?;

        info!(
            task_id = %task_id,
            submission_id = %submission_id,
            "❌ Submission rejected"
        );
        Ok(rejected)
    }
}
