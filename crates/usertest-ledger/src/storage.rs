use crate::error::{StoreError, StoreResult};
use crate::records::{
    ApprovedSubmission, Approval, CancelOutcome, ClaimOutcome, Profile, Submission,
    SubmissionStatus, Task, TaskStatus,
};
use crate::trust::TrustThresholds;
use crate::types::{
    Cents, NewEntry, Settlement, SubmissionId, TaskId, Transaction, TransactionId,
    TransactionStatus, UserId, Wallet,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Persistence for wallets, the transaction log, tasks, submissions and
/// profiles.
///
/// Every method is one atomic unit: implementations must not let another
/// operation observe a half-applied call. Balance changes only ever happen
/// together with the transaction row that explains them.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_or_create_wallet(&self, user: &UserId, now: DateTime<Utc>) -> StoreResult<Wallet>;

    /// Appends an entry. A completed entry moves the balance in the same
    /// operation and fails with [`StoreError::BalanceGuard`] if that would take
    /// it below zero.
    async fn post_entry(&self, entry: NewEntry) -> StoreResult<Transaction>;

    /// Marks every matured pending release of `user` completed and adds their
    /// sum to the balance once.
    async fn settle_matured(&self, user: &UserId, now: DateTime<Utc>) -> StoreResult<Settlement>;

    /// Sum of releases still inside their hold.
    async fn held_total(&self, user: &UserId, now: DateTime<Utc>) -> StoreResult<Cents>;

    async fn users_with_matured_holds(&self, now: DateTime<Utc>) -> StoreResult<Vec<UserId>>;

    /// Newest first.
    async fn list_transactions(
        &self,
        user: &UserId,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Transaction>>;

    /// Sum of completed entries, for reconciliation against the balance.
    async fn completed_total(&self, user: &UserId) -> StoreResult<Cents>;

    /// Escrows the reserve and inserts the task, or does neither.
    async fn create_task_with_reserve(
        &self,
        task: Task,
        reserve: NewEntry,
    ) -> StoreResult<(Task, Transaction)>;

    async fn get_task(&self, id: TaskId) -> StoreResult<Option<Task>>;

    async fn list_tasks_by_status(&self, status: TaskStatus) -> StoreResult<Vec<Task>>;

    async fn list_tasks_by_developer(&self, developer: &UserId) -> StoreResult<Vec<Task>>;

    /// Claims the task for the submission's tester and inserts the
    /// submission, or does neither. The claim holds only while the task takes
    /// submissions, is unassigned or assigned to this tester, and the tester
    /// has no pending or approved submission on it.
    async fn claim_and_submit(&self, submission: Submission) -> StoreResult<ClaimOutcome>;

    async fn set_task_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Task>;

    async fn get_submission(&self, id: SubmissionId) -> StoreResult<Option<Submission>>;

    async fn list_submissions_by_task(&self, task: TaskId) -> StoreResult<Vec<Submission>>;

    /// Flips a pending submission to approved and writes its release entry.
    /// Returns `None` without writing anything if it is no longer pending or
    /// the same tester already has an approved submission on the task.
    async fn approve_submission(
        &self,
        approval: Approval,
    ) -> StoreResult<Option<ApprovedSubmission>>;

    /// Returns `None` if the submission is no longer pending.
    async fn reject_submission(
        &self,
        id: SubmissionId,
        feedback: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Submission>>;

    /// Deletes a submission with its linked entries and reopens the task when
    /// no other submission is left.
    async fn cancel_submission(
        &self,
        id: SubmissionId,
        now: DateTime<Utc>,
    ) -> StoreResult<CancelOutcome>;

    async fn get_or_create_profile(&self, user: &UserId) -> StoreResult<Profile>;

    /// Increments the completed count and applies trust promotion.
    async fn record_completion(
        &self,
        user: &UserId,
        thresholds: TrustThresholds,
    ) -> StoreResult<Profile>;

    async fn set_stripe_account_id(&self, user: &UserId, account_id: &str) -> StoreResult<Profile>;

    /// Stores the customer id unless one is already set. Returns whether it was stored.
    async fn set_stripe_customer_id_if_absent(
        &self,
        user: &UserId,
        customer_id: &str,
    ) -> StoreResult<bool>;
}

#[derive(Default)]
struct MemoryState {
    wallets: HashMap<UserId, Wallet>,
    transactions: Vec<Transaction>,
    idempotency: HashMap<String, TransactionId>,
    tasks: HashMap<TaskId, Task>,
    submissions: HashMap<SubmissionId, Submission>,
    profiles: HashMap<UserId, Profile>,
}

impl MemoryState {
    fn wallet_mut(&mut self, user: &UserId, now: DateTime<Utc>) -> &mut Wallet {
        self.wallets
            .entry(user.clone())
            .or_insert_with(|| Wallet::empty(user.clone(), now))
    }

    fn apply_entry(&mut self, entry: NewEntry) -> StoreResult<Transaction> {
        entry.validate().map_err(StoreError::InvalidEntry)?;
        if let Some(key) = &entry.idempotency_key {
            if self.idempotency.contains_key(key) {
                return Err(StoreError::Duplicate(key.clone()));
            }
        }

        let now = entry.created_at;
        let completed = entry.is_completed();
        let wallet = self.wallet_mut(&entry.user_id, now);
        if completed {
            let next = wallet
                .balance
                .checked_add(entry.amount)
                .ok_or_else(|| StoreError::Backend("balance overflow".to_string()))?;
            if next.is_negative() {
                return Err(StoreError::BalanceGuard {
                    needed: entry.amount.abs(),
                    available: wallet.balance,
                });
            }
            wallet.balance = next;
            wallet.updated_at = now;
        }

        let tx = entry.into_transaction(TransactionId::new());
        if let Some(key) = &tx.idempotency_key {
            self.idempotency.insert(key.clone(), tx.id);
        }
        self.transactions.push(tx.clone());
        Ok(tx)
    }
}

/// In-process store. A single lock covers all tables, so each trait call is
/// atomic with respect to every other.
pub struct MemoryLedgerStore {
    state: Arc<RwLock<MemoryState>>,
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
        }
    }

    /// Inserts or replaces a profile. Used to seed trust levels.
    pub async fn put_profile(&self, profile: Profile) {
        let mut state = self.state.write().await;
        state.profiles.insert(profile.user_id.clone(), profile);
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn get_or_create_wallet(&self, user: &UserId, now: DateTime<Utc>) -> StoreResult<Wallet> {
        let mut state = self.state.write().await;
        Ok(state.wallet_mut(user, now).clone())
    }

    async fn post_entry(&self, entry: NewEntry) -> StoreResult<Transaction> {
        let mut state = self.state.write().await;
        let tx = state.apply_entry(entry)?;

        info!(
            user = %tx.user_id,
            kind = %tx.kind,
            amount_cents = tx.amount.as_i64(),
            status = tx.status.as_str(),
            storage_type = "memory",
            "📦 Entry recorded"
        );
        Ok(tx)
    }

    async fn settle_matured(&self, user: &UserId, now: DateTime<Utc>) -> StoreResult<Settlement> {
        let mut state = self.state.write().await;

        let mut settlement = Settlement::default();
        for tx in state
            .transactions
            .iter_mut()
            .filter(|tx| &tx.user_id == user && tx.is_matured(now))
        {
            tx.status = TransactionStatus::Completed;
            settlement.amount = settlement.amount.saturating_add(tx.amount);
            settlement.settled += 1;
        }

        if settlement.settled > 0 {
            let wallet = state.wallet_mut(user, now);
            let before = wallet.balance;
            wallet.balance = wallet.balance.saturating_add(settlement.amount);
            wallet.updated_at = now;

            info!(
                user = %user,
                settled = settlement.settled,
                amount_cents = settlement.amount.as_i64(),
                balance_before = before.as_i64(),
                balance_after = wallet.balance.as_i64(),
                storage_type = "memory",
                "✅ Matured holds settled"
            );
        }

        Ok(settlement)
    }

    async fn held_total(&self, user: &UserId, now: DateTime<Utc>) -> StoreResult<Cents> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .iter()
            .filter(|tx| &tx.user_id == user && tx.is_held(now))
            .map(|tx| tx.amount)
            .sum())
    }

    async fn users_with_matured_holds(&self, now: DateTime<Utc>) -> StoreResult<Vec<UserId>> {
        let state = self.state.read().await;
        let mut users: Vec<UserId> = state
            .transactions
            .iter()
            .filter(|tx| tx.is_matured(now))
            .map(|tx| tx.user_id.clone())
            .collect();
        users.sort();
        users.dedup();
        Ok(users)
    }

    async fn list_transactions(
        &self,
        user: &UserId,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Transaction>> {
        let start_time = Instant::now();
        let state = self.state.read().await;

        // Reverse first so entries sharing a timestamp stay newest-first.
        let mut rows: Vec<Transaction> = state
            .transactions
            .iter()
            .rev()
            .filter(|tx| &tx.user_id == user)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let page: Vec<Transaction> = rows.into_iter().skip(offset).take(limit).collect();

        debug!(
            operation = "tx_history",
            user = %user,
            limit,
            offset,
            result_count = page.len(),
            duration_ms = start_time.elapsed().as_millis() as u64,
            "🔍 Transaction history query"
        );
        Ok(page)
    }

    async fn completed_total(&self, user: &UserId) -> StoreResult<Cents> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .iter()
            .filter(|tx| &tx.user_id == user && tx.is_completed())
            .map(|tx| tx.amount)
            .sum())
    }

    async fn create_task_with_reserve(
        &self,
        task: Task,
        reserve: NewEntry,
    ) -> StoreResult<(Task, Transaction)> {
        let mut state = self.state.write().await;

        if state.tasks.contains_key(&task.id) {
            return Err(StoreError::Backend(format!("task {} already exists", task.id)));
        }

        // The reserve fails before anything else is written.
        let tx = state.apply_entry(reserve)?;
        state.tasks.insert(task.id, task.clone());

        info!(
            task_id = %task.id,
            developer = %task.developer_id,
            reserved_cents = tx.amount.abs().as_i64(),
            storage_type = "memory",
            "🔒 Task posted with escrow"
        );
        Ok((task, tx))
    }

    async fn get_task(&self, id: TaskId) -> StoreResult<Option<Task>> {
        let state = self.state.read().await;
        Ok(state.tasks.get(&id).cloned())
    }

    async fn list_tasks_by_status(&self, status: TaskStatus) -> StoreResult<Vec<Task>> {
        let state = self.state.read().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn list_tasks_by_developer(&self, developer: &UserId) -> StoreResult<Vec<Task>> {
        let state = self.state.read().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| &t.developer_id == developer)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn claim_and_submit(&self, submission: Submission) -> StoreResult<ClaimOutcome> {
        let mut state = self.state.write().await;
        let task_id = submission.task_id;
        let tester = submission.tester_id.clone();

        let Some(task) = state.tasks.get(&task_id) else {
            return Ok(ClaimOutcome::NotFound);
        };
        if !task.accepts_submissions() {
            debug!(
                task_id = %task_id,
                tester = %tester,
                status = %task.status,
                "Claim rejected, task closed"
            );
            return Ok(ClaimOutcome::Closed);
        }
        if !task.claimable_by(&tester) {
            debug!(task_id = %task_id, tester = %tester, "Claim rejected, task held by another tester");
            return Ok(ClaimOutcome::AlreadyClaimed);
        }
        if state.submissions.values().any(|s| {
            s.task_id == task_id && s.tester_id == tester && s.status.blocks_resubmission()
        }) {
            debug!(
                task_id = %task_id,
                tester = %tester,
                "Claim rejected, submission already on file"
            );
            return Ok(ClaimOutcome::AlreadySubmitted);
        }

        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| StoreError::NotFound(format!("task {}", task_id)))?;
        task.status = TaskStatus::Submitted;
        task.assigned_tester_id = Some(tester);
        task.updated_at = submission.submitted_at;
        let task = task.clone();
        state.submissions.insert(submission.id, submission.clone());

        Ok(ClaimOutcome::Claimed { task, submission })
    }

    async fn set_task_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Task> {
        let mut state = self.state.write().await;
        let task = state
            .tasks
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("task {}", id)))?;
        task.status = status;
        task.updated_at = now;
        Ok(task.clone())
    }

    async fn get_submission(&self, id: SubmissionId) -> StoreResult<Option<Submission>> {
        let state = self.state.read().await;
        Ok(state.submissions.get(&id).cloned())
    }

    async fn list_submissions_by_task(&self, task: TaskId) -> StoreResult<Vec<Submission>> {
        let state = self.state.read().await;
        let mut subs: Vec<Submission> = state
            .submissions
            .values()
            .filter(|s| s.task_id == task)
            .cloned()
            .collect();
        subs.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(subs)
    }

    async fn approve_submission(
        &self,
        approval: Approval,
    ) -> StoreResult<Option<ApprovedSubmission>> {
        let mut state = self.state.write().await;

        let (status, task_id, tester) = state
            .submissions
            .get(&approval.submission_id)
            .map(|s| (s.status, s.task_id, s.tester_id.clone()))
            .ok_or_else(|| StoreError::NotFound(format!("submission {}", approval.submission_id)))?;
        if status != SubmissionStatus::Pending {
            return Ok(None);
        }
        if state.submissions.values().any(|s| {
            s.task_id == task_id && s.tester_id == tester && s.status == SubmissionStatus::Approved
        }) {
            debug!(
                task_id = %task_id,
                tester = %tester,
                "Approval refused, tester already paid for task"
            );
            return Ok(None);
        }

        let release = state.apply_entry(approval.release)?;
        let submission = state
            .submissions
            .get_mut(&approval.submission_id)
            .ok_or_else(|| StoreError::NotFound(format!("submission {}", approval.submission_id)))?;
        submission.status = SubmissionStatus::Approved;
        submission.developer_rating = Some(approval.rating);
        submission.reviewed_at = Some(approval.reviewed_at);

        Ok(Some(ApprovedSubmission {
            submission: submission.clone(),
            release,
        }))
    }

    async fn reject_submission(
        &self,
        id: SubmissionId,
        feedback: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Submission>> {
        let mut state = self.state.write().await;
        let submission = state
            .submissions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("submission {}", id)))?;
        if submission.status != SubmissionStatus::Pending {
            return Ok(None);
        }
        submission.status = SubmissionStatus::Rejected;
        submission.developer_feedback = feedback;
        submission.reviewed_at = Some(now);
        Ok(Some(submission.clone()))
    }

    async fn cancel_submission(
        &self,
        id: SubmissionId,
        now: DateTime<Utc>,
    ) -> StoreResult<CancelOutcome> {
        let mut state = self.state.write().await;
        let Some(task_id) = state.submissions.get(&id).map(|s| s.task_id) else {
            return Ok(CancelOutcome::NotFound);
        };

        // Completed entries linked to the submission are backed out of the
        // balance; refuse if that would overdraw the wallet.
        let mut back_out: HashMap<UserId, Cents> = HashMap::new();
        for tx in state
            .transactions
            .iter()
            .filter(|tx| tx.metadata.submission_id == Some(id) && tx.is_completed())
        {
            let slot = back_out.entry(tx.user_id.clone()).or_insert(Cents::ZERO);
            *slot = slot.saturating_add(tx.amount);
        }
        for (user, amount) in &back_out {
            let available = state
                .wallets
                .get(user)
                .map(|w| w.balance)
                .unwrap_or(Cents::ZERO);
            if available.checked_sub(*amount).map_or(true, |b| b.is_negative()) {
                return Err(StoreError::BalanceGuard {
                    needed: *amount,
                    available,
                });
            }
        }

        state.submissions.remove(&id);
        let before = state.transactions.len();
        state
            .transactions
            .retain(|tx| tx.metadata.submission_id != Some(id));
        let removed_entries = before - state.transactions.len();
        for (user, amount) in back_out {
            let wallet = state.wallet_mut(&user, now);
            wallet.balance = Cents::new(wallet.balance.as_i64() - amount.as_i64());
            wallet.updated_at = now;
        }

        let remaining = state.submissions.values().any(|s| s.task_id == task_id);
        let mut task_reopened = false;
        if !remaining {
            if let Some(task) = state.tasks.get_mut(&task_id) {
                task.status = TaskStatus::Posted;
                task.assigned_tester_id = None;
                task.updated_at = now;
                task_reopened = true;
            }
        }

        info!(
            submission_id = %id,
            task_id = %task_id,
            removed_entries,
            task_reopened,
            storage_type = "memory",
            "🔄 Submission cancelled"
        );
        Ok(CancelOutcome::Cancelled {
            removed_entries,
            task_reopened,
        })
    }

    async fn get_or_create_profile(&self, user: &UserId) -> StoreResult<Profile> {
        let mut state = self.state.write().await;
        Ok(state
            .profiles
            .entry(user.clone())
            .or_insert_with(|| Profile::new(user.clone()))
            .clone())
    }

    async fn record_completion(
        &self,
        user: &UserId,
        thresholds: TrustThresholds,
    ) -> StoreResult<Profile> {
        let mut state = self.state.write().await;
        let profile = state
            .profiles
            .entry(user.clone())
            .or_insert_with(|| Profile::new(user.clone()));
        profile.completed_tasks_count = profile.completed_tasks_count.saturating_add(1);
        profile.trust_level = thresholds.promote(profile.trust_level, profile.completed_tasks_count);
        Ok(profile.clone())
    }

    async fn set_stripe_account_id(&self, user: &UserId, account_id: &str) -> StoreResult<Profile> {
        let mut state = self.state.write().await;
        let profile = state
            .profiles
            .entry(user.clone())
            .or_insert_with(|| Profile::new(user.clone()));
        profile.stripe_account_id = Some(account_id.to_string());
        Ok(profile.clone())
    }

    async fn set_stripe_customer_id_if_absent(
        &self,
        user: &UserId,
        customer_id: &str,
    ) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let profile = state
            .profiles
            .entry(user.clone())
            .or_insert_with(|| Profile::new(user.clone()));
        if profile.stripe_customer_id.is_some() {
            return Ok(false);
        }
        profile.stripe_customer_id = Some(customer_id.to_string());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntryMetadata, TransactionKind};
    use chrono::Duration;

    fn task(developer: &str, now: DateTime<Utc>) -> Task {
        Task {
            id: TaskId::new(),
            developer_id: UserId::from(developer),
            title: "Checkout flow".to_string(),
            app_url: "https://example.com".to_string(),
            instructions: None,
            steps: vec!["Buy something".to_string()],
            budget: Cents::new(2500),
            max_testers: 1,
            platform_fee_percent: 20,
            status: TaskStatus::Posted,
            assigned_tester_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_post_entry_moves_balance() {
        let store = MemoryLedgerStore::new();
        let now = Utc::now();
        let user = UserId::from("dev");

        store
            .post_entry(NewEntry::new(user.clone(), TransactionKind::Deposit, Cents::new(5000), now))
            .await
            .unwrap();
        let wallet = store.get_or_create_wallet(&user, now).await.unwrap();
        assert_eq!(wallet.balance, Cents::new(5000));
    }

    #[tokio::test]
    async fn test_balance_guard_rejects_overdraw() {
        let store = MemoryLedgerStore::new();
        let now = Utc::now();
        let user = UserId::from("dev");

        store
            .post_entry(NewEntry::new(user.clone(), TransactionKind::Deposit, Cents::new(1000), now))
            .await
            .unwrap();
        let err = store
            .post_entry(NewEntry::new(user.clone(), TransactionKind::Payout, Cents::new(-1500), now))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::BalanceGuard {
                needed: Cents::new(1500),
                available: Cents::new(1000)
            }
        );
        assert_eq!(store.completed_total(&user).await.unwrap(), Cents::new(1000));
        assert_eq!(store.list_transactions(&user, 10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_idempotency_key() {
        let store = MemoryLedgerStore::new();
        let now = Utc::now();
        let user = UserId::from("dev");
        let entry = NewEntry::new(user.clone(), TransactionKind::Deposit, Cents::new(1000), now)
            .with_idempotency_key("checkout:cs_1");

        store.post_entry(entry.clone()).await.unwrap();
        assert!(matches!(
            store.post_entry(entry).await,
            Err(StoreError::Duplicate(_))
        ));
        let wallet = store.get_or_create_wallet(&user, now).await.unwrap();
        assert_eq!(wallet.balance, Cents::new(1000));
    }

    #[tokio::test]
    async fn test_reserve_failure_leaves_no_task() {
        let store = MemoryLedgerStore::new();
        let now = Utc::now();
        let t = task("dev", now);
        let reserve = NewEntry::new(t.developer_id.clone(), TransactionKind::TestReserve, Cents::new(-2500), now)
            .with_metadata(EntryMetadata::for_task(t.id, t.title.clone()));

        assert!(store.create_task_with_reserve(t.clone(), reserve).await.is_err());
        assert!(store.get_task(t.id).await.unwrap().is_none());
        assert!(store
            .list_transactions(&t.developer_id, 10, 0)
            .await
            .unwrap()
            .is_empty());
    }

    fn submission(task: &Task, tester: &str, now: DateTime<Utc>) -> Submission {
        Submission {
            id: SubmissionId::new(),
            task_id: task.id,
            tester_id: UserId::from(tester),
            video_url: "https://cdn.example.com/run.webm".to_string(),
            video_duration_seconds: 180,
            notes: None,
            status: SubmissionStatus::Pending,
            developer_rating: None,
            developer_feedback: None,
            submitted_at: now,
            reviewed_at: None,
        }
    }

    async fn funded_task(store: &MemoryLedgerStore, now: DateTime<Utc>) -> Task {
        let developer = UserId::from("dev");
        store
            .post_entry(NewEntry::new(developer.clone(), TransactionKind::Deposit, Cents::new(2500), now))
            .await
            .unwrap();
        let t = task("dev", now);
        let reserve = NewEntry::new(developer, TransactionKind::TestReserve, Cents::new(-2500), now);
        store.create_task_with_reserve(t.clone(), reserve).await.unwrap();
        t
    }

    fn approval(submission: &Submission, now: DateTime<Utc>) -> Approval {
        let release = NewEntry::new(
            submission.tester_id.clone(),
            TransactionKind::TestRelease,
            Cents::new(2000),
            now,
        )
        .with_metadata(EntryMetadata::for_submission(
            submission.task_id,
            submission.id,
            "Checkout flow".to_string(),
        ));
        Approval {
            submission_id: submission.id,
            rating: 5,
            release,
            reviewed_at: now,
        }
    }

    #[tokio::test]
    async fn test_claim_guard() {
        let store = MemoryLedgerStore::new();
        let now = Utc::now();
        let t = funded_task(&store, now).await;

        let first = submission(&t, "alice", now);
        match store.claim_and_submit(first.clone()).await.unwrap() {
            ClaimOutcome::Claimed { task, submission } => {
                assert_eq!(task.status, TaskStatus::Submitted);
                assert_eq!(task.assigned_tester_id, Some(UserId::from("alice")));
                assert_eq!(submission.id, first.id);
            }
            other => panic!("unexpected claim outcome: {:?}", other),
        }

        assert_eq!(
            store.claim_and_submit(submission(&t, "alice", now)).await.unwrap(),
            ClaimOutcome::AlreadySubmitted
        );
        assert_eq!(
            store.claim_and_submit(submission(&t, "bob", now)).await.unwrap(),
            ClaimOutcome::AlreadyClaimed
        );
        let mut unknown = task("dev", now);
        unknown.id = TaskId::new();
        assert_eq!(
            store.claim_and_submit(submission(&unknown, "bob", now)).await.unwrap(),
            ClaimOutcome::NotFound
        );
        assert_eq!(store.list_submissions_by_task(t.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resubmit_after_rejection_only() {
        let store = MemoryLedgerStore::new();
        let now = Utc::now();
        let t = funded_task(&store, now).await;

        let first = submission(&t, "alice", now);
        store.claim_and_submit(first.clone()).await.unwrap();
        store.reject_submission(first.id, None, now).await.unwrap();

        let second = submission(&t, "alice", now);
        assert!(matches!(
            store.claim_and_submit(second.clone()).await.unwrap(),
            ClaimOutcome::Claimed { .. }
        ));
        assert!(store.approve_submission(approval(&second, now)).await.unwrap().is_some());

        assert_eq!(
            store.claim_and_submit(submission(&t, "alice", now)).await.unwrap(),
            ClaimOutcome::AlreadySubmitted
        );
        store
            .set_task_status(t.id, TaskStatus::Completed, now)
            .await
            .unwrap();
        assert_eq!(
            store.claim_and_submit(submission(&t, "alice", now)).await.unwrap(),
            ClaimOutcome::Closed
        );
    }

    #[tokio::test]
    async fn test_second_approval_for_same_tester_is_refused() {
        let store = MemoryLedgerStore::new();
        let now = Utc::now();
        let t = funded_task(&store, now).await;

        let paid = submission(&t, "alice", now);
        store.claim_and_submit(paid.clone()).await.unwrap();
        store.approve_submission(approval(&paid, now)).await.unwrap();

        // A stray pending row for the same tester, written past the claim guard.
        let stray = submission(&t, "alice", now);
        store
            .state
            .write()
            .await
            .submissions
            .insert(stray.id, stray.clone());

        assert!(store.approve_submission(approval(&stray, now)).await.unwrap().is_none());
        let alice = UserId::from("alice");
        assert_eq!(store.completed_total(&alice).await.unwrap(), Cents::new(2000));
        assert_eq!(store.list_transactions(&alice, 10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_entry_is_rejected() {
        let store = MemoryLedgerStore::new();
        let now = Utc::now();
        let user = UserId::from("dev");

        let zero = NewEntry::new(user.clone(), TransactionKind::Deposit, Cents::ZERO, now);
        assert!(matches!(
            store.post_entry(zero).await,
            Err(StoreError::InvalidEntry(_))
        ));
        let positive_payout = NewEntry::new(user.clone(), TransactionKind::Payout, Cents::new(100), now);
        assert!(matches!(
            store.post_entry(positive_payout).await,
            Err(StoreError::InvalidEntry(_))
        ));
        assert!(store.list_transactions(&user, 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settle_only_matured() {
        let store = MemoryLedgerStore::new();
        let now = Utc::now();
        let tester = UserId::from("tester");

        let soon = NewEntry::new(tester.clone(), TransactionKind::TestRelease, Cents::new(2000), now)
            .held_until(now + Duration::days(3));
        let later = NewEntry::new(tester.clone(), TransactionKind::TestRelease, Cents::new(1000), now)
            .held_until(now + Duration::days(7));
        store.post_entry(soon).await.unwrap();
        store.post_entry(later).await.unwrap();

        let at = now + Duration::days(4);
        assert_eq!(store.held_total(&tester, at).await.unwrap(), Cents::new(1000));
        let settlement = store.settle_matured(&tester, at).await.unwrap();
        assert_eq!(settlement.settled, 1);
        assert_eq!(settlement.amount, Cents::new(2000));

        // Nothing left to mature at the same instant.
        let again = store.settle_matured(&tester, at).await.unwrap();
        assert_eq!(again, Settlement::default());
        let wallet = store.get_or_create_wallet(&tester, at).await.unwrap();
        assert_eq!(wallet.balance, Cents::new(2000));
    }

    #[tokio::test]
    async fn test_record_completion_promotes() {
        let store = MemoryLedgerStore::new();
        let tester = UserId::from("tester");
        let thresholds = TrustThresholds::default();

        let mut profile = store.get_or_create_profile(&tester).await.unwrap();
        for _ in 0..5 {
            profile = store.record_completion(&tester, thresholds).await.unwrap();
        }
        assert_eq!(profile.completed_tasks_count, 5);
        assert_eq!(profile.trust_level, crate::trust::TrustLevel::Regular);
    }
}
