//! Postgres-backed [`LedgerStore`].
//!
//! Each trait call runs in one SQL transaction. Balance changes are atomic
//! increments guarded by `balance_cents + $n >= 0`, so concurrent requests can
//! never read-then-overwrite each other's balance.

use crate::error::{StoreError, StoreResult};
use crate::records::{
    ApprovedSubmission, Approval, CancelOutcome, ClaimOutcome, Profile, Submission, Task,
    TaskStatus,
};
use crate::storage::LedgerStore;
use crate::trust::TrustThresholds;
use crate::types::{
    Cents, EntryMetadata, NewEntry, Settlement, SubmissionId, TaskId, Transaction, TransactionId,
    UserId, Wallet,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::PgConnection;
use tracing::{debug, info};
use uuid::Uuid;

const TX_COLUMNS: &str = "id, user_id, type, amount_cents, status, metadata, available_at, \
                          idempotency_key, created_at";
const TASK_COLUMNS: &str = "id, developer_id, title, app_url, instructions, steps, budget_cents, \
                            max_testers, platform_fee_percent, status, assigned_tester_id, \
                            created_at, updated_at";
const SUBMISSION_COLUMNS: &str = "id, task_id, tester_id, video_url, video_duration_seconds, \
                                  notes, status, developer_rating, developer_feedback, \
                                  submitted_at, reviewed_at";
/// Partial unique index allowing one pending or approved submission per
/// (task, tester).
const OPEN_SUBMISSION_INDEX: &str = "submissions_open_per_tester";

const PROFILE_COLUMNS: &str = "user_id, trust_level, completed_tasks_count, email, \
                               stripe_account_id, stripe_customer_id";

#[derive(Debug, sqlx::FromRow)]
struct WalletRow {
    user_id: String,
    balance_cents: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<WalletRow> for Wallet {
    fn from(row: WalletRow) -> Self {
        Wallet {
            user_id: UserId::new(row.user_id),
            balance: Cents::new(row.balance_cents),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    user_id: String,
    #[sqlx(rename = "type")]
    kind: String,
    amount_cents: i64,
    status: String,
    metadata: serde_json::Value,
    available_at: Option<DateTime<Utc>>,
    idempotency_key: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> StoreResult<Self> {
        Ok(Transaction {
            id: TransactionId::from_uuid(row.id),
            user_id: UserId::new(row.user_id),
            kind: row.kind.parse().map_err(StoreError::Serialization)?,
            amount: Cents::new(row.amount_cents),
            status: row.status.parse().map_err(StoreError::Serialization)?,
            metadata: serde_json::from_value::<EntryMetadata>(row.metadata)?,
            available_at: row.available_at,
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    developer_id: String,
    title: String,
    app_url: String,
    instructions: Option<String>,
    steps: Vec<String>,
    budget_cents: i64,
    max_testers: i32,
    platform_fee_percent: i16,
    status: String,
    assigned_tester_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> StoreResult<Self> {
        Ok(Task {
            id: TaskId::from_uuid(row.id),
            developer_id: UserId::new(row.developer_id),
            title: row.title,
            app_url: row.app_url,
            instructions: row.instructions,
            steps: row.steps,
            budget: Cents::new(row.budget_cents),
            max_testers: u32::try_from(row.max_testers)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            platform_fee_percent: u8::try_from(row.platform_fee_percent)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            status: row.status.parse().map_err(StoreError::Serialization)?,
            assigned_tester_id: row.assigned_tester_id.map(UserId::new),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SubmissionRow {
    id: Uuid,
    task_id: Uuid,
    tester_id: String,
    video_url: String,
    video_duration_seconds: i32,
    notes: Option<String>,
    status: String,
    developer_rating: Option<i16>,
    developer_feedback: Option<String>,
    submitted_at: DateTime<Utc>,
    reviewed_at: Option<DateTime<Utc>>,
}

impl TryFrom<SubmissionRow> for Submission {
    type Error = StoreError;

    fn try_from(row: SubmissionRow) -> StoreResult<Self> {
        Ok(Submission {
            id: SubmissionId::from_uuid(row.id),
            task_id: TaskId::from_uuid(row.task_id),
            tester_id: UserId::new(row.tester_id),
            video_url: row.video_url,
            video_duration_seconds: u32::try_from(row.video_duration_seconds)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            notes: row.notes,
            status: row.status.parse().map_err(StoreError::Serialization)?,
            developer_rating: row
                .developer_rating
                .map(u8::try_from)
                .transpose()
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            developer_feedback: row.developer_feedback,
            submitted_at: row.submitted_at,
            reviewed_at: row.reviewed_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProfileRow {
    user_id: String,
    trust_level: String,
    completed_tasks_count: i32,
    email: Option<String>,
    stripe_account_id: Option<String>,
    stripe_customer_id: Option<String>,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = StoreError;

    fn try_from(row: ProfileRow) -> StoreResult<Self> {
        Ok(Profile {
            user_id: UserId::new(row.user_id),
            trust_level: row.trust_level.parse().map_err(StoreError::Serialization)?,
            completed_tasks_count: u32::try_from(row.completed_tasks_count)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            email: row.email,
            stripe_account_id: row.stripe_account_id,
            stripe_customer_id: row.stripe_customer_id,
        })
    }
}

pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!(max_connections, "🐘 Connected to Postgres");
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

async fn ensure_wallet(
    conn: &mut PgConnection,
    user: &UserId,
    now: DateTime<Utc>,
) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO wallets (user_id, balance_cents, created_at, updated_at) \
         VALUES ($1, 0, $2, $2) ON CONFLICT (user_id) DO NOTHING",
    )
    .bind(user.as_str())
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn ensure_profile(conn: &mut PgConnection, user: &UserId) -> StoreResult<()> {
    sqlx::query("INSERT INTO profiles (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
        .bind(user.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Moves the balance by `delta` unless that would take it below zero.
async fn guarded_increment(
    conn: &mut PgConnection,
    user: &UserId,
    delta: Cents,
    now: DateTime<Utc>,
) -> StoreResult<()> {
    let updated = sqlx::query(
        "UPDATE wallets SET balance_cents = balance_cents + $2, updated_at = $3 \
         WHERE user_id = $1 AND balance_cents + $2 >= 0",
    )
    .bind(user.as_str())
    .bind(delta.as_i64())
    .bind(now)
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() == 0 {
        let available: i64 =
            sqlx::query_scalar("SELECT balance_cents FROM wallets WHERE user_id = $1")
                .bind(user.as_str())
                .fetch_one(&mut *conn)
                .await?;
        return Err(StoreError::BalanceGuard {
            needed: delta.abs(),
            available: Cents::new(available),
        });
    }
    Ok(())
}

async fn apply_entry(conn: &mut PgConnection, entry: NewEntry) -> StoreResult<Transaction> {
    entry.validate().map_err(StoreError::InvalidEntry)?;
    ensure_wallet(conn, &entry.user_id, entry.created_at).await?;

    let id = TransactionId::new();
    let metadata = serde_json::to_value(&entry.metadata)?;
    let inserted = sqlx::query(
        "INSERT INTO wallet_transactions \
         (id, user_id, type, amount_cents, status, metadata, available_at, idempotency_key, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         ON CONFLICT (idempotency_key) DO NOTHING",
    )
    .bind(*id.as_uuid())
    .bind(entry.user_id.as_str())
    .bind(entry.kind.as_str())
    .bind(entry.amount.as_i64())
    .bind(entry.status.as_str())
    .bind(metadata)
    .bind(entry.available_at)
    .bind(entry.idempotency_key.as_deref())
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await?;

    if inserted.rows_affected() == 0 {
        return Err(StoreError::Duplicate(
            entry.idempotency_key.clone().unwrap_or_default(),
        ));
    }

    if entry.is_completed() {
        guarded_increment(conn, &entry.user_id, entry.amount, entry.created_at).await?;
    }

    Ok(entry.into_transaction(id))
}

fn is_open_submission_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.constraint() == Some(OPEN_SUBMISSION_INDEX),
        _ => false,
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn get_or_create_wallet(&self, user: &UserId, now: DateTime<Utc>) -> StoreResult<Wallet> {
        let mut conn = self.pool.acquire().await?;
        ensure_wallet(&mut conn, user, now).await?;
        let row: WalletRow = sqlx::query_as(
            "SELECT user_id, balance_cents, created_at, updated_at FROM wallets WHERE user_id = $1",
        )
        .bind(user.as_str())
        .fetch_one(&mut *conn)
        .await?;
        Ok(row.into())
    }

    async fn post_entry(&self, entry: NewEntry) -> StoreResult<Transaction> {
        let mut tx = self.pool.begin().await?;
        let posted = apply_entry(&mut tx, entry).await?;
        tx.commit().await?;

        info!(
            user = %posted.user_id,
            kind = %posted.kind,
            amount_cents = posted.amount.as_i64(),
            status = posted.status.as_str(),
            storage_type = "postgres",
            "📦 Entry recorded"
        );
        Ok(posted)
    }

    async fn settle_matured(&self, user: &UserId, now: DateTime<Utc>) -> StoreResult<Settlement> {
        let mut tx = self.pool.begin().await?;
        let (settled, amount): (i64, i64) = sqlx::query_as(
            "WITH matured AS ( \
                 UPDATE wallet_transactions SET status = 'completed' \
                 WHERE user_id = $1 AND type = 'test_release' AND status = 'pending' \
                   AND available_at <= $2 \
                 RETURNING amount_cents) \
             SELECT COUNT(*)::BIGINT, COALESCE(SUM(amount_cents), 0)::BIGINT FROM matured",
        )
        .bind(user.as_str())
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let settlement = Settlement {
            settled: usize::try_from(settled).unwrap_or_default(),
            amount: Cents::new(amount),
        };
        if settlement.settled > 0 {
            ensure_wallet(&mut tx, user, now).await?;
            guarded_increment(&mut tx, user, settlement.amount, now).await?;
        }
        tx.commit().await?;

        if settlement.settled > 0 {
            info!(
                user = %user,
                settled = settlement.settled,
                amount_cents = settlement.amount.as_i64(),
                storage_type = "postgres",
                "✅ Matured holds settled"
            );
        }
        Ok(settlement)
    }

    async fn held_total(&self, user: &UserId, now: DateTime<Utc>) -> StoreResult<Cents> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount_cents), 0)::BIGINT FROM wallet_transactions \
             WHERE user_id = $1 AND type = 'test_release' AND status = 'pending' \
               AND available_at > $2",
        )
        .bind(user.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(Cents::new(total))
    }

    async fn users_with_matured_holds(&self, now: DateTime<Utc>) -> StoreResult<Vec<UserId>> {
        let users: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT user_id FROM wallet_transactions \
             WHERE type = 'test_release' AND status = 'pending' AND available_at <= $1 \
             ORDER BY user_id",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(users.into_iter().map(UserId::new).collect())
    }

    async fn list_transactions(
        &self,
        user: &UserId,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Transaction>> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM wallet_transactions WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            TX_COLUMNS
        ))
        .bind(user.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        debug!(
            operation = "tx_history",
            user = %user,
            result_count = rows.len(),
            "🔍 Transaction history query"
        );
        rows.into_iter().map(Transaction::try_from).collect()
    }

    async fn completed_total(&self, user: &UserId) -> StoreResult<Cents> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount_cents), 0)::BIGINT FROM wallet_transactions \
             WHERE user_id = $1 AND status = 'completed'",
        )
        .bind(user.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(Cents::new(total))
    }

    async fn create_task_with_reserve(
        &self,
        task: Task,
        reserve: NewEntry,
    ) -> StoreResult<(Task, Transaction)> {
        let mut tx = self.pool.begin().await?;
        let posted = apply_entry(&mut tx, reserve).await?;

        sqlx::query(
            "INSERT INTO tasks (id, developer_id, title, app_url, instructions, steps, budget_cents, \
             max_testers, platform_fee_percent, status, assigned_tester_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(*task.id.as_uuid())
        .bind(task.developer_id.as_str())
        .bind(&task.title)
        .bind(&task.app_url)
        .bind(task.instructions.as_deref())
        .bind(&task.steps)
        .bind(task.budget.as_i64())
        .bind(i32::try_from(task.max_testers).unwrap_or(i32::MAX))
        .bind(i16::from(task.platform_fee_percent))
        .bind(task.status.as_str())
        .bind(task.assigned_tester_id.as_ref().map(UserId::as_str))
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(
            task_id = %task.id,
            developer = %task.developer_id,
            reserved_cents = posted.amount.abs().as_i64(),
            storage_type = "postgres",
            "🔒 Task posted with escrow"
        );
        Ok((task, posted))
    }

    async fn get_task(&self, id: TaskId) -> StoreResult<Option<Task>> {
        let row: Option<TaskRow> =
            sqlx::query_as(&format!("SELECT {} FROM tasks WHERE id = $1", TASK_COLUMNS))
                .bind(*id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        row.map(Task::try_from).transpose()
    }

    async fn list_tasks_by_status(&self, status: TaskStatus) -> StoreResult<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {} FROM tasks WHERE status = $1 ORDER BY created_at DESC",
            TASK_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    async fn list_tasks_by_developer(&self, developer: &UserId) -> StoreResult<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {} FROM tasks WHERE developer_id = $1 ORDER BY created_at DESC",
            TASK_COLUMNS
        ))
        .bind(developer.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    async fn claim_and_submit(&self, submission: Submission) -> StoreResult<ClaimOutcome> {
        let mut tx = self.pool.begin().await?;
        let task_id = submission.task_id;
        let tester = submission.tester_id.clone();

        let claimed: Option<TaskRow> = sqlx::query_as(&format!(
            "UPDATE tasks SET status = 'submitted', assigned_tester_id = $2, updated_at = $3 \
             WHERE id = $1 \
               AND status IN ('posted', 'claimed', 'submitted') \
               AND (assigned_tester_id IS NULL OR assigned_tester_id = $2) \
               AND NOT EXISTS ( \
                   SELECT 1 FROM submissions \
                   WHERE task_id = $1 AND tester_id = $2 AND status IN ('pending', 'approved')) \
             RETURNING {}",
            TASK_COLUMNS
        ))
        .bind(*task_id.as_uuid())
        .bind(tester.as_str())
        .bind(submission.submitted_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = claimed else {
            // Nothing was written; work out which condition refused the claim.
            let task: Option<TaskRow> =
                sqlx::query_as(&format!("SELECT {} FROM tasks WHERE id = $1", TASK_COLUMNS))
                    .bind(*task_id.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await?;
            let Some(task) = task.map(Task::try_from).transpose()? else {
                return Ok(ClaimOutcome::NotFound);
            };
            let outcome = if !task.accepts_submissions() {
                ClaimOutcome::Closed
            } else if !task.claimable_by(&tester) {
                ClaimOutcome::AlreadyClaimed
            } else {
                ClaimOutcome::AlreadySubmitted
            };
            debug!(task_id = %task_id, tester = %tester, ?outcome, "Claim rejected");
            return Ok(outcome);
        };

        let inserted = sqlx::query(
            "INSERT INTO submissions (id, task_id, tester_id, video_url, video_duration_seconds, \
             notes, status, developer_rating, developer_feedback, submitted_at, reviewed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(*submission.id.as_uuid())
        .bind(*submission.task_id.as_uuid())
        .bind(submission.tester_id.as_str())
        .bind(&submission.video_url)
        .bind(i32::try_from(submission.video_duration_seconds).unwrap_or(i32::MAX))
        .bind(submission.notes.as_deref())
        .bind(submission.status.as_str())
        .bind(submission.developer_rating.map(i16::from))
        .bind(submission.developer_feedback.as_deref())
        .bind(submission.submitted_at)
        .bind(submission.reviewed_at)
        .execute(&mut *tx)
        .await;
        match inserted {
            Ok(_) => {}
            Err(e) if is_open_submission_conflict(&e) => {
                debug!(task_id = %task_id, tester = %tester, "Claim lost to a concurrent submission");
                return Ok(ClaimOutcome::AlreadySubmitted);
            }
            Err(e) => return Err(e.into()),
        }
        tx.commit().await?;

        Ok(ClaimOutcome::Claimed {
            task: row.try_into()?,
            submission,
        })
    }

    async fn set_task_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Task> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "UPDATE tasks SET status = $2, updated_at = $3 WHERE id = $1 RETURNING {}",
            TASK_COLUMNS
        ))
        .bind(*id.as_uuid())
        .bind(status.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| StoreError::NotFound(format!("task {}", id)))?
            .try_into()
    }

    async fn get_submission(&self, id: SubmissionId) -> StoreResult<Option<Submission>> {
        let row: Option<SubmissionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM submissions WHERE id = $1",
            SUBMISSION_COLUMNS
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Submission::try_from).transpose()
    }

    async fn list_submissions_by_task(&self, task: TaskId) -> StoreResult<Vec<Submission>> {
        let rows: Vec<SubmissionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM submissions WHERE task_id = $1 ORDER BY submitted_at DESC",
            SUBMISSION_COLUMNS
        ))
        .bind(*task.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Submission::try_from).collect()
    }

    async fn approve_submission(
        &self,
        approval: Approval,
    ) -> StoreResult<Option<ApprovedSubmission>> {
        let mut tx = self.pool.begin().await?;
        let flipped: Result<Option<SubmissionRow>, sqlx::Error> = sqlx::query_as(&format!(
            "UPDATE submissions AS s SET status = 'approved', developer_rating = $2, reviewed_at = $3 \
             WHERE s.id = $1 AND s.status = 'pending' \
               AND NOT EXISTS ( \
                   SELECT 1 FROM submissions AS paid \
                   WHERE paid.task_id = s.task_id AND paid.tester_id = s.tester_id \
                     AND paid.status = 'approved') \
             RETURNING {}",
            SUBMISSION_COLUMNS
        ))
        .bind(*approval.submission_id.as_uuid())
        .bind(i16::from(approval.rating))
        .bind(approval.reviewed_at)
        .fetch_optional(&mut *tx)
        .await;
        let flipped = match flipped {
            Ok(flipped) => flipped,
            Err(e) if is_open_submission_conflict(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let Some(row) = flipped else {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM submissions WHERE id = $1)")
                    .bind(*approval.submission_id.as_uuid())
                    .fetch_one(&mut *tx)
                    .await?;
            if exists {
                return Ok(None);
            }
            return Err(StoreError::NotFound(format!(
                "submission {}",
                approval.submission_id
            )));
        };

        let release = apply_entry(&mut tx, approval.release).await?;
        tx.commit().await?;
        Ok(Some(ApprovedSubmission {
            submission: row.try_into()?,
            release,
        }))
    }

    async fn reject_submission(
        &self,
        id: SubmissionId,
        feedback: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Submission>> {
        let row: Option<SubmissionRow> = sqlx::query_as(&format!(
            "UPDATE submissions SET status = 'rejected', developer_feedback = $2, reviewed_at = $3 \
             WHERE id = $1 AND status = 'pending' RETURNING {}",
            SUBMISSION_COLUMNS
        ))
        .bind(*id.as_uuid())
        .bind(feedback.as_deref())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row.try_into()?)),
            None => match self.get_submission(id).await? {
                Some(_) => Ok(None),
                None => Err(StoreError::NotFound(format!("submission {}", id))),
            },
        }
    }

    async fn cancel_submission(
        &self,
        id: SubmissionId,
        now: DateTime<Utc>,
    ) -> StoreResult<CancelOutcome> {
        let mut tx = self.pool.begin().await?;
        let task_id: Option<Uuid> =
            sqlx::query_scalar("SELECT task_id FROM submissions WHERE id = $1 FOR UPDATE")
                .bind(*id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
        let Some(task_id) = task_id else {
            return Ok(CancelOutcome::NotFound);
        };

        let submission_key = id.to_string();
        let back_out: Vec<(String, i64)> = sqlx::query_as(
            "SELECT user_id, SUM(amount_cents)::BIGINT FROM wallet_transactions \
             WHERE metadata ->> 'submission_id' = $1 AND status = 'completed' \
             GROUP BY user_id",
        )
        .bind(&submission_key)
        .fetch_all(&mut *tx)
        .await?;
        for (user, amount) in back_out {
            guarded_increment(&mut tx, &UserId::new(user), Cents::new(-amount), now).await?;
        }

        let removed = sqlx::query("DELETE FROM wallet_transactions WHERE metadata ->> 'submission_id' = $1")
            .bind(&submission_key)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM submissions WHERE id = $1")
            .bind(*id.as_uuid())
            .execute(&mut *tx)
            .await?;

        let reopened = sqlx::query(
            "UPDATE tasks SET status = 'posted', assigned_tester_id = NULL, updated_at = $2 \
             WHERE id = $1 AND NOT EXISTS (SELECT 1 FROM submissions WHERE task_id = $1)",
        )
        .bind(task_id)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;

        let removed_entries = usize::try_from(removed).unwrap_or_default();
        let task_reopened = reopened > 0;
        info!(
            submission_id = %id,
            task_id = %task_id,
            removed_entries,
            task_reopened,
            storage_type = "postgres",
            "🔄 Submission cancelled"
        );
        Ok(CancelOutcome::Cancelled {
            removed_entries,
            task_reopened,
        })
    }

    async fn get_or_create_profile(&self, user: &UserId) -> StoreResult<Profile> {
        let mut conn = self.pool.acquire().await?;
        ensure_profile(&mut conn, user).await?;
        let row: ProfileRow = sqlx::query_as(&format!(
            "SELECT {} FROM profiles WHERE user_id = $1",
            PROFILE_COLUMNS
        ))
        .bind(user.as_str())
        .fetch_one(&mut *conn)
        .await?;
        row.try_into()
    }

    async fn record_completion(
        &self,
        user: &UserId,
        thresholds: TrustThresholds,
    ) -> StoreResult<Profile> {
        let mut tx = self.pool.begin().await?;
        ensure_profile(&mut tx, user).await?;
        let row: ProfileRow = sqlx::query_as(&format!(
            "UPDATE profiles SET completed_tasks_count = completed_tasks_count + 1 \
             WHERE user_id = $1 RETURNING {}",
            PROFILE_COLUMNS
        ))
        .bind(user.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let mut profile = Profile::try_from(row)?;
        let promoted = thresholds.promote(profile.trust_level, profile.completed_tasks_count);
        if promoted != profile.trust_level {
            sqlx::query("UPDATE profiles SET trust_level = $2 WHERE user_id = $1")
                .bind(user.as_str())
                .bind(promoted.as_str())
                .execute(&mut *tx)
                .await?;
            profile.trust_level = promoted;
        }
        tx.commit().await?;
        Ok(profile)
    }

    async fn set_stripe_account_id(&self, user: &UserId, account_id: &str) -> StoreResult<Profile> {
        let mut tx = self.pool.begin().await?;
        ensure_profile(&mut tx, user).await?;
        let row: ProfileRow = sqlx::query_as(&format!(
            "UPDATE profiles SET stripe_account_id = $2 WHERE user_id = $1 RETURNING {}",
            PROFILE_COLUMNS
        ))
        .bind(user.as_str())
        .bind(account_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        row.try_into()
    }

    async fn set_stripe_customer_id_if_absent(
        &self,
        user: &UserId,
        customer_id: &str,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        ensure_profile(&mut tx, user).await?;
        let updated = sqlx::query(
            "UPDATE profiles SET stripe_customer_id = $2 \
             WHERE user_id = $1 AND stripe_customer_id IS NULL",
        )
        .bind(user.as_str())
        .bind(customer_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(updated.rows_affected() > 0)
    }
}
