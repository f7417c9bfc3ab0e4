//! Task, submission and profile rows that ledger operations touch.

use crate::trust::TrustLevel;
use crate::types::{Cents, NewEntry, SubmissionId, TaskId, Transaction, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Draft,
    Posted,
    Claimed,
    Submitted,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Draft => "draft",
            TaskStatus::Posted => "posted",
            TaskStatus::Claimed => "claimed",
            TaskStatus::Submitted => "submitted",
            TaskStatus::Completed => "completed",
        }
    }

    /// Statuses in which a developer still has submissions to look at.
    pub fn awaits_review(&self) -> bool {
        matches!(self, TaskStatus::Claimed | TaskStatus::Submitted)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(TaskStatus::Draft),
            "posted" => Ok(TaskStatus::Posted),
            "claimed" => Ok(TaskStatus::Claimed),
            "submitted" => Ok(TaskStatus::Submitted),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub developer_id: UserId,
    pub title: String,
    pub app_url: String,
    pub instructions: Option<String>,
    pub steps: Vec<String>,
    /// Reward per tester.
    #[serde(rename = "budget_cents")]
    pub budget: Cents,
    pub max_testers: u32,
    pub platform_fee_percent: u8,
    pub status: TaskStatus,
    pub assigned_tester_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Amount escrowed when the task is posted.
    pub fn reserve_amount(&self) -> Option<Cents> {
        self.budget.checked_mul(i64::from(self.max_testers))
    }

    /// Draft and completed tasks take no submissions.
    pub fn accepts_submissions(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Posted | TaskStatus::Claimed | TaskStatus::Submitted
        )
    }

    /// Whether `tester` may claim the task under the claim guard.
    pub fn claimable_by(&self, tester: &UserId) -> bool {
        match &self.assigned_tester_id {
            None => true,
            Some(assigned) => assigned == tester,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Approved,
    Rejected,
}

impl SubmissionStatus {
    /// A pending or approved submission blocks another one from the same
    /// tester on the same task.
    pub fn blocks_resubmission(&self) -> bool {
        matches!(self, SubmissionStatus::Pending | SubmissionStatus::Approved)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Approved => "approved",
            SubmissionStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SubmissionStatus::Pending),
            "approved" => Ok(SubmissionStatus::Approved),
            "rejected" => Ok(SubmissionStatus::Rejected),
            other => Err(format!("unknown submission status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub task_id: TaskId,
    pub tester_id: UserId,
    pub video_url: String,
    pub video_duration_seconds: u32,
    pub notes: Option<String>,
    pub status: SubmissionStatus,
    pub developer_rating: Option<u8>,
    pub developer_feedback: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: UserId,
    pub trust_level: TrustLevel,
    pub completed_tasks_count: u32,
    pub email: Option<String>,
    pub stripe_account_id: Option<String>,
    pub stripe_customer_id: Option<String>,
}

impl Profile {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            trust_level: TrustLevel::New,
            completed_tasks_count: 0,
            email: None,
            stripe_account_id: None,
            stripe_customer_id: None,
        }
    }
}

/// Result of claiming a task and recording the submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed { task: Task, submission: Submission },
    /// Held by another tester.
    AlreadyClaimed,
    /// The tester already has a pending or approved submission on the task.
    AlreadySubmitted,
    /// Draft or completed.
    Closed,
    NotFound,
}

/// Approval written in one store operation: the pending→approved flip and the
/// release entry paying the tester.
#[derive(Debug, Clone)]
pub struct Approval {
    pub submission_id: SubmissionId,
    pub rating: u8,
    pub release: NewEntry,
    pub reviewed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovedSubmission {
    pub submission: Submission,
    pub release: Transaction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled {
        removed_entries: usize,
        task_reopened: bool,
    },
    NotFound,
}
