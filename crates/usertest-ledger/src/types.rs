use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::Neg;
use std::str::FromStr;
use uuid::Uuid;

/// Money in US cents. Signed so ledger entries can carry debits.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Cents(i64);

impl Cents {
    pub const ZERO: Self = Self(0);

    pub const fn new(cents: i64) -> Self {
        Self(cents)
    }

    /// Converts a dollar amount, rounding half away from zero.
    pub fn from_dollars(dollars: f64) -> Self {
        Self((dollars * 100.0).round() as i64)
    }

    pub const fn as_i64(&self) -> i64 {
        self.0
    }

    pub fn to_dollars(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn checked_add(&self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(&self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn checked_mul(&self, factor: i64) -> Option<Self> {
        self.0.checked_mul(factor).map(Self)
    }

    pub fn saturating_add(&self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub const fn abs(&self) -> Self {
        Self(self.0.abs())
    }
}

impl Neg for Cents {
    type Output = Self;

    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl Sum for Cents {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Cents::ZERO, |acc, c| acc.saturating_add(c))
    }
}

impl fmt::Display for Cents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}${}.{:02}", sign, abs / 100, abs % 100)
    }
}

/// Authenticated user identifier as handed over by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Wallet transaction (ledger entry) id.
    TransactionId
);
uuid_id!(TaskId);
uuid_id!(SubmissionId);
uuid_id!(
    /// Correlates the debit, the external transfer and any reversal of one payout.
    PayoutId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    TestReserve,
    TestRelease,
    Payout,
    PayoutReversal,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::TestReserve => "test_reserve",
            TransactionKind::TestRelease => "test_release",
            TransactionKind::Payout => "payout",
            TransactionKind::PayoutReversal => "payout_reversal",
        }
    }

    /// Reserve and payout entries take money out of the wallet.
    pub fn is_debit(&self) -> bool {
        matches!(self, TransactionKind::TestReserve | TransactionKind::Payout)
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionKind::Deposit),
            "test_reserve" => Ok(TransactionKind::TestReserve),
            "test_release" => Ok(TransactionKind::TestRelease),
            "payout" => Ok(TransactionKind::Payout),
            "payout_reversal" => Ok(TransactionKind::PayoutReversal),
            other => Err(format!("unknown transaction kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

/// Links a ledger entry back to whatever caused it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<SubmissionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stripe_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stripe_payment_intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payout_id: Option<PayoutId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_error: Option<String>,
}

impl EntryMetadata {
    pub fn for_task(task_id: TaskId, title: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id),
            task_title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn for_submission(task_id: TaskId, submission_id: SubmissionId, title: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id),
            submission_id: Some(submission_id),
            task_title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn for_payout(payout_id: PayoutId) -> Self {
        Self {
            payout_id: Some(payout_id),
            ..Self::default()
        }
    }
}

/// A row of the append-only transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    #[serde(rename = "amount_cents")]
    pub amount: Cents,
    pub status: TransactionStatus,
    pub metadata: EntryMetadata,
    pub available_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn is_completed(&self) -> bool {
        self.status == TransactionStatus::Completed
    }

    /// Pending release whose hold has run out at `now`.
    pub fn is_matured(&self, now: DateTime<Utc>) -> bool {
        self.kind == TransactionKind::TestRelease
            && self.status == TransactionStatus::Pending
            && self.available_at.map(|at| at <= now).unwrap_or(false)
    }

    /// Pending release still inside its hold at `now`.
    pub fn is_held(&self, now: DateTime<Utc>) -> bool {
        self.kind == TransactionKind::TestRelease
            && self.status == TransactionStatus::Pending
            && self.available_at.map(|at| at > now).unwrap_or(false)
    }
}

/// An entry about to be written. Completed entries move the balance in the
/// same store operation; pending ones wait for settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub user_id: UserId,
    pub kind: TransactionKind,
    pub amount: Cents,
    pub status: TransactionStatus,
    pub metadata: EntryMetadata,
    pub available_at: Option<DateTime<Utc>>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewEntry {
    pub fn new(user_id: UserId, kind: TransactionKind, amount: Cents, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            kind,
            amount,
            status: TransactionStatus::Completed,
            metadata: EntryMetadata::default(),
            available_at: Some(now),
            idempotency_key: None,
            created_at: now,
        }
    }

    pub fn with_metadata(mut self, metadata: EntryMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Holds the entry until `available_at`; entries already due stay completed.
    pub fn held_until(mut self, available_at: DateTime<Utc>) -> Self {
        self.available_at = Some(available_at);
        self.status = if available_at > self.created_at {
            TransactionStatus::Pending
        } else {
            TransactionStatus::Completed
        };
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == TransactionStatus::Completed
    }

    /// Checks the sign convention of the entry kind.
    pub fn validate(&self) -> Result<(), String> {
        if self.amount == Cents::ZERO {
            return Err(format!("{} entry with zero amount", self.kind));
        }
        if self.kind.is_debit() != self.amount.is_negative() {
            return Err(format!(
                "{} entry has wrong sign: {}",
                self.kind, self.amount
            ));
        }
        Ok(())
    }

    pub fn into_transaction(self, id: TransactionId) -> Transaction {
        Transaction {
            id,
            user_id: self.user_id,
            kind: self.kind,
            amount: self.amount,
            status: self.status,
            metadata: self.metadata,
            available_at: self.available_at,
            idempotency_key: self.idempotency_key,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: UserId,
    #[serde(rename = "balance_cents")]
    pub balance: Cents,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn empty(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            balance: Cents::ZERO,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Spendable balance plus releases still inside their hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    #[serde(rename = "balance_cents")]
    pub balance: Cents,
    #[serde(rename = "pending_cents")]
    pub pending: Cents,
}

impl BalanceSnapshot {
    pub fn total(&self) -> Cents {
        self.balance.saturating_add(self.pending)
    }
}

/// Result of folding matured holds into a wallet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Settlement {
    pub settled: usize,
    pub amount: Cents,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_cents_display() {
        assert_eq!(Cents::new(2000).to_string(), "$20.00");
        assert_eq!(Cents::new(-1505).to_string(), "-$15.05");
        assert_eq!(Cents::new(7).to_string(), "$0.07");
    }

    #[test]
    fn test_cents_from_dollars_rounds() {
        assert_eq!(Cents::from_dollars(25.0), Cents::new(2500));
        assert_eq!(Cents::from_dollars(19.999), Cents::new(2000));
    }

    #[test]
    fn test_entry_sign_convention() {
        let now = Utc::now();
        let user = UserId::from("dev");
        assert!(NewEntry::new(user.clone(), TransactionKind::TestReserve, Cents::new(-100), now)
            .validate()
            .is_ok());
        assert!(NewEntry::new(user.clone(), TransactionKind::TestReserve, Cents::new(100), now)
            .validate()
            .is_err());
        assert!(NewEntry::new(user.clone(), TransactionKind::Deposit, Cents::ZERO, now)
            .validate()
            .is_err());
        assert!(NewEntry::new(user, TransactionKind::PayoutReversal, Cents::new(100), now)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_held_until_sets_status() {
        let now = Utc::now();
        let user = UserId::from("tester");
        let held = NewEntry::new(user.clone(), TransactionKind::TestRelease, Cents::new(2000), now)
            .held_until(now + Duration::days(7));
        assert_eq!(held.status, TransactionStatus::Pending);

        let due = NewEntry::new(user, TransactionKind::TestRelease, Cents::new(2000), now)
            .held_until(now);
        assert_eq!(due.status, TransactionStatus::Completed);
    }

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in [
            TransactionKind::Deposit,
            TransactionKind::TestReserve,
            TransactionKind::TestRelease,
            TransactionKind::Payout,
            TransactionKind::PayoutReversal,
        ] {
            assert_eq!(kind.as_str().parse::<TransactionKind>().unwrap(), kind);
        }
    }
}
