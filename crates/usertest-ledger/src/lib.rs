pub mod clock;
pub mod error;
pub mod records;
pub mod storage;
pub mod trust;
pub mod types;
pub mod wallet;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{LedgerError, Result, StoreError, StoreResult};
pub use records::{
    ApprovedSubmission, Approval, CancelOutcome, ClaimOutcome, Profile, Submission,
    SubmissionStatus, Task, TaskStatus,
};
pub use storage::{LedgerStore, MemoryLedgerStore};
pub use trust::{HoldPolicy, TrustLevel, TrustThresholds};
pub use types::{
    BalanceSnapshot, Cents, EntryMetadata, NewEntry, PayoutId, Settlement, SubmissionId, TaskId,
    Transaction, TransactionId, TransactionKind, TransactionStatus, UserId, Wallet,
};
pub use wallet::{tester_earnings, Reconciliation, WalletManager};

use std::sync::Arc;

/// Store plus the wallet routines built on it.
pub struct LedgerEngine {
    pub store: Arc<dyn LedgerStore>,
    pub wallets: Arc<WalletManager>,
    pub clock: Arc<dyn Clock>,
}

impl LedgerEngine {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, holds: HoldPolicy) -> Self {
        let wallets = Arc::new(WalletManager::new(store.clone(), clock.clone(), holds));
        Self {
            store,
            wallets,
            clock,
        }
    }

    /// In-memory ledger on the system clock with default holds.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryLedgerStore::new()),
            Arc::new(SystemClock),
            HoldPolicy::default(),
        )
    }
}
