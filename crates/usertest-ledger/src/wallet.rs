use crate::clock::Clock;
use crate::error::{LedgerError, Result, StoreError};
use crate::records::{ApprovedSubmission, Approval, Task};
use crate::storage::LedgerStore;
use crate::trust::{HoldPolicy, TrustLevel};
use crate::types::{
    BalanceSnapshot, Cents, EntryMetadata, NewEntry, PayoutId, Settlement, SubmissionId,
    Transaction, TransactionKind, UserId, Wallet,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

/// Tester share of a per-tester budget after the platform fee, rounded half up.
///
/// `2500` cents at 20% gives `2000`.
pub fn tester_earnings(budget: Cents, fee_percent: u8) -> Cents {
    let keep = i128::from(100 - fee_percent.min(100));
    let scaled = i128::from(budget.as_i64()) * keep;
    let rounded = (scaled + 50).div_euclid(100);
    Cents::new(rounded.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64)
}

/// Balance as stored next to the sum of completed ledger entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    pub balance: Cents,
    pub ledger_total: Cents,
}

impl Reconciliation {
    pub fn is_balanced(&self) -> bool {
        self.balance == self.ledger_total
    }
}

/// Wallet operations on top of a [`LedgerStore`]: reservation, release with
/// hold, lazy settlement, and payout debits.
pub struct WalletManager {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    holds: HoldPolicy,
}

impl WalletManager {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, holds: HoldPolicy) -> Self {
        Self {
            store,
            clock,
            holds,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn holds(&self) -> &HoldPolicy {
        &self.holds
    }

    pub async fn get_or_create(&self, user: &UserId) -> Result<Wallet> {
        Ok(self.store.get_or_create_wallet(user, self.now()).await?)
    }

    /// Folds matured holds into the balance. A no-op when nothing matured.
    pub async fn settle(&self, user: &UserId) -> Result<Settlement> {
        let settlement = self.store.settle_matured(user, self.now()).await?;
        if settlement.settled > 0 {
            debug!(
                user = %user,
                settled = settlement.settled,
                amount_cents = settlement.amount.as_i64(),
                "Settlement applied"
            );
        }
        Ok(settlement)
    }

    /// Settles first, then reports the spendable balance and what is still held.
    pub async fn balance(&self, user: &UserId) -> Result<BalanceSnapshot> {
        Ok(self.settled_balance(user).await?.0)
    }

    /// Like [`Self::balance`], also returning what the settlement folded in.
    pub async fn settled_balance(&self, user: &UserId) -> Result<(BalanceSnapshot, Settlement)> {
        let settlement = self.settle(user).await?;
        let now = self.now();
        let wallet = self.store.get_or_create_wallet(user, now).await?;
        let pending = self.store.held_total(user, now).await?;
        let snapshot = BalanceSnapshot {
            balance: wallet.balance,
            pending,
        };
        Ok((snapshot, settlement))
    }

    /// Credits a completed deposit. With an idempotency key a redelivery fails
    /// with [`LedgerError::DuplicateEntry`] and leaves the balance alone.
    pub async fn deposit(
        &self,
        user: &UserId,
        amount: Cents,
        metadata: EntryMetadata,
        idempotency_key: Option<String>,
    ) -> Result<Transaction> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidAmount(format!(
                "deposit must be positive, got {}",
                amount
            )));
        }

        let mut entry = NewEntry::new(user.clone(), TransactionKind::Deposit, amount, self.now())
            .with_metadata(metadata);
        if let Some(key) = idempotency_key {
            entry = entry.with_idempotency_key(key);
        }

        let tx = self.store.post_entry(entry).await?;
        info!(
            user = %user,
            amount_cents = amount.as_i64(),
            tx_id = %tx.id,
            "💰 Deposit credited"
        );
        Ok(tx)
    }

    /// Escrows `budget × max_testers` from the developer and inserts the task in
    /// one store operation. On shortfall nothing is written.
    pub async fn reserve_for_task(&self, task: Task) -> Result<(Task, Transaction)> {
        let amount = task
            .reserve_amount()
            .ok_or_else(|| LedgerError::InvalidAmount("reserve amount overflows".to_string()))?;
        if !amount.is_positive() {
            return Err(LedgerError::InvalidAmount(format!(
                "reserve must be positive, got {}",
                amount
            )));
        }

        let developer = task.developer_id.clone();
        let entry = NewEntry::new(
            developer.clone(),
            TransactionKind::TestReserve,
            -amount,
            self.now(),
        )
        .with_metadata(EntryMetadata::for_task(task.id, task.title.clone()));

        match self.store.create_task_with_reserve(task, entry).await {
            Ok((task, tx)) => {
                info!(
                    developer = %developer,
                    task_id = %task.id,
                    amount_cents = amount.as_i64(),
                    "🔒 Budget reserved"
                );
                Ok((task, tx))
            }
            Err(StoreError::BalanceGuard { available, .. }) => {
                warn!(
                    developer = %developer,
                    required_cents = amount.as_i64(),
                    available_cents = available.as_i64(),
                    "Reservation rejected"
                );
                Err(LedgerError::InsufficientFunds {
                    required: amount,
                    available,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Builds the release entry for a tester, held according to trust level.
    pub fn release_entry(
        &self,
        tester: &UserId,
        earnings: Cents,
        trust: TrustLevel,
        metadata: EntryMetadata,
    ) -> NewEntry {
        let now = self.now();
        NewEntry::new(tester.clone(), TransactionKind::TestRelease, earnings, now)
            .with_metadata(metadata)
            .held_until(now + self.holds.hold_for(trust))
    }

    /// Approves a pending submission and releases `earnings` to the tester in
    /// one store operation. `None` if the submission was no longer pending.
    pub async fn release_for_submission(
        &self,
        submission_id: SubmissionId,
        tester: &UserId,
        earnings: Cents,
        trust: TrustLevel,
        metadata: EntryMetadata,
        rating: u8,
    ) -> Result<Option<ApprovedSubmission>> {
        if !earnings.is_positive() {
            return Err(LedgerError::InvalidAmount(format!(
                "release must be positive, got {}",
                earnings
            )));
        }

        let release = self.release_entry(tester, earnings, trust, metadata);
        let approval = Approval {
            submission_id,
            rating,
            reviewed_at: release.created_at,
            release,
        };

        let approved = self.store.approve_submission(approval).await?;
        if let Some(approved) = &approved {
            info!(
                tester = %tester,
                submission_id = %submission_id,
                amount_cents = earnings.as_i64(),
                trust = trust.as_str(),
                status = approved.release.status.as_str(),
                available_at = ?approved.release.available_at,
                "💸 Earnings released"
            );
        }
        Ok(approved)
    }

    /// Guarded payout debit. Settles first so matured holds are withdrawable.
    pub async fn debit_for_payout(
        &self,
        user: &UserId,
        amount: Cents,
        payout_id: PayoutId,
    ) -> Result<Transaction> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidAmount(format!(
                "payout must be positive, got {}",
                amount
            )));
        }
        self.settle(user).await?;

        let entry = NewEntry::new(user.clone(), TransactionKind::Payout, -amount, self.now())
            .with_metadata(EntryMetadata::for_payout(payout_id));
        let tx = self.store.post_entry(entry).await?;

        info!(
            user = %user,
            payout_id = %payout_id,
            amount_cents = amount.as_i64(),
            "💸 Payout debited"
        );
        Ok(tx)
    }

    /// Compensating credit for a payout whose external transfer failed.
    pub async fn reverse_payout(
        &self,
        user: &UserId,
        amount: Cents,
        payout_id: PayoutId,
        reason: impl Into<String>,
    ) -> Result<Transaction> {
        let metadata = EntryMetadata {
            transfer_error: Some(reason.into()),
            ..EntryMetadata::for_payout(payout_id)
        };
        let entry = NewEntry::new(
            user.clone(),
            TransactionKind::PayoutReversal,
            amount.abs(),
            self.now(),
        )
        .with_metadata(metadata);
        let tx = self.store.post_entry(entry).await?;

        warn!(
            user = %user,
            payout_id = %payout_id,
            amount_cents = amount.abs().as_i64(),
            "↩️ Payout reversed"
        );
        Ok(tx)
    }

    /// Newest first. `limit` defaults to 20 and is capped at 100.
    pub async fn transactions(
        &self,
        user: &UserId,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<Transaction>> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = offset.unwrap_or(0);
        Ok(self.store.list_transactions(user, limit, offset).await?)
    }

    pub async fn reconcile(&self, user: &UserId) -> Result<Reconciliation> {
        let wallet = self.store.get_or_create_wallet(user, self.now()).await?;
        let ledger_total = self.store.completed_total(user).await?;
        Ok(Reconciliation {
            balance: wallet.balance,
            ledger_total,
        })
    }

    /// Settles every user with matured holds. Returns the users touched.
    pub async fn sweep(&self) -> Result<Vec<(UserId, Settlement)>> {
        let users = self.store.users_with_matured_holds(self.now()).await?;
        let mut settled = Vec::with_capacity(users.len());
        for user in users {
            let settlement = self.settle(&user).await?;
            if settlement.settled > 0 {
                settled.push((user, settlement));
            }
        }

        if !settled.is_empty() {
            info!(users = settled.len(), "🧹 Settlement sweep finished");
        }
        Ok(settled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::records::TaskStatus;
    use crate::storage::MemoryLedgerStore;
    use crate::types::{TaskId, TransactionStatus};
    use chrono::Duration;

    fn manager() -> (WalletManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let manager = WalletManager::new(
            Arc::new(MemoryLedgerStore::new()),
            clock.clone(),
            HoldPolicy::default(),
        );
        (manager, clock)
    }

    fn task(developer: &UserId, budget: i64, max_testers: u32, now: DateTime<Utc>) -> Task {
        Task {
            id: TaskId::new(),
            developer_id: developer.clone(),
            title: "Onboarding".to_string(),
            app_url: "https://app.example.com".to_string(),
            instructions: None,
            steps: vec!["Sign up".to_string()],
            budget: Cents::new(budget),
            max_testers,
            platform_fee_percent: 20,
            status: TaskStatus::Posted,
            assigned_tester_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_tester_earnings_rounding() {
        assert_eq!(tester_earnings(Cents::new(2500), 20), Cents::new(2000));
        assert_eq!(tester_earnings(Cents::new(1999), 15), Cents::new(1699));
        // 333 * 0.85 = 283.05
        assert_eq!(tester_earnings(Cents::new(333), 15), Cents::new(283));
        // 1 * 0.5 = 0.5 rounds up
        assert_eq!(tester_earnings(Cents::new(1), 50), Cents::new(1));
        assert_eq!(tester_earnings(Cents::new(2500), 100), Cents::ZERO);
    }

    #[tokio::test]
    async fn test_reserve_decrements_balance() {
        let (wallets, _) = manager();
        let dev = UserId::from("dev");
        wallets
            .deposit(&dev, Cents::new(10_000), EntryMetadata::default(), None)
            .await
            .unwrap();

        let t = task(&dev, 2500, 2, wallets.now());
        let (_, tx) = wallets.reserve_for_task(t).await.unwrap();
        assert_eq!(tx.amount, Cents::new(-5000));
        assert_eq!(tx.kind, TransactionKind::TestReserve);

        let balance = wallets.balance(&dev).await.unwrap();
        assert_eq!(balance.balance, Cents::new(5000));
        assert!(wallets.reconcile(&dev).await.unwrap().is_balanced());
    }

    #[tokio::test]
    async fn test_reserve_shortfall_is_insufficient_funds() {
        let (wallets, _) = manager();
        let dev = UserId::from("dev");
        wallets
            .deposit(&dev, Cents::new(1000), EntryMetadata::default(), None)
            .await
            .unwrap();

        let err = wallets
            .reserve_for_task(task(&dev, 2500, 1, wallets.now()))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                required: Cents::new(2500),
                available: Cents::new(1000)
            }
        );
        assert_eq!(wallets.balance(&dev).await.unwrap().balance, Cents::new(1000));
    }

    #[tokio::test]
    async fn test_release_entry_hold_by_trust() {
        let (wallets, _) = manager();
        let tester = UserId::from("tester");

        let held = wallets.release_entry(&tester, Cents::new(2000), TrustLevel::New, EntryMetadata::default());
        assert_eq!(held.status, TransactionStatus::Pending);
        assert_eq!(held.available_at, Some(held.created_at + Duration::days(7)));

        let immediate = wallets.release_entry(
            &tester,
            Cents::new(2000),
            TrustLevel::Trusted,
            EntryMetadata::default(),
        );
        assert_eq!(immediate.status, TransactionStatus::Completed);
    }

    #[tokio::test]
    async fn test_payout_debit_settles_first() {
        let (wallets, clock) = manager();
        let tester = UserId::from("tester");

        let entry = wallets.release_entry(&tester, Cents::new(2000), TrustLevel::Regular, EntryMetadata::default());
        wallets.store.post_entry(entry).await.unwrap();

        assert!(matches!(
            wallets.debit_for_payout(&tester, Cents::new(1500), PayoutId::new()).await,
            Err(LedgerError::InsufficientBalance { .. })
        ));

        clock.advance(Duration::days(3));
        wallets
            .debit_for_payout(&tester, Cents::new(1500), PayoutId::new())
            .await
            .unwrap();
        let snapshot = wallets.balance(&tester).await.unwrap();
        assert_eq!(snapshot.balance, Cents::new(500));
        assert_eq!(snapshot.pending, Cents::ZERO);
    }

    #[tokio::test]
    async fn test_reverse_payout_restores_balance() {
        let (wallets, _) = manager();
        let tester = UserId::from("tester");
        let payout_id = PayoutId::new();
        wallets
            .deposit(&tester, Cents::new(3000), EntryMetadata::default(), None)
            .await
            .unwrap();

        wallets.debit_for_payout(&tester, Cents::new(3000), payout_id).await.unwrap();
        let reversal = wallets
            .reverse_payout(&tester, Cents::new(3000), payout_id, "account restricted")
            .await
            .unwrap();
        assert_eq!(reversal.kind, TransactionKind::PayoutReversal);
        assert_eq!(reversal.metadata.payout_id, Some(payout_id));
        assert_eq!(wallets.balance(&tester).await.unwrap().balance, Cents::new(3000));
        assert!(wallets.reconcile(&tester).await.unwrap().is_balanced());
    }

    #[tokio::test]
    async fn test_transactions_page_bounds() {
        let (wallets, clock) = manager();
        let user = UserId::from("dev");
        for i in 1..=3 {
            wallets
                .deposit(&user, Cents::new(100 * i), EntryMetadata::default(), None)
                .await
                .unwrap();
            clock.advance(Duration::seconds(1));
        }

        let page = wallets.transactions(&user, Some(2), None).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].amount, Cents::new(300));

        let rest = wallets.transactions(&user, Some(2), Some(2)).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].amount, Cents::new(100));

        // Zero is lifted to one, oversized limits are capped.
        assert_eq!(wallets.transactions(&user, Some(0), None).await.unwrap().len(), 1);
        assert_eq!(wallets.transactions(&user, Some(500), None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_sweep_settles_matured_users() {
        let (wallets, clock) = manager();
        for name in ["a", "b"] {
            let entry = wallets.release_entry(
                &UserId::from(name),
                Cents::new(1000),
                TrustLevel::New,
                EntryMetadata::default(),
            );
            wallets.store.post_entry(entry).await.unwrap();
        }

        assert!(wallets.sweep().await.unwrap().is_empty());
        clock.advance(Duration::days(7));
        let settled = wallets.sweep().await.unwrap();
        assert_eq!(settled.len(), 2);
        assert!(wallets.sweep().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settled_balance_settles_once() {
        let (wallets, clock) = manager();
        let tester = UserId::from("tester");
        let entry = wallets.release_entry(
            &tester,
            Cents::new(2000),
            TrustLevel::New,
            EntryMetadata::default(),
        );
        wallets.store.post_entry(entry).await.unwrap();

        let (snapshot, settlement) = wallets.settled_balance(&tester).await.unwrap();
        assert_eq!(settlement.settled, 0);
        assert_eq!(snapshot.pending, Cents::new(2000));

        clock.advance(Duration::days(7));
        let (snapshot, settlement) = wallets.settled_balance(&tester).await.unwrap();
        assert_eq!(settlement.settled, 1);
        assert_eq!(settlement.amount, Cents::new(2000));
        assert_eq!(snapshot.balance, Cents::new(2000));
        assert_eq!(snapshot.pending, Cents::ZERO);

        let (_, again) = wallets.settled_balance(&tester).await.unwrap();
        assert_eq!(again, Settlement::default());
    }
}
