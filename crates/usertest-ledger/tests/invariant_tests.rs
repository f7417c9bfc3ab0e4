use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;
use std::sync::Arc;
use usertest_ledger::{
    tester_earnings, Cents, ClaimOutcome, EntryMetadata, HoldPolicy, LedgerEngine, LedgerError, LedgerStore,
    ManualClock, MemoryLedgerStore, PayoutId, Profile, Submission, SubmissionId,
    SubmissionStatus, Task, TaskId, TaskStatus, TransactionKind, TransactionStatus, TrustLevel,
    UserId,
};

fn engine() -> (LedgerEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let engine = LedgerEngine::new(
        Arc::new(MemoryLedgerStore::new()),
        clock.clone(),
        HoldPolicy::default(),
    );
    (engine, clock)
}

fn task(developer: &UserId, budget: i64, max_testers: u32, now: DateTime<Utc>) -> Task {
    Task {
        id: TaskId::new(),
        developer_id: developer.clone(),
        title: "Signup funnel".to_string(),
        app_url: "https://app.example.com".to_string(),
        instructions: None,
        steps: vec!["Create an account".to_string()],
        budget: Cents::new(budget),
        max_testers,
        platform_fee_percent: 20,
        status: TaskStatus::Posted,
        assigned_tester_id: None,
        created_at: now,
        updated_at: now,
    }
}

fn submission(task: &Task, tester: &UserId, now: DateTime<Utc>) -> Submission {
    Submission {
        id: SubmissionId::new(),
        task_id: task.id,
        tester_id: tester.clone(),
        video_url: "https://cdn.example.com/v.webm".to_string(),
        video_duration_seconds: 180,
        notes: None,
        status: SubmissionStatus::Pending,
        developer_rating: None,
        developer_feedback: None,
        submitted_at: now,
        reviewed_at: None,
    }
}

/// Posts a funded task and a pending submission for it.
async fn posted_with_submission(
    engine: &LedgerEngine,
    developer: &UserId,
    tester: &UserId,
    budget: i64,
) -> (Task, Submission) {
    let now = engine.wallets.now();
    engine
        .wallets
        .deposit(developer, Cents::new(budget), EntryMetadata::default(), None)
        .await
        .unwrap();
    let (task, _) = engine
        .wallets
        .reserve_for_task(task(developer, budget, 1, now))
        .await
        .unwrap();
    let sub = submission(&task, tester, now);
    let outcome = engine.store.claim_and_submit(sub.clone()).await.unwrap();
    assert!(matches!(outcome, ClaimOutcome::Claimed { .. }));
    (task, sub)
}

#[tokio::test]
async fn test_approval_of_25_dollar_task_for_new_tester() {
    let (engine, clock) = engine();
    let dev = UserId::from("dev");
    let tester = UserId::from("tester");
    let (task, sub) = posted_with_submission(&engine, &dev, &tester, 2500).await;

    let earnings = tester_earnings(task.budget, task.platform_fee_percent);
    let approved = engine
        .wallets
        .release_for_submission(
            sub.id,
            &tester,
            earnings,
            TrustLevel::New,
            EntryMetadata::for_submission(task.id, sub.id, task.title.clone()),
            5,
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(approved.release.amount, Cents::new(2000));
    assert_eq!(approved.release.status, TransactionStatus::Pending);
    assert_eq!(
        approved.release.available_at,
        Some(approved.release.created_at + Duration::days(7))
    );

    let snapshot = engine.wallets.balance(&tester).await.unwrap();
    assert_eq!(snapshot.balance, Cents::ZERO);
    assert_eq!(snapshot.pending, Cents::new(2000));

    clock.advance(Duration::days(7));
    let snapshot = engine.wallets.balance(&tester).await.unwrap();
    assert_eq!(snapshot.balance, Cents::new(2000));
    assert_eq!(snapshot.pending, Cents::ZERO);
}

#[tokio::test]
async fn test_trusted_release_is_immediate() {
    let (engine, _) = engine();
    let dev = UserId::from("dev");
    let tester = UserId::from("tester");
    let (task, sub) = posted_with_submission(&engine, &dev, &tester, 2500).await;

    let approved = engine
        .wallets
        .release_for_submission(
            sub.id,
            &tester,
            tester_earnings(task.budget, 20),
            TrustLevel::Trusted,
            EntryMetadata::default(),
            4,
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(approved.release.status, TransactionStatus::Completed);
    assert_eq!(approved.submission.developer_rating, Some(4));
    assert_eq!(
        engine.wallets.balance(&tester).await.unwrap().balance,
        Cents::new(2000)
    );
}

#[tokio::test]
async fn test_no_double_release() {
    let (engine, _) = engine();
    let dev = UserId::from("dev");
    let tester = UserId::from("tester");
    let (_, sub) = posted_with_submission(&engine, &dev, &tester, 2500).await;

    let first = engine
        .wallets
        .release_for_submission(sub.id, &tester, Cents::new(2000), TrustLevel::Trusted, EntryMetadata::default(), 5)
        .await
        .unwrap();
    let second = engine
        .wallets
        .release_for_submission(sub.id, &tester, Cents::new(2000), TrustLevel::Trusted, EntryMetadata::default(), 5)
        .await
        .unwrap();

    assert!(first.is_some());
    assert!(second.is_none());
    let releases = engine
        .wallets
        .transactions(&tester, None, None)
        .await
        .unwrap()
        .into_iter()
        .filter(|tx| tx.kind == TransactionKind::TestRelease)
        .count();
    assert_eq!(releases, 1);
    assert_eq!(
        engine.wallets.balance(&tester).await.unwrap().balance,
        Cents::new(2000)
    );
}

#[tokio::test]
async fn test_concurrent_approvals_release_once() {
    let (engine, _) = engine();
    let engine = Arc::new(engine);
    let dev = UserId::from("dev");
    let tester = UserId::from("tester");
    let (_, sub) = posted_with_submission(&engine, &dev, &tester, 2500).await;
    let sub_id = sub.id;

    let mut handles = vec![];
    for _ in 0..10 {
        let engine = engine.clone();
        let tester = tester.clone();
        handles.push(tokio::spawn(async move {
            engine
                .wallets
                .release_for_submission(sub_id, &tester, Cents::new(2000), TrustLevel::Trusted, EntryMetadata::default(), 5)
                .await
                .unwrap()
                .is_some()
        }));
    }

    let mut released = 0;
    for handle in handles {
        if handle.await.unwrap() {
            released += 1;
        }
    }
    assert_eq!(released, 1);
    assert!(engine.wallets.reconcile(&tester).await.unwrap().is_balanced());
}

#[tokio::test]
async fn test_reservation_rejection_leaves_nothing() {
    let (engine, _) = engine();
    let dev = UserId::from("dev");
    engine
        .wallets
        .deposit(&dev, Cents::new(4000), EntryMetadata::default(), None)
        .await
        .unwrap();

    let draft = task(&dev, 2500, 2, engine.wallets.now());
    let id = draft.id;
    let err = engine.wallets.reserve_for_task(draft).await.unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

    assert!(engine.store.get_task(id).await.unwrap().is_none());
    assert_eq!(
        engine.wallets.balance(&dev).await.unwrap().balance,
        Cents::new(4000)
    );
    assert_eq!(
        engine.wallets.transactions(&dev, None, None).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_concurrent_claims_single_winner() {
    let (engine, _) = engine();
    let engine = Arc::new(engine);
    let dev = UserId::from("dev");
    engine
        .wallets
        .deposit(&dev, Cents::new(2500), EntryMetadata::default(), None)
        .await
        .unwrap();
    let (task, _) = engine
        .wallets
        .reserve_for_task(task(&dev, 2500, 1, engine.wallets.now()))
        .await
        .unwrap();

    let mut handles = vec![];
    for i in 0..16 {
        let engine = engine.clone();
        let task = task.clone();
        handles.push(tokio::spawn(async move {
            let tester = UserId::new(format!("tester-{}", i));
            let outcome = engine
                .store
                .claim_and_submit(submission(&task, &tester, engine.wallets.now()))
                .await
                .unwrap();
            matches!(outcome, ClaimOutcome::Claimed { .. })
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    let stored = engine.store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Submitted);
    assert!(stored.assigned_tester_id.is_some());
    // The loser's claim wrote no submission.
    assert_eq!(engine.store.list_submissions_by_task(task.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_tester_is_paid_once_per_task() {
    let (engine, _) = engine();
    let dev = UserId::from("dev");
    let tester = UserId::from("tester");
    let (task, sub) = posted_with_submission(&engine, &dev, &tester, 2500).await;

    engine
        .wallets
        .release_for_submission(sub.id, &tester, Cents::new(2000), TrustLevel::Trusted, EntryMetadata::default(), 5)
        .await
        .unwrap()
        .unwrap();

    let repeat = submission(&task, &tester, engine.wallets.now());
    assert_eq!(
        engine.store.claim_and_submit(repeat.clone()).await.unwrap(),
        ClaimOutcome::AlreadySubmitted
    );
    assert!(engine.store.get_submission(repeat.id).await.unwrap().is_none());

    engine
        .store
        .set_task_status(task.id, TaskStatus::Completed, engine.wallets.now())
        .await
        .unwrap();
    assert_eq!(
        engine
            .store
            .claim_and_submit(submission(&task, &tester, engine.wallets.now()))
            .await
            .unwrap(),
        ClaimOutcome::Closed
    );

    let snapshot = engine.wallets.balance(&tester).await.unwrap();
    assert_eq!(snapshot.total(), Cents::new(2000));
    assert!(snapshot.total() <= task.reserve_amount().unwrap());
}

#[tokio::test]
async fn test_concurrent_submissions_by_one_tester() {
    let (engine, _) = engine();
    let engine = Arc::new(engine);
    let dev = UserId::from("dev");
    engine
        .wallets
        .deposit(&dev, Cents::new(2500), EntryMetadata::default(), None)
        .await
        .unwrap();
    let (task, _) = engine
        .wallets
        .reserve_for_task(task(&dev, 2500, 1, engine.wallets.now()))
        .await
        .unwrap();

    let mut handles = vec![];
    for _ in 0..8 {
        let engine = engine.clone();
        let task = task.clone();
        handles.push(tokio::spawn(async move {
            let tester = UserId::from("tester");
            let outcome = engine
                .store
                .claim_and_submit(submission(&task, &tester, engine.wallets.now()))
                .await
                .unwrap();
            matches!(outcome, ClaimOutcome::Claimed { .. })
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(engine.store.list_submissions_by_task(task.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_payouts_never_overdraw() {
    let (engine, _) = engine();
    let engine = Arc::new(engine);
    let tester = UserId::from("tester");
    engine
        .wallets
        .deposit(&tester, Cents::new(1000), EntryMetadata::default(), None)
        .await
        .unwrap();

    let mut handles = vec![];
    for _ in 0..8 {
        let engine = engine.clone();
        let tester = tester.clone();
        handles.push(tokio::spawn(async move {
            engine
                .wallets
                .debit_for_payout(&tester, Cents::new(300), PayoutId::new())
                .await
                .is_ok()
        }));
    }

    let mut debited = 0;
    for handle in handles {
        if handle.await.unwrap() {
            debited += 1;
        }
    }
    assert_eq!(debited, 3);
    assert_eq!(
        engine.wallets.balance(&tester).await.unwrap().balance,
        Cents::new(100)
    );
    assert!(engine.wallets.reconcile(&tester).await.unwrap().is_balanced());
}

#[tokio::test]
async fn test_cancel_backs_out_release_and_reopens_task() {
    let (engine, _) = engine();
    let dev = UserId::from("dev");
    let tester = UserId::from("tester");
    let (task, sub) = posted_with_submission(&engine, &dev, &tester, 2500).await;
    engine
        .wallets
        .release_for_submission(
            sub.id,
            &tester,
            Cents::new(2000),
            TrustLevel::Trusted,
            EntryMetadata::for_submission(task.id, sub.id, task.title.clone()),
            5,
        )
        .await
        .unwrap();

    let outcome = engine
        .store
        .cancel_submission(sub.id, engine.wallets.now())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        usertest_ledger::CancelOutcome::Cancelled {
            removed_entries: 1,
            task_reopened: true
        }
    );

    let reopened = engine.store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(reopened.status, TaskStatus::Posted);
    assert_eq!(reopened.assigned_tester_id, None);
    assert_eq!(engine.wallets.balance(&tester).await.unwrap().balance, Cents::ZERO);
    assert!(engine.wallets.reconcile(&tester).await.unwrap().is_balanced());
}

#[tokio::test]
async fn test_seeded_trust_is_kept_on_completion() {
    let store = Arc::new(MemoryLedgerStore::new());
    let tester = UserId::from("veteran");
    store
        .put_profile(Profile {
            trust_level: TrustLevel::Trusted,
            ..Profile::new(tester.clone())
        })
        .await;

    let profile = store
        .record_completion(&tester, Default::default())
        .await
        .unwrap();
    assert_eq!(profile.trust_level, TrustLevel::Trusted);
    assert_eq!(profile.completed_tasks_count, 1);
}

#[derive(Debug, Clone)]
enum Op {
    Deposit(i64),
    Reserve(i64),
    Payout(i64),
    Release(i64, TrustLevel),
    Advance(i64),
}

fn arb_trust() -> impl Strategy<Value = TrustLevel> {
    prop_oneof![
        Just(TrustLevel::New),
        Just(TrustLevel::Regular),
        Just(TrustLevel::Trusted),
    ]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1i64..50_000).prop_map(Op::Deposit),
        (1i64..20_000).prop_map(Op::Reserve),
        (1i64..20_000).prop_map(Op::Payout),
        ((1i64..10_000), arb_trust()).prop_map(|(a, t)| Op::Release(a, t)),
        (0i64..10).prop_map(Op::Advance),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Balance always equals the sum of completed entries, never goes
    /// negative, and settlement never changes balance + pending.
    #[test]
    fn prop_ledger_reconciles(ops in prop::collection::vec(arb_op(), 1..40)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (engine, clock) = engine();
            let user = UserId::from("user");

            for op in ops {
                match op {
                    Op::Deposit(a) => {
                        engine.wallets.deposit(&user, Cents::new(a), EntryMetadata::default(), None).await.unwrap();
                    }
                    Op::Reserve(a) => {
                        let draft = task(&user, a, 1, engine.wallets.now());
                        match engine.wallets.reserve_for_task(draft).await {
                            Ok(_) | Err(LedgerError::InsufficientFunds { .. }) => {}
                            Err(e) => panic!("unexpected reserve error: {}", e),
                        }
                    }
                    Op::Payout(a) => {
                        match engine.wallets.debit_for_payout(&user, Cents::new(a), PayoutId::new()).await {
                            Ok(_) | Err(LedgerError::InsufficientBalance { .. }) => {}
                            Err(e) => panic!("unexpected payout error: {}", e),
                        }
                    }
                    Op::Release(a, trust) => {
                        let entry = engine.wallets.release_entry(&user, Cents::new(a), trust, EntryMetadata::default());
                        engine.store.post_entry(entry).await.unwrap();
                    }
                    Op::Advance(days) => {
                        let before = engine.store.held_total(&user, engine.wallets.now()).await.unwrap()
                            .saturating_add(engine.wallets.reconcile(&user).await.unwrap().balance);
                        clock.advance(Duration::days(days));
                        let after = engine.wallets.balance(&user).await.unwrap().total();
                        assert_eq!(before, after);
                    }
                }

                let rec = engine.wallets.reconcile(&user).await.unwrap();
                assert!(rec.is_balanced(), "{:?}", rec);
                assert!(!rec.balance.is_negative());
            }
        });
    }
}
