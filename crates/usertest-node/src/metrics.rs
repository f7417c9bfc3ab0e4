use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use usertest_ledger::TransactionStatus;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    pub reservations_total: IntCounter,
    /// Labelled `immediate` or `held`.
    pub releases_total: IntCounterVec,
    pub settlements_total: IntCounter,
    /// Labelled `transferred` or `compensated`.
    pub payouts_total: IntCounterVec,
    pub claim_conflicts_total: IntCounter,
    pub deposits_total: IntCounter,
    pub ledger_op_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let reservations_total = IntCounter::new(
            "usertest_reservations_total",
            "Task budgets moved into escrow",
        )?;
        let releases_total = IntCounterVec::new(
            Opts::new("usertest_releases_total", "Tester earnings released"),
            &["hold"],
        )?;
        let settlements_total = IntCounter::new(
            "usertest_settlements_total",
            "Held entries folded into balances",
        )?;
        let payouts_total = IntCounterVec::new(
            Opts::new("usertest_payouts_total", "Finished payout sagas"),
            &["outcome"],
        )?;
        let claim_conflicts_total = IntCounter::new(
            "usertest_claim_conflicts_total",
            "Submissions refused by the claim guard",
        )?;
        let deposits_total = IntCounter::new(
            "usertest_deposits_total",
            "Checkout deposits credited",
        )?;
        let ledger_op_duration = HistogramVec::new(
            HistogramOpts::new(
                "usertest_ledger_op_duration_seconds",
                "Handling time of ledger operations",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation"],
        )?;

        registry.register(Box::new(reservations_total.clone()))?;
        registry.register(Box::new(releases_total.clone()))?;
        registry.register(Box::new(settlements_total.clone()))?;
        registry.register(Box::new(payouts_total.clone()))?;
        registry.register(Box::new(claim_conflicts_total.clone()))?;
        registry.register(Box::new(deposits_total.clone()))?;
        registry.register(Box::new(ledger_op_duration.clone()))?;

        Ok(Self {
            registry,
            reservations_total,
            releases_total,
            settlements_total,
            payouts_total,
            claim_conflicts_total,
            deposits_total,
            ledger_op_duration,
        })
    }

    pub fn record_release(&self, status: TransactionStatus) {
        let hold = match status {
            TransactionStatus::Completed => "immediate",
            TransactionStatus::Pending => "held",
        };
        self.releases_total.with_label_values(&[hold]).inc();
    }

    pub fn record_settled(&self, entries: usize) {
        self.settlements_total.inc_by(entries as u64);
    }

    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }
}
