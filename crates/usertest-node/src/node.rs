use crate::api::{self, AppState};
use crate::auth::AuthConfig;
use crate::config::{NodeConfig, StorageBackend, StorageConfig};
use crate::metrics::Metrics;
use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use usertest_ledger::postgres::PgLedgerStore;
use usertest_ledger::{LedgerEngine, LedgerStore, MemoryLedgerStore, SystemClock};
use usertest_market::Marketplace;
use usertest_payments::{MockGateway, PaymentGateway, StripeConfig, StripeGateway};

/// The ledger service: store, marketplace services, metrics and auth.
pub struct UserTestNode {
    config: NodeConfig,
    market: Arc<Marketplace>,
    metrics: Metrics,
    auth: AuthConfig,
}

impl UserTestNode {
    pub async fn new(config: NodeConfig) -> Result<Self> {
        info!("Initializing ledger node...");
        config.validate()?;

        let store = open_store(&config.storage).await?;
        let gateway = open_gateway(&config.stripe)?;
        let ledger = Arc::new(LedgerEngine::new(
            store,
            Arc::new(SystemClock),
            config.hold_policy(),
        ));
        Self::with_parts(config, ledger, gateway)
    }

    /// Assembles a node over an existing ledger and gateway.
    pub fn with_parts(
        config: NodeConfig,
        ledger: Arc<LedgerEngine>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Result<Self> {
        let market = Marketplace::new(
            ledger,
            gateway,
            config.market_params(),
            config.stripe.webhook_secret.clone(),
        )
        .context("invalid ledger parameters")?;
        let metrics = Metrics::new().context("failed to register metrics")?;
        let auth = AuthConfig::from_settings(&config.auth);

        Ok(Self {
            config,
            market: Arc::new(market),
            metrics,
            auth,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn market(&self) -> &Arc<Marketplace> {
        &self.market
    }

    pub fn auth(&self) -> &AuthConfig {
        &self.auth
    }

    pub fn router(&self) -> Router {
        api::router(
            AppState {
                market: self.market.clone(),
                metrics: self.metrics.clone(),
                public_url: self.config.server.public_url.clone(),
            },
            self.auth.clone(),
        )
    }

    /// Settles every wallet with matured holds once. Returns the number of
    /// entries settled.
    pub async fn settle_all(&self) -> Result<usize> {
        let settled = self.market.ledger.wallets.sweep().await?;
        let entries = settled.iter().map(|(_, s)| s.settled).sum();
        self.metrics.record_settled(entries);
        Ok(entries)
    }

    /// Starts the periodic settlement sweep when an interval is configured.
    pub fn spawn_settlement_sweep(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let secs = self.config.settlement.sweep_interval_secs;
        if secs == 0 {
            return None;
        }

        let node = Arc::clone(self);
        info!(interval_secs = secs, "🧹 Settlement sweep enabled");
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(secs));
            loop {
                ticker.tick().await;
                if let Err(e) = node.settle_all().await {
                    warn!(error = %e, "Settlement sweep failed");
                }
            }
        }))
    }

    /// Serves the HTTP API until ctrl-c.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        let sweep = self.spawn_settlement_sweep();

        info!(addr = %addr, "📡 API server listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "Failed to listen for shutdown signal");
                }
                info!("🛑 Shutting down gracefully");
            })
            .await?;

        if let Some(handle) = sweep {
            handle.abort();
        }
        info!("Node stopped");
        Ok(())
    }
}

async fn open_store(config: &StorageConfig) -> Result<Arc<dyn LedgerStore>> {
    match config.backend {
        StorageBackend::Memory => {
            warn!("Using in-memory ledger store, balances are lost on restart");
            Ok(Arc::new(MemoryLedgerStore::new()))
        }
        StorageBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("storage.database_url is not set")?;
            let store = PgLedgerStore::connect(url, config.max_connections)
                .await
                .context("failed to connect to postgres")?;
            store.migrate().await.context("failed to run migrations")?;
            info!(
                max_connections = config.max_connections,
                storage_type = "postgres",
                "🗄️ Ledger store ready"
            );
            Ok(Arc::new(store))
        }
    }
}

fn open_gateway(config: &StripeConfig) -> Result<Arc<dyn PaymentGateway>> {
    if config.secret_key.is_empty() {
        warn!("No Stripe secret key configured, payments go to the in-process gateway");
        return Ok(Arc::new(MockGateway::new()));
    }
    if config.webhook_secret.is_empty() {
        warn!("No Stripe webhook secret configured, every webhook will be rejected");
    }
    Ok(Arc::new(StripeGateway::new(config.clone())?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use usertest_ledger::{Cents, EntryMetadata, HoldPolicy, ManualClock, TrustLevel, UserId};

    fn node_with_clock(clock: Arc<ManualClock>) -> UserTestNode {
        let ledger = Arc::new(LedgerEngine::new(
            Arc::new(MemoryLedgerStore::new()),
            clock,
            HoldPolicy::default(),
        ));
        UserTestNode::with_parts(NodeConfig::default(), ledger, Arc::new(MockGateway::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_memory_node_starts_without_sweep() {
        let node = Arc::new(UserTestNode::new(NodeConfig::default()).await.unwrap());
        assert!(node.spawn_settlement_sweep().is_none());
        let _router = node.router();
    }

    #[tokio::test]
    async fn test_settle_all_counts_matured_entries() {
        let clock = Arc::new(ManualClock::default());
        let node = node_with_clock(clock.clone());
        let wallets = &node.market().ledger.wallets;

        let tester = UserId::from("tester");
        let entry = wallets.release_entry(
            &tester,
            Cents::new(2000),
            TrustLevel::New,
            EntryMetadata::default(),
        );
        node.market().ledger.store.post_entry(entry).await.unwrap();
        assert_eq!(node.settle_all().await.unwrap(), 0);

        clock.advance(chrono::Duration::days(7));
        assert_eq!(node.settle_all().await.unwrap(), 1);
        assert_eq!(
            wallets.get_or_create(&tester).await.unwrap().balance,
            Cents::new(2000)
        );
    }
}
