//! Wires configuration, storage and the core engine together.
//!
//! On open, persisted factors warm the cache and the persisted quota
//! snapshot re-seeds the tracker, so both survive across CLI runs.
//! [`Service::persist_state`] writes them back, adding this run's quota
//! calls to whatever other runs have recorded in the meantime.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info};

use carbon_ledger_core::cache::FactorCache;
use carbon_ledger_core::engine::CalculationEngine;
use carbon_ledger_core::ledger::LedgerWriter;
use carbon_ledger_core::provider::ProviderClient;
use carbon_ledger_core::quota::{QuotaSnapshot, QuotaTracker};
use carbon_ledger_core::store::LedgerStore;

use crate::config::Config;
use crate::db;
use crate::http_source::HttpFactorSource;
use crate::migrate;
use crate::sqlite_store::SqliteLedger;

pub struct Service {
    pub store: Arc<SqliteLedger>,
    pub engine: CalculationEngine,
    pub writer: LedgerWriter,
    pub quota: Arc<QuotaTracker>,
    /// Tracker state as of the last save; calls beyond it are unsaved.
    quota_saved: QuotaSnapshot,
}

impl Service {
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::create_schema(&pool).await?;
        let store = Arc::new(SqliteLedger::new(pool));

        let quota = Arc::new(QuotaTracker::new(
            config.quota.monthly_limit,
            config.quota.window(),
            Utc::now(),
        ));
        let now = Utc::now();
        if let Some(snapshot) = store.load_quota().await? {
            quota.restore(&snapshot);
            quota.reset_if_elapsed(now);
        }
        // Claim the window up front so concurrent runs count against the same one.
        quota.restore(&store.save_quota(&quota.snapshot(), 0, now).await?);
        let quota_saved = quota.snapshot();

        let cache = Arc::new(FactorCache::new());
        let warmed = cache.warm(store.load_factors().await?.into_iter().map(|(f, _)| f));

        let mut engine = CalculationEngine::new(Arc::new(config.unit_converter()?), cache)
            .with_defaults(Arc::new(config.default_factors()));

        match &config.provider.base_url {
            Some(base_url) => {
                let source = HttpFactorSource::new(
                    base_url,
                    config.provider.api_key(),
                    config.provider.timeout(),
                )?;
                let client = ProviderClient::new(Arc::new(source), quota.clone())
                    .with_retry(config.provider.retry_policy())
                    .with_timeout(config.provider.timeout());
                engine = engine.with_provider(Arc::new(client));
                info!(base_url = %base_url, warmed, "factor provider configured");
            }
            None => info!(warmed, "no factor provider configured; using cached and default factors"),
        }

        let writer = LedgerWriter::new(store.clone());
        Ok(Self {
            store,
            engine,
            writer,
            quota,
            quota_saved,
        })
    }

    /// Save the quota calls made since the last save, and every cached factor.
    pub async fn persist_state(&mut self) -> Result<()> {
        let current = self.quota.snapshot();
        let spent = if current.window_reset_at == self.quota_saved.window_reset_at {
            current
                .calls_this_window
                .saturating_sub(self.quota_saved.calls_this_window)
        } else {
            current.calls_this_window
        };
        let stored = self.store.save_quota(&current, spent, Utc::now()).await?;
        self.quota.restore(&stored);
        self.quota_saved = self.quota.snapshot();
        debug!(spent, calls = stored.calls_this_window, "quota usage persisted");

        let entries = self.engine.cache().entries();
        for entry in &entries {
            self.store.save_factor(&entry.factor, entry.resolved_at).await?;
        }
        debug!(factors = entries.len(), "factor cache persisted");
        Ok(())
    }
}
