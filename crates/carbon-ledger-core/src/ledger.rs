//! Append-only writes to the ledger.
//!
//! Entries are never updated in place. A correction (including a change of
//! verification status) is a new entry whose `metadata.supersedes` names
//! the entry it replaces; queries hide superseded rows by default.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use tracing::{debug, info};

use crate::models::MetricEntry;
use crate::store::LedgerStore;

pub struct LedgerWriter {
    store: Arc<dyn LedgerStore>,
}

impl LedgerWriter {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub async fn record(&self, entry: &MetricEntry) -> Result<()> {
        self.store.insert(entry).await?;
        debug!(id = %entry.id, co2e = %entry.co2e_emissions, "ledger entry recorded");
        Ok(())
    }

    /// Record `entry` unless its activity was already recorded.
    ///
    /// Returns `false` when an entry with the same activity hash exists.
    pub async fn record_if_new(&self, entry: &MetricEntry) -> Result<bool> {
        if let Some(existing) = self.store.find_by_activity_hash(&entry.activity_hash).await? {
            debug!(existing = %existing.id, hash = %entry.activity_hash, "activity already recorded");
            return Ok(false);
        }
        self.record(entry).await?;
        Ok(true)
    }

    /// Append `replacement` as the correction of `superseded_id`.
    pub async fn correct(&self, superseded_id: &str, mut replacement: MetricEntry) -> Result<MetricEntry> {
        let original = self
            .store
            .get(superseded_id)
            .await?
            .ok_or_else(|| anyhow!("cannot correct unknown ledger entry {}", superseded_id))?;
        if original.organization_id != replacement.organization_id {
            bail!(
                "correction for {} belongs to organization {}, not {}",
                original.id,
                replacement.organization_id,
                original.organization_id
            );
        }
        if replacement.id == original.id {
            bail!("a correction needs its own id, got {}", replacement.id);
        }

        replacement.metadata.supersedes = Some(original.id.clone());
        self.store.insert(&replacement).await?;
        info!(original = %original.id, replacement = %replacement.id, "ledger entry corrected");
        Ok(replacement)
    }
}
