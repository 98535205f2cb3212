//! In-memory [`LedgerStore`] implementation for tests and embedding.
//!
//! Entries live in a `Vec` behind a `parking_lot::RwLock`; queries are
//! linear scans.

use std::collections::{BTreeMap, HashSet};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::factor::{EmissionFactor, FactorKey};
use crate::models::MetricEntry;
use crate::quota::QuotaSnapshot;

use super::{EntryFilter, LedgerStore};

#[derive(Default)]
pub struct InMemoryLedger {
    entries: RwLock<Vec<MetricEntry>>,
    factors: RwLock<BTreeMap<FactorKey, (EmissionFactor, DateTime<Utc>)>>,
    quota: RwLock<Option<QuotaSnapshot>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn insert(&self, entry: &MetricEntry) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.iter().any(|e| e.id == entry.id) {
            bail!("ledger entry {} already exists", entry.id);
        }
        entries.push(entry.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<MetricEntry>> {
        Ok(self.entries.read().iter().find(|e| e.id == id).cloned())
    }

    async fn query(&self, organization_id: &str, filter: &EntryFilter) -> Result<Vec<MetricEntry>> {
        let entries = self.entries.read();
        let superseded: HashSet<&str> = entries
            .iter()
            .filter_map(|e| e.metadata.supersedes.as_deref())
            .collect();

        let mut out: Vec<MetricEntry> = entries
            .iter()
            .filter(|e| e.organization_id == organization_id)
            .filter(|e| filter.include_superseded || !superseded.contains(e.id.as_str()))
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.period_start
                .cmp(&b.period_start)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(out)
    }

    async fn find_by_activity_hash(&self, activity_hash: &str) -> Result<Option<MetricEntry>> {
        Ok(self
            .entries
            .read()
            .iter()
            .find(|e| e.activity_hash == activity_hash && e.metadata.supersedes.is_none())
            .cloned())
    }

    async fn save_factor(&self, factor: &EmissionFactor, resolved_at: DateTime<Utc>) -> Result<()> {
        self.factors
            .write()
            .insert(factor.key.clone(), (factor.clone(), resolved_at));
        Ok(())
    }

    async fn load_factors(&self) -> Result<Vec<(EmissionFactor, DateTime<Utc>)>> {
        Ok(self.factors.read().values().cloned().collect())
    }

    async fn delete_factor(&self, key: &FactorKey) -> Result<bool> {
        Ok(self.factors.write().remove(key).is_some())
    }

    async fn delete_all_factors(&self) -> Result<u64> {
        let mut factors = self.factors.write();
        let n = factors.len() as u64;
        factors.clear();
        Ok(n)
    }

    async fn save_quota(
        &self,
        snapshot: &QuotaSnapshot,
        spent: u64,
        now: DateTime<Utc>,
    ) -> Result<QuotaSnapshot> {
        let mut stored = self.quota.write();
        let merged = match stored.as_ref() {
            Some(current) if current.window_reset_at > now => QuotaSnapshot {
                calls_this_window: current.calls_this_window.saturating_add(spent),
                window_limit: snapshot.window_limit,
                window_reset_at: current.window_reset_at,
                resets: current.resets.max(snapshot.resets),
            },
            _ => snapshot.clone(),
        };
        *stored = Some(merged.clone());
        Ok(merged)
    }

    async fn load_quota(&self) -> Result<Option<QuotaSnapshot>> {
        Ok(self.quota.read().clone())
    }
}
