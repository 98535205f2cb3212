//! Storage abstraction for the ledger.
//!
//! The [`LedgerStore`] trait covers everything the ledger writer and the
//! application need to persist: immutable [`MetricEntry`] rows, resolved
//! emission factors (so the cache survives restarts), and the quota
//! window snapshot.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::factor::{EmissionFactor, FactorKey};
use crate::models::{MetricEntry, Scope};
use crate::quota::QuotaSnapshot;

/// Narrowing criteria for [`LedgerStore::query`].
///
/// Period bounds select entries whose whole period lies inside them. By
/// default rejected rows and rows that a later correction supersedes are
/// left out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryFilter {
    pub site_id: Option<String>,
    pub metric_catalog_id: Option<String>,
    pub scope: Option<Scope>,
    pub period_from: Option<NaiveDate>,
    pub period_to: Option<NaiveDate>,
    pub include_rejected: bool,
    pub include_superseded: bool,
}

impl EntryFilter {
    /// Entries whose period falls within `[from, to]`.
    pub fn period(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            period_from: Some(from),
            period_to: Some(to),
            ..Self::default()
        }
    }

    /// Row-level checks; supersession is resolved by the store.
    pub fn matches(&self, entry: &MetricEntry) -> bool {
        if !self.include_rejected && entry.is_rejected() {
            return false;
        }
        if let Some(site) = &self.site_id {
            if entry.site_id.as_deref() != Some(site.as_str()) {
                return false;
            }
        }
        if let Some(catalog) = &self.metric_catalog_id {
            if &entry.metric_catalog_id != catalog {
                return false;
            }
        }
        if let Some(scope) = self.scope {
            if entry.scope != scope {
                return false;
            }
        }
        if let Some(from) = self.period_from {
            if entry.period_start < from {
                return false;
            }
        }
        if let Some(to) = self.period_to {
            if entry.period_end > to {
                return false;
            }
        }
        true
    }
}

/// Append-only ledger backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert`](LedgerStore::insert) | Append an entry; fails on a duplicate id |
/// | [`get`](LedgerStore::get) | Fetch one entry by id |
/// | [`query`](LedgerStore::query) | Entries of one organization, filtered |
/// | [`find_by_activity_hash`](LedgerStore::find_by_activity_hash) | Idempotency lookup |
/// | [`save_factor`](LedgerStore::save_factor) | Persist a resolved factor |
/// | [`load_factors`](LedgerStore::load_factors) | All persisted factors, for cache warm-up |
/// | [`delete_factor`](LedgerStore::delete_factor) | Forget one persisted factor |
/// | [`save_quota`](LedgerStore::save_quota) | Merge local quota usage into the persisted window |
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert(&self, entry: &MetricEntry) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<MetricEntry>>;

    /// Ordered by `period_start`, then `created_at`.
    async fn query(&self, organization_id: &str, filter: &EntryFilter) -> Result<Vec<MetricEntry>>;

    /// An original (non-correction) entry recorded for this activity hash.
    async fn find_by_activity_hash(&self, activity_hash: &str) -> Result<Option<MetricEntry>>;

    /// Insert or replace the factor stored under its key.
    async fn save_factor(&self, factor: &EmissionFactor, resolved_at: DateTime<Utc>) -> Result<()>;

    async fn load_factors(&self) -> Result<Vec<(EmissionFactor, DateTime<Utc>)>>;

    async fn delete_factor(&self, key: &FactorKey) -> Result<bool>;

    async fn delete_all_factors(&self) -> Result<u64>;

    /// Fold one process's quota usage into the persisted window.
    ///
    /// `snapshot` is the local tracker state and `spent` the calls made
    /// since it was last saved or restored. While the stored window is still
    /// open at `now`, `spent` is added to the stored count, so processes
    /// sharing the store never overwrite each other's calls. A missing or
    /// elapsed stored window is replaced by `snapshot`. Returns the state
    /// now stored.
    async fn save_quota(
        &self,
        snapshot: &QuotaSnapshot,
        spent: u64,
        now: DateTime<Utc>,
    ) -> Result<QuotaSnapshot>;

    async fn load_quota(&self) -> Result<Option<QuotaSnapshot>>;
}
