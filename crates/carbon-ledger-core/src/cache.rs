//! In-process emission-factor cache with single-flight miss handling.
//!
//! Factors are annual reference data, so entries never expire on their
//! own; [`FactorCache::invalidate`] is the only way one leaves the cache.
//!
//! Reads go straight to a sharded concurrent map. On a miss,
//! [`FactorCache::get_or_fetch`] makes sure that concurrent callers for the
//! same key share one upstream fetch: the first caller installs a shared
//! future in the in-flight table, later callers clone and await it. The
//! shared future itself populates the cache and clears its in-flight slot
//! when it completes, so bookkeeping happens exactly once no matter which
//! waiter drives it to completion. Failed fetches are never cached.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::FetchError;
use crate::factor::{EmissionFactor, FactorKey};

type SharedFetch = Shared<BoxFuture<'static, Result<EmissionFactor, FetchError>>>;

/// A cached factor plus bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub factor: EmissionFactor,
    pub resolved_at: DateTime<Utc>,
    pub hit_count: u64,
}

/// How a [`FactorCache::get_or_fetch`] call was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Served from the cache.
    Hit,
    /// This caller started the upstream fetch.
    Fetched,
    /// This caller joined a fetch already in flight.
    Joined,
}

#[derive(Default)]
pub struct FactorCache {
    entries: DashMap<FactorKey, CacheEntry>,
    in_flight: Mutex<HashMap<FactorKey, SharedFetch>>,
}

impl FactorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a factor, counting a hit when found.
    pub fn get(&self, key: &FactorKey) -> Option<EmissionFactor> {
        self.entries.get_mut(key).map(|mut entry| {
            entry.hit_count += 1;
            entry.factor.clone()
        })
    }

    /// Look up an entry without counting a hit.
    pub fn peek(&self, key: &FactorKey) -> Option<CacheEntry> {
        self.entries.get(key).map(|entry| entry.clone())
    }

    pub fn put(&self, key: FactorKey, factor: EmissionFactor) {
        self.entries.insert(
            key,
            CacheEntry {
                factor,
                resolved_at: Utc::now(),
                hit_count: 0,
            },
        );
    }

    /// Load previously resolved factors, e.g. from persistent storage.
    pub fn warm<I>(&self, factors: I) -> usize
    where
        I: IntoIterator<Item = EmissionFactor>,
    {
        let mut loaded = 0;
        for factor in factors {
            self.put(factor.key.clone(), factor);
            loaded += 1;
        }
        debug!(loaded, "factor cache warmed");
        loaded
    }

    /// Drop one entry. Returns whether it was present.
    pub fn invalidate(&self, key: &FactorKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of every cached entry, ordered by key.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let mut all: Vec<CacheEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.factor.key.cmp(&b.factor.key));
        all
    }

    /// Number of keys with a fetch currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Return the cached factor for `key`, or resolve it with `fetch`,
    /// coalescing concurrent misses for the same key into one call.
    ///
    /// `fetch` is invoked at most once per in-flight window; callers that
    /// join an existing fetch drop their own closure unused. Every waiter
    /// receives the same outcome, including errors and timeouts.
    pub async fn get_or_fetch<F, Fut>(
        self: &Arc<Self>,
        key: &FactorKey,
        fetch: F,
    ) -> Result<(EmissionFactor, Lookup), FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<EmissionFactor, FetchError>> + Send + 'static,
    {
        if let Some(factor) = self.get(key) {
            return Ok((factor, Lookup::Hit));
        }

        let (shared, lookup) = {
            let mut in_flight = self.in_flight.lock();
            // A fetch may have completed between the miss above and taking the lock.
            if let Some(factor) = self.get(key) {
                return Ok((factor, Lookup::Hit));
            }
            match in_flight.get(key) {
                Some(existing) => {
                    debug!(key = %key, "joining in-flight factor fetch");
                    (existing.clone(), Lookup::Joined)
                }
                None => {
                    debug!(key = %key, "factor cache miss; fetching");
                    let cache = Arc::clone(self);
                    let owned_key = key.clone();
                    let upstream = fetch();
                    let task = async move {
                        let result = upstream.await;
                        if let Ok(factor) = &result {
                            cache.put(owned_key.clone(), factor.clone());
                        }
                        cache.in_flight.lock().remove(&owned_key);
                        result
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(key.clone(), task.clone());
                    (task, Lookup::Fetched)
                }
            }
        };

        shared.await.map(|factor| (factor, lookup))
    }
}
