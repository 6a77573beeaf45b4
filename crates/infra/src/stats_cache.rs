//! Cache-aside team statistics with TTL and per-team invalidation.
//!
//! Entries are keyed by `(team, resolved date span, filter signature)` and hold
//! an immutable `Arc<TeamStats>`; the same snapshot is handed to every reader
//! and replaced wholesale on recompute.
//!
//! A per-team epoch is bumped on every invalidation. A recomputation captures
//! the epoch before reading the store and only stores its result if the epoch
//! is unchanged, so a slow read that raced an approval never repopulates the
//! cache with pre-approval counts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use lotsync_core::{DomainError, TeamId};
use lotsync_events::{CallbackHandler, EntityType, HubError, MutationEvent, SubscriptionHandle, SyncHub};
use lotsync_inventory::{DateSpan, StatsFilter, StatsRange, TeamStats, aggregate_team};

use crate::store::{InventoryStore, ItemQuery, StoreError};

#[derive(Debug, Clone)]
pub struct StatsCacheConfig {
    pub ttl: Duration,
}

impl Default for StatsCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StatsError {
    #[error(transparent)]
    Validation(#[from] DomainError),

    /// Recompute failed; nothing stale was served.
    #[error("stats unavailable: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    team_id: TeamId,
    span: DateSpan,
    filter: String,
}

#[derive(Debug)]
struct CacheEntry {
    stats: Arc<TeamStats>,
    computed_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.computed_at.elapsed() < ttl
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<CacheKey, CacheEntry>,
    epochs: HashMap<TeamId, u64>,
}

#[derive(Debug, Default)]
struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    stale_discards: AtomicU64,
}

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    /// Recomputed results dropped because an invalidation raced them.
    pub stale_discards: u64,
    pub entries: usize,
}

impl CacheMetricsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

/// TTL-windowed, team-scoped statistics cache.
#[derive(Debug)]
pub struct StatsAggregationCache<S> {
    store: S,
    config: StatsCacheConfig,
    inner: RwLock<Inner>,
    metrics: CacheMetrics,
}

impl<S> StatsAggregationCache<S>
where
    S: InventoryStore,
{
    pub fn new(store: S, config: StatsCacheConfig) -> Self {
        Self {
            store,
            config,
            inner: RwLock::new(Inner::default()),
            metrics: CacheMetrics::default(),
        }
    }

    /// Cached stats for `team_id`, recomputed from one store read on miss or expiry.
    ///
    /// Fails closed: if the recompute fails, the error is returned and any
    /// expired entry for the key is evicted rather than served.
    pub fn get_team_stats(
        &self,
        team_id: TeamId,
        range: StatsRange,
        filter: &StatsFilter,
    ) -> Result<Arc<TeamStats>, StatsError> {
        let span = range.resolve(Utc::now().date_naive())?;
        let key = CacheKey {
            team_id,
            span,
            filter: filter.signature(),
        };

        let epoch = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = inner.entries.get(&key).filter(|e| e.is_fresh(self.config.ttl)) {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                debug!(team_id = %team_id, filter = %key.filter, "stats cache hit");
                return Ok(entry.stats.clone());
            }
            inner.epochs.get(&team_id).copied().unwrap_or(0)
        };

        self.metrics.misses.fetch_add(1, Ordering::Relaxed);
        debug!(team_id = %team_id, filter = %key.filter, "stats cache miss");

        let query = ItemQuery {
            team_id: Some(team_id),
            batch_id: filter.batch,
            assigned_to: filter.assigned_to,
            statuses: filter.statuses.iter().copied().collect(),
            ..ItemQuery::default()
        };
        let items = match self.store.query_items(&query) {
            Ok(items) => items,
            Err(err) => {
                warn!(team_id = %team_id, error = %err, "stats recompute failed");
                let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
                if inner
                    .entries
                    .get(&key)
                    .is_some_and(|e| !e.is_fresh(self.config.ttl))
                {
                    inner.entries.remove(&key);
                }
                return Err(err.into());
            }
        };

        let stats = Arc::new(aggregate_team(team_id, span, filter, &items, Utc::now()));

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.epochs.get(&team_id).copied().unwrap_or(0) == epoch {
            inner.entries.insert(
                key,
                CacheEntry {
                    stats: stats.clone(),
                    computed_at: Instant::now(),
                },
            );
        } else {
            self.metrics.stale_discards.fetch_add(1, Ordering::Relaxed);
            debug!(team_id = %team_id, "team invalidated during recompute; result not cached");
        }

        Ok(stats)
    }

    /// Drop every entry for `team_id`, whatever its range or filter.
    pub fn invalidate(&self, team_id: TeamId) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = inner.entries.len();
        inner.entries.retain(|k, _| k.team_id != team_id);
        *inner.epochs.entry(team_id).or_insert(0) += 1;
        let dropped = before - inner.entries.len();
        drop(inner);

        self.metrics.invalidations.fetch_add(1, Ordering::Relaxed);
        debug!(team_id = %team_id, dropped, "stats cache invalidated");
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        let entries = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len();
        CacheMetricsSnapshot {
            hits: self.metrics.hits.load(Ordering::Relaxed),
            misses: self.metrics.misses.load(Ordering::Relaxed),
            invalidations: self.metrics.invalidations.load(Ordering::Relaxed),
            stale_discards: self.metrics.stale_discards.load(Ordering::Relaxed),
            entries,
        }
    }
}

/// Scope-based invalidation seam, so writers need not know the store type.
pub trait StatsInvalidation: Send + Sync {
    fn invalidate_team(&self, team_id: TeamId);
}

impl<S> StatsInvalidation for StatsAggregationCache<S>
where
    S: InventoryStore,
{
    fn invalidate_team(&self, team_id: TeamId) {
        self.invalidate(team_id)
    }
}

impl<T> StatsInvalidation for Arc<T>
where
    T: StatsInvalidation + ?Sized,
{
    fn invalidate_team(&self, team_id: TeamId) {
        (**self).invalidate_team(team_id)
    }
}

/// Invalidates cached stats from `InventoryItem` mutations on the hub.
///
/// Covers writes that bypass the transfer workflow and, when a relay is
/// running, writes made by other instances.
#[derive(Debug)]
pub struct CacheInvalidator {
    handle: SubscriptionHandle,
}

impl CacheInvalidator {
    pub fn attach(hub: &SyncHub, cache: Arc<dyn StatsInvalidation>) -> Result<Self, HubError> {
        let handle = hub.subscribe(
            EntityType::InventoryItem,
            CallbackHandler::on_any(move |event| {
                for team in affected_teams(event) {
                    cache.invalidate_team(team);
                }
                Ok(())
            }),
        )?;
        Ok(Self { handle })
    }

    pub fn detach(self, hub: &SyncHub) {
        hub.unsubscribe(&self.handle);
    }
}

/// Teams whose stats an item mutation can change.
///
/// Updates that leave team, status, assignee and activation untouched affect
/// nobody.
fn affected_teams(event: &MutationEvent) -> Vec<TeamId> {
    const SCOPED: [&str; 4] = ["team_id", "status", "assigned_to", "activated_at"];

    let team_of = |row: &serde_json::Value| {
        row.get("team_id")
            .and_then(|v| serde_json::from_value::<TeamId>(v.clone()).ok())
    };

    let new_team = team_of(event.row());
    let old_team = event.old_row().and_then(team_of);

    if let Some(old) = event.old_row() {
        let unchanged = SCOPED.iter().all(|f| old.get(f) == event.row().get(f));
        if unchanged {
            return Vec::new();
        }
    }

    let mut teams: Vec<TeamId> = new_team.into_iter().chain(old_team).collect();
    teams.dedup();
    teams
}
