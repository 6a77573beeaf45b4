//! Infrastructure wiring: hub, store, stats cache, notifications and the
//! transfer manager, shared by every handler behind one `Arc`.

use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;
use tracing::{info, warn};

use lotsync_events::SyncHub;
use lotsync_infra::{
    ApproverRoster, CacheInvalidator, HubNotificationSink, InMemoryInventoryStore, InventoryStore,
    NotificationDispatcher, PostgresInventoryStore, StatsAggregationCache, TransferRequestManager,
};

#[cfg(feature = "redis")]
use lotsync_events::EntityType;
#[cfg(feature = "redis")]
use lotsync_infra::{HubRelay, event_bus::RedisPubSubBus};

use crate::config::AppConfig;

/// Store handle shared by the manager and the stats cache.
pub type SharedStore = Arc<dyn InventoryStore>;

pub struct AppServices {
    hub: Arc<SyncHub>,
    store: SharedStore,
    stats: Arc<StatsAggregationCache<SharedStore>>,
    transfers: TransferRequestManager<SharedStore>,
    invalidator: Option<CacheInvalidator>,
    #[cfg(feature = "redis")]
    relay: Option<HubRelay>,
}

impl core::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppServices")
            .field("instance_id", &self.hub.instance_id())
            .field("transfers", &self.transfers)
            .finish_non_exhaustive()
    }
}

/// Build services from configuration: Postgres when `DATABASE_URL` is set,
/// in-memory otherwise.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let hub = Arc::new(SyncHub::for_instance(config.instance_id.clone()));

    let store: SharedStore = match &config.database_url {
        Some(url) => {
            let pool = PgPool::connect(url).await.context("failed to connect to Postgres")?;
            let store = PostgresInventoryStore::new(pool, config.transfer.approve_timeout).with_sink(hub.clone());
            store.ensure_schema().await.context("failed to prepare the database schema")?;
            info!("using Postgres inventory store");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory inventory store");
            Arc::new(InMemoryInventoryStore::new().with_sink(hub.clone()))
        }
    };

    AppServices::assemble(config, hub, store)
}

impl AppServices {
    /// Wire everything around an existing hub and store.
    ///
    /// The store must already publish its committed changes to `hub`.
    pub fn assemble(config: &AppConfig, hub: Arc<SyncHub>, store: SharedStore) -> anyhow::Result<Self> {
        let stats = Arc::new(StatsAggregationCache::new(store.clone(), config.stats.clone()));
        let invalidator =
            CacheInvalidator::attach(&hub, stats.clone()).context("failed to attach stats invalidator")?;

        let notifier = Arc::new(NotificationDispatcher::new(Arc::new(HubNotificationSink::new(
            hub.clone(),
        ))));
        let mut transfers = TransferRequestManager::new(store.clone(), config.transfer.clone())
            .with_stats(stats.clone())
            .with_notifier(notifier);
        let roster: ApproverRoster = config.approvers.iter().copied().collect();
        if !roster.is_empty() {
            info!(approvers = config.approvers.len(), "approver roster enabled");
            transfers = transfers.with_policy(Arc::new(roster));
        }

        #[cfg(feature = "redis")]
        let relay = match &config.redis {
            Some(redis) => {
                let bus = Arc::new(
                    RedisPubSubBus::new(&redis.url, redis.channel.clone()).context("invalid REDIS_URL")?,
                );
                let relay = HubRelay::start(hub.clone(), bus, &EntityType::ALL).context("failed to start hub relay")?;
                info!(channel = %redis.channel, "cross-instance relay enabled");
                Some(relay)
            }
            None => None,
        };
        #[cfg(not(feature = "redis"))]
        if config.redis.is_some() {
            warn!("REDIS_URL is set but the redis feature is disabled; relay not started");
        }

        Ok(Self {
            hub,
            store,
            stats,
            transfers,
            invalidator: Some(invalidator),
            #[cfg(feature = "redis")]
            relay,
        })
    }

    pub fn hub(&self) -> &Arc<SyncHub> {
        &self.hub
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn stats(&self) -> &StatsAggregationCache<SharedStore> {
        &self.stats
    }

    pub fn transfers(&self) -> &TransferRequestManager<SharedStore> {
        &self.transfers
    }
}

impl Drop for AppServices {
    fn drop(&mut self) {
        if let Some(invalidator) = self.invalidator.take() {
            invalidator.detach(&self.hub);
        }
        #[cfg(feature = "redis")]
        if let Some(relay) = self.relay.take() {
            relay.shutdown();
        }
    }
}
