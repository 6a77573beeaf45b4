//! Integration tests for the transfer and sync pipeline.
//!
//! Tests: TransferRequestManager → InventoryStore → SyncHub → subscribers,
//! with the stats cache and notification dispatcher attached.
//!
//! Verifies:
//! - Single ownership under concurrent create/approve
//! - Approve is all-or-nothing, including on ownership drift
//! - Reservations are released by every terminal transition
//! - Cached stats reflect an approval immediately
//! - Hub subscribers converge on store state

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    use chrono::Utc;

    use lotsync_core::{BatchId, TeamId, UserId};
    use lotsync_events::{Admission, EntityType, LiveCollection, SyncHub};
    use lotsync_inventory::{InventoryItem, ItemId, StatsFilter, StatsRange, TransferStatus};

    use crate::notify::{HubNotificationSink, InMemoryNotificationSink, NotificationDispatcher, TransferOutcome};
    use crate::stats_cache::{CacheInvalidator, StatsAggregationCache, StatsCacheConfig};
    use crate::store::{InMemoryInventoryStore, InventoryStore, ItemQuery, TransferQuery};
    use crate::transfer::{NewTransfer, TransferConfig, TransferError, TransferRequestManager};

    type Store = Arc<InMemoryInventoryStore>;

    struct Pipeline {
        hub: Arc<SyncHub>,
        store: Store,
        cache: Arc<StatsAggregationCache<Store>>,
        notifications: Arc<InMemoryNotificationSink>,
        manager: TransferRequestManager<Store>,
    }

    fn serial(s: &str) -> ItemId {
        ItemId::parse(s).unwrap()
    }

    fn serials(names: &[&str]) -> Vec<ItemId> {
        names.iter().map(|s| serial(s)).collect()
    }

    fn setup() -> Pipeline {
        let hub = Arc::new(SyncHub::new());
        let store: Store = Arc::new(InMemoryInventoryStore::new().with_sink(hub.clone()));
        let cache = Arc::new(StatsAggregationCache::new(
            store.clone(),
            StatsCacheConfig {
                ttl: Duration::from_secs(3600),
            },
        ));
        let notifications = Arc::new(InMemoryNotificationSink::new());
        let manager = TransferRequestManager::new(store.clone(), TransferConfig::default())
            .with_stats(cache.clone())
            .with_notifier(Arc::new(NotificationDispatcher::new(notifications.clone())));

        Pipeline {
            hub,
            store,
            cache,
            notifications,
            manager,
        }
    }

    fn seed(store: &Store, team: TeamId, names: &[&str]) {
        let batch = BatchId::new();
        store
            .upsert_items(
                names
                    .iter()
                    .map(|s| InventoryItem::new(serial(s), team, batch, Utc::now()))
                    .collect(),
            )
            .unwrap();
    }

    fn owned_by(store: &Store, team: TeamId) -> BTreeSet<String> {
        store
            .query_items(&ItemQuery::team(team))
            .unwrap()
            .into_iter()
            .map(|i| i.id.to_string())
            .collect()
    }

    fn request(source: TeamId, dest: TeamId, requester: UserId, names: &[&str]) -> NewTransfer {
        NewTransfer {
            source_team: source,
            dest_team: dest,
            item_ids: serials(names),
            requester_id: requester,
            reason: None,
        }
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn create_then_approve_moves_every_item() {
        let p = setup();
        let (a, b) = (TeamId::new(), TeamId::new());
        seed(&p.store, a, &["s1", "s2", "s3"]);
        let requester = UserId::new();

        let req = p.manager.create(request(a, b, requester, &["s1", "s2"])).unwrap();
        assert_eq!(req.status(), TransferStatus::Pending);

        let approved = p.manager.approve(req.id_typed(), UserId::new()).unwrap();

        assert_eq!(approved.status(), TransferStatus::Approved);
        assert_eq!(owned_by(&p.store, b), set(&["s1", "s2"]));
        assert_eq!(owned_by(&p.store, a), set(&["s3"]));
        assert_eq!(p.manager.ledger().holder(&serial("s1")).unwrap(), None);

        let told = p.notifications.for_recipient(requester);
        assert_eq!(told.len(), 1);
        assert_eq!(told[0].outcome, TransferOutcome::Approved);
    }

    #[test]
    fn concurrent_overlapping_creates_have_one_winner() {
        let p = Arc::new(setup());
        let (a, b, c) = (TeamId::new(), TeamId::new(), TeamId::new());
        seed(&p.store, a, &["s1", "s2", "s3"]);
        let barrier = Arc::new(Barrier::new(2));

        let spawn = |dest: TeamId, names: &'static [&'static str]| {
            let p = p.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                p.manager.create(request(a, dest, UserId::new(), names))
            })
        };
        let first = spawn(b, &["s1", "s2"]);
        let second = spawn(c, &["s2", "s3"]);
        let results = [first.join().unwrap(), second.join().unwrap()];

        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        let winner = winners[0].id_typed();

        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert_eq!(
            loser,
            &TransferError::ReservationConflict {
                item: serial("s2"),
                holder: winner
            }
        );

        // The loser reserved nothing, not even its uncontested item.
        let loser_only = if winners[0].item_ids().contains(&serial("s1")) { "s3" } else { "s1" };
        assert_eq!(p.manager.ledger().holder(&serial(loser_only)).unwrap(), None);
    }

    #[test]
    fn overlapping_creates_in_reversed_item_order_conflict_cleanly() {
        for _ in 0..20 {
            let p = Arc::new(setup());
            let (a, b, c) = (TeamId::new(), TeamId::new(), TeamId::new());
            seed(&p.store, a, &["s1", "s2"]);
            let barrier = Arc::new(Barrier::new(2));

            let spawn = |dest: TeamId, names: &'static [&'static str]| {
                let p = p.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    p.manager.create(request(a, dest, UserId::new(), names))
                })
            };
            let forward = spawn(b, &["s1", "s2"]);
            let reversed = spawn(c, &["s2", "s1"]);
            let results = [forward.join().unwrap(), reversed.join().unwrap()];

            let winner = results.iter().find_map(|r| r.as_ref().ok()).unwrap().id_typed();
            let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
            // Claims are taken in sorted order, so the first contested item is s1.
            assert_eq!(
                loser,
                &TransferError::ReservationConflict {
                    item: serial("s1"),
                    holder: winner
                }
            );

            // No request row exists without its claims.
            let rows = p.store.list_transfers(&TransferQuery::default()).unwrap();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].id_typed(), winner);
            assert_eq!(p.manager.ledger().holder(&serial("s2")).unwrap(), Some(winner));
        }
    }

    #[test]
    fn reject_keeps_ownership_and_frees_items() {
        let p = setup();
        let (a, b) = (TeamId::new(), TeamId::new());
        seed(&p.store, a, &["s1", "s2"]);
        let requester = UserId::new();
        let req = p.manager.create(request(a, b, requester, &["s1", "s2"])).unwrap();

        let rejected = p
            .manager
            .reject(req.id_typed(), UserId::new(), Some("wrong team".into()))
            .unwrap();

        assert_eq!(rejected.status(), TransferStatus::Rejected);
        assert_eq!(rejected.decision_note(), Some("wrong team"));
        assert_eq!(owned_by(&p.store, a), set(&["s1", "s2"]));
        assert!(owned_by(&p.store, b).is_empty());

        let again = p.manager.create(request(a, b, requester, &["s1"])).unwrap();
        assert_eq!(again.status(), TransferStatus::Pending);
        assert_eq!(
            p.notifications.for_recipient(requester)[0].outcome,
            TransferOutcome::Rejected
        );
    }

    #[test]
    fn cancel_by_someone_else_is_forbidden() {
        let p = setup();
        let (a, b) = (TeamId::new(), TeamId::new());
        seed(&p.store, a, &["s1", "s2"]);
        let req = p.manager.create(request(a, b, UserId::new(), &["s1", "s2"])).unwrap();

        let err = p.manager.cancel(req.id_typed(), UserId::new()).unwrap_err();

        assert!(matches!(err, TransferError::Forbidden(_)));
        assert_eq!(p.manager.get(req.id_typed()).unwrap().status(), TransferStatus::Pending);
        assert_eq!(p.manager.ledger().holder(&serial("s1")).unwrap(), Some(req.id_typed()));
    }

    #[test]
    fn ownership_drift_turns_approval_into_conflict() {
        let p = setup();
        let (a, b, c) = (TeamId::new(), TeamId::new(), TeamId::new());
        seed(&p.store, a, &["s1", "s2"]);
        let requester = UserId::new();
        let req = p.manager.create(request(a, b, requester, &["s1", "s2"])).unwrap();

        // Moved by a process that ignores reservations.
        let s2 = p.store.query_items(&ItemQuery::ids([serial("s2")])).unwrap().remove(0);
        p.store.upsert_items(vec![s2.moved_to(c, Utc::now())]).unwrap();

        let err = p.manager.approve(req.id_typed(), UserId::new()).unwrap_err();

        assert_eq!(
            err,
            TransferError::OwnershipConflict {
                item: serial("s2"),
                expected: a,
                actual: Some(c),
            }
        );
        let stored = p.manager.get(req.id_typed()).unwrap();
        assert_eq!(stored.status(), TransferStatus::Conflict);
        assert!(stored.decision_note().is_some_and(|n| n.contains("s2")));
        assert_eq!(owned_by(&p.store, a), set(&["s1"]));
        assert!(owned_by(&p.store, b).is_empty());
        assert_eq!(p.manager.ledger().holder(&serial("s1")).unwrap(), None);
        assert_eq!(
            p.notifications.for_recipient(requester)[0].outcome,
            TransferOutcome::Conflict
        );

        // Terminal: a second approve reports the state instead of retrying.
        assert_eq!(
            p.manager.approve(req.id_typed(), UserId::new()).unwrap_err(),
            TransferError::AlreadyDecided {
                id: req.id_typed(),
                status: TransferStatus::Conflict
            }
        );
    }

    #[test]
    fn approval_is_visible_in_cached_stats_immediately() {
        let p = setup();
        let (a, b) = (TeamId::new(), TeamId::new());
        seed(&p.store, a, &["s1", "s2", "s3"]);
        let filter = StatsFilter::default();

        assert_eq!(p.cache.get_team_stats(a, StatsRange::Today, &filter).unwrap().counts.total, 3);
        assert_eq!(p.cache.get_team_stats(b, StatsRange::Last7Days, &filter).unwrap().counts.total, 0);

        let req = p.manager.create(request(a, b, UserId::new(), &["s1", "s2"])).unwrap();
        p.manager.approve(req.id_typed(), UserId::new()).unwrap();

        assert_eq!(p.cache.get_team_stats(a, StatsRange::Today, &filter).unwrap().counts.total, 1);
        assert_eq!(p.cache.get_team_stats(b, StatsRange::Last7Days, &filter).unwrap().counts.total, 2);
        assert!(p.cache.metrics().invalidations >= 2);
    }

    #[test]
    fn invalidator_covers_writes_outside_the_transfer_path() {
        let p = setup();
        let _invalidator = CacheInvalidator::attach(&p.hub, p.cache.clone()).unwrap();
        let a = TeamId::new();
        seed(&p.store, a, &["s1"]);
        let filter = StatsFilter::default();
        assert_eq!(p.cache.get_team_stats(a, StatsRange::Today, &filter).unwrap().counts.assigned, 0);

        let s1 = p.store.query_items(&ItemQuery::ids([serial("s1")])).unwrap().remove(0);
        p.store.upsert_items(vec![s1.assign(UserId::new())]).unwrap();

        let mut assigned = 0;
        for _ in 0..200 {
            assigned = p.cache.get_team_stats(a, StatsRange::Today, &filter).unwrap().counts.assigned;
            if assigned == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(assigned, 1);
    }

    #[test]
    fn hub_replica_converges_on_store_state() {
        let p = setup();
        let stream = p.hub.subscribe_stream(EntityType::InventoryItem);
        let (a, b) = (TeamId::new(), TeamId::new());
        seed(&p.store, a, &["s1", "s2", "s3"]);

        let req = p.manager.create(request(a, b, UserId::new(), &["s1", "s3"])).unwrap();
        p.manager.approve(req.id_typed(), UserId::new()).unwrap();

        let mut replica: LiveCollection<InventoryItem> = LiveCollection::new(EntityType::InventoryItem);
        let events = stream.drain();
        assert_eq!(events.len(), 5);
        for event in &events {
            assert_eq!(replica.apply(event).unwrap(), Admission::Apply);
        }
        // At-least-once redelivery is harmless.
        for event in &events {
            assert_eq!(replica.apply(event).unwrap(), Admission::Duplicate);
        }

        let by_team: HashMap<String, TeamId> = replica.iter().map(|(id, row)| (id.to_string(), row.team_id)).collect();
        for item in p.store.query_items(&ItemQuery::default()).unwrap() {
            assert_eq!(by_team[item.id.as_str()], item.team_id);
        }
        assert_eq!(by_team["s1"], b);
        assert_eq!(by_team["s2"], a);
    }

    #[test]
    fn requester_dashboard_receives_notification_rows() {
        let hub = Arc::new(SyncHub::new());
        let store: Store = Arc::new(InMemoryInventoryStore::new().with_sink(hub.clone()));
        let inbox = hub.subscribe_stream(EntityType::Notification);
        let manager = TransferRequestManager::new(store.clone(), TransferConfig::default())
            .with_notifier(Arc::new(NotificationDispatcher::new(Arc::new(HubNotificationSink::new(hub.clone())))));
        let (a, b) = (TeamId::new(), TeamId::new());
        seed(&store, a, &["s1"]);
        let requester = UserId::new();

        let req = manager.create(request(a, b, requester, &["s1"])).unwrap();
        manager.approve(req.id_typed(), UserId::new()).unwrap();

        let event = inbox.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(event.row()["transfer_id"], serde_json::json!(req.id_typed()));
        assert_eq!(event.row()["outcome"], "APPROVED");
    }

    #[test]
    fn disjoint_transfers_proceed_in_parallel() {
        let p = Arc::new(setup());
        let (a, b) = (TeamId::new(), TeamId::new());
        let names: Vec<String> = (0..16).map(|i| format!("d{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        seed(&p.store, a, &refs);

        let handles: Vec<_> = names
            .chunks(2)
            .map(|pair| {
                let p = p.clone();
                let ids: Vec<ItemId> = pair.iter().map(|s| serial(s)).collect();
                thread::spawn(move || {
                    let req = p
                        .manager
                        .create(NewTransfer {
                            source_team: a,
                            dest_team: b,
                            item_ids: ids,
                            requester_id: UserId::new(),
                            reason: None,
                        })
                        .unwrap();
                    p.manager.approve(req.id_typed(), UserId::new()).unwrap()
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap().status(), TransferStatus::Approved);
        }

        assert_eq!(owned_by(&p.store, b).len(), 16);
        assert!(owned_by(&p.store, a).is_empty());
    }

    #[test]
    fn concurrently_approved_transfers_never_share_items() {
        let p = Arc::new(setup());
        let (a, b) = (TeamId::new(), TeamId::new());
        let names: Vec<String> = (0..6).map(|i| format!("c{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        seed(&p.store, a, &refs);

        // Overlapping windows of three consecutive items.
        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|start| {
                let p = p.clone();
                let barrier = barrier.clone();
                let ids: Vec<ItemId> = (start..start + 3).map(|i| serial(&format!("c{i}"))).collect();
                thread::spawn(move || {
                    barrier.wait();
                    let req = p.manager.create(NewTransfer {
                        source_team: a,
                        dest_team: b,
                        item_ids: ids,
                        requester_id: UserId::new(),
                        reason: None,
                    })?;
                    p.manager.approve(req.id_typed(), UserId::new())
                })
            })
            .collect();

        let approved: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap().ok())
            .filter(|r| r.status() == TransferStatus::Approved)
            .collect();
        assert!(!approved.is_empty());

        let mut seen = BTreeSet::new();
        for req in &approved {
            for item in req.item_ids() {
                assert!(seen.insert(item.clone()), "item {item} approved twice");
            }
        }
        let moved: BTreeSet<String> = seen.iter().map(ItemId::to_string).collect();
        assert_eq!(owned_by(&p.store, b), moved);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig { cases: 32, ..ProptestConfig::default() })]

            #[test]
            fn round_trip_moves_exactly_the_requested_items(mask in 1u16..(1 << 10)) {
                let p = setup();
                let (a, b) = (TeamId::new(), TeamId::new());
                let all: Vec<String> = (0..10).map(|i| format!("r{i}")).collect();
                let refs: Vec<&str> = all.iter().map(String::as_str).collect();
                seed(&p.store, a, &refs);
                let chosen: Vec<&str> = refs.iter().enumerate().filter(|(i, _)| mask & (1 << i) != 0).map(|(_, s)| *s).collect();

                let req = p.manager.create(request(a, b, UserId::new(), &chosen)).unwrap();
                p.manager.approve(req.id_typed(), UserId::new()).unwrap();

                let rest: Vec<&str> = refs.iter().copied().filter(|s| !chosen.contains(s)).collect();
                prop_assert_eq!(owned_by(&p.store, b), set(&chosen));
                prop_assert_eq!(owned_by(&p.store, a), set(&rest));
            }

            #[test]
            fn released_items_are_reservable_again(reject in any::<bool>()) {
                let p = setup();
                let (a, b) = (TeamId::new(), TeamId::new());
                seed(&p.store, a, &["x1", "x2"]);
                let requester = UserId::new();
                let req = p.manager.create(request(a, b, requester, &["x1", "x2"])).unwrap();
                if reject {
                    p.manager.reject(req.id_typed(), UserId::new(), None).unwrap();
                } else {
                    p.manager.cancel(req.id_typed(), requester).unwrap();
                }

                let next = p.manager.create(request(a, b, requester, &["x2"])).unwrap();
                prop_assert_eq!(p.manager.ledger().holder(&serial("x2")).unwrap(), Some(next.id_typed()));
                prop_assert_ne!(next.id_typed(), req.id_typed());
            }
        }
    }
}
