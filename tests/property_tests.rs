//! Property-based tests for fieldsync
//!
//! These tests verify invariants that must hold for all inputs:
//! - The staging store hands records back in staging order
//! - Marking is final and only ever affects the marked row
//! - A sync pass leaves one remote row per distinct log
//!
//! Run with: cargo test --test property_tests

use proptest::prelude::*;

// ============================================================================
// STAGING STORE TESTS
// ============================================================================

mod staging_tests {
    use super::*;
    use fieldsync::{EmergencyPayload, EntityKind, StagingStore};

    fn emergency(i: usize) -> EmergencyPayload {
        EmergencyPayload {
            time_alert: format!("t{}", i),
            arrival_time: None,
            localization_id: None,
            date: None,
            received: false,
        }
    }

    proptest! {
        /// Invariant: pending records come back in the order they were staged
        #[test]
        fn pending_order_is_staging_order(n in 1usize..40) {
            let store = StagingStore::open_in_memory().unwrap();
            let ids: Vec<_> = (0..n).map(|i| store.stage(&emergency(i)).unwrap()).collect();

            let pending = store.list_pending::<EmergencyPayload>().unwrap();
            let listed: Vec<_> = pending.iter().map(|r| r.local_id).collect();
            prop_assert_eq!(&listed, &ids);

            let alerts: Vec<_> = pending.iter().map(|r| r.payload.time_alert.clone()).collect();
            let expected: Vec<_> = (0..n).map(|i| format!("t{}", i)).collect();
            prop_assert_eq!(alerts, expected);
        }

        /// Invariant: marked rows leave the pending set, the rest stay in order
        #[test]
        fn marking_removes_exactly_the_marked_rows(
            marks in proptest::collection::vec(any::<bool>(), 1..30)
        ) {
            let store = StagingStore::open_in_memory().unwrap();
            let ids: Vec<_> = (0..marks.len())
                .map(|i| store.stage(&emergency(i)).unwrap())
                .collect();

            for (id, mark) in ids.iter().zip(&marks) {
                if *mark {
                    let synced = store
                        .mark_synced(EntityKind::Emergency, *id, &format!("srv-{}", id))
                        .unwrap();
                    prop_assert!(synced);
                }
            }

            let remaining: Vec<_> = ids
                .iter()
                .zip(&marks)
                .filter(|(_, mark)| !**mark)
                .map(|(id, _)| *id)
                .collect();
            let pending: Vec<_> = store
                .pending_rows(EntityKind::Emergency)
                .unwrap()
                .into_iter()
                .map(|r| r.local_id)
                .collect();

            prop_assert_eq!(&pending, &remaining);
            prop_assert_eq!(store.pending_count(EntityKind::Emergency).unwrap(), remaining.len());
        }

        /// Invariant: a second mark never replaces the stored server id
        #[test]
        fn server_id_is_write_once(first in "[a-z0-9]{1,12}", second in "[a-z0-9]{1,12}") {
            let store = StagingStore::open_in_memory().unwrap();
            let id = store.stage(&emergency(0)).unwrap();

            prop_assert!(store.mark_synced(EntityKind::Emergency, id, &first).unwrap());
            prop_assert!(!store.mark_synced(EntityKind::Emergency, id, &second).unwrap());

            let row = store.get(EntityKind::Emergency, id).unwrap().unwrap();
            prop_assert!(row.synced);
            prop_assert_eq!(row.server_id, Some(first));
        }
    }
}

// ============================================================================
// SYNC PASS TESTS
// ============================================================================

mod sync_tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    use fieldsync::{
        ConnectivityMonitor, EntityKind, InMemoryRemote, LogPayload, ManualProbe, StagingStore,
        SyncConfig, SyncOrchestrator,
    };

    fn arb_log() -> impl Strategy<Value = LogPayload> {
        (
            prop::sample::select(vec!["u1", "u2"]),
            prop::sample::select(vec!["2025-01-01", "2025-01-02"]),
            prop::option::of(prop::sample::select(vec!["08:00", "09:00"])),
        )
            .prop_map(|(user, date, ingress)| LogPayload {
                user_id: user.to_string(),
                name: "Worker".to_string(),
                log_date: date.to_string(),
                ingress_time: ingress.map(str::to_string),
                exit_time: None,
                description: None,
                image: None,
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Invariant: one pass drains all logs and creates one row per natural key
        #[test]
        fn pass_creates_one_row_per_natural_key(
            logs in proptest::collection::vec(arb_log(), 0..12)
        ) {
            let staging = StagingStore::open_in_memory().unwrap();
            let remote = Arc::new(InMemoryRemote::new());
            let monitor = ConnectivityMonitor::new(Arc::new(ManualProbe::new(true)));
            let orchestrator = SyncOrchestrator::new(
                staging.clone(),
                remote.clone(),
                monitor,
                SyncConfig {
                    record_delay_ms: 0,
                    ..SyncConfig::default()
                },
            )
            .unwrap();

            for log in &logs {
                staging.stage(log).unwrap();
            }

            let outcome = tokio_test::block_on(orchestrator.trigger_sync());
            let stats = outcome.stats().cloned().unwrap();

            let distinct: HashSet<_> = logs
                .iter()
                .map(|l| (l.user_id.clone(), l.log_date.clone(), l.ingress_time.clone()))
                .collect();

            prop_assert_eq!(remote.rows(EntityKind::Log).len(), distinct.len());
            prop_assert_eq!(stats.logs_sync.success as usize, logs.len());
            prop_assert_eq!(staging.pending_count(EntityKind::Log).unwrap(), 0);
        }
    }
}
