//! Property-based tests for soulsnaps
//!
//! These tests verify invariants that must hold for all inputs:
//! - Wildcard scopes grant exactly their namespace
//! - Quota is consumed only by allowed calls
//! - Pulls never clobber unsynced local edits
//! - State machines stay in bounds
//!
//! Run with: cargo test --test property_tests

use proptest::prelude::*;

// ============================================================================
// SCOPE MATCHING TESTS
// ============================================================================

mod scope_tests {
    use super::*;
    use soulsnaps::access::scope_matches;

    proptest! {
        /// Invariant: `prefix.*` grants every action under the prefix
        #[test]
        fn wildcard_grants_namespace(suffix in "[a-z_.]{1,20}") {
            let action = format!("memory.{}", suffix);
            prop_assert!(scope_matches("memory.*", &action));
        }

        /// Invariant: `prefix.*` never grants another namespace
        #[test]
        fn wildcard_stays_in_namespace(ns in "[a-z]{1,10}", suffix in "[a-z]{1,10}") {
            prop_assume!(ns != "memory");
            let action = format!("{}.{}", ns, suffix);
            prop_assert!(!scope_matches("memory.*", &action));
        }

        /// Invariant: the global wildcard grants anything
        #[test]
        fn star_grants_all(action in "\\PC{0,40}") {
            prop_assert!(scope_matches("*", &action));
        }

        /// Invariant: a plain scope only matches itself
        #[test]
        fn exact_scope(a in "[a-z]{1,8}\\.[a-z]{1,8}", b in "[a-z]{1,8}\\.[a-z]{1,8}") {
            prop_assert_eq!(scope_matches(&a, &b), a == b);
        }
    }
}

// ============================================================================
// QUOTA TESTS
// ============================================================================

mod quota_tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use soulsnaps::access::{
        actions, quota_keys, AccessGuard, DenyReason, FeatureToggles, PlanCatalog, PlanType,
    };
    use soulsnaps::clock::ManualClock;
    use soulsnaps::storage::MemoryKeyValueStore;

    fn guard() -> AccessGuard {
        AccessGuard::new(
            Arc::new(PlanCatalog::standard()),
            Arc::new(MemoryKeyValueStore::new()),
            Arc::new(FeatureToggles::new()),
            Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap(),
            )),
        )
    }

    proptest! {
        /// Invariant: counters never exceed the limit, and denials consume nothing
        #[test]
        fn consumed_only_when_allowed(
            calls in prop::collection::vec(any::<bool>(), 0..25),
        ) {
            let guard = guard();
            guard.change_plan("u1", PlanType::Free).unwrap();
            let mut allowed = 0u64;

            // true = metered capture, false = action outside the plan
            for metered in calls {
                let result = if metered {
                    guard.allow_action(
                        "u1",
                        actions::MEMORY_CREATE,
                        Some(quota_keys::MEMORIES_DAILY),
                        None,
                    ).unwrap()
                } else {
                    guard.allow_action(
                        "u1",
                        actions::TEAM_MANAGE,
                        Some(quota_keys::MEMORIES_DAILY),
                        None,
                    ).unwrap()
                };
                if result.allowed {
                    allowed += 1;
                } else if !metered {
                    prop_assert_eq!(result.reason, Some(DenyReason::MissingScope));
                }
            }

            let info = guard
                .quota_info("u1", quota_keys::MEMORIES_DAILY)
                .unwrap()
                .unwrap();
            prop_assert_eq!(info.used, allowed);
            prop_assert!(info.used <= 10);
        }

        /// Invariant: a dry-run check never changes the counter
        #[test]
        fn dry_run_is_pure(n in 0usize..10) {
            let guard = guard();
            for _ in 0..n {
                guard.can_perform_action(
                    "u1",
                    actions::MEMORY_CREATE,
                    Some(quota_keys::MEMORIES_DAILY),
                    None,
                ).unwrap();
            }
            let info = guard
                .quota_info("u1", quota_keys::MEMORIES_DAILY)
                .unwrap()
                .unwrap();
            prop_assert_eq!(info.used, 0);
        }
    }
}

// ============================================================================
// MERGE TESTS
// ============================================================================

mod merge_tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use soulsnaps::sync::{decide, MergeDecision, RemoteMemory};
    use soulsnaps::types::{Memory, Mood, SyncState};

    fn state() -> impl Strategy<Value = SyncState> {
        prop_oneof![
            Just(SyncState::Pending),
            Just(SyncState::Syncing),
            Just(SyncState::Synced),
            Just(SyncState::Failed),
        ]
    }

    fn local(sync_state: SyncState, minutes: i64) -> Memory {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        Memory {
            id: 1,
            owner_id: "u1".into(),
            title: "Local".into(),
            description: String::new(),
            created_at: base,
            updated_at: base + Duration::minutes(minutes),
            mood: Mood::Neutral,
            photo_uri: None,
            audio_uri: None,
            location: None,
            is_favorite: false,
            media_size_bytes: 0,
            sync_state,
            retry_count: 0,
            remote_id: Some("r1".into()),
            remote_photo_path: None,
            remote_audio_path: None,
            last_sync_error: None,
            synced_at: None,
        }
    }

    fn remote(minutes: i64) -> RemoteMemory {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        RemoteMemory {
            id: "r1".into(),
            user_id: "u1".into(),
            title: "Remote".into(),
            description: String::new(),
            mood: Mood::Neutral,
            photo_path: None,
            audio_path: None,
            latitude: None,
            longitude: None,
            location_name: None,
            is_favorite: false,
            media_size_bytes: 0,
            created_at: base,
            updated_at: base + Duration::minutes(minutes),
        }
    }

    proptest! {
        /// Invariant: only a synced local row that is strictly older is overwritten
        #[test]
        fn overwrite_needs_synced_and_newer(
            sync_state in state(),
            local_minutes in -1000i64..1000,
            remote_minutes in -1000i64..1000,
        ) {
            let decision = decide(Some(&local(sync_state, local_minutes)), &remote(remote_minutes));
            let expect_overwrite =
                sync_state == SyncState::Synced && remote_minutes > local_minutes;
            prop_assert_eq!(matches!(decision, MergeDecision::Overwrite(1)), expect_overwrite);
            prop_assert!(!matches!(decision, MergeDecision::Insert));
        }

        /// Invariant: unknown remote rows are always inserted
        #[test]
        fn unknown_rows_insert(remote_minutes in -1000i64..1000) {
            prop_assert_eq!(decide(None, &remote(remote_minutes)), MergeDecision::Insert);
        }
    }
}

// ============================================================================
// STATE MACHINE TESTS
// ============================================================================

mod state_machine_tests {
    use super::*;
    use soulsnaps::access::UpgradeUrgency;
    use soulsnaps::onboarding::{OnboardingStep, StartupState};

    proptest! {
        /// Invariant: any walk stays in bounds and Completed is absorbing
        #[test]
        fn onboarding_walk_bounded(moves in prop::collection::vec(any::<bool>(), 0..40)) {
            let mut step = OnboardingStep::Welcome;
            let mut completed = false;
            for forward in moves {
                step = if forward { step.next() } else { step.previous() };
                prop_assert!(step.index() <= 3);
                if completed {
                    prop_assert_eq!(step, OnboardingStep::Completed);
                }
                completed = step == OnboardingStep::Completed;
            }
        }

        /// Invariant: the dashboard is terminal whatever happens next
        #[test]
        fn dashboard_is_terminal(events in prop::collection::vec(0u8..4, 0..20)) {
            let mut state = StartupState::Checking.resolve(true, true);
            for event in events {
                state = match event {
                    0 => state.begin_onboarding(),
                    1 => state.complete_onboarding(),
                    2 => state.authenticated(),
                    _ => state.resolve(false, false),
                };
                prop_assert_eq!(state, StartupState::ReadyForDashboard);
            }
        }

        /// Invariant: usage below 75% never asks for an upgrade
        #[test]
        fn low_usage_is_low_urgency(ratio in 0.0f64..0.75) {
            prop_assert_eq!(UpgradeUrgency::from_ratio(ratio), UpgradeUrgency::Low);
        }

        /// Invariant: urgency never drops as usage grows
        #[test]
        fn urgency_monotonic(a in 0.0f64..2.0, b in 0.0f64..2.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(UpgradeUrgency::from_ratio(lo) <= UpgradeUrgency::from_ratio(hi));
        }
    }
}
