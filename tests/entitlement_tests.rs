//! Entitlement tests against a real SQLite store
//!
//! Run with: cargo test --test entitlement_tests

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;

use soulsnaps::access::{
    actions, features, quota_keys, AccessGuard, CapacityDenial, CapacityGuard, DenyReason,
    FeatureCategory, FeatureToggles, PermissionLevel, PlanCatalog, PlanType, UpgradeUrgency,
};
use soulsnaps::clock::ManualClock;
use soulsnaps::service::MemoryService;
use soulsnaps::storage::{KeyValueStore, Storage};
use soulsnaps::types::{CreateMemoryInput, StorageConfig};
use soulsnaps::SoulSnapsError;

fn access_on(storage: &Storage, clock: Arc<ManualClock>) -> Arc<AccessGuard> {
    let kv: Arc<dyn KeyValueStore> = Arc::new(storage.clone());
    Arc::new(AccessGuard::new(
        Arc::new(PlanCatalog::standard()),
        kv,
        Arc::new(FeatureToggles::new()),
        clock,
    ))
}

fn noon() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap(),
    ))
}

fn snap(owner: &str, title: &str, media_size_bytes: u64) -> CreateMemoryInput {
    CreateMemoryInput {
        owner_id: owner.into(),
        title: title.into(),
        media_size_bytes,
        ..Default::default()
    }
}

#[test]
fn plans_and_counters_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        db_path: dir.path().join("snaps.db").display().to_string(),
    };
    let clock = noon();

    {
        let storage = Storage::open(config.clone()).unwrap();
        let access = access_on(&storage, clock.clone());
        access.change_plan("u1", PlanType::Free).unwrap();
        for _ in 0..4 {
            assert!(
                access
                    .allow_action(
                        "u1",
                        actions::AFFIRMATION_GENERATE,
                        Some(quota_keys::AFFIRMATIONS_DAILY),
                        Some(features::AFFIRMATIONS),
                    )
                    .unwrap()
                    .allowed
            );
        }
    }

    let storage = Storage::open(config).unwrap();
    let access = access_on(&storage, clock.clone());
    assert_eq!(access.plan_for("u1"), PlanType::Free);
    let info = access
        .quota_info("u1", quota_keys::AFFIRMATIONS_DAILY)
        .unwrap()
        .unwrap();
    assert_eq!(info.used, 4);
    assert_eq!(info.remaining, Some(1));

    // next UTC day starts from zero
    clock.advance(Duration::hours(12));
    let info = access
        .quota_info("u1", quota_keys::AFFIRMATIONS_DAILY)
        .unwrap()
        .unwrap();
    assert_eq!(info.used, 0);
}

#[test]
fn kill_switch_overrides_every_plan() {
    let storage = Storage::open_in_memory().unwrap();
    let access = access_on(&storage, noon());
    access.change_plan("vip", PlanType::Enterprise).unwrap();
    access.toggles().disable(features::AI_ANALYSIS);

    let result = access
        .allow_action(
            "vip",
            actions::ANALYSIS_ADVANCED,
            Some(quota_keys::ANALYSIS_DAILY),
            Some(features::AI_ANALYSIS),
        )
        .unwrap();
    assert_eq!(result.reason, Some(DenyReason::FeatureOff));
    assert_eq!(
        result.message.as_deref(),
        Some("Ai analysis is temporarily unavailable. Please try again later.")
    );

    access.toggles().enable(features::AI_ANALYSIS);
    assert!(
        access
            .allow_action(
                "vip",
                actions::ANALYSIS_ADVANCED,
                Some(quota_keys::ANALYSIS_DAILY),
                Some(features::AI_ANALYSIS),
            )
            .unwrap()
            .allowed
    );
}

#[test]
fn guest_capacity_flow() {
    let storage = Storage::open_in_memory().unwrap();
    let access = access_on(&storage, noon());
    let capacity = Arc::new(CapacityGuard::new(access.clone(), Arc::new(storage.clone())));
    let service = MemoryService::new(storage.clone()).with_capacity_guard(capacity.clone());

    // guests may attach at most 5 MB per file
    let err = service
        .create(snap("guest", "Huge video still", 6 * 1024 * 1024))
        .unwrap_err();
    assert!(matches!(err, SoulSnapsError::AccessDenied(_)));
    let check = capacity
        .check_memory_capacity("guest", 6 * 1024 * 1024)
        .unwrap();
    assert_eq!(check.reason, Some(CapacityDenial::FileTooLarge));

    // a denied capture consumed no daily quota
    for i in 0..3 {
        service.create(snap("guest", &format!("snap {}", i), 1024)).unwrap();
    }
    let denied = access
        .can_perform_action(
            "guest",
            actions::MEMORY_CREATE,
            Some(quota_keys::MEMORIES_DAILY),
            None,
        )
        .unwrap();
    assert_eq!(denied.reason, Some(DenyReason::QuotaExceeded));

    let scope = access.user_scope("guest", service.usage("guest").unwrap());
    assert_eq!(scope.plan, PlanType::Guest);
    assert_eq!(
        scope.permission(FeatureCategory::Export),
        PermissionLevel::None
    );
    assert!(scope.can_use(FeatureCategory::Memories));
}

#[test]
fn upgrade_urgency_tracks_stored_memories() {
    let storage = Storage::open_in_memory().unwrap();
    let clock = noon();
    let access = access_on(&storage, clock.clone());
    let capacity = Arc::new(CapacityGuard::new(access.clone(), Arc::new(storage.clone())));
    let service = MemoryService::new(storage).with_capacity_guard(capacity.clone());

    assert_eq!(
        capacity.upgrade_urgency("guest").unwrap().urgency,
        UpgradeUrgency::Low
    );

    // guest keeps at most 10 memories, three per day
    for day in 0..3 {
        for i in 0..3 {
            service
                .create(snap("guest", &format!("day {} #{}", day, i), 0))
                .unwrap();
        }
        clock.advance(Duration::days(1));
    }

    let recommendation = capacity.upgrade_urgency("guest").unwrap();
    assert_eq!(recommendation.urgency, UpgradeUrgency::High);
    assert_eq!(recommendation.recommended_plan, Some(PlanType::Free));
    assert!(recommendation
        .reasons
        .iter()
        .any(|r| r.contains("memories stored")));

    service.create(snap("guest", "tenth", 0)).unwrap();
    let err = service.create(snap("guest", "eleventh", 0)).unwrap_err();
    assert!(matches!(err, SoulSnapsError::AccessDenied(_)));
    assert_eq!(
        capacity.upgrade_urgency("guest").unwrap().urgency,
        UpgradeUrgency::Critical
    );
}

#[test]
fn upgrading_lifts_the_limits() {
    let storage = Storage::open_in_memory().unwrap();
    let access = access_on(&storage, noon());
    let capacity = Arc::new(CapacityGuard::new(access.clone(), Arc::new(storage.clone())));
    let service = MemoryService::new(storage).with_capacity_guard(capacity);

    for i in 0..3 {
        service.create(snap("u1", &format!("snap {}", i), 0)).unwrap();
    }
    assert!(service.create(snap("u1", "blocked", 0)).is_err());

    access.change_plan("u1", PlanType::Premium).unwrap();
    for i in 0..20 {
        service.create(snap("u1", &format!("premium {}", i), 0)).unwrap();
    }
    assert_eq!(service.usage("u1").unwrap().memory_count, 23);
    assert!(
        access
            .can_perform_action("u1", actions::EXPORT_DATA, Some(quota_keys::EXPORTS_MONTHLY), None)
            .unwrap()
            .allowed
    );
}

#[test]
fn plan_change_resets_only_that_user() {
    let storage = Storage::open_in_memory().unwrap();
    let access = access_on(&storage, noon());
    let create = |user: &str| {
        access
            .allow_action(
                user,
                actions::MEMORY_CREATE,
                Some(quota_keys::MEMORIES_DAILY),
                None,
            )
            .unwrap()
    };
    let used = |user: &str| {
        access
            .quota_info(user, quota_keys::MEMORIES_DAILY)
            .unwrap()
            .unwrap()
            .used
    };

    for _ in 0..3 {
        assert!(create("josé").allowed);
    }
    assert!(create("u1").allowed);
    assert!(create("u1:x").allowed);

    access.change_plan("josé", PlanType::Free).unwrap();
    assert_eq!(used("josé"), 0);

    access.change_plan("u1", PlanType::Free).unwrap();
    assert_eq!(used("u1"), 0);
    assert_eq!(used("u1:x"), 1);
}
