//! Entitlements
//!
//! Provides:
//! - Static plan catalog (scopes, quotas, features, limits)
//! - Scope matching with `prefix.*` wildcards
//! - Windowed quota counters
//! - Feature kill-switches
//! - `AccessGuard` and the storage-aware `CapacityGuard`

mod capacity;
mod guard;
mod permissions;
pub mod plans;
mod quota;
mod scope;
mod subscription;
mod toggles;

pub use capacity::{
    CapacityCheck, CapacityDecision, CapacityDenial, CapacityGuard, UpgradeRecommendation,
    UpgradeUrgency, UsageProvider,
};
pub use guard::{AccessGuard, AccessResult, DenyReason, FeatureInfo};
pub use permissions::{FeatureCategory, PermissionLevel, Restriction, UserScope};
pub use plans::{
    actions, features, quota_keys, Limit, PlanCatalog, PlanDefinition, PlanPricing, PlanType,
    QuotaRule, ResetWindow, UserLimits,
};
pub use quota::{QuotaInfo, QuotaOutcome, QuotaPolicy};
pub use scope::{scope_matches, ScopePolicy};
pub use subscription::SubscriptionStore;
pub use toggles::FeatureToggles;
