//! Storage-aware checks on top of the access guard

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::guard::{AccessGuard, AccessResult};
use super::plans::{actions, features, quota_keys, Limit, PlanType};
use crate::error::Result;
use crate::storage::{queries, Storage};
use crate::types::UsageSnapshot;

/// Source of per-user memory count and stored bytes
pub trait UsageProvider: Send + Sync {
    fn usage(&self, user_id: &str) -> Result<UsageSnapshot>;
}

impl UsageProvider for Storage {
    fn usage(&self, user_id: &str) -> Result<UsageSnapshot> {
        self.with_connection(|conn| queries::usage_for_owner(conn, user_id))
    }
}

/// Why a capacity check failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CapacityDenial {
    MemoryLimitReached,
    FileTooLarge,
    StorageLimitExceeded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityCheck {
    pub allowed: bool,
    pub reason: Option<CapacityDenial>,
    pub message: Option<String>,
    pub usage: UsageSnapshot,
    pub projected_storage_bytes: u64,
    pub storage_limit_bytes: Limit,
    pub recommended_plan: Option<PlanType>,
}

/// Outcome of `allow_memory_creation`
#[derive(Debug, Clone, PartialEq)]
pub enum CapacityDecision {
    Allowed(AccessResult),
    CapacityDenied(CapacityCheck),
    AccessDenied(AccessResult),
}

impl CapacityDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, CapacityDecision::Allowed(_))
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            CapacityDecision::Allowed(_) => None,
            CapacityDecision::CapacityDenied(check) => check.message.as_deref(),
            CapacityDecision::AccessDenied(result) => result.message.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpgradeUrgency {
    Low,
    Medium,
    High,
    Critical,
}

impl UpgradeUrgency {
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio >= 1.0 {
            UpgradeUrgency::Critical
        } else if ratio >= 0.90 {
            UpgradeUrgency::High
        } else if ratio >= 0.75 {
            UpgradeUrgency::Medium
        } else {
            UpgradeUrgency::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeRecommendation {
    pub urgency: UpgradeUrgency,
    pub current_plan: PlanType,
    pub recommended_plan: Option<PlanType>,
    pub peak_usage_ratio: f64,
    /// One line per limit at or above 75%
    pub reasons: Vec<String>,
}

pub struct CapacityGuard {
    access: Arc<AccessGuard>,
    usage: Arc<dyn UsageProvider>,
}

impl CapacityGuard {
    pub fn new(access: Arc<AccessGuard>, usage: Arc<dyn UsageProvider>) -> Self {
        Self { access, usage }
    }

    pub fn access(&self) -> &AccessGuard {
        &self.access
    }

    /// Whether a new memory carrying `incoming_bytes` of media fits the plan
    pub fn check_memory_capacity(&self, user_id: &str, incoming_bytes: u64) -> Result<CapacityCheck> {
        self.evaluate(user_id, true, incoming_bytes, incoming_bytes)
    }

    /// Whether an existing memory may grow from `previous_bytes` to
    /// `new_bytes` of media. The memory count is not checked.
    pub fn check_media_growth(
        &self,
        user_id: &str,
        previous_bytes: u64,
        new_bytes: u64,
    ) -> Result<CapacityCheck> {
        self.evaluate(
            user_id,
            false,
            new_bytes,
            new_bytes.saturating_sub(previous_bytes),
        )
    }

    fn evaluate(
        &self,
        user_id: &str,
        new_memory: bool,
        file_bytes: u64,
        added_bytes: u64,
    ) -> Result<CapacityCheck> {
        let plan = self.access.plan_for(user_id);
        let limits = self.access.catalog().get(plan).limits;
        let usage = self.usage.usage(user_id)?;
        let projected = usage.storage_bytes.saturating_add(added_bytes);
        let storage_limit = limits.max_storage_bytes();

        let denial = if new_memory && !limits.max_memories.allows(usage.memory_count, 1) {
            Some((
                CapacityDenial::MemoryLimitReached,
                format!(
                    "You have reached the limit of {} memories on the {} plan.",
                    limits.max_memories, plan
                ),
            ))
        } else if !limits.max_file_bytes().allows(0, file_bytes) {
            Some((
                CapacityDenial::FileTooLarge,
                format!(
                    "Files on the {} plan can be at most {} MB.",
                    plan, limits.max_photo_size_mb
                ),
            ))
        } else if !storage_limit.allows(usage.storage_bytes, added_bytes) {
            Some((
                CapacityDenial::StorageLimitExceeded,
                format!(
                    "This would use {} of your {} MB storage.",
                    format_megabytes(projected),
                    limits.max_storage_mb
                ),
            ))
        } else {
            None
        };

        let (reason, message, recommended_plan) = match denial {
            Some((reason, message)) => {
                tracing::info!("Capacity check failed for user {}: {:?}", user_id, reason);
                (Some(reason), Some(message), self.capacity_upgrade(plan, reason))
            }
            None => (None, None, None),
        };

        Ok(CapacityCheck {
            allowed: reason.is_none(),
            reason,
            message,
            usage,
            projected_storage_bytes: projected,
            storage_limit_bytes: storage_limit,
            recommended_plan,
        })
    }

    /// Capacity first, then the memory.create action with its daily quota.
    /// Quota is only consumed when both pass.
    pub fn allow_memory_creation(&self, user_id: &str, incoming_bytes: u64) -> Result<CapacityDecision> {
        let check = self.check_memory_capacity(user_id, incoming_bytes)?;
        if !check.allowed {
            return Ok(CapacityDecision::CapacityDenied(check));
        }

        let result = self.access.allow_action(
            user_id,
            actions::MEMORY_CREATE,
            Some(quota_keys::MEMORIES_DAILY),
            Some(features::MEMORY_CAPTURE),
        )?;
        if result.allowed {
            Ok(CapacityDecision::Allowed(result))
        } else {
            Ok(CapacityDecision::AccessDenied(result))
        }
    }

    pub fn upgrade_urgency(&self, user_id: &str) -> Result<UpgradeRecommendation> {
        let plan = self.access.plan_for(user_id);
        let limits = self.access.catalog().get(plan).limits;
        let usage = self.usage.usage(user_id)?;

        let mut ratios: Vec<(String, f64)> = Vec::new();
        for info in self.access.all_quota_info(user_id)? {
            if let Some(ratio) = info.usage_ratio() {
                ratios.push((format!("{} {}", info.key, info.window.label()), ratio));
            }
        }
        if let Some(ratio) = limits.max_memories.usage_ratio(usage.memory_count) {
            ratios.push(("memories stored".to_string(), ratio));
        }
        if let Some(ratio) = limits.max_storage_bytes().usage_ratio(usage.storage_bytes) {
            ratios.push(("storage".to_string(), ratio));
        }

        let peak = ratios.iter().map(|(_, r)| *r).fold(0.0_f64, f64::max);
        let reasons = ratios
            .iter()
            .filter(|(_, r)| *r >= 0.75)
            .map(|(what, r)| format!("{} at {:.0}%", what, r * 100.0))
            .collect();

        Ok(UpgradeRecommendation {
            urgency: UpgradeUrgency::from_ratio(peak),
            current_plan: plan,
            recommended_plan: plan.next_tier(),
            peak_usage_ratio: peak,
            reasons,
        })
    }

    fn capacity_upgrade(&self, current: PlanType, reason: CapacityDenial) -> Option<PlanType> {
        let catalog = self.access.catalog();
        let current_limits = catalog.get(current).limits;
        current
            .upgrades()
            .filter(|plan| catalog.contains(*plan))
            .find(|plan| {
                let limits = catalog.get(*plan).limits;
                match reason {
                    CapacityDenial::MemoryLimitReached => {
                        limits.max_memories.exceeds(&current_limits.max_memories)
                    }
                    CapacityDenial::FileTooLarge => {
                        limits.max_photo_size_mb.exceeds(&current_limits.max_photo_size_mb)
                    }
                    CapacityDenial::StorageLimitExceeded => {
                        limits.max_storage_mb.exceeds(&current_limits.max_storage_mb)
                    }
                }
            })
    }
}

fn format_megabytes(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
}
