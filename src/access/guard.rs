//! Allow/deny decisions combining toggles, scopes and quotas

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::permissions::UserScope;
use super::plans::{PlanCatalog, PlanDefinition, PlanType};
use super::quota::{QuotaInfo, QuotaOutcome, QuotaPolicy};
use super::scope::ScopePolicy;
use super::subscription::SubscriptionStore;
use super::toggles::FeatureToggles;
use crate::clock::Clock;
use crate::error::Result;
use crate::storage::KeyValueStore;
use crate::types::UsageSnapshot;

/// Why an action was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenyReason {
    FeatureOff,
    MissingScope,
    QuotaExceeded,
}

/// State of the kill-switch consulted for a decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureInfo {
    pub flag: String,
    pub enabled: bool,
    /// Whether the user's plan advertises the feature
    pub in_plan: bool,
}

/// Outcome of an access check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessResult {
    pub allowed: bool,
    pub reason: Option<DenyReason>,
    pub message: Option<String>,
    pub quota_info: Option<QuotaInfo>,
    pub feature_info: Option<FeatureInfo>,
    pub recommended_plan: Option<PlanType>,
}

impl AccessResult {
    fn allowed(quota_info: Option<QuotaInfo>, feature_info: Option<FeatureInfo>) -> Self {
        Self {
            allowed: true,
            reason: None,
            message: None,
            quota_info,
            feature_info,
            recommended_plan: None,
        }
    }

    fn denied(reason: DenyReason, message: String) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            message: Some(message),
            quota_info: None,
            feature_info: None,
            recommended_plan: None,
        }
    }
}

/// The entitlement decision point
pub struct AccessGuard {
    catalog: Arc<PlanCatalog>,
    scopes: ScopePolicy,
    quotas: QuotaPolicy,
    toggles: Arc<FeatureToggles>,
    subscriptions: SubscriptionStore,
}

impl AccessGuard {
    pub fn new(
        catalog: Arc<PlanCatalog>,
        store: Arc<dyn KeyValueStore>,
        toggles: Arc<FeatureToggles>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            scopes: ScopePolicy::new(catalog.clone()),
            quotas: QuotaPolicy::new(store.clone(), clock),
            subscriptions: SubscriptionStore::new(store),
            catalog,
            toggles,
        }
    }

    /// Check the action and, when allowed, consume one unit of `quota_key`.
    ///
    /// Order: feature flag, scope, quota. A denied call never consumes quota.
    pub fn allow_action(
        &self,
        user_id: &str,
        action: &str,
        quota_key: Option<&str>,
        flag_key: Option<&str>,
    ) -> Result<AccessResult> {
        let result = self.evaluate(user_id, action, quota_key, flag_key, true)?;
        if !result.allowed {
            tracing::info!(
                "Denied {} for user {}: {:?}",
                action,
                user_id,
                result.reason
            );
        }
        Ok(result)
    }

    /// Same checks as `allow_action` without consuming quota
    pub fn can_perform_action(
        &self,
        user_id: &str,
        action: &str,
        quota_key: Option<&str>,
        flag_key: Option<&str>,
    ) -> Result<AccessResult> {
        self.evaluate(user_id, action, quota_key, flag_key, false)
    }

    fn evaluate(
        &self,
        user_id: &str,
        action: &str,
        quota_key: Option<&str>,
        flag_key: Option<&str>,
        consume: bool,
    ) -> Result<AccessResult> {
        let plan = self.subscriptions.plan_for(user_id);
        let definition = self.catalog.get(plan);

        let feature_info = flag_key.map(|flag| FeatureInfo {
            flag: flag.to_string(),
            enabled: self.toggles.is_enabled(flag),
            in_plan: definition.has_feature(flag),
        });

        if let Some(info) = &feature_info {
            if !info.enabled {
                let mut result = AccessResult::denied(
                    DenyReason::FeatureOff,
                    format!(
                        "{} is temporarily unavailable. Please try again later.",
                        capitalize(&humanize(&info.flag))
                    ),
                );
                result.feature_info = feature_info.clone();
                return Ok(result);
            }
        }

        if !self.scopes.has_scope(plan, action) {
            let recommended = self.scopes.recommended_plan_for(plan, action);
            let message = match recommended {
                Some(upgrade) => format!(
                    "Your {} plan does not include {}. Upgrade to {} to unlock it.",
                    definition.display_name,
                    humanize(action),
                    self.catalog.get(upgrade).display_name
                ),
                None => format!(
                    "{} is not available on the {} plan.",
                    capitalize(&humanize(action)),
                    definition.display_name
                ),
            };
            let mut result = AccessResult::denied(DenyReason::MissingScope, message);
            result.recommended_plan = recommended;
            result.feature_info = feature_info;
            return Ok(result);
        }

        let Some(key) = quota_key else {
            return Ok(AccessResult::allowed(None, feature_info));
        };
        let Some(rule) = definition.quota(key) else {
            tracing::debug!("Quota {} is not metered on plan {}", key, plan);
            return Ok(AccessResult::allowed(None, feature_info));
        };

        let info = if consume {
            match self.quotas.try_consume(user_id, key, rule, 1)? {
                QuotaOutcome::Consumed(info) => {
                    return Ok(AccessResult::allowed(Some(info), feature_info));
                }
                QuotaOutcome::Exceeded(info) => info,
            }
        } else {
            let info = self.quotas.check(user_id, key, rule)?;
            if !info.is_exhausted() {
                return Ok(AccessResult::allowed(Some(info), feature_info));
            }
            info
        };

        let recommended = self.recommended_plan_for_quota(plan, key);
        let mut message = format!(
            "You have used {} of {} {} {}.",
            info.used,
            info.limit,
            humanize(key),
            info.window.label()
        );
        if let Some(upgrade) = recommended {
            message.push_str(&format!(
                " Upgrade to {} for more.",
                self.catalog.get(upgrade).display_name
            ));
        }
        let mut result = AccessResult::denied(DenyReason::QuotaExceeded, message);
        result.quota_info = Some(info);
        result.feature_info = feature_info;
        result.recommended_plan = recommended;
        Ok(result)
    }

    /// Cheapest plan above `current` with more headroom on `key`
    pub fn recommended_plan_for_quota(&self, current: PlanType, key: &str) -> Option<PlanType> {
        let current_limit = self.catalog.get(current).quota(key)?.limit;
        current
            .upgrades()
            .filter(|plan| self.catalog.contains(*plan))
            .find(|plan| match self.catalog.get(*plan).quota(key) {
                Some(rule) => rule.limit.exceeds(&current_limit),
                // unmetered on that plan
                None => true,
            })
    }

    /// Quota state for a key on the user's plan, `None` when unmetered
    pub fn quota_info(&self, user_id: &str, key: &str) -> Result<Option<QuotaInfo>> {
        let definition = self.plan_definition(user_id);
        match definition.quota(key) {
            Some(rule) => Ok(Some(self.quotas.check(user_id, key, rule)?)),
            None => Ok(None),
        }
    }

    /// All metered quotas of the user's plan
    pub fn all_quota_info(&self, user_id: &str) -> Result<Vec<QuotaInfo>> {
        let definition = self.plan_definition(user_id);
        definition
            .quotas
            .iter()
            .map(|(key, rule)| self.quotas.check(user_id, key, rule))
            .collect()
    }

    pub fn plan_for(&self, user_id: &str) -> PlanType {
        self.subscriptions.plan_for(user_id)
    }

    pub fn plan_definition(&self, user_id: &str) -> &PlanDefinition {
        self.catalog.get(self.plan_for(user_id))
    }

    /// Switch a user's plan; counters restart so a downgrade does not strand
    /// usage from the old plan's windows
    pub fn change_plan(&self, user_id: &str, plan: PlanType) -> Result<()> {
        let previous = self.plan_for(user_id);
        self.subscriptions.assign(user_id, plan)?;
        if previous != plan {
            let cleared = self.quotas.reset_all(user_id)?;
            tracing::info!(
                "User {} moved from {} to {}, cleared {} quota counters",
                user_id,
                previous,
                plan,
                cleared
            );
        }
        Ok(())
    }

    pub fn user_scope(&self, user_id: &str, usage: UsageSnapshot) -> UserScope {
        UserScope::build(
            user_id,
            self.plan_definition(user_id),
            &self.catalog,
            &self.toggles,
            usage,
        )
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    pub fn toggles(&self) -> &FeatureToggles {
        &self.toggles
    }

    pub fn scopes(&self) -> &ScopePolicy {
        &self.scopes
    }

    pub fn quotas(&self) -> &QuotaPolicy {
        &self.quotas
    }

    pub fn subscriptions(&self) -> &SubscriptionStore {
        &self.subscriptions
    }
}

/// `memory.create` → `memory create`, `ai_analysis` → `ai analysis`
fn humanize(name: &str) -> String {
    name.replace(['.', '_'], " ")
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
