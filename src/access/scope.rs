//! Plan → permitted actions

use std::sync::Arc;

use super::plans::{PlanCatalog, PlanType};

/// Whether a scope pattern grants an action.
///
/// `*` grants everything, `prefix*` grants any action starting with
/// `prefix`, anything else must match exactly.
pub fn scope_matches(pattern: &str, action: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => action.starts_with(prefix) && action.len() > prefix.len(),
        None => pattern == action,
    }
}

/// Scope checks against the plan catalog
#[derive(Debug, Clone)]
pub struct ScopePolicy {
    catalog: Arc<PlanCatalog>,
}

impl ScopePolicy {
    pub fn new(catalog: Arc<PlanCatalog>) -> Self {
        Self { catalog }
    }

    /// Whether the plan grants the action
    pub fn has_scope(&self, plan: PlanType, action: &str) -> bool {
        self.catalog
            .get(plan)
            .scopes
            .iter()
            .any(|pattern| scope_matches(pattern, action))
    }

    /// Cheapest plan granting the action
    pub fn cheapest_plan_for(&self, action: &str) -> Option<PlanType> {
        self.catalog
            .all()
            .map(|d| d.plan_type)
            .find(|plan| self.has_scope(*plan, action))
    }

    /// Cheapest plan above `current` granting the action
    pub fn recommended_plan_for(&self, current: PlanType, action: &str) -> Option<PlanType> {
        current
            .upgrades()
            .filter(|plan| self.catalog.contains(*plan))
            .find(|plan| self.has_scope(*plan, action))
    }
}
