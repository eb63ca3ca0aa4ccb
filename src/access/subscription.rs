//! User → plan assignments

use std::sync::Arc;

use super::plans::PlanType;
use crate::error::Result;
use crate::storage::kv::{get_json, put_json};
use crate::storage::KeyValueStore;

/// Plan assignments persisted in the key-value store
#[derive(Clone)]
pub struct SubscriptionStore {
    store: Arc<dyn KeyValueStore>,
}

impl SubscriptionStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn key(user_id: &str) -> String {
        format!("plan:{}", user_id)
    }

    /// The user's plan; Guest when unassigned or unreadable
    pub fn plan_for(&self, user_id: &str) -> PlanType {
        match get_json::<PlanType>(self.store.as_ref(), &Self::key(user_id)) {
            Ok(Some(plan)) => plan,
            Ok(None) => PlanType::Guest,
            Err(e) => {
                tracing::warn!(
                    "Could not read plan for user {}, falling back to guest: {}",
                    user_id,
                    e
                );
                PlanType::Guest
            }
        }
    }

    pub fn assign(&self, user_id: &str, plan: PlanType) -> Result<()> {
        tracing::info!("Assigning plan {} to user {}", plan, user_id);
        put_json(self.store.as_ref(), &Self::key(user_id), &plan)
    }

    /// Remove the assignment (user falls back to Guest)
    pub fn clear(&self, user_id: &str) -> Result<()> {
        self.store.delete(&Self::key(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKeyValueStore;

    #[test]
    fn test_assign_and_fallback() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let subscriptions = SubscriptionStore::new(kv.clone());

        assert_eq!(subscriptions.plan_for("u1"), PlanType::Guest);

        subscriptions.assign("u1", PlanType::Premium).unwrap();
        assert_eq!(subscriptions.plan_for("u1"), PlanType::Premium);

        kv.put("plan:u2", "\"platinum\"").unwrap();
        assert_eq!(subscriptions.plan_for("u2"), PlanType::Guest);

        subscriptions.clear("u1").unwrap();
        assert_eq!(subscriptions.plan_for("u1"), PlanType::Guest);
    }
}
