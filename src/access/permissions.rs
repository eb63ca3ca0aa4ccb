//! Per-user permission view derived from the plan

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::plans::{Limit, PlanCatalog, PlanDefinition, PlanType, UserLimits};
use super::toggles::FeatureToggles;
use crate::types::UsageSnapshot;

/// Groups of actions shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureCategory {
    Memories,
    Media,
    Location,
    Affirmations,
    Quizzes,
    Analysis,
    Export,
    Sync,
    Team,
}

impl FeatureCategory {
    pub const ALL: [FeatureCategory; 9] = [
        FeatureCategory::Memories,
        FeatureCategory::Media,
        FeatureCategory::Location,
        FeatureCategory::Affirmations,
        FeatureCategory::Quizzes,
        FeatureCategory::Analysis,
        FeatureCategory::Export,
        FeatureCategory::Sync,
        FeatureCategory::Team,
    ];

    /// Action namespace of the category (`memory` for `memory.create`)
    pub fn action_prefix(&self) -> &'static str {
        match self {
            FeatureCategory::Memories => "memory",
            FeatureCategory::Media => "media",
            FeatureCategory::Location => "location",
            FeatureCategory::Affirmations => "affirmation",
            FeatureCategory::Quizzes => "quiz",
            FeatureCategory::Analysis => "analysis",
            FeatureCategory::Export => "export",
            FeatureCategory::Sync => "sync",
            FeatureCategory::Team => "team",
        }
    }

    /// Kill-switch flag guarding the category, if any
    pub fn flag(&self) -> Option<&'static str> {
        use super::plans::features;
        match self {
            FeatureCategory::Memories => Some(features::MEMORY_CAPTURE),
            FeatureCategory::Affirmations => Some(features::AFFIRMATIONS),
            FeatureCategory::Quizzes => Some(features::EMOTION_QUIZ),
            FeatureCategory::Analysis => Some(features::AI_ANALYSIS),
            FeatureCategory::Export => Some(features::DATA_EXPORT),
            FeatureCategory::Sync => Some(features::CLOUD_SYNC),
            FeatureCategory::Team => Some(features::TEAM_SPACES),
            FeatureCategory::Media | FeatureCategory::Location => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FeatureCategory::Memories => "Memories",
            FeatureCategory::Media => "Photos & audio",
            FeatureCategory::Location => "Location tagging",
            FeatureCategory::Affirmations => "Affirmations",
            FeatureCategory::Quizzes => "Emotion quizzes",
            FeatureCategory::Analysis => "Mood analysis",
            FeatureCategory::Export => "Data export",
            FeatureCategory::Sync => "Cloud sync",
            FeatureCategory::Team => "Team spaces",
        }
    }
}

/// How much of a category the plan grants
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    None,
    /// Some actions of the category
    Limited,
    /// The whole category (`prefix.*` or `*`)
    Full,
}

/// An active restriction with a message for the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restriction {
    pub category: FeatureCategory,
    pub message: String,
}

/// Permissions, limits and restrictions of one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserScope {
    pub user_id: String,
    pub plan: PlanType,
    pub permissions: BTreeMap<FeatureCategory, PermissionLevel>,
    pub limits: UserLimits,
    pub restrictions: Vec<Restriction>,
}

impl UserScope {
    /// Build the scope for a user on a plan given current usage
    pub fn build(
        user_id: &str,
        definition: &PlanDefinition,
        catalog: &PlanCatalog,
        toggles: &FeatureToggles,
        usage: UsageSnapshot,
    ) -> Self {
        let mut permissions = BTreeMap::new();
        let mut restrictions = Vec::new();

        for category in FeatureCategory::ALL {
            let level = permission_level(definition, category);
            permissions.insert(category, level);

            if level == PermissionLevel::None {
                let upgrade = definition
                    .plan_type
                    .upgrades()
                    .filter(|plan| catalog.contains(*plan))
                    .find(|plan| permission_level(catalog.get(*plan), category) != PermissionLevel::None);
                let message = match upgrade {
                    Some(plan) => format!("{} requires the {} plan", category.label(), plan),
                    None => format!("{} is not available on your plan", category.label()),
                };
                restrictions.push(Restriction { category, message });
            } else if let Some(flag) = category.flag() {
                if !toggles.is_enabled(flag) {
                    restrictions.push(Restriction {
                        category,
                        message: format!("{} is temporarily unavailable", category.label()),
                    });
                }
            }
        }

        if let Limit::Limited(max) = definition.limits.max_memories {
            if usage.memory_count >= max {
                restrictions.push(Restriction {
                    category: FeatureCategory::Memories,
                    message: format!("You have reached the limit of {} memories", max),
                });
            }
        }

        if let Limit::Limited(max_bytes) = definition.limits.max_storage_bytes() {
            if usage.storage_bytes >= max_bytes {
                restrictions.push(Restriction {
                    category: FeatureCategory::Media,
                    message: format!(
                        "Your storage is full ({} MB)",
                        definition.limits.max_storage_mb
                    ),
                });
            }
        }

        Self {
            user_id: user_id.to_string(),
            plan: definition.plan_type,
            permissions,
            limits: definition.limits,
            restrictions,
        }
    }

    pub fn permission(&self, category: FeatureCategory) -> PermissionLevel {
        self.permissions
            .get(&category)
            .copied()
            .unwrap_or(PermissionLevel::None)
    }

    pub fn can_use(&self, category: FeatureCategory) -> bool {
        self.permission(category) != PermissionLevel::None
            && !self.restrictions.iter().any(|r| r.category == category)
    }

    pub fn is_restricted(&self) -> bool {
        !self.restrictions.is_empty()
    }
}

fn permission_level(definition: &PlanDefinition, category: FeatureCategory) -> PermissionLevel {
    let prefix = category.action_prefix();
    let wildcard = format!("{}.*", prefix);
    let namespace = format!("{}.", prefix);

    if definition
        .scopes
        .iter()
        .any(|s| s == "*" || *s == wildcard)
    {
        PermissionLevel::Full
    } else if definition.scopes.iter().any(|s| s.starts_with(&namespace)) {
        PermissionLevel::Limited
    } else {
        PermissionLevel::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope_for(plan: PlanType, usage: UsageSnapshot, toggles: &FeatureToggles) -> UserScope {
        let catalog = PlanCatalog::standard();
        UserScope::build("u1", catalog.get(plan), &catalog, toggles, usage)
    }

    #[test]
    fn test_guest_scope() {
        let scope = scope_for(PlanType::Guest, UsageSnapshot::default(), &FeatureToggles::new());
        assert_eq!(scope.permission(FeatureCategory::Memories), PermissionLevel::Limited);
        assert_eq!(scope.permission(FeatureCategory::Export), PermissionLevel::None);
        assert!(!scope.can_use(FeatureCategory::Export));

        let export = scope
            .restrictions
            .iter()
            .find(|r| r.category == FeatureCategory::Export)
            .unwrap();
        assert_eq!(export.message, "Data export requires the premium plan");
    }

    #[test]
    fn test_enterprise_has_everything() {
        let scope = scope_for(
            PlanType::Enterprise,
            UsageSnapshot::default(),
            &FeatureToggles::new(),
        );
        for category in FeatureCategory::ALL {
            assert_eq!(scope.permission(category), PermissionLevel::Full);
        }
        assert!(!scope.is_restricted());
    }

    #[test]
    fn test_usage_and_toggle_restrictions() {
        let toggles = FeatureToggles::new();
        toggles.disable("cloud_sync");
        let scope = scope_for(
            PlanType::Free,
            UsageSnapshot {
                memory_count: 100,
                storage_bytes: 0,
            },
            &toggles,
        );

        assert!(!scope.can_use(FeatureCategory::Sync));
        assert!(!scope.can_use(FeatureCategory::Memories));
        assert!(scope
            .restrictions
            .iter()
            .any(|r| r.message == "You have reached the limit of 100 memories"));
    }
}
