//! Feature kill-switches, independent of plans

use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};

/// Runtime feature flags. Flags never set are enabled.
#[derive(Debug, Default)]
pub struct FeatureToggles {
    flags: DashMap<String, bool>,
}

impl FeatureToggles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(flags: &HashMap<String, bool>) -> Self {
        let toggles = Self::new();
        for (flag, enabled) in flags {
            toggles.set(flag, *enabled);
        }
        toggles
    }

    pub fn is_enabled(&self, flag: &str) -> bool {
        self.flags.get(flag).map(|v| *v).unwrap_or(true)
    }

    pub fn set(&self, flag: &str, enabled: bool) {
        if !enabled {
            tracing::info!("Feature {} switched off", flag);
        }
        self.flags.insert(flag.to_string(), enabled);
    }

    pub fn disable(&self, flag: &str) {
        self.set(flag, false);
    }

    pub fn enable(&self, flag: &str) {
        self.set(flag, true);
    }

    /// Flags currently switched off, sorted
    pub fn disabled_flags(&self) -> Vec<String> {
        let mut disabled: Vec<String> = self
            .flags
            .iter()
            .filter(|e| !*e.value())
            .map(|e| e.key().clone())
            .collect();
        disabled.sort();
        disabled
    }

    pub fn snapshot(&self) -> BTreeMap<String, bool> {
        self.flags
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_flags_default_on() {
        let toggles = FeatureToggles::new();
        assert!(toggles.is_enabled("anything"));
    }

    #[test]
    fn test_kill_switch() {
        let toggles = FeatureToggles::from_map(&HashMap::from([
            ("ai_analysis".to_string(), false),
            ("cloud_sync".to_string(), true),
        ]));
        assert!(!toggles.is_enabled("ai_analysis"));
        assert!(toggles.is_enabled("cloud_sync"));
        assert_eq!(toggles.disabled_flags(), vec!["ai_analysis".to_string()]);

        toggles.enable("ai_analysis");
        assert!(toggles.is_enabled("ai_analysis"));
        assert!(toggles.disabled_flags().is_empty());
    }
}
