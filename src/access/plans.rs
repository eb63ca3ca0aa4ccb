//! Subscription plans and their static catalog

use chrono::{DateTime, Datelike, Months, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Action names checked against plan scopes
pub mod actions {
    pub const MEMORY_CREATE: &str = "memory.create";
    pub const MEMORY_READ: &str = "memory.read";
    pub const MEMORY_UPDATE: &str = "memory.update";
    pub const MEMORY_DELETE: &str = "memory.delete";
    pub const MEMORY_FAVORITE: &str = "memory.favorite";
    pub const MEDIA_PHOTO: &str = "media.photo";
    pub const MEDIA_AUDIO: &str = "media.audio";
    pub const LOCATION_TAG: &str = "location.tag";
    pub const AFFIRMATION_GENERATE: &str = "affirmation.generate";
    pub const AFFIRMATION_PERSONALIZED: &str = "affirmation.personalized";
    pub const QUIZ_TAKE: &str = "quiz.take";
    pub const ANALYSIS_BASIC: &str = "analysis.basic";
    pub const ANALYSIS_ADVANCED: &str = "analysis.advanced";
    pub const EXPORT_DATA: &str = "export.data";
    pub const SYNC_CLOUD: &str = "sync.cloud";
    pub const TEAM_MANAGE: &str = "team.manage";
}

/// Metered counters
pub mod quota_keys {
    pub const MEMORIES_DAILY: &str = "memories.daily";
    pub const AFFIRMATIONS_DAILY: &str = "affirmations.daily";
    pub const QUIZZES_DAILY: &str = "quizzes.daily";
    pub const ANALYSIS_DAILY: &str = "analysis.daily";
    pub const EXPORTS_MONTHLY: &str = "exports.monthly";
}

/// Feature names advertised per plan (also used as kill-switch flags)
pub mod features {
    pub const MEMORY_CAPTURE: &str = "memory_capture";
    pub const AFFIRMATIONS: &str = "affirmations";
    pub const EMOTION_QUIZ: &str = "emotion_quiz";
    pub const AUDIO_NOTES: &str = "audio_notes";
    pub const AI_ANALYSIS: &str = "ai_analysis";
    pub const CLOUD_SYNC: &str = "cloud_sync";
    pub const DATA_EXPORT: &str = "data_export";
    pub const TEAM_SPACES: &str = "team_spaces";
}

/// Subscription tier, ordered from cheapest to most capable
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    #[default]
    Guest,
    Free,
    Premium,
    Enterprise,
}

impl PlanType {
    pub const ALL: [PlanType; 4] = [
        PlanType::Guest,
        PlanType::Free,
        PlanType::Premium,
        PlanType::Enterprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Guest => "guest",
            PlanType::Free => "free",
            PlanType::Premium => "premium",
            PlanType::Enterprise => "enterprise",
        }
    }

    /// Next tier up, `None` at the top
    pub fn next_tier(&self) -> Option<PlanType> {
        match self {
            PlanType::Guest => Some(PlanType::Free),
            PlanType::Free => Some(PlanType::Premium),
            PlanType::Premium => Some(PlanType::Enterprise),
            PlanType::Enterprise => None,
        }
    }

    /// Tiers strictly above this one, cheapest first
    pub fn upgrades(&self) -> impl Iterator<Item = PlanType> + '_ {
        PlanType::ALL.into_iter().filter(move |p| p > self)
    }
}

impl std::fmt::Display for PlanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PlanType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "guest" => Ok(PlanType::Guest),
            "free" => Ok(PlanType::Free),
            "premium" => Ok(PlanType::Premium),
            "enterprise" => Ok(PlanType::Enterprise),
            _ => Err(format!("Unknown plan: {}", s)),
        }
    }
}

/// A numeric limit; serialized as an integer where `-1` means unlimited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum Limit {
    Limited(u64),
    Unlimited,
}

impl From<i64> for Limit {
    fn from(raw: i64) -> Self {
        if raw < 0 {
            Limit::Unlimited
        } else {
            Limit::Limited(raw as u64)
        }
    }
}

impl From<Limit> for i64 {
    fn from(limit: Limit) -> Self {
        match limit {
            Limit::Limited(n) => n.min(i64::MAX as u64) as i64,
            Limit::Unlimited => -1,
        }
    }
}

impl Limit {
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Limit::Unlimited)
    }

    pub fn value(&self) -> Option<u64> {
        match self {
            Limit::Limited(n) => Some(*n),
            Limit::Unlimited => None,
        }
    }

    /// Whether `amount` more units fit on top of `used`
    pub fn allows(&self, used: u64, amount: u64) -> bool {
        match self {
            Limit::Limited(n) => used.saturating_add(amount) <= *n,
            Limit::Unlimited => true,
        }
    }

    pub fn remaining(&self, used: u64) -> Option<u64> {
        self.value().map(|n| n.saturating_sub(used))
    }

    /// Fraction of the limit consumed; a zero limit counts as fully used
    pub fn usage_ratio(&self, used: u64) -> Option<f64> {
        match self {
            Limit::Limited(0) => Some(1.0),
            Limit::Limited(n) => Some(used as f64 / *n as f64),
            Limit::Unlimited => None,
        }
    }

    /// Larger-is-better comparison used when recommending upgrades
    pub fn exceeds(&self, other: &Limit) -> bool {
        match (self, other) {
            (Limit::Unlimited, Limit::Unlimited) => false,
            (Limit::Unlimited, _) => true,
            (Limit::Limited(_), Limit::Unlimited) => false,
            (Limit::Limited(a), Limit::Limited(b)) => a > b,
        }
    }
}

impl std::fmt::Display for Limit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Limit::Limited(n) => write!(f, "{}", n),
            Limit::Unlimited => write!(f, "unlimited"),
        }
    }
}

/// How often a quota counter starts over (UTC boundaries)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetWindow {
    Daily,
    Monthly,
    Never,
}

impl ResetWindow {
    /// Start of the window containing `now`
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            ResetWindow::Daily => now.date_naive().and_time(NaiveTime::MIN).and_utc(),
            ResetWindow::Monthly => now
                .date_naive()
                .with_day(1)
                .unwrap_or_else(|| now.date_naive())
                .and_time(NaiveTime::MIN)
                .and_utc(),
            ResetWindow::Never => DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    /// When the window containing `now` ends
    pub fn next_reset(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = self.window_start(now);
        match self {
            ResetWindow::Daily => Some(start + chrono::Duration::days(1)),
            ResetWindow::Monthly => start.checked_add_months(Months::new(1)),
            ResetWindow::Never => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ResetWindow::Daily => "today",
            ResetWindow::Monthly => "this month",
            ResetWindow::Never => "in total",
        }
    }
}

/// Limit and reset window of one metered key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRule {
    pub limit: Limit,
    pub window: ResetWindow,
}

impl QuotaRule {
    pub fn daily(limit: i64) -> Self {
        Self {
            limit: limit.into(),
            window: ResetWindow::Daily,
        }
    }

    pub fn monthly(limit: i64) -> Self {
        Self {
            limit: limit.into(),
            window: ResetWindow::Monthly,
        }
    }
}

/// Numeric caps of a plan, copied onto each user's scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLimits {
    pub max_memories: Limit,
    pub max_storage_mb: Limit,
    pub max_daily_analysis: Limit,
    pub max_photo_size_mb: Limit,
    pub max_audio_seconds: Limit,
}

impl UserLimits {
    pub fn max_storage_bytes(&self) -> Limit {
        match self.max_storage_mb {
            Limit::Limited(mb) => Limit::Limited(mb.saturating_mul(1024 * 1024)),
            Limit::Unlimited => Limit::Unlimited,
        }
    }

    pub fn max_file_bytes(&self) -> Limit {
        match self.max_photo_size_mb {
            Limit::Limited(mb) => Limit::Limited(mb.saturating_mul(1024 * 1024)),
            Limit::Unlimited => Limit::Unlimited,
        }
    }
}

/// Price of a plan in minor currency units
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPricing {
    pub monthly_cents: u32,
    pub yearly_cents: u32,
    pub currency: String,
}

impl PlanPricing {
    fn free() -> Self {
        Self {
            monthly_cents: 0,
            yearly_cents: 0,
            currency: "USD".to_string(),
        }
    }

    fn usd(monthly_cents: u32, yearly_cents: u32) -> Self {
        Self {
            monthly_cents,
            yearly_cents,
            currency: "USD".to_string(),
        }
    }

    pub fn is_free(&self) -> bool {
        self.monthly_cents == 0 && self.yearly_cents == 0
    }
}

/// Everything a plan grants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDefinition {
    pub plan_type: PlanType,
    pub display_name: String,
    /// Permitted actions; entries may end in `*`
    pub scopes: Vec<String>,
    pub quotas: BTreeMap<String, QuotaRule>,
    pub features: BTreeSet<String>,
    pub limits: UserLimits,
    pub pricing: PlanPricing,
}

impl PlanDefinition {
    pub fn quota(&self, key: &str) -> Option<&QuotaRule> {
        self.quotas.get(key)
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }
}

/// Static plan catalog
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: BTreeMap<PlanType, PlanDefinition>,
    guest: PlanDefinition,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl PlanCatalog {
    /// Build a catalog from explicit definitions. Guest must be present since
    /// every failed lookup lands on it.
    pub fn from_definitions(definitions: Vec<PlanDefinition>) -> crate::error::Result<Self> {
        let plans: BTreeMap<PlanType, PlanDefinition> = definitions
            .into_iter()
            .map(|d| (d.plan_type, d))
            .collect();
        let guest = plans.get(&PlanType::Guest).cloned().ok_or_else(|| {
            crate::error::SoulSnapsError::Config(
                "plan catalog must define the guest plan".to_string(),
            )
        })?;
        Ok(Self { plans, guest })
    }

    /// The shipped plans
    pub fn standard() -> Self {
        let guest = guest_plan();
        let plans = [guest.clone(), free_plan(), premium_plan(), enterprise_plan()]
            .into_iter()
            .map(|d| (d.plan_type, d))
            .collect();
        Self { plans, guest }
    }

    /// Definition for a plan, falling back to Guest when undefined
    pub fn get(&self, plan: PlanType) -> &PlanDefinition {
        match self.plans.get(&plan) {
            Some(definition) => definition,
            None => {
                tracing::warn!("Plan {} is not defined, falling back to guest", plan);
                &self.guest
            }
        }
    }

    /// Lookup by name, falling back to Guest for unknown names
    pub fn get_by_name(&self, name: &str) -> &PlanDefinition {
        match name.parse::<PlanType>() {
            Ok(plan) => self.get(plan),
            Err(e) => {
                tracing::warn!("{}, falling back to guest", e);
                &self.guest
            }
        }
    }

    /// All plans, cheapest first
    pub fn all(&self) -> impl Iterator<Item = &PlanDefinition> {
        self.plans.values()
    }

    pub fn contains(&self, plan: PlanType) -> bool {
        self.plans.contains_key(&plan)
    }
}

fn scopes(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn feature_set(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn guest_plan() -> PlanDefinition {
    PlanDefinition {
        plan_type: PlanType::Guest,
        display_name: "Guest".to_string(),
        scopes: scopes(&[
            actions::MEMORY_CREATE,
            actions::MEMORY_READ,
            actions::AFFIRMATION_GENERATE,
            actions::QUIZ_TAKE,
        ]),
        quotas: BTreeMap::from([
            (quota_keys::MEMORIES_DAILY.to_string(), QuotaRule::daily(3)),
            (quota_keys::AFFIRMATIONS_DAILY.to_string(), QuotaRule::daily(3)),
            (quota_keys::QUIZZES_DAILY.to_string(), QuotaRule::daily(1)),
        ]),
        features: feature_set(&[
            features::MEMORY_CAPTURE,
            features::AFFIRMATIONS,
            features::EMOTION_QUIZ,
        ]),
        limits: UserLimits {
            max_memories: Limit::Limited(10),
            max_storage_mb: Limit::Limited(50),
            max_daily_analysis: Limit::Limited(0),
            max_photo_size_mb: Limit::Limited(5),
            max_audio_seconds: Limit::Limited(30),
        },
        pricing: PlanPricing::free(),
    }
}

fn free_plan() -> PlanDefinition {
    PlanDefinition {
        plan_type: PlanType::Free,
        display_name: "Free".to_string(),
        scopes: scopes(&[
            "memory.*",
            actions::MEDIA_PHOTO,
            actions::LOCATION_TAG,
            actions::AFFIRMATION_GENERATE,
            actions::QUIZ_TAKE,
            actions::ANALYSIS_BASIC,
            actions::SYNC_CLOUD,
        ]),
        quotas: BTreeMap::from([
            (quota_keys::MEMORIES_DAILY.to_string(), QuotaRule::daily(10)),
            (quota_keys::AFFIRMATIONS_DAILY.to_string(), QuotaRule::daily(5)),
            (quota_keys::QUIZZES_DAILY.to_string(), QuotaRule::daily(3)),
            (quota_keys::ANALYSIS_DAILY.to_string(), QuotaRule::daily(3)),
        ]),
        features: feature_set(&[
            features::MEMORY_CAPTURE,
            features::AFFIRMATIONS,
            features::EMOTION_QUIZ,
            features::CLOUD_SYNC,
        ]),
        limits: UserLimits {
            max_memories: Limit::Limited(100),
            max_storage_mb: Limit::Limited(500),
            max_daily_analysis: Limit::Limited(3),
            max_photo_size_mb: Limit::Limited(10),
            max_audio_seconds: Limit::Limited(60),
        },
        pricing: PlanPricing::free(),
    }
}

fn premium_plan() -> PlanDefinition {
    PlanDefinition {
        plan_type: PlanType::Premium,
        display_name: "Premium".to_string(),
        scopes: scopes(&[
            "memory.*",
            "media.*",
            "location.*",
            "affirmation.*",
            "quiz.*",
            "analysis.*",
            actions::EXPORT_DATA,
            "sync.*",
        ]),
        quotas: BTreeMap::from([
            (quota_keys::MEMORIES_DAILY.to_string(), QuotaRule::daily(-1)),
            (quota_keys::AFFIRMATIONS_DAILY.to_string(), QuotaRule::daily(-1)),
            (quota_keys::QUIZZES_DAILY.to_string(), QuotaRule::daily(-1)),
            (quota_keys::ANALYSIS_DAILY.to_string(), QuotaRule::daily(50)),
            (quota_keys::EXPORTS_MONTHLY.to_string(), QuotaRule::monthly(10)),
        ]),
        features: feature_set(&[
            features::MEMORY_CAPTURE,
            features::AFFIRMATIONS,
            features::EMOTION_QUIZ,
            features::AUDIO_NOTES,
            features::AI_ANALYSIS,
            features::CLOUD_SYNC,
            features::DATA_EXPORT,
        ]),
        limits: UserLimits {
            max_memories: Limit::Unlimited,
            max_storage_mb: Limit::Limited(10 * 1024),
            max_daily_analysis: Limit::Limited(50),
            max_photo_size_mb: Limit::Limited(25),
            max_audio_seconds: Limit::Limited(300),
        },
        pricing: PlanPricing::usd(499, 4999),
    }
}

fn enterprise_plan() -> PlanDefinition {
    PlanDefinition {
        plan_type: PlanType::Enterprise,
        display_name: "Enterprise".to_string(),
        scopes: scopes(&["*"]),
        quotas: BTreeMap::from([
            (quota_keys::MEMORIES_DAILY.to_string(), QuotaRule::daily(-1)),
            (quota_keys::AFFIRMATIONS_DAILY.to_string(), QuotaRule::daily(-1)),
            (quota_keys::QUIZZES_DAILY.to_string(), QuotaRule::daily(-1)),
            (quota_keys::ANALYSIS_DAILY.to_string(), QuotaRule::daily(-1)),
            (quota_keys::EXPORTS_MONTHLY.to_string(), QuotaRule::monthly(-1)),
        ]),
        features: feature_set(&[
            features::MEMORY_CAPTURE,
            features::AFFIRMATIONS,
            features::EMOTION_QUIZ,
            features::AUDIO_NOTES,
            features::AI_ANALYSIS,
            features::CLOUD_SYNC,
            features::DATA_EXPORT,
            features::TEAM_SPACES,
        ]),
        limits: UserLimits {
            max_memories: Limit::Unlimited,
            max_storage_mb: Limit::Limited(100 * 1024),
            max_daily_analysis: Limit::Unlimited,
            max_photo_size_mb: Limit::Limited(50),
            max_audio_seconds: Limit::Limited(600),
        },
        pricing: PlanPricing::usd(1999, 19999),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_limit_serde_uses_minus_one() {
        assert_eq!(serde_json::to_string(&Limit::Unlimited).unwrap(), "-1");
        assert_eq!(serde_json::from_str::<Limit>("-1").unwrap(), Limit::Unlimited);
        assert_eq!(serde_json::from_str::<Limit>("12").unwrap(), Limit::Limited(12));
    }

    #[test]
    fn test_limit_arithmetic() {
        let limit = Limit::Limited(3);
        assert!(limit.allows(2, 1));
        assert!(!limit.allows(3, 1));
        assert_eq!(limit.remaining(5), Some(0));
        assert_eq!(Limit::Limited(0).usage_ratio(0), Some(1.0));
        assert!(Limit::Unlimited.allows(u64::MAX, 1));
        assert!(Limit::Unlimited.exceeds(&Limit::Limited(1_000)));
        assert!(!Limit::Limited(3).exceeds(&Limit::Limited(3)));
    }

    #[test]
    fn test_plan_ordering_and_upgrades() {
        assert!(PlanType::Guest < PlanType::Enterprise);
        assert_eq!(PlanType::Premium.next_tier(), Some(PlanType::Enterprise));
        assert_eq!(PlanType::Enterprise.next_tier(), None);
        let upgrades: Vec<_> = PlanType::Free.upgrades().collect();
        assert_eq!(upgrades, vec![PlanType::Premium, PlanType::Enterprise]);
    }

    #[test]
    fn test_catalog_fallback_to_guest() {
        let catalog = PlanCatalog::standard();
        assert_eq!(catalog.get_by_name("platinum").plan_type, PlanType::Guest);
        assert_eq!(catalog.get_by_name("Premium").plan_type, PlanType::Premium);

        let partial = PlanCatalog::from_definitions(vec![guest_plan()]).unwrap();
        assert_eq!(partial.get(PlanType::Enterprise).plan_type, PlanType::Guest);

        assert!(PlanCatalog::from_definitions(vec![free_plan()]).is_err());
    }

    #[test]
    fn test_reset_windows() {
        let now = Utc.with_ymd_and_hms(2024, 12, 31, 18, 30, 0).unwrap();
        assert_eq!(
            ResetWindow::Daily.window_start(now),
            Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap()
        );
        assert_eq!(
            ResetWindow::Daily.next_reset(now),
            Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            ResetWindow::Monthly.window_start(now),
            Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            ResetWindow::Monthly.next_reset(now),
            Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(ResetWindow::Never.next_reset(now), None);
    }

    #[test]
    fn test_storage_limits_in_bytes() {
        let catalog = PlanCatalog::standard();
        let guest = catalog.get(PlanType::Guest);
        assert_eq!(
            guest.limits.max_storage_bytes(),
            Limit::Limited(50 * 1024 * 1024)
        );
        assert!(guest.pricing.is_free());
        assert!(!catalog.get(PlanType::Premium).pricing.is_free());
    }
}
