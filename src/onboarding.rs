//! Startup routing and the onboarding wizard
//!
//! Both machines are total: a transition that does not apply to the current
//! state leaves it unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::access::{AccessGuard, PlanType};
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::storage::kv::{get_json, put_json};
use crate::storage::KeyValueStore;

/// Where the app goes after launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StartupState {
    #[default]
    Checking,
    ReadyForOnboarding,
    OnboardingActive,
    ReadyForAuth,
    ReadyForDashboard,
}

impl StartupState {
    /// Leave `Checking` once persisted state is known
    pub fn resolve(self, onboarding_completed: bool, authenticated: bool) -> Self {
        match self {
            StartupState::Checking => match (onboarding_completed, authenticated) {
                (false, _) => StartupState::ReadyForOnboarding,
                (true, false) => StartupState::ReadyForAuth,
                (true, true) => StartupState::ReadyForDashboard,
            },
            other => other,
        }
    }

    pub fn begin_onboarding(self) -> Self {
        match self {
            StartupState::ReadyForOnboarding => StartupState::OnboardingActive,
            other => other,
        }
    }

    pub fn complete_onboarding(self) -> Self {
        match self {
            StartupState::OnboardingActive => StartupState::ReadyForAuth,
            other => other,
        }
    }

    pub fn authenticated(self) -> Self {
        match self {
            StartupState::ReadyForAuth => StartupState::ReadyForDashboard,
            other => other,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StartupState::ReadyForDashboard)
    }
}

/// Wizard pages in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnboardingStep {
    #[default]
    Welcome,
    PlanSelection,
    FeaturesOverview,
    Completed,
}

impl OnboardingStep {
    pub const ALL: [OnboardingStep; 4] = [
        OnboardingStep::Welcome,
        OnboardingStep::PlanSelection,
        OnboardingStep::FeaturesOverview,
        OnboardingStep::Completed,
    ];

    /// Next page; `Completed` stays put
    pub fn next(&self) -> Self {
        match self {
            OnboardingStep::Welcome => OnboardingStep::PlanSelection,
            OnboardingStep::PlanSelection => OnboardingStep::FeaturesOverview,
            OnboardingStep::FeaturesOverview | OnboardingStep::Completed => {
                OnboardingStep::Completed
            }
        }
    }

    /// Previous page; `Welcome` stays put and `Completed` is final
    pub fn previous(&self) -> Self {
        match self {
            OnboardingStep::Welcome | OnboardingStep::PlanSelection => OnboardingStep::Welcome,
            OnboardingStep::FeaturesOverview => OnboardingStep::PlanSelection,
            OnboardingStep::Completed => OnboardingStep::Completed,
        }
    }

    /// Position for progress indicators (0-based)
    pub fn index(&self) -> usize {
        match self {
            OnboardingStep::Welcome => 0,
            OnboardingStep::PlanSelection => 1,
            OnboardingStep::FeaturesOverview => 2,
            OnboardingStep::Completed => 3,
        }
    }
}

/// Persisted wizard state of one user
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OnboardingProgress {
    pub step: OnboardingStep,
    pub selected_plan: Option<PlanType>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl OnboardingProgress {
    pub fn is_completed(&self) -> bool {
        self.step == OnboardingStep::Completed
    }
}

/// Onboarding wizard backed by the key-value store
pub struct OnboardingFlow {
    store: Arc<dyn KeyValueStore>,
    access: Arc<AccessGuard>,
    clock: Arc<dyn Clock>,
}

impl OnboardingFlow {
    /// Progress lives in `store`; the chosen plan is applied through `access`
    pub fn new(store: Arc<dyn KeyValueStore>, access: Arc<AccessGuard>) -> Self {
        Self {
            store,
            access,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn key(user_id: &str) -> String {
        format!("onboarding:{}", user_id)
    }

    /// Saved progress; unreadable state restarts the wizard
    pub fn progress(&self, user_id: &str) -> OnboardingProgress {
        match get_json::<OnboardingProgress>(self.store.as_ref(), &Self::key(user_id)) {
            Ok(Some(progress)) => progress,
            Ok(None) => OnboardingProgress::default(),
            Err(e) => {
                tracing::warn!("Could not read onboarding for {}, restarting: {}", user_id, e);
                OnboardingProgress::default()
            }
        }
    }

    fn save(&self, user_id: &str, progress: &OnboardingProgress) -> Result<()> {
        put_json(self.store.as_ref(), &Self::key(user_id), progress)
    }

    pub fn is_completed(&self, user_id: &str) -> bool {
        self.progress(user_id).is_completed()
    }

    /// Move forward; reaching `Completed` finishes onboarding
    pub fn advance(&self, user_id: &str) -> Result<OnboardingStep> {
        let progress = self.progress(user_id);
        match progress.step.next() {
            OnboardingStep::Completed => Ok(self.complete(user_id)?.step),
            step => {
                self.save(user_id, &OnboardingProgress { step, ..progress })?;
                Ok(step)
            }
        }
    }

    pub fn back(&self, user_id: &str) -> Result<OnboardingStep> {
        let progress = self.progress(user_id);
        let step = progress.step.previous();
        if step != progress.step {
            self.save(user_id, &OnboardingProgress { step, ..progress })?;
        }
        Ok(step)
    }

    /// Remember the chosen plan; ignored once onboarding is done
    pub fn select_plan(&self, user_id: &str, plan: PlanType) -> Result<()> {
        let mut progress = self.progress(user_id);
        if progress.is_completed() {
            tracing::debug!("Onboarding already completed for {}", user_id);
            return Ok(());
        }
        progress.selected_plan = Some(plan);
        self.save(user_id, &progress)
    }

    /// Finish onboarding and assign the selected plan (Guest when none).
    /// Completing twice changes nothing.
    pub fn complete(&self, user_id: &str) -> Result<OnboardingProgress> {
        let progress = self.progress(user_id);
        if progress.is_completed() {
            return Ok(progress);
        }

        let plan = progress.selected_plan.unwrap_or(PlanType::Guest);
        self.access.change_plan(user_id, plan)?;

        let done = OnboardingProgress {
            step: OnboardingStep::Completed,
            selected_plan: Some(plan),
            completed_at: Some(self.clock.now()),
        };
        self.save(user_id, &done)?;
        tracing::info!("Onboarding completed for {} on plan {}", user_id, plan);
        Ok(done)
    }

    /// Start a fresh wizard (the plan assignment is kept)
    pub fn reset(&self, user_id: &str) -> Result<()> {
        self.store.delete(&Self::key(user_id))
    }

    /// Startup routing for the user given the session state
    pub fn startup_state(&self, user_id: &str, authenticated: bool) -> StartupState {
        StartupState::Checking.resolve(self.is_completed(user_id), authenticated)
    }
}
