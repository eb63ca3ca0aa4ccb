//! SoulSnaps - journaling core
//!
//! Shared business logic for the SoulSnaps apps: plan entitlements and
//! quotas, offline-first memory storage with a durable sync queue, and the
//! startup/onboarding state machines.

pub mod access;
pub mod affirmation;
pub mod clock;
pub mod config;
pub mod error;
pub mod onboarding;
pub mod service;
pub mod storage;
pub mod sync;
pub mod types;

pub use access::{AccessGuard, AccessResult, CapacityGuard, PlanCatalog, PlanType};
pub use config::SoulSnapsConfig;
pub use error::{Result, SoulSnapsError};
pub use onboarding::{OnboardingFlow, OnboardingStep, StartupState};
pub use service::MemoryService;
pub use storage::Storage;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
