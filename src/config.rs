//! Configuration file and environment overrides
//!
//! ```toml
//! [storage]
//! db_path = "~/.local/share/soulsnaps/snaps.db"
//!
//! [sync]
//! max_attempts = 5
//! remote_url = "https://example.supabase.co"
//!
//! [features]
//! ai_analysis = false
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::access::FeatureToggles;
use crate::error::{Result, SoulSnapsError};
use crate::sync::{MediaBuckets, AUDIO_BUCKET, DEFAULT_MAX_ATTEMPTS, IMAGE_BUCKET};
use crate::types::StorageConfig;

pub const ENV_DB_PATH: &str = "SOULSNAPS_DB_PATH";
pub const ENV_REMOTE_URL: &str = "SOULSNAPS_REMOTE_URL";
pub const ENV_REMOTE_API_KEY: &str = "SOULSNAPS_REMOTE_API_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub db_path: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            db_path: "~/.local/share/soulsnaps/snaps.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub max_attempts: u32,
    pub drain_interval_ms: u64,
    pub batch_size: usize,
    pub photo_bucket: String,
    pub audio_bucket: String,
    pub remote_url: Option<String>,
    pub remote_api_key: Option<String>,
    pub remote_table: String,
    /// S3-compatible endpoint for media; AWS defaults when unset
    pub object_endpoint: Option<String>,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            drain_interval_ms: 30_000,
            batch_size: 25,
            photo_bucket: IMAGE_BUCKET.to_string(),
            audio_bucket: AUDIO_BUCKET.to_string(),
            remote_url: None,
            remote_api_key: None,
            remote_table: "memories".to_string(),
            object_endpoint: None,
        }
    }
}

impl SyncSection {
    pub fn buckets(&self) -> MediaBuckets {
        MediaBuckets {
            photo: self.photo_bucket.clone(),
            audio: self.audio_bucket.clone(),
        }
    }

    pub fn drain_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.drain_interval_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoulSnapsConfig {
    pub storage: StorageSection,
    pub sync: SyncSection,
    /// Feature kill-switches (flag name → enabled)
    pub features: HashMap<String, bool>,
}

impl SoulSnapsConfig {
    /// `~/.config/soulsnaps/config.toml` (platform equivalent)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("soulsnaps").join("config.toml"))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| SoulSnapsError::Config(e.to_string()))
    }

    /// Read a config file; a missing file yields defaults
    pub fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&raw)
            .map_err(|e| SoulSnapsError::Config(format!("{}: {}", path.display(), e)))?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load `path` (or the default location), then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path.map(PathBuf::from).or_else(Self::default_path) {
            Some(path) => Self::load_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in `load`)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db_path) = lookup(ENV_DB_PATH).filter(|v| !v.is_empty()) {
            self.storage.db_path = db_path;
        }
        if let Some(url) = lookup(ENV_REMOTE_URL).filter(|v| !v.is_empty()) {
            self.sync.remote_url = Some(url);
        }
        if let Some(key) = lookup(ENV_REMOTE_API_KEY).filter(|v| !v.is_empty()) {
            self.sync.remote_api_key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.db_path.trim().is_empty() {
            return Err(SoulSnapsError::Config("storage.db_path is empty".into()));
        }
        if self.sync.max_attempts == 0 {
            return Err(SoulSnapsError::Config(
                "sync.max_attempts must be at least 1".into(),
            ));
        }
        if self.sync.batch_size == 0 {
            return Err(SoulSnapsError::Config(
                "sync.batch_size must be at least 1".into(),
            ));
        }
        if self.sync.remote_url.is_some() && self.sync.remote_api_key.is_none() {
            return Err(SoulSnapsError::Config(
                "sync.remote_url is set but no API key was given".into(),
            ));
        }
        Ok(())
    }

    /// Storage settings with `~` expanded
    pub fn storage_config(&self) -> StorageConfig {
        let db_path = if self.storage.db_path == ":memory:" {
            self.storage.db_path.clone()
        } else {
            shellexpand::tilde(&self.storage.db_path).to_string()
        };
        StorageConfig { db_path }
    }

    pub fn feature_toggles(&self) -> FeatureToggles {
        FeatureToggles::from_map(&self.features)
    }
}
