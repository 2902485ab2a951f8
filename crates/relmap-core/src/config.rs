//! Run configuration.
//!
//! Every field has a default matching the Polkadot SDK / fellowship runtimes
//! setup, so an empty (or missing) config file is valid.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{EngineError, Result, TagConvention};

/// A dependency whose version fingerprints an SDK tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedDependency {
    /// Package name as it appears in the runtime lockfile.
    pub name: String,
    /// Path of the package manifest inside the SDK repository.
    pub manifest_path: String,
}

impl TrackedDependency {
    pub fn new(name: &str, manifest_path: &str) -> Self {
        Self {
            name: name.to_string(),
            manifest_path: manifest_path.to_string(),
        }
    }
}

/// Top-level relmap configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// `owner/name` of the SDK repository.
    pub sdk_repo: String,
    /// `owner/name` of the runtime repository.
    pub runtime_repo: String,
    /// Trunk branch of the SDK repository.
    pub trunk: String,
    /// Prefix of stable release tags.
    pub tag_prefix: String,
    /// Regex (anchored at the normalized tag start) yielding the branch name.
    pub branch_pattern: String,
    pub tracked: Vec<TrackedDependency>,
    /// Upper bound on in-flight remote requests.
    pub max_concurrency: usize,
    /// Lower bound of the trunk window for the oldest branch. When unset the
    /// oldest branch inherits no trunk PRs.
    pub trunk_floor: Option<DateTime<Utc>>,
    /// Newest runtime releases considered per run.
    pub max_releases: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            sdk_repo: "paritytech/polkadot-sdk".to_string(),
            runtime_repo: "polkadot-fellows/runtimes".to_string(),
            trunk: "master".to_string(),
            tag_prefix: "polkadot-".to_string(),
            branch_pattern: r"^stable\d{4}".to_string(),
            tracked: vec![
                TrackedDependency::new("polkadot-primitives", "polkadot/primitives/Cargo.toml"),
                TrackedDependency::new("sp-runtime", "substrate/primitives/runtime/Cargo.toml"),
                TrackedDependency::new("frame-support", "substrate/frame/support/Cargo.toml"),
            ],
            max_concurrency: 8,
            trunk_floor: None,
            max_releases: 100,
        }
    }
}

impl TrackerConfig {
    /// Load from a TOML file; missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: TrackerConfig = toml::from_str(&raw)
            .map_err(|e| EngineError::InvalidConfig(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given and present, otherwise use defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) if p.exists() => Self::from_file(p),
            Some(p) => Err(EngineError::InvalidConfig(format!(
                "config file not found: {}",
                p.display()
            ))),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.tracked.is_empty() {
            return Err(EngineError::InvalidConfig(
                "at least one tracked dependency is required".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(EngineError::InvalidConfig(
                "max_concurrency must be positive".to_string(),
            ));
        }
        if self.max_releases == 0 {
            return Err(EngineError::InvalidConfig(
                "max_releases must be positive".to_string(),
            ));
        }
        if self.trunk.trim().is_empty() {
            return Err(EngineError::InvalidConfig("trunk must not be empty".to_string()));
        }
        self.convention()?;
        Ok(())
    }

    pub fn convention(&self) -> Result<TagConvention> {
        TagConvention::new(self.tag_prefix.clone(), &self.branch_pattern)
    }

    pub fn tracked_names(&self) -> Vec<String> {
        self.tracked.iter().map(|d| d.name.clone()).collect()
    }
}
