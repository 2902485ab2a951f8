//! SDK release tags and the naming convention that identifies them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::{EngineError, Result};

/// An SDK release point. Immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    /// Normalized tag name (convention prefix stripped), e.g. `stable2409-1`.
    pub name: String,

    /// Commit the tag points at.
    pub commit: String,

    /// Committer date of the tagged commit.
    pub date: DateTime<Utc>,

    /// Stable branch the tag belongs to, e.g. `stable2409`.
    pub branch: String,

    /// Tracked package name -> version. Packages whose manifest could not be
    /// read are absent.
    #[serde(default)]
    pub versions: BTreeMap<String, String>,

    /// `true` when every tracked dependency resolved to a version.
    #[serde(default)]
    pub complete: bool,
}

impl Tag {
    pub fn version_of(&self, package: &str) -> Option<&str> {
        self.versions.get(package).map(String::as_str)
    }
}

/// Stable-release naming convention.
///
/// Raw tag `polkadot-stable2409-1` with prefix `polkadot-` and branch
/// pattern `^stable\d{4}` normalizes to `stable2409-1` on branch `stable2409`.
#[derive(Debug, Clone)]
pub struct TagConvention {
    prefix: String,
    branch_pattern: Regex,
}

impl TagConvention {
    pub fn new(prefix: impl Into<String>, branch_pattern: &str) -> Result<Self> {
        let branch_pattern =
            Regex::new(branch_pattern).map_err(|source| EngineError::InvalidPattern {
                pattern: branch_pattern.to_string(),
                source,
            })?;
        Ok(Self {
            prefix: prefix.into(),
            branch_pattern,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Strip the prefix from a raw tag name. `None` when the tag is not a
    /// stable release tag.
    pub fn normalize(&self, raw: &str) -> Option<String> {
        let stripped = raw.strip_prefix(self.prefix.as_str())?;
        self.branch_of(stripped)?;
        Some(stripped.to_string())
    }

    /// Branch a normalized tag belongs to.
    pub fn branch_of(&self, normalized: &str) -> Option<String> {
        self.branch_pattern
            .find(normalized)
            .filter(|m| m.start() == 0)
            .map(|m| m.as_str().to_string())
    }

    /// Whether a raw tag name follows the convention.
    pub fn matches(&self, raw: &str) -> bool {
        self.normalize(raw).is_some()
    }
}

impl Default for TagConvention {
    fn default() -> Self {
        Self {
            prefix: "polkadot-".to_string(),
            branch_pattern: Regex::new(r"^stable\d{4}").expect("static pattern compiles"),
        }
    }
}
