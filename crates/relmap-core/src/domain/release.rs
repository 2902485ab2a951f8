//! Downstream runtime releases and their SDK binding.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How confidently a release was bound to an SDK tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    /// A single tag had the highest dependency score.
    Unique,
    /// Ties were broken by the closest preceding tag date.
    Temporal,
    /// No preceding tag among the ties; greatest tag name chosen.
    Fallback,
    /// No tag shares any tracked dependency version.
    Unmatched,
}

impl MatchConfidence {
    /// Ambiguous bindings are surfaced in statistics.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, MatchConfidence::Fallback)
    }
}

/// A runtime release as discovered upstream, before matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeRelease {
    /// Release tag, e.g. `v1.4.0`.
    pub tag: String,
    pub created_at: DateTime<Utc>,
    /// Tracked package name -> pinned version.
    #[serde(default)]
    pub dependency_versions: BTreeMap<String, String>,
}

impl RuntimeRelease {
    /// Version string without the leading `v`.
    pub fn version(&self) -> &str {
        self.tag.strip_prefix('v').unwrap_or(&self.tag)
    }
}

/// A runtime release bound (or not) to an SDK tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub tag: String,
    pub created_at: DateTime<Utc>,
    pub dependency_versions: BTreeMap<String, String>,
    /// Matched SDK tag name. `None` is a recorded gap.
    pub matched_tag: Option<String>,
    pub sdk_branch: Option<String>,
    pub sdk_date: Option<DateTime<Utc>>,
    pub confidence: MatchConfidence,
}

impl Release {
    pub fn version(&self) -> &str {
        self.tag.strip_prefix('v').unwrap_or(&self.tag)
    }

    pub fn is_matched(&self) -> bool {
        self.matched_tag.is_some()
    }
}
