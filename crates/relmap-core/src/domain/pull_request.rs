//! Pull requests and how they enter a release branch.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a changeset entered the branch a release was cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionKind {
    /// Merged into the stable branch itself.
    Direct,
    /// Merged into the trunk before the branch was cut.
    FromTrunk,
    /// Re-applied to the stable branch after landing elsewhere.
    Backport,
}

impl AttributionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributionKind::Direct => "direct",
            AttributionKind::FromTrunk => "from_trunk",
            AttributionKind::Backport => "backport",
        }
    }
}

impl fmt::Display for AttributionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A merged pull request against the SDK repository.
///
/// Created once from API data and cached. The only later change is attaching
/// the resolved backport reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub author: String,
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Branch the PR was merged into.
    pub target_branch: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Root original PR when this PR is a backport.
    #[serde(default)]
    pub backport_of: Option<u64>,
}

impl PullRequest {
    pub fn is_backport(&self) -> bool {
        self.backport_of.is_some()
    }

    /// Merged no later than `cutoff`. Unmerged PRs never qualify.
    pub fn merged_by(&self, cutoff: DateTime<Utc>) -> bool {
        self.merged_at.is_some_and(|at| at <= cutoff)
    }

    /// Whether the title carries the `[branch]` targeting convention.
    pub fn title_targets(&self, branch: &str) -> bool {
        let marker = format!("[{}]", branch.to_lowercase());
        self.title.to_lowercase().contains(&marker)
    }
}
