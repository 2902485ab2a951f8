//! Stable release branches and their divergence from the trunk.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the divergence point of a branch was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceConfidence {
    /// Computed as the trunk/branch merge-base.
    Exact,
    /// Approximated by the earliest tag on the branch.
    Approximate,
}

/// The commit at which a branch's independent history began.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divergence {
    /// Merge-base commit. Absent for approximations.
    pub commit: Option<String>,
    pub date: DateTime<Utc>,
    pub confidence: DivergenceConfidence,
}

impl Divergence {
    pub fn exact(commit: impl Into<String>, date: DateTime<Utc>) -> Self {
        Self {
            commit: Some(commit.into()),
            date,
            confidence: DivergenceConfidence::Exact,
        }
    }

    pub fn approximate(date: DateTime<Utc>) -> Self {
        Self {
            commit: None,
            date,
            confidence: DivergenceConfidence::Approximate,
        }
    }

    pub fn is_approximate(&self) -> bool {
        self.confidence == DivergenceConfidence::Approximate
    }
}

/// Result of analysing one stable branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub name: String,
    /// `None` when neither a merge-base nor any tag date is known.
    pub divergence: Option<Divergence>,
    /// Tag names on this branch, oldest first.
    pub tags: Vec<String>,
    /// PRs merged into the branch or targeted at it by title.
    pub direct_prs: BTreeSet<u64>,
    /// Trunk PRs merged no later than the divergence point.
    pub trunk_prs: BTreeSet<u64>,
}

impl BranchInfo {
    pub fn is_approximate(&self) -> bool {
        self.divergence.as_ref().map_or(true, Divergence::is_approximate)
    }

    /// Every PR attributable to the branch, in ascending PR order.
    pub fn attributable(&self) -> impl Iterator<Item = u64> + '_ {
        self.direct_prs.union(&self.trunk_prs).copied()
    }

    pub fn pr_count(&self) -> usize {
        self.direct_prs.len() + self.trunk_prs.len()
    }
}
