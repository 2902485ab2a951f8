//! Branch analysis: divergence points and per-branch PR attribution.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::domain::{BranchInfo, Divergence, PullRequest};
use crate::metrics::METRICS;
use crate::registry::TagRegistry;
use crate::source::SdkSource;

/// Divergence point of `branch` from `trunk`.
///
/// Uses the merge-base of the two refs. When that query fails (deleted
/// branch, unknown ref, exhausted retries) the earliest tag date on the
/// branch is used instead and flagged approximate. `None` when neither is
/// available.
pub async fn resolve_divergence(
    source: &dyn SdkSource,
    trunk: &str,
    branch: &str,
    earliest_tag: Option<DateTime<Utc>>,
) -> Option<Divergence> {
    match source.merge_base(trunk, branch).await {
        Ok(base) => {
            debug!(branch, sha = %base.sha, date = %base.date, "merge-base resolved");
            Some(Divergence::exact(base.sha, base.date))
        }
        Err(e) => {
            METRICS.inc_degraded_fetches();
            warn!(branch, error = %e, "merge-base unavailable, approximating from earliest tag");
            earliest_tag.map(Divergence::approximate)
        }
    }
}

/// Pure attribution of materialized PRs to stable branches.
pub struct BranchAnalyzer<'a> {
    trunk: &'a str,
    prs: &'a BTreeMap<u64, PullRequest>,
}

impl<'a> BranchAnalyzer<'a> {
    pub fn new(trunk: &'a str, prs: &'a BTreeMap<u64, PullRequest>) -> Self {
        Self { trunk, prs }
    }

    /// Attribute PRs to one branch.
    ///
    /// Direct PRs are merged into the branch or carry the `[branch]` title
    /// marker. Trunk PRs are merged into the trunk no later than the
    /// divergence date (inclusive) and are never also direct.
    pub fn analyze(
        &self,
        name: &str,
        divergence: Option<Divergence>,
        tags: Vec<String>,
    ) -> BranchInfo {
        let direct_prs: BTreeSet<u64> = self
            .prs
            .values()
            .filter(|pr| pr.merged_at.is_some())
            .filter(|pr| pr.target_branch == name || pr.title_targets(name))
            .map(|pr| pr.number)
            .collect();

        let trunk_prs: BTreeSet<u64> = match &divergence {
            Some(d) => self
                .prs
                .values()
                .filter(|pr| pr.target_branch == self.trunk && pr.merged_by(d.date))
                .map(|pr| pr.number)
                .filter(|n| !direct_prs.contains(n))
                .collect(),
            None => BTreeSet::new(),
        };

        BranchInfo {
            name: name.to_string(),
            divergence,
            tags,
            direct_prs,
            trunk_prs,
        }
    }

    /// Analyse every branch known to the registry.
    pub fn analyze_all(
        &self,
        registry: &TagRegistry,
        divergences: &BTreeMap<String, Option<Divergence>>,
    ) -> BTreeMap<String, BranchInfo> {
        registry
            .by_branch()
            .into_iter()
            .map(|(branch, tags)| {
                let divergence = divergences.get(&branch).cloned().flatten();
                let names = tags.iter().map(|t| t.name.clone()).collect();
                let info = self.analyze(&branch, divergence, names);
                (branch, info)
            })
            .collect()
    }
}
