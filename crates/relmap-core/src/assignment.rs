//! First-appearance assignment of PRs to runtime releases.
//!
//! Releases are processed in chronological order of their matched SDK tag.
//! Each release claims every PR attributable to its SDK branch that was
//! merged no later than the tag date and is not yet assigned. An assigned PR
//! is never considered again, so processing order decides the mapping.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backport::BackportIndex;
use crate::domain::{AttributionKind, BranchInfo, InvariantViolation, PullRequest, Release};

/// One PR shipped by one release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub pr: u64,
    /// Runtime version, without the leading `v`.
    pub release: String,
    pub sdk_tag: String,
    pub sdk_branch: String,
    pub attribution: AttributionKind,
    /// Root original when the PR is a backport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_pr: Option<u64>,
}

/// PR number -> its single assignment.
pub type AssignmentMap = BTreeMap<u64, Assignment>;

/// Releases in processing order: SDK tag date, then release date, then
/// version. Unmatched releases sort first and never claim PRs.
///
/// Outputs are keyed by version, so tags that normalise to the same version
/// (`v1.0` and `1.0`) collapse to one release: a matched one over an
/// unmatched one, otherwise the first in processing order.
#[derive(Debug, Clone, Default)]
pub struct ReleaseSchedule {
    releases: Vec<Release>,
}

fn processing_order(a: &Release, b: &Release) -> Ordering {
    a.sdk_date
        .cmp(&b.sdk_date)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.tag.cmp(&b.tag))
}

impl ReleaseSchedule {
    pub fn new(releases: impl IntoIterator<Item = Release>) -> Self {
        let mut by_version: BTreeMap<String, Release> = BTreeMap::new();
        for release in releases {
            let version = release.version().to_string();
            let Some(kept) = by_version.get(&version) else {
                by_version.insert(version, release);
                continue;
            };
            let preferred = match (kept.is_matched(), release.is_matched()) {
                (false, true) => true,
                (true, false) => false,
                _ => processing_order(&release, kept) == Ordering::Less,
            };
            let dropped = if preferred {
                by_version.insert(version.clone(), release).map(|r| r.tag)
            } else {
                Some(release.tag)
            };
            warn!(
                version = %version,
                dropped = ?dropped,
                "duplicate runtime version; keeping one release"
            );
        }

        let mut releases: Vec<Release> = by_version.into_values().collect();
        releases.sort_by(processing_order);
        Self { releases }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Release> {
        self.releases.iter()
    }

    pub fn len(&self) -> usize {
        self.releases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.releases.is_empty()
    }
}

/// Result of an assignment pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentOutcome {
    /// Every assignment, including ones seeded from a prior run.
    pub assignments: AssignmentMap,
    /// Release version -> PRs newly assigned to it during this pass.
    pub by_release: BTreeMap<String, Vec<u64>>,
}

impl AssignmentOutcome {
    /// Check the first-appearance rule: every PR listed by at most one
    /// release, and that release is the one its assignment names.
    pub fn verify(&self) -> Result<(), InvariantViolation> {
        let mut seen: BTreeMap<u64, Vec<String>> = BTreeMap::new();
        for (release, prs) in &self.by_release {
            for pr in prs {
                seen.entry(*pr).or_default().push(release.clone());
            }
        }
        for (pr, releases) in seen {
            let consistent = self
                .assignments
                .get(&pr)
                .is_some_and(|a| releases.len() == 1 && a.release == releases[0]);
            if !consistent {
                let mut all = releases;
                if let Some(a) = self.assignments.get(&pr) {
                    if !all.contains(&a.release) {
                        all.push(a.release.clone());
                    }
                }
                return Err(InvariantViolation::MultipleAssignments {
                    pr,
                    count: all.len(),
                    releases: all,
                });
            }
        }
        Ok(())
    }
}

pub struct AssignmentEngine<'a> {
    branches: &'a BTreeMap<String, BranchInfo>,
    prs: &'a BTreeMap<u64, PullRequest>,
    backports: &'a BackportIndex,
    assigned: AssignmentMap,
}

impl<'a> AssignmentEngine<'a> {
    pub fn new(
        branches: &'a BTreeMap<String, BranchInfo>,
        prs: &'a BTreeMap<u64, PullRequest>,
        backports: &'a BackportIndex,
    ) -> Self {
        Self {
            branches,
            prs,
            backports,
            assigned: AssignmentMap::new(),
        }
    }

    /// Seed the seen-set with assignments of an earlier run.
    pub fn with_prior(mut self, prior: AssignmentMap) -> Self {
        self.assigned = prior;
        self
    }

    fn attribution(&self, pr: u64, branch: &BranchInfo) -> (AttributionKind, Option<u64>) {
        if let Some(original) = self.backports.original_of(pr) {
            (AttributionKind::Backport, Some(original))
        } else if branch.direct_prs.contains(&pr) {
            (AttributionKind::Direct, None)
        } else {
            (AttributionKind::FromTrunk, None)
        }
    }

    /// Assign the not-yet-seen PRs of one release. Returns them in ascending
    /// PR order; unmatched releases and unknown branches claim nothing.
    pub fn assign_release(&mut self, release: &Release) -> Vec<u64> {
        let (Some(sdk_tag), Some(branch_name), Some(cutoff)) = (
            release.matched_tag.as_deref(),
            release.sdk_branch.as_deref(),
            release.sdk_date,
        ) else {
            return Vec::new();
        };
        let branches = self.branches;
        let Some(branch) = branches.get(branch_name) else {
            debug!(release = %release.tag, branch = branch_name, "branch not analysed");
            return Vec::new();
        };

        let candidates: Vec<u64> = branch
            .attributable()
            .filter(|n| !self.assigned.contains_key(n))
            .filter(|n| self.prs.get(n).is_some_and(|pr| pr.merged_by(cutoff)))
            .collect();

        for &pr in &candidates {
            let (attribution, original_pr) = self.attribution(pr, branch);
            self.assigned.insert(
                pr,
                Assignment {
                    pr,
                    release: release.version().to_string(),
                    sdk_tag: sdk_tag.to_string(),
                    sdk_branch: branch_name.to_string(),
                    attribution,
                    original_pr,
                },
            );
        }
        candidates
    }

    /// Run the pass over the whole schedule.
    pub fn assign_all(mut self, schedule: &ReleaseSchedule) -> AssignmentOutcome {
        let mut by_release = BTreeMap::new();
        for release in schedule.iter() {
            let new = self.assign_release(release);
            debug!(release = %release.tag, new = new.len(), "release assigned");
            by_release.insert(release.version().to_string(), new);
        }
        AssignmentOutcome {
            assignments: self.assigned,
            by_release,
        }
    }
}

/// PRs assigned per attribution kind.
pub fn count_by_attribution(assignments: &AssignmentMap) -> BTreeMap<AttributionKind, usize> {
    let mut counts = BTreeMap::new();
    for a in assignments.values() {
        *counts.entry(a.attribution).or_default() += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Divergence, MatchConfidence};

    fn pr(number: u64, branch: &str, merged_at: &str) -> PullRequest {
        PullRequest {
            number,
            title: format!("PR {number}"),
            author: "dev".to_string(),
            merged_at: Some(merged_at.parse().unwrap()),
            labels: vec![],
            target_branch: branch.to_string(),
            url: String::new(),
            body: None,
            backport_of: None,
        }
    }

    fn release(tag: &str, sdk_tag: &str, branch: &str, sdk_date: &str) -> Release {
        Release {
            tag: tag.to_string(),
            created_at: sdk_date.parse().unwrap(),
            dependency_versions: BTreeMap::new(),
            matched_tag: Some(sdk_tag.to_string()),
            sdk_branch: Some(branch.to_string()),
            sdk_date: Some(sdk_date.parse().unwrap()),
            confidence: MatchConfidence::Unique,
        }
    }

    fn branch(name: &str, direct: &[u64], trunk: &[u64]) -> BranchInfo {
        BranchInfo {
            name: name.to_string(),
            divergence: Some(Divergence::exact("c", "2025-01-08T00:00:00Z".parse().unwrap())),
            tags: vec![],
            direct_prs: direct.iter().copied().collect(),
            trunk_prs: trunk.iter().copied().collect(),
        }
    }

    #[test]
    fn earlier_release_claims_shared_pr() {
        let prs: BTreeMap<u64, PullRequest> = [pr(200, "master", "2025-01-05T00:00:00Z")]
            .into_iter()
            .map(|p| (p.number, p))
            .collect();
        let branches: BTreeMap<String, BranchInfo> = [
            ("S1".to_string(), branch("S1", &[], &[200])),
            ("S2".to_string(), branch("S2", &[], &[200])),
        ]
        .into_iter()
        .collect();
        let index = BackportIndex::new();

        // Given out of order; the schedule sorts them.
        let schedule = ReleaseSchedule::new([
            release("v1.1", "S2", "S2", "2025-02-10T00:00:00Z"),
            release("v1.0", "S1", "S1", "2025-01-10T00:00:00Z"),
        ]);
        let outcome = AssignmentEngine::new(&branches, &prs, &index).assign_all(&schedule);

        assert_eq!(outcome.assignments[&200].release, "1.0");
        assert_eq!(outcome.assignments[&200].attribution, AttributionKind::FromTrunk);
        assert_eq!(outcome.by_release["1.0"], vec![200]);
        assert!(outcome.by_release["1.1"].is_empty());
        outcome.verify().unwrap();
    }

    #[test]
    fn duplicate_versions_collapse_to_one_release() {
        let prs: BTreeMap<u64, PullRequest> = [pr(5, "S1", "2025-01-02T00:00:00Z")]
            .into_iter()
            .map(|p| (p.number, p))
            .collect();
        let branches: BTreeMap<String, BranchInfo> =
            [("S1".to_string(), branch("S1", &[5], &[]))]
                .into_iter()
                .collect();
        let index = BackportIndex::new();

        let mut unmatched = release("v1.0", "S1", "S1", "2025-01-10T00:00:00Z");
        unmatched.matched_tag = None;
        unmatched.sdk_branch = None;
        unmatched.sdk_date = None;
        let schedule = ReleaseSchedule::new([
            unmatched,
            release("1.0", "S1", "S1", "2025-01-10T00:00:00Z"),
            release("v1.1", "S1", "S1", "2025-02-10T00:00:00Z"),
        ]);
        assert_eq!(schedule.len(), 2);
        assert_eq!(schedule.iter().next().unwrap().tag, "1.0");

        let outcome = AssignmentEngine::new(&branches, &prs, &index).assign_all(&schedule);
        assert_eq!(outcome.by_release["1.0"], vec![5]);
        assert_eq!(outcome.assignments[&5].release, "1.0");
        outcome.verify().unwrap();
    }

    #[test]
    fn duplicate_versions_keep_the_earliest_matched_release() {
        let schedule = ReleaseSchedule::new([
            release("v2.0", "S2", "S2", "2025-03-01T00:00:00Z"),
            release("2.0", "S1", "S1", "2025-01-10T00:00:00Z"),
        ]);
        let kept: Vec<&str> = schedule.iter().map(|r| r.tag.as_str()).collect();
        assert_eq!(kept, vec!["2.0"]);
    }

    #[test]
    fn prs_merged_after_tag_wait_for_later_release() {
        let prs: BTreeMap<u64, PullRequest> = [
            pr(10, "S1", "2025-01-09T00:00:00Z"),
            pr(11, "S1", "2025-01-20T00:00:00Z"),
        ]
        .into_iter()
        .map(|p| (p.number, p))
        .collect();
        let branches: BTreeMap<String, BranchInfo> =
            [("S1".to_string(), branch("S1", &[10, 11], &[]))].into_iter().collect();
        let index = BackportIndex::new();
        let schedule = ReleaseSchedule::new([
            release("v1.0", "S1", "S1", "2025-01-10T00:00:00Z"),
            release("v1.1", "S1-1", "S1", "2025-02-01T00:00:00Z"),
        ]);
        let outcome = AssignmentEngine::new(&branches, &prs, &index).assign_all(&schedule);
        assert_eq!(outcome.assignments[&10].release, "1.0");
        assert_eq!(outcome.assignments[&11].release, "1.1");
        assert_eq!(outcome.assignments[&11].attribution, AttributionKind::Direct);
    }

    #[test]
    fn backport_is_assigned_independently() {
        let prs: BTreeMap<u64, PullRequest> = [
            pr(250, "master", "2025-01-01T00:00:00Z"),
            pr(300, "S2", "2025-03-01T00:00:00Z"),
        ]
        .into_iter()
        .map(|p| (p.number, p))
        .collect();
        let branches: BTreeMap<String, BranchInfo> = [
            ("S1".to_string(), branch("S1", &[], &[250])),
            ("S2".to_string(), branch("S2", &[300], &[])),
        ]
        .into_iter()
        .collect();
        let mut index = BackportIndex::new();
        index.link(300, 250).unwrap();

        let schedule = ReleaseSchedule::new([
            release("v1.0", "S1", "S1", "2025-01-10T00:00:00Z"),
            release("v2.0", "S2-1", "S2", "2025-03-05T00:00:00Z"),
        ]);
        let outcome = AssignmentEngine::new(&branches, &prs, &index).assign_all(&schedule);
        let backport = &outcome.assignments[&300];
        assert_eq!(backport.release, "2.0");
        assert_eq!(backport.attribution, AttributionKind::Backport);
        assert_eq!(backport.original_pr, Some(250));
        assert_eq!(outcome.assignments[&250].release, "1.0");
    }

    #[test]
    fn unmatched_release_claims_nothing() {
        let prs: BTreeMap<u64, PullRequest> = [pr(1, "S1", "2025-01-01T00:00:00Z")]
            .into_iter()
            .map(|p| (p.number, p))
            .collect();
        let branches: BTreeMap<String, BranchInfo> =
            [("S1".to_string(), branch("S1", &[1], &[]))].into_iter().collect();
        let index = BackportIndex::new();
        let mut gap = release("v0.9", "S1", "S1", "2025-01-10T00:00:00Z");
        gap.matched_tag = None;
        gap.sdk_branch = None;
        gap.sdk_date = None;
        gap.confidence = MatchConfidence::Unmatched;

        let mut engine = AssignmentEngine::new(&branches, &prs, &index);
        assert!(engine.assign_release(&gap).is_empty());
    }

    #[test]
    fn prior_assignments_are_not_reassigned() {
        let prs: BTreeMap<u64, PullRequest> = [pr(1, "S1", "2025-01-01T00:00:00Z")]
            .into_iter()
            .map(|p| (p.number, p))
            .collect();
        let branches: BTreeMap<String, BranchInfo> =
            [("S1".to_string(), branch("S1", &[1], &[]))].into_iter().collect();
        let index = BackportIndex::new();
        let prior: AssignmentMap = [(
            1,
            Assignment {
                pr: 1,
                release: "0.1".to_string(),
                sdk_tag: "S0".to_string(),
                sdk_branch: "S0".to_string(),
                attribution: AttributionKind::Direct,
                original_pr: None,
            },
        )]
        .into_iter()
        .collect();

        let schedule = ReleaseSchedule::new([release("v1.0", "S1", "S1", "2025-01-10T00:00:00Z")]);
        let outcome = AssignmentEngine::new(&branches, &prs, &index)
            .with_prior(prior)
            .assign_all(&schedule);
        assert_eq!(outcome.assignments[&1].release, "0.1");
        assert!(outcome.by_release["1.0"].is_empty());
        outcome.verify().unwrap();
    }

    #[test]
    fn verify_flags_double_listing() {
        let mut outcome = AssignmentOutcome::default();
        outcome.assignments.insert(
            7,
            Assignment {
                pr: 7,
                release: "1.0".to_string(),
                sdk_tag: "S1".to_string(),
                sdk_branch: "S1".to_string(),
                attribution: AttributionKind::Direct,
                original_pr: None,
            },
        );
        outcome.by_release.insert("1.0".to_string(), vec![7]);
        outcome.by_release.insert("1.1".to_string(), vec![7]);
        assert!(matches!(
            outcome.verify(),
            Err(InvariantViolation::MultipleAssignments { pr: 7, count: 2, .. })
        ));
    }

    #[test]
    fn counts_by_kind() {
        let mut map = AssignmentMap::new();
        for (n, kind) in [
            (1, AttributionKind::Direct),
            (2, AttributionKind::Backport),
            (3, AttributionKind::Direct),
        ] {
            map.insert(
                n,
                Assignment {
                    pr: n,
                    release: "1.0".to_string(),
                    sdk_tag: "S1".to_string(),
                    sdk_branch: "S1".to_string(),
                    attribution: kind,
                    original_pr: None,
                },
            );
        }
        let counts = count_by_attribution(&map);
        assert_eq!(counts[&AttributionKind::Direct], 2);
        assert_eq!(counts[&AttributionKind::Backport], 1);
    }
}
