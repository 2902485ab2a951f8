//! Persisted output records and the atomic snapshot writer.
//!
//! One snapshot directory holds:
//!
//! | file | record |
//! |------|--------|
//! | `pr_releases.json` | PR -> releases it was assigned to |
//! | `pr_details.json` | PR metadata and backport flags |
//! | `backports.json` | forward and inverse backport maps |
//! | `releases.json` | per-release summaries |
//! | `release_mapping.json` | SDK tag database and branch summaries |
//! | `statistics.json` | totals and counts by attribution |
//! | `manifest.json` | run id, mode, time and mapping digest |
//!
//! Everything except the manifest is a pure function of the computed
//! mapping, so rerunning on unchanged sources reproduces identical bytes.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::assignment::{count_by_attribution, Assignment, AssignmentMap, ReleaseSchedule};
use crate::backport::BackportIndex;
use crate::domain::{
    AttributionKind, BranchInfo, Divergence, EngineError, InvariantViolation, MatchConfidence,
    PullRequest, Release, Result, Tag,
};
use crate::registry::TagRegistry;
use crate::store::write_json_atomic;

pub const SCHEMA_VERSION: &str = "1";

const PR_RELEASES_FILE: &str = "pr_releases.json";
const PR_DETAILS_FILE: &str = "pr_details.json";
const BACKPORTS_FILE: &str = "backports.json";
const RELEASES_FILE: &str = "releases.json";
const RELEASE_MAPPING_FILE: &str = "release_mapping.json";
const STATISTICS_FILE: &str = "statistics.json";
const MANIFEST_FILE: &str = "manifest.json";

/// One release a PR was assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseEntry {
    pub runtime_version: String,
    pub sdk_tag: String,
    pub sdk_branch: String,
    pub attribution: AttributionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_pr: Option<u64>,
}

impl From<&Assignment> for ReleaseEntry {
    fn from(a: &Assignment) -> Self {
        Self {
            runtime_version: a.release.clone(),
            sdk_tag: a.sdk_tag.clone(),
            sdk_branch: a.sdk_branch.clone(),
            attribution: a.attribution,
            original_pr: a.original_pr,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrDetails {
    pub number: u64,
    pub title: String,
    pub author: String,
    pub merged_at: Option<DateTime<Utc>>,
    pub labels: Vec<String>,
    pub url: String,
    pub target_branch: String,
    pub is_backport: bool,
    pub backport_of: Option<u64>,
    pub has_backports: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackportRecord {
    pub backport_of: BTreeMap<u64, u64>,
    pub backports_of: BTreeMap<u64, BTreeSet<u64>>,
}

impl From<&BackportIndex> for BackportRecord {
    fn from(index: &BackportIndex) -> Self {
        Self {
            backport_of: index.forward().clone(),
            backports_of: index.inverse().clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseSummary {
    pub version: String,
    pub tag: String,
    pub release_date: DateTime<Utc>,
    pub sdk_tag: Option<String>,
    pub sdk_branch: Option<String>,
    pub sdk_date: Option<DateTime<Utc>>,
    pub confidence: MatchConfidence,
    pub total_prs: usize,
    pub new_prs: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSummary {
    pub tags: Vec<String>,
    pub divergence: Option<Divergence>,
    pub approximate: bool,
    pub pr_count: usize,
}

impl From<&BranchInfo> for BranchSummary {
    fn from(info: &BranchInfo) -> Self {
        Self {
            tags: info.tags.clone(),
            divergence: info.divergence.clone(),
            approximate: info.is_approximate(),
            pr_count: info.pr_count(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseMapping {
    pub sdk_tags: BTreeMap<String, Tag>,
    pub branches: BTreeMap<String, BranchSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_prs: usize,
    pub total_releases: usize,
    pub matched_releases: usize,
    pub unmatched_releases: usize,
    /// Bindings that fell back to the greatest tag name.
    pub ambiguous_matches: usize,
    pub approximate_branches: usize,
    pub assigned_prs: usize,
    pub unassigned_prs: usize,
    pub backport_links: usize,
    pub by_attribution: BTreeMap<AttributionKind, usize>,
}

/// Run metadata written beside the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub run_id: String,
    pub mode: String,
    /// SHA-256 of `pr_releases.json`.
    pub mapping_digest: String,
}

/// The complete set of output records of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingSnapshot {
    pub pr_releases: BTreeMap<u64, Vec<ReleaseEntry>>,
    pub pr_details: BTreeMap<u64, PrDetails>,
    pub backports: BackportRecord,
    pub releases: Vec<ReleaseSummary>,
    pub release_mapping: ReleaseMapping,
    pub statistics: Statistics,
}

/// Inputs of [`MappingSnapshot::build`].
pub struct ExportInput<'a> {
    pub prs: &'a BTreeMap<u64, PullRequest>,
    pub index: &'a BackportIndex,
    pub registry: &'a TagRegistry,
    pub branches: &'a BTreeMap<String, BranchInfo>,
    pub schedule: &'a ReleaseSchedule,
    pub assignments: &'a AssignmentMap,
    pub by_release: &'a BTreeMap<String, Vec<u64>>,
    /// Snapshot of an earlier run whose records are carried forward.
    pub prior: Option<&'a MappingSnapshot>,
}

impl MappingSnapshot {
    pub fn build(input: ExportInput<'_>) -> Self {
        let mut pr_details: BTreeMap<u64, PrDetails> = input
            .prior
            .map(|p| p.pr_details.clone())
            .unwrap_or_default();
        for pr in input.prs.values() {
            pr_details.insert(pr.number, details(pr, input.index));
        }

        let mut pr_releases: BTreeMap<u64, Vec<ReleaseEntry>> =
            pr_details.keys().map(|&n| (n, Vec::new())).collect();
        for (&pr, assignment) in input.assignments {
            pr_releases.insert(pr, vec![ReleaseEntry::from(assignment)]);
        }

        let mut summaries: BTreeMap<String, ReleaseSummary> = input
            .prior
            .map(|p| {
                p.releases
                    .iter()
                    .map(|s| (s.version.clone(), s.clone()))
                    .collect()
            })
            .unwrap_or_default();
        for release in input.schedule.iter() {
            let new = input.by_release.get(release.version()).map_or(0, Vec::len);
            summaries.insert(release.version().to_string(), summary(release, new));
        }
        let mut releases: Vec<ReleaseSummary> = summaries.into_values().collect();
        releases.sort_by(|a, b| {
            a.sdk_date
                .cmp(&b.sdk_date)
                .then_with(|| a.release_date.cmp(&b.release_date))
                .then_with(|| a.tag.cmp(&b.tag))
        });

        let release_mapping = ReleaseMapping {
            sdk_tags: input
                .registry
                .iter()
                .map(|t| (t.name.clone(), t.clone()))
                .collect(),
            branches: input
                .branches
                .iter()
                .map(|(name, info)| (name.clone(), BranchSummary::from(info)))
                .collect(),
        };

        let backports = BackportRecord::from(input.index);
        let statistics = statistics(
            &pr_releases,
            &releases,
            &release_mapping,
            &backports,
            input.assignments,
        );

        Self {
            pr_releases,
            pr_details,
            backports,
            releases,
            release_mapping,
            statistics,
        }
    }

    /// Assignments recorded in this snapshot, for seeding an incremental run.
    pub fn assignments(&self) -> AssignmentMap {
        self.pr_releases
            .iter()
            .filter_map(|(&pr, entries)| {
                let e = entries.first()?;
                Some((
                    pr,
                    Assignment {
                        pr,
                        release: e.runtime_version.clone(),
                        sdk_tag: e.sdk_tag.clone(),
                        sdk_branch: e.sdk_branch.clone(),
                        attribution: e.attribution,
                        original_pr: e.original_pr,
                    },
                ))
            })
            .collect()
    }

    /// Versions of releases already summarised.
    pub fn summarised_versions(&self) -> BTreeSet<String> {
        self.releases.iter().map(|r| r.version.clone()).collect()
    }

    /// Check the persisted form: at most one release per PR, and backport
    /// maps that are exact transposes with no nested backports.
    pub fn verify(&self) -> std::result::Result<(), InvariantViolation> {
        for (&pr, entries) in &self.pr_releases {
            if entries.len() > 1 {
                return Err(InvariantViolation::MultipleAssignments {
                    pr,
                    count: entries.len(),
                    releases: entries.iter().map(|e| e.runtime_version.clone()).collect(),
                });
            }
        }

        let forward = &self.backports.backport_of;
        let inverse = &self.backports.backports_of;
        let mismatch = |backport: u64| InvariantViolation::BackportIndexMismatch {
            backport,
            forward: forward.get(&backport).copied(),
            inverse: inverse
                .iter()
                .filter(|(_, set)| set.contains(&backport))
                .map(|(&o, _)| o)
                .collect(),
        };
        for (&backport, &original) in forward {
            if !inverse.get(&original).is_some_and(|s| s.contains(&backport)) {
                return Err(mismatch(backport));
            }
            if forward.contains_key(&original) || inverse.contains_key(&backport) {
                return Err(InvariantViolation::NestedBackport { pr: backport });
            }
        }
        for (&original, backports) in inverse {
            for &backport in backports {
                if forward.get(&backport) != Some(&original) {
                    return Err(mismatch(backport));
                }
            }
        }
        Ok(())
    }

    /// Serialized `pr_releases.json` bytes.
    pub fn mapping_bytes(&self) -> Result<Vec<u8>> {
        json_bytes(&self.pr_releases)
    }

    /// Hex SHA-256 of [`mapping_bytes`](Self::mapping_bytes).
    pub fn mapping_digest(&self) -> Result<String> {
        Ok(hex::encode(Sha256::digest(self.mapping_bytes()?)))
    }

    /// Verify, then write every record to `dir` as one atomic replacement.
    ///
    /// Files are staged in a sibling directory which is swapped in only after
    /// all of them are written. On any failure `dir` is left untouched.
    /// Readers never observe a partial snapshot, but see `swap_in` for the
    /// moment during the swap where `dir` is absent.
    pub fn write(&self, dir: &Path, manifest: &RunManifest) -> Result<()> {
        self.verify()?;

        let staging = sibling(dir, "staging")?;
        if let Err(e) = self.write_files(&staging, manifest) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }
        swap_in(&staging, dir)?;
        info!(dir = %dir.display(), digest = %manifest.mapping_digest, "snapshot written");
        Ok(())
    }

    fn write_files(&self, dir: &Path, manifest: &RunManifest) -> Result<()> {
        fs::create_dir_all(dir)?;
        write_json_atomic(&dir.join(PR_RELEASES_FILE), &self.pr_releases)?;
        write_json_atomic(&dir.join(PR_DETAILS_FILE), &self.pr_details)?;
        write_json_atomic(&dir.join(BACKPORTS_FILE), &self.backports)?;
        write_json_atomic(&dir.join(RELEASES_FILE), &self.releases)?;
        write_json_atomic(&dir.join(RELEASE_MAPPING_FILE), &self.release_mapping)?;
        write_json_atomic(&dir.join(STATISTICS_FILE), &self.statistics)?;
        write_json_atomic(&dir.join(MANIFEST_FILE), manifest)?;
        Ok(())
    }

    /// Load a snapshot previously written to `dir`. `None` when `dir` holds
    /// no snapshot.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        if !dir.join(PR_RELEASES_FILE).exists() {
            return Ok(None);
        }
        Ok(Some(Self {
            pr_releases: read_json(&dir.join(PR_RELEASES_FILE))?,
            pr_details: read_json(&dir.join(PR_DETAILS_FILE))?,
            backports: read_json(&dir.join(BACKPORTS_FILE))?,
            releases: read_json(&dir.join(RELEASES_FILE))?,
            release_mapping: read_json(&dir.join(RELEASE_MAPPING_FILE))?,
            statistics: read_json(&dir.join(STATISTICS_FILE))?,
        }))
    }
}

impl RunManifest {
    pub fn new(run_id: &str, mode: &str, snapshot: &MappingSnapshot) -> Result<Self> {
        Ok(Self {
            schema_version: SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            run_id: run_id.to_string(),
            mode: mode.to_string(),
            mapping_digest: snapshot.mapping_digest()?,
        })
    }

    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }
}

/// Read only the statistics record of a snapshot.
pub fn load_statistics(dir: &Path) -> Result<Statistics> {
    read_json(&dir.join(STATISTICS_FILE))
}

fn details(pr: &PullRequest, index: &BackportIndex) -> PrDetails {
    let backport_of = index.original_of(pr.number);
    PrDetails {
        number: pr.number,
        title: pr.title.clone(),
        author: pr.author.clone(),
        merged_at: pr.merged_at,
        labels: pr.labels.clone(),
        url: pr.url.clone(),
        target_branch: pr.target_branch.clone(),
        is_backport: backport_of.is_some(),
        backport_of,
        has_backports: index.backports_of(pr.number).is_some(),
    }
}

fn summary(release: &Release, new_prs: usize) -> ReleaseSummary {
    ReleaseSummary {
        version: release.version().to_string(),
        tag: release.tag.clone(),
        release_date: release.created_at,
        sdk_tag: release.matched_tag.clone(),
        sdk_branch: release.sdk_branch.clone(),
        sdk_date: release.sdk_date,
        confidence: release.confidence,
        // Every PR a release ships is new to it under the first-appearance rule.
        total_prs: new_prs,
        new_prs,
    }
}

fn statistics(
    pr_releases: &BTreeMap<u64, Vec<ReleaseEntry>>,
    releases: &[ReleaseSummary],
    mapping: &ReleaseMapping,
    backports: &BackportRecord,
    assignments: &AssignmentMap,
) -> Statistics {
    let matched = releases.iter().filter(|r| r.sdk_tag.is_some()).count();
    let assigned = pr_releases.values().filter(|e| !e.is_empty()).count();
    Statistics {
        total_prs: pr_releases.len(),
        total_releases: releases.len(),
        matched_releases: matched,
        unmatched_releases: releases.len() - matched,
        ambiguous_matches: releases
            .iter()
            .filter(|r| r.confidence.is_ambiguous())
            .count(),
        approximate_branches: mapping.branches.values().filter(|b| b.approximate).count(),
        assigned_prs: assigned,
        unassigned_prs: pr_releases.len() - assigned,
        backport_links: backports.backport_of.len(),
        by_attribution: count_by_attribution(assignments),
    }
}

fn json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut body = serde_json::to_vec_pretty(value)?;
    body.push(b'\n');
    Ok(body)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read(path)?;
    Ok(serde_json::from_slice(&raw)?)
}

fn sibling(dir: &Path, kind: &str) -> Result<PathBuf> {
    let name = dir
        .file_name()
        .ok_or_else(|| EngineError::InvalidConfig(format!("invalid output dir {}", dir.display())))?
        .to_string_lossy();
    let parent = dir
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    Ok(parent.join(format!(".{name}.{kind}-{}", Uuid::new_v4())))
}

/// Replace `dir` with `staging`. The previous snapshot is moved aside first
/// and restored if the final rename fails.
///
/// Two renames are needed because a directory cannot be renamed over a
/// non-empty one. Between them `dir` does not exist, so a concurrent reader
/// may find no snapshot at all (`MappingSnapshot::load` returns `None`); it
/// never finds a mix of old and new files.
fn swap_in(staging: &Path, dir: &Path) -> Result<()> {
    let backup = if dir.exists() {
        let backup = sibling(dir, "previous")?;
        fs::rename(dir, &backup)?;
        Some(backup)
    } else {
        None
    };
    if let Err(e) = fs::rename(staging, dir) {
        if let Some(backup) = &backup {
            if let Err(restore) = fs::rename(backup, dir) {
                warn!(error = %restore, backup = %backup.display(), "could not restore previous snapshot");
            }
        }
        let _ = fs::remove_dir_all(staging);
        return Err(e.into());
    }
    if let Some(backup) = backup {
        if let Err(e) = fs::remove_dir_all(&backup) {
            warn!(error = %e, backup = %backup.display(), "could not remove previous snapshot");
        }
    }
    Ok(())
}
