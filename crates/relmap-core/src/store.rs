//! Entity cache and the per-run entity store.
//!
//! Lifecycle: an [`EntityStore`] is constructed at run start around the
//! read-only prior [`EntityCache`], populated by fetch workers, then frozen
//! into a [`SourceSnapshot`] before any structural computation starts.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::domain::{Divergence, PullRequest, Result, RuntimeRelease, Tag};
use crate::registry::TagRegistry;

const TAGS_FILE: &str = "tags.json";
const PRS_FILE: &str = "prs.json";

/// Previously fetched entities keyed by stable identifiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityCache {
    pub tags: BTreeMap<String, Tag>,
    pub prs: BTreeMap<u64, PullRequest>,
}

impl EntityCache {
    /// Load the cache from `dir`. A missing or unreadable cache is empty.
    pub fn load(dir: &Path) -> Self {
        Self {
            tags: read_json_or_default(&dir.join(TAGS_FILE)),
            prs: read_json_or_default(&dir.join(PRS_FILE)),
        }
    }

    /// Persist the cache to `dir`, one atomic file write per entity kind.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        write_json_atomic(&dir.join(TAGS_FILE), &self.tags)?;
        write_json_atomic(&dir.join(PRS_FILE), &self.prs)?;
        Ok(())
    }

    /// Cache contents after a run: complete tags and every materialized PR.
    pub fn from_snapshot(snapshot: &SourceSnapshot) -> Self {
        Self {
            tags: snapshot
                .registry
                .iter()
                .filter(|t| t.complete)
                .map(|t| (t.name.clone(), t.clone()))
                .collect(),
            prs: snapshot.prs.clone(),
        }
    }
}

fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "cache file unavailable");
            return T::default();
        }
    };
    serde_json::from_slice(&raw).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "ignoring corrupt cache file");
        T::default()
    })
}

/// Write pretty JSON to `path` via a temp file in the same directory and a
/// rename, so readers never observe a partial file.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&dir)?;
    let mut body = serde_json::to_vec_pretty(value)?;
    body.push(b'\n');
    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(&body)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Shared store populated by concurrent fetch workers.
///
/// Reads fall through to the prior cache. Writes are last-writer-wins per key.
#[derive(Debug, Default)]
pub struct EntityStore {
    prior: EntityCache,
    prs: RwLock<BTreeMap<u64, PullRequest>>,
}

impl EntityStore {
    pub fn new(prior: EntityCache) -> Self {
        Self {
            prior,
            prs: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn cached_tag(&self, name: &str) -> Option<Tag> {
        self.prior.tags.get(name).cloned()
    }

    /// A PR fetched during this run, else the prior cached copy.
    pub fn pr(&self, number: u64) -> Option<PullRequest> {
        let live = self.prs.read().unwrap_or_else(PoisonError::into_inner);
        live.get(&number)
            .or_else(|| self.prior.prs.get(&number))
            .cloned()
    }

    /// Whether the PR was materialized during this run.
    pub fn contains_pr(&self, number: u64) -> bool {
        self.prs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&number)
    }

    pub fn put_pr(&self, pr: PullRequest) {
        self.prs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pr.number, pr);
    }

    pub fn pr_numbers(&self) -> Vec<u64> {
        self.prs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    /// End the fetch phase. Only entities materialized during this run
    /// survive.
    pub fn freeze(self) -> BTreeMap<u64, PullRequest> {
        self.prs.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fully materialized, immutable input of the structural computation.
#[derive(Debug, Clone, Default)]
pub struct SourceSnapshot {
    pub trunk: String,
    pub registry: TagRegistry,
    /// Branch name -> divergence. Branches with no known divergence are
    /// present with `None`.
    pub divergences: BTreeMap<String, Option<Divergence>>,
    pub prs: BTreeMap<u64, PullRequest>,
    /// Runtime releases, oldest first.
    pub releases: Vec<RuntimeRelease>,
}
