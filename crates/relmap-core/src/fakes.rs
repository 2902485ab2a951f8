//! In-memory source collaborators (testing only)
//!
//! [`MemorySource`] implements both [`SdkSource`] and [`RuntimeSource`] over
//! data seeded by the test, and counts every call so tests can assert cache
//! behaviour.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::TagConvention;
use crate::source::{
    CommitPoint, PrQuery, PrRecord, RuntimeReleaseRef, RuntimeSource, SdkSource, SourceError,
    SourceResult, TagRef,
};

#[derive(Debug, Clone)]
struct RawTag {
    name: String,
    commit: String,
    date: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    tags: Vec<RawTag>,
    files: HashMap<(String, String), String>,
    failing_files: HashSet<(String, String)>,
    merge_bases: HashMap<String, CommitPoint>,
    prs: BTreeMap<u64, PrRecord>,
    failing_queries: HashSet<String>,
    releases: Vec<RuntimeReleaseRef>,
    fail_release_listing: bool,
    lockfiles: HashMap<String, String>,
}

/// In-memory SDK and runtime repositories.
#[derive(Debug, Default)]
pub struct MemorySource {
    state: Mutex<State>,
    calls: AtomicU64,
    file_reads: AtomicU64,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a raw tag, e.g. `polkadot-stable2409-1`.
    pub fn add_tag(&self, raw_name: &str, commit: &str, date: DateTime<Utc>) {
        self.state.lock().unwrap().tags.push(RawTag {
            name: raw_name.to_string(),
            commit: commit.to_string(),
            date,
        });
    }

    pub fn set_file(&self, commit: &str, path: &str, content: &str) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert((commit.to_string(), path.to_string()), content.to_string());
    }

    /// Make reads of `path` at `commit` fail with exhausted retries.
    pub fn fail_file(&self, commit: &str, path: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_files
            .insert((commit.to_string(), path.to_string()));
    }

    /// Merge-base of the trunk and `branch`. Branches without one fail the
    /// query as if deleted.
    pub fn set_merge_base(&self, branch: &str, sha: &str, date: DateTime<Utc>) {
        self.state.lock().unwrap().merge_bases.insert(
            branch.to_string(),
            CommitPoint {
                sha: sha.to_string(),
                date,
            },
        );
    }

    pub fn add_pr(&self, pr: PrRecord) {
        self.state.lock().unwrap().prs.insert(pr.number, pr);
    }

    /// Fail every PR search whose target branch or title terms mention `term`.
    pub fn fail_queries_mentioning(&self, term: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_queries
            .insert(term.to_string());
    }

    pub fn add_release(&self, tag: &str, created_at: DateTime<Utc>, lockfile: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        state.releases.push(RuntimeReleaseRef {
            tag: tag.to_string(),
            created_at,
        });
        if let Some(lock) = lockfile {
            state.lockfiles.insert(tag.to_string(), lock.to_string());
        }
    }

    /// Make the release listing fail, as if the runtime repo were unreachable.
    pub fn fail_release_listing(&self) {
        self.state.lock().unwrap().fail_release_listing = true;
    }

    /// Total collaborator calls served.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Manifest reads served.
    pub fn file_reads(&self) -> u64 {
        self.file_reads.load(Ordering::Relaxed)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl SdkSource for MemorySource {
    async fn list_stable_tags(&self, convention: &TagConvention) -> SourceResult<Vec<TagRef>> {
        self.hit();
        let state = self.state.lock().unwrap();
        let mut tags: Vec<TagRef> = state
            .tags
            .iter()
            .filter_map(|raw| {
                let name = convention.normalize(&raw.name)?;
                let branch = convention.branch_of(&name)?;
                Some(TagRef {
                    name,
                    raw_name: raw.name.clone(),
                    commit: raw.commit.clone(),
                    date: raw.date,
                    branch,
                })
            })
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }

    async fn read_file_at_commit(&self, path: &str, commit: &str) -> SourceResult<Option<String>> {
        self.hit();
        self.file_reads.fetch_add(1, Ordering::Relaxed);
        let state = self.state.lock().unwrap();
        let key = (commit.to_string(), path.to_string());
        if state.failing_files.contains(&key) {
            return Err(SourceError::Exhausted {
                attempts: 4,
                last: format!("read {path}@{commit}"),
            });
        }
        Ok(state.files.get(&key).cloned())
    }

    async fn merge_base(&self, _base: &str, head: &str) -> SourceResult<CommitPoint> {
        self.hit();
        self.state
            .lock()
            .unwrap()
            .merge_bases
            .get(head)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(format!("branch {head}")))
    }

    async fn search_merged_prs(&self, query: &PrQuery) -> SourceResult<Vec<PrRecord>> {
        self.hit();
        let state = self.state.lock().unwrap();
        let mentioned = query
            .target_branch
            .iter()
            .chain(query.title_terms.iter())
            .any(|t| state.failing_queries.iter().any(|f| t.contains(f.as_str())));
        if mentioned {
            return Err(SourceError::Status {
                status: 502,
                url: "memory://search".to_string(),
            });
        }
        Ok(state
            .prs
            .values()
            .filter(|pr| query.accepts(pr))
            .cloned()
            .collect())
    }

    async fn get_pr(&self, number: u64) -> SourceResult<Option<PrRecord>> {
        self.hit();
        Ok(self.state.lock().unwrap().prs.get(&number).cloned())
    }
}

#[async_trait]
impl RuntimeSource for MemorySource {
    async fn list_releases(&self) -> SourceResult<Vec<RuntimeReleaseRef>> {
        self.hit();
        let state = self.state.lock().unwrap();
        if state.fail_release_listing {
            return Err(SourceError::Exhausted {
                attempts: 4,
                last: "list releases".to_string(),
            });
        }
        let mut releases = state.releases.clone();
        releases.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.tag.cmp(&a.tag)));
        Ok(releases)
    }

    async fn read_lockfile(&self, tag: &str) -> SourceResult<Option<String>> {
        self.hit();
        Ok(self.state.lock().unwrap().lockfiles.get(tag).cloned())
    }
}
