//! SDK tag registry.
//!
//! [`collect_tags`] lists every stable tag and reads the tracked dependency
//! manifests at each tagged commit. The resulting [`TagRegistry`] keeps two
//! derived indices: tag -> versions (on the [`Tag`] itself) and
//! (package, version) -> tags for reverse lookup by the version matcher.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::TrackedDependency;
use crate::domain::{Result, Tag, TagConvention};
use crate::manifest::package_version;
use crate::metrics::METRICS;
use crate::source::{SdkSource, TagRef};
use crate::store::EntityStore;

/// All known SDK tags plus the reverse dependency index.
#[derive(Debug, Clone, Default)]
pub struct TagRegistry {
    tags: BTreeMap<String, Tag>,
    by_dependency: BTreeMap<(String, String), BTreeSet<String>>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tags(tags: impl IntoIterator<Item = Tag>) -> Self {
        let mut registry = Self::new();
        for tag in tags {
            registry.insert(tag);
        }
        registry
    }

    /// Register a tag. Re-inserting a name replaces the tag and its index
    /// entries.
    pub fn insert(&mut self, tag: Tag) {
        if let Some(old) = self.tags.remove(&tag.name) {
            for (package, version) in &old.versions {
                let key = (package.clone(), version.clone());
                if let Some(names) = self.by_dependency.get_mut(&key) {
                    names.remove(&old.name);
                    if names.is_empty() {
                        self.by_dependency.remove(&key);
                    }
                }
            }
        }
        for (package, version) in &tag.versions {
            self.by_dependency
                .entry((package.clone(), version.clone()))
                .or_default()
                .insert(tag.name.clone());
        }
        self.tags.insert(tag.name.clone(), tag);
    }

    pub fn get(&self, name: &str) -> Option<&Tag> {
        self.tags.get(name)
    }

    /// Tags whose snapshot pins `package` at `version`.
    pub fn tags_with(&self, package: &str, version: &str) -> Option<&BTreeSet<String>> {
        self.by_dependency
            .get(&(package.to_string(), version.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.values()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Tags grouped by branch, each group ordered by date then name.
    pub fn by_branch(&self) -> BTreeMap<String, Vec<&Tag>> {
        let mut groups: BTreeMap<String, Vec<&Tag>> = BTreeMap::new();
        for tag in self.tags.values() {
            groups.entry(tag.branch.clone()).or_default().push(tag);
        }
        for tags in groups.values_mut() {
            tags.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.name.cmp(&b.name)));
        }
        groups
    }
}

/// Read the tracked dependency versions at one tagged commit.
///
/// A manifest that cannot be read leaves that dependency absent; the tag is
/// always returned.
async fn snapshot_tag(
    source: Arc<dyn SdkSource>,
    tag: TagRef,
    tracked: Arc<Vec<TrackedDependency>>,
) -> Tag {
    let mut versions = BTreeMap::new();
    for dep in tracked.iter() {
        match source.read_file_at_commit(&dep.manifest_path, &tag.commit).await {
            Ok(Some(content)) => match package_version(&content) {
                Some(version) => {
                    versions.insert(dep.name.clone(), version);
                }
                None => debug!(tag = %tag.name, package = %dep.name, "manifest has no version"),
            },
            Ok(None) => debug!(tag = %tag.name, path = %dep.manifest_path, "manifest not found"),
            Err(e) => {
                METRICS.inc_degraded_fetches();
                warn!(tag = %tag.name, package = %dep.name, error = %e, "manifest read failed");
            }
        }
    }
    let complete = versions.len() == tracked.len();
    Tag {
        name: tag.name,
        commit: tag.commit,
        date: tag.date,
        branch: tag.branch,
        versions,
        complete,
    }
}

/// Build the tag registry from the SDK source.
///
/// Complete tags found in the prior cache at the same commit are reused
/// without touching the source. Manifest reads run with at most
/// `max_concurrency` tags in flight.
pub async fn collect_tags(
    source: Arc<dyn SdkSource>,
    convention: &TagConvention,
    tracked: &[TrackedDependency],
    store: &EntityStore,
    max_concurrency: usize,
) -> Result<TagRegistry> {
    let listed = source.list_stable_tags(convention).await?;
    info!(count = listed.len(), "listed stable tags");

    let tracked = Arc::new(tracked.to_vec());
    let sem = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut join_set = JoinSet::new();
    let mut registry = TagRegistry::new();

    for tag_ref in listed {
        if let Some(cached) = store.cached_tag(&tag_ref.name) {
            if cached.complete && cached.commit == tag_ref.commit {
                METRICS.inc_cache_hits();
                registry.insert(cached);
                continue;
            }
        }
        let source = Arc::clone(&source);
        let tracked = Arc::clone(&tracked);
        let sem = Arc::clone(&sem);
        join_set.spawn(async move {
            let _permit = sem.acquire_owned().await.ok();
            snapshot_tag(source, tag_ref, tracked).await
        });
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(tag) => registry.insert(tag),
            Err(e) => warn!(error = %e, "tag snapshot task failed"),
        }
    }

    info!(
        tags = registry.len(),
        complete = registry.iter().filter(|t| t.complete).count(),
        "tag registry built"
    );
    Ok(registry)
}
