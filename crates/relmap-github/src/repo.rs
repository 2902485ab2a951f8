//! Source collaborators backed by one GitHub repository.

use std::sync::Arc;

use async_trait::async_trait;
use relmap_core::metrics::METRICS;
use relmap_core::{
    CommitPoint, PrQuery, PrRecord, RuntimeReleaseRef, RuntimeSource, SdkSource, SourceError,
    SourceResult, TagConvention, TagRef,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::client::GithubClient;
use crate::wire::{
    encode_segment, published_releases, search_query, CommitEntry, Comparison, PullEntry,
    ReleaseEntry, SearchItem, SearchPage, TagEntry,
};

/// Lockfile read from the runtime repository at each release tag.
pub const LOCKFILE_PATH: &str = "Cargo.lock";

/// Search results beyond this are not served by the API.
const SEARCH_RESULT_CAP: u64 = 1000;

/// A GitHub repository (`owner/name`) seen through the REST API.
///
/// Implements [`SdkSource`] for the SDK repository and [`RuntimeSource`] for
/// the runtime repository; build one per repository.
#[derive(Debug, Clone)]
pub struct GithubRepo {
    client: GithubClient,
    repo: String,
}

impl GithubRepo {
    pub fn new(client: GithubClient, repo: &str) -> Self {
        GithubRepo {
            client,
            repo: repo.to_string(),
        }
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    fn path(&self, rest: &str) -> String {
        format!("repos/{}/{}", self.repo, rest)
    }

    async fn commit(&self, reference: &str) -> SourceResult<Option<CommitEntry>> {
        self.client
            .get_json(&self.path(&format!("commits/{}", encode_segment(reference))), &[])
            .await
    }

    async fn raw_file(&self, path: &str, reference: &str) -> SourceResult<Option<String>> {
        self.client
            .get_raw(
                &self.path(&format!("contents/{}", path.trim_start_matches('/'))),
                &[("ref", reference.to_string())],
            )
            .await
    }

    /// Fill in the merge target of a search hit, which search results omit.
    async fn target_of(&self, number: u64) -> SourceResult<Option<String>> {
        Ok(self.get_pr(number).await?.map(|pr| pr.target_branch))
    }

    /// Resolve merge targets for search hits concurrently. Hits whose pull
    /// request cannot be read are dropped and counted as degraded.
    async fn with_targets(&self, hits: Vec<SearchItem>) -> Vec<PrRecord> {
        let semaphore = Arc::new(Semaphore::new(self.client.config().concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for item in hits {
            let repo = self.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let number = item.number;
                let target = match semaphore.acquire_owned().await {
                    Ok(_permit) => repo.target_of(number).await,
                    Err(e) => Err(SourceError::Transport(e.to_string())),
                };
                (number, target.map(|t| t.map(|branch| item.into_record(branch))))
            });
        }

        let mut records = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(Some(record)))) => records.push(record),
                Ok((number, Ok(None))) => {
                    debug!(repo = %self.repo, pr = number, "search hit has no pull request")
                }
                Ok((number, Err(e))) => {
                    METRICS.inc_degraded_fetches();
                    warn!(repo = %self.repo, pr = number, error = %e, "skipping search hit without a merge target");
                }
                Err(e) => {
                    METRICS.inc_degraded_fetches();
                    warn!(repo = %self.repo, error = %e, "merge target lookup task failed");
                }
            }
        }
        records
    }
}

#[async_trait]
impl SdkSource for GithubRepo {
    async fn list_stable_tags(&self, convention: &TagConvention) -> SourceResult<Vec<TagRef>> {
        let entries: Vec<TagEntry> = self.client.get_paged(&self.path("tags"), &[]).await?;
        let listed = entries.len();

        let candidates: Vec<(String, String, String, String)> = entries
            .into_iter()
            .filter_map(|entry| {
                let name = convention.normalize(&entry.name)?;
                let branch = convention.branch_of(&name)?;
                Some((entry.name, name, branch, entry.commit.sha))
            })
            .collect();
        debug!(listed, stable = candidates.len(), repo = %self.repo, "listed tags");

        let semaphore = Arc::new(Semaphore::new(self.client.config().concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for (raw_name, name, branch, sha) in candidates {
            let repo = self.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| SourceError::Transport(e.to_string()))?;
                let commit = repo.commit(&sha).await?;
                Ok::<_, SourceError>(commit.map(|c| TagRef {
                    name,
                    raw_name,
                    commit: c.sha,
                    date: c.commit.committer.date,
                    branch,
                }))
            });
        }

        let mut tags = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.map_err(|e| SourceError::Transport(e.to_string()));
            match outcome.and_then(|found| found) {
                Ok(Some(tag)) => tags.push(tag),
                Ok(None) => warn!(repo = %self.repo, "tag commit vanished while listing"),
                Err(e) => {
                    METRICS.inc_degraded_fetches();
                    warn!(repo = %self.repo, error = %e, "skipping tag whose commit could not be read");
                }
            }
        }
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        info!(repo = %self.repo, tags = tags.len(), "stable tags listed");
        Ok(tags)
    }

    async fn read_file_at_commit(&self, path: &str, commit: &str) -> SourceResult<Option<String>> {
        self.raw_file(path, commit).await
    }

    async fn merge_base(&self, base: &str, head: &str) -> SourceResult<CommitPoint> {
        let rest = format!("compare/{}...{}", encode_segment(base), encode_segment(head));
        let comparison: Option<Comparison> = self.client.get_json(&self.path(&rest), &[]).await?;
        let comparison =
            comparison.ok_or_else(|| SourceError::NotFound(format!("compare {base}...{head}")))?;
        let commit = comparison
            .merge_base_commit
            .ok_or_else(|| SourceError::NotFound(format!("merge base of {base} and {head}")))?;
        Ok(CommitPoint {
            sha: commit.sha,
            date: commit.commit.committer.date,
        })
    }

    async fn search_merged_prs(&self, query: &PrQuery) -> SourceResult<Vec<PrRecord>> {
        let q = search_query(&self.repo, query);
        let mut hits = Vec::new();
        let pages = self
            .client
            .config()
            .max_pages
            .min((SEARCH_RESULT_CAP / 100) as u32);
        for page in 1..=pages {
            let params = [
                ("q", q.clone()),
                ("per_page", "100".to_string()),
                ("page", page.to_string()),
            ];
            let Some(result) = self
                .client
                .get_json::<SearchPage>("search/issues", &params)
                .await?
            else {
                break;
            };
            if page == 1 && result.total_count > SEARCH_RESULT_CAP {
                warn!(
                    query = %q,
                    total = result.total_count,
                    "search exceeds the API result cap; results are truncated"
                );
            }
            let last = result.items.len() < 100;
            hits.extend(result.items);
            if last {
                break;
            }
        }

        let mut records: Vec<PrRecord> = match &query.target_branch {
            Some(branch) => hits
                .into_iter()
                .map(|item| item.into_record(branch.clone()))
                .collect(),
            None => self.with_targets(hits).await,
        };
        records.retain(|record| query.accepts(record));
        records.sort_by_key(|record| record.number);
        debug!(query = %q, matched = records.len(), "search complete");
        Ok(records)
    }

    async fn get_pr(&self, number: u64) -> SourceResult<Option<PrRecord>> {
        let pull: Option<PullEntry> = self
            .client
            .get_json(&self.path(&format!("pulls/{number}")), &[])
            .await?;
        Ok(pull.map(PrRecord::from))
    }
}

#[async_trait]
impl RuntimeSource for GithubRepo {
    async fn list_releases(&self) -> SourceResult<Vec<RuntimeReleaseRef>> {
        let entries: Vec<ReleaseEntry> = self.client.get_paged(&self.path("releases"), &[]).await?;
        let releases = published_releases(entries);
        info!(repo = %self.repo, releases = releases.len(), "runtime releases listed");
        Ok(releases)
    }

    async fn read_lockfile(&self, tag: &str) -> SourceResult<Option<String>> {
        self.raw_file(LOCKFILE_PATH, tag).await
    }
}
