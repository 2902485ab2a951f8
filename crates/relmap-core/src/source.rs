//! Source collaborator contracts.
//!
//! The engine never talks to the network itself. [`SdkSource`] and
//! [`RuntimeSource`] are injected: `relmap-github` implements them against the
//! GitHub REST API and [`crate::fakes::MemorySource`] implements them in memory
//! for tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{PullRequest, TagConvention};

/// Errors produced by source collaborators.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Network failure or timeout.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote API rate limit is exhausted.
    #[error("rate limited (reset in {reset_in_secs}s)")]
    RateLimited { reset_in_secs: u64 },

    /// Non-success HTTP status.
    #[error("http {status} for {url}")]
    Status { status: u16, url: String },

    /// A referenced object does not exist (deleted branch, unknown ref).
    #[error("not found: {0}")]
    NotFound(String),

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Retries were exhausted on a transient failure.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl SourceError {
    /// Whether a retry may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Transport(_) | SourceError::RateLimited { .. } => true,
            SourceError::Status { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            SourceError::NotFound(_) | SourceError::Decode(_) | SourceError::Exhausted { .. } => {
                false
            }
        }
    }
}

/// Convenience result alias.
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// A listed stable tag before its manifests are read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRef {
    /// Normalized tag name.
    pub name: String,
    /// Raw tag name as it exists in the repository (used as a git ref).
    pub raw_name: String,
    pub commit: String,
    pub date: DateTime<Utc>,
    pub branch: String,
}

/// A commit identified by the remote, e.g. a merge-base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitPoint {
    pub sha: String,
    pub date: DateTime<Utc>,
}

/// Filters for a merged-PR search. Unset fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrQuery {
    pub target_branch: Option<String>,
    /// Every term must appear in the title.
    pub title_terms: Vec<String>,
    pub merged_after: Option<DateTime<Utc>>,
    pub merged_before: Option<DateTime<Utc>>,
}

impl PrQuery {
    pub fn targeting(branch: impl Into<String>) -> Self {
        Self {
            target_branch: Some(branch.into()),
            ..Self::default()
        }
    }

    pub fn titled(terms: &[&str]) -> Self {
        Self {
            title_terms: terms.iter().map(|t| t.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn merged_between(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.merged_after = after;
        self.merged_before = before;
        self
    }

    /// Whether a record satisfies the query. Used by in-memory sources and to
    /// re-check remote results, whose date filters are day-granular.
    pub fn accepts(&self, pr: &PrRecord) -> bool {
        if let Some(branch) = &self.target_branch {
            if &pr.target_branch != branch {
                return false;
            }
        }
        let title = pr.title.to_lowercase();
        if !self
            .title_terms
            .iter()
            .all(|t| title.contains(&t.to_lowercase()))
        {
            return false;
        }
        let Some(merged_at) = pr.merged_at else {
            return false;
        };
        if self.merged_after.is_some_and(|after| merged_at <= after) {
            return false;
        }
        if self.merged_before.is_some_and(|before| merged_at > before) {
            return false;
        }
        true
    }
}

/// A merged PR as returned by a search provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrRecord {
    pub number: u64,
    pub title: String,
    pub author: String,
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub target_branch: String,
    pub body: Option<String>,
    pub url: String,
}

impl From<PrRecord> for PullRequest {
    fn from(r: PrRecord) -> Self {
        PullRequest {
            number: r.number,
            title: r.title,
            author: r.author,
            merged_at: r.merged_at,
            labels: r.labels,
            target_branch: r.target_branch,
            url: r.url,
            body: r.body,
            backport_of: None,
        }
    }
}

/// A runtime release as listed upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeReleaseRef {
    pub tag: String,
    pub created_at: DateTime<Utc>,
}

/// Tag, manifest, ancestry and PR metadata of the SDK repository.
#[async_trait]
pub trait SdkSource: Send + Sync {
    /// Every tag following `convention`, with commit, date and branch.
    async fn list_stable_tags(&self, convention: &TagConvention) -> SourceResult<Vec<TagRef>>;

    /// File content at a commit or ref; `None` when the file does not exist.
    async fn read_file_at_commit(&self, path: &str, commit: &str) -> SourceResult<Option<String>>;

    /// Three-way merge-base of two refs.
    async fn merge_base(&self, base: &str, head: &str) -> SourceResult<CommitPoint>;

    async fn search_merged_prs(&self, query: &PrQuery) -> SourceResult<Vec<PrRecord>>;

    /// A single PR by number; `None` when it does not exist.
    async fn get_pr(&self, number: u64) -> SourceResult<Option<PrRecord>>;
}

/// Release listing and lockfile access for the downstream runtime repository.
#[async_trait]
pub trait RuntimeSource: Send + Sync {
    /// Published (non-draft, non-prerelease) releases, newest first.
    async fn list_releases(&self) -> SourceResult<Vec<RuntimeReleaseRef>>;

    /// Raw lockfile content at a release tag; `None` when absent.
    async fn read_lockfile(&self, tag: &str) -> SourceResult<Option<String>>;
}

/// Package versions keyed by package name.
pub type VersionMap = BTreeMap<String, String>;
