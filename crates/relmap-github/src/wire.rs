//! GitHub REST response shapes and request helpers.

use chrono::{DateTime, Utc};
use relmap_core::{PrQuery, PrRecord, RuntimeReleaseRef};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct User {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Label {
    pub name: String,
}

/// Entry of `GET /repos/{repo}/tags`.
#[derive(Debug, Deserialize)]
pub(crate) struct TagEntry {
    pub name: String,
    pub commit: ShaRef,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ShaRef {
    pub sha: String,
}

/// `GET /repos/{repo}/commits/{ref}` and `merge_base_commit` of a compare.
#[derive(Debug, Deserialize)]
pub(crate) struct CommitEntry {
    pub sha: String,
    pub commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommitDetail {
    pub committer: Signature,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Signature {
    pub date: DateTime<Utc>,
}

/// `GET /repos/{repo}/compare/{base}...{head}`.
#[derive(Debug, Deserialize)]
pub(crate) struct Comparison {
    pub merge_base_commit: Option<CommitEntry>,
}

/// `GET /search/issues`.
#[derive(Debug, Deserialize)]
pub(crate) struct SearchPage {
    pub total_count: u64,
    #[serde(default)]
    pub items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchItem {
    pub number: u64,
    pub title: String,
    pub user: Option<User>,
    #[serde(default)]
    pub labels: Vec<Label>,
    pub html_url: String,
    pub body: Option<String>,
    pub pull_request: Option<PullLink>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PullLink {
    pub merged_at: Option<DateTime<Utc>>,
}

impl SearchItem {
    /// Search hits carry no base ref; the caller supplies it.
    pub fn into_record(self, target_branch: String) -> PrRecord {
        PrRecord {
            number: self.number,
            title: self.title,
            author: login_or_unknown(self.user),
            merged_at: self.pull_request.and_then(|p| p.merged_at),
            labels: self.labels.into_iter().map(|l| l.name).collect(),
            target_branch,
            body: self.body,
            url: self.html_url,
        }
    }
}

/// `GET /repos/{repo}/pulls/{number}`.
#[derive(Debug, Deserialize)]
pub(crate) struct PullEntry {
    pub number: u64,
    pub title: String,
    pub user: Option<User>,
    #[serde(default)]
    pub labels: Vec<Label>,
    pub html_url: String,
    pub body: Option<String>,
    pub merged_at: Option<DateTime<Utc>>,
    pub base: BaseRef,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BaseRef {
    #[serde(rename = "ref")]
    pub name: String,
}

impl From<PullEntry> for PrRecord {
    fn from(p: PullEntry) -> Self {
        PrRecord {
            number: p.number,
            title: p.title,
            author: login_or_unknown(p.user),
            merged_at: p.merged_at,
            labels: p.labels.into_iter().map(|l| l.name).collect(),
            target_branch: p.base.name,
            body: p.body,
            url: p.html_url,
        }
    }
}

/// `GET /repos/{repo}/releases`.
#[derive(Debug, Deserialize)]
pub(crate) struct ReleaseEntry {
    pub tag_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
}

fn login_or_unknown(user: Option<User>) -> String {
    user.map(|u| u.login)
        .unwrap_or_else(|| "unknown".to_string())
}

/// Published releases only, newest first.
pub(crate) fn published_releases(entries: Vec<ReleaseEntry>) -> Vec<RuntimeReleaseRef> {
    let mut releases: Vec<RuntimeReleaseRef> = entries
        .into_iter()
        .filter(|r| !r.draft && !r.prerelease)
        .map(|r| RuntimeReleaseRef {
            tag: r.tag_name,
            created_at: r.created_at,
        })
        .collect();
    releases.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.tag.cmp(&a.tag)));
    releases
}

/// Issue-search query for `query` in `repo`.
///
/// Date qualifiers are day-granular and inclusive, so the result is a
/// superset; callers re-check hits with [`PrQuery::accepts`].
pub(crate) fn search_query(repo: &str, query: &PrQuery) -> String {
    let mut q = format!("repo:{repo} is:pr is:merged");
    if let Some(branch) = &query.target_branch {
        q.push_str(&format!(" base:{branch}"));
    }
    if !query.title_terms.is_empty() {
        for term in &query.title_terms {
            q.push_str(&format!(" \"{}\"", term.replace('"', "")));
        }
        q.push_str(" in:title");
    }
    let day = |d: &DateTime<Utc>| d.format("%Y-%m-%d").to_string();
    match (&query.merged_after, &query.merged_before) {
        (Some(after), Some(before)) => {
            q.push_str(&format!(" merged:{}..{}", day(after), day(before)))
        }
        (Some(after), None) => q.push_str(&format!(" merged:>={}", day(after))),
        (None, Some(before)) => q.push_str(&format!(" merged:<={}", day(before))),
        (None, None) => {}
    }
    q
}

/// Seconds until the advertised rate-limit reset, from `X-RateLimit-Reset`
/// (epoch seconds) or `Retry-After` (seconds).
pub(crate) fn rate_limit_wait(
    reset_epoch: Option<&str>,
    retry_after: Option<&str>,
    now: DateTime<Utc>,
) -> u64 {
    if let Some(secs) = retry_after.and_then(|v| v.trim().parse::<u64>().ok()) {
        return secs;
    }
    reset_epoch
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map(|reset| reset.saturating_sub(now.timestamp()).max(0) as u64)
        .unwrap_or(60)
}

/// Percent-encode a single path segment (ref names may contain `/`).
pub(crate) fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for b in segment.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
