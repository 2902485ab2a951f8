//! Backport detection and linkage.
//!
//! Provides:
//! - [`matcher::BackportMatcher`] / [`matcher::RegexMatcher`] — one detection strategy each
//! - [`BackportResolver`] — ordered evaluation, title first then body
//! - [`index::BackportIndex`] — flattened, bidirectional backport links

pub mod index;
pub mod matcher;

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::domain::{PullRequest, Result};

pub use index::{BackportError, BackportIndex};
pub use matcher::{default_matchers, BackportMatcher, MatchScope, RegexMatcher};

/// Evaluates an ordered list of matchers with first-match-wins semantics.
pub struct BackportResolver {
    matchers: Vec<Box<dyn BackportMatcher>>,
}

impl BackportResolver {
    pub fn new(matchers: Vec<Box<dyn BackportMatcher>>) -> Self {
        Self { matchers }
    }

    /// Resolver with the default matcher list for `owner/name`.
    pub fn for_repo(repo: &str) -> Result<Self> {
        Ok(Self::new(default_matchers(repo)?))
    }

    /// Original PR referenced by a backport's title or body.
    pub fn extract_backport(&self, title: &str, body: Option<&str>) -> Option<u64> {
        self.first_match(title, body, |_| true).map(|(_, n)| n)
    }

    /// Like [`extract_backport`](Self::extract_backport) for a concrete PR;
    /// references to the PR itself and to `#0` are skipped.
    pub fn extract_for(&self, pr: &PullRequest) -> Option<u64> {
        self.first_match(&pr.title, pr.body.as_deref(), |n| n != 0 && n != pr.number)
            .map(|(matcher, original)| {
                debug!(pr = pr.number, original, matcher, "backport reference found");
                original
            })
    }

    fn first_match(
        &self,
        title: &str,
        body: Option<&str>,
        accept: impl Fn(u64) -> bool,
    ) -> Option<(&str, u64)> {
        let title_hit = self
            .matchers
            .iter()
            .filter(|m| m.scope() == MatchScope::TitleAndBody)
            .find_map(|m| m.extract(title).filter(|&n| accept(n)).map(|n| (m.name(), n)));
        if title_hit.is_some() {
            return title_hit;
        }
        let body = body.filter(|b| !b.trim().is_empty())?;
        self.matchers
            .iter()
            .find_map(|m| m.extract(body).filter(|&n| accept(n)).map(|n| (m.name(), n)))
    }

    /// Build the backport index over every PR not merged into `trunk`.
    ///
    /// Trunk PRs are never backports. PRs are linked in ascending number
    /// order; rejected links are logged and skipped.
    pub fn build_index(&self, prs: &BTreeMap<u64, PullRequest>, trunk: &str) -> BackportIndex {
        let mut index = BackportIndex::new();
        for pr in prs.values().filter(|pr| pr.target_branch != trunk) {
            let Some(original) = self.extract_for(pr) else {
                continue;
            };
            if let Err(e) = index.link(pr.number, original) {
                warn!(pr = pr.number, original, error = %e, "backport link rejected");
            }
        }
        index
    }
}
