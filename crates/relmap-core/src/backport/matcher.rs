//! Ordered backport reference matchers.
//!
//! Conventions drifted over time, so matchers are evaluated as a priority
//! list: newer, more specific patterns come first and the first match wins.

use regex::Regex;

use crate::domain::{EngineError, Result};

/// Where a matcher is allowed to look.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchScope {
    TitleAndBody,
    BodyOnly,
}

/// A single backport detection strategy.
pub trait BackportMatcher: Send + Sync {
    fn name(&self) -> &str;

    fn scope(&self) -> MatchScope {
        MatchScope::TitleAndBody
    }

    /// Original PR number referenced by `text`, if this strategy recognises it.
    fn extract(&self, text: &str) -> Option<u64>;
}

/// Matcher backed by a case-insensitive regex whose first capture group is
/// the original PR number.
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    name: String,
    regex: Regex,
    scope: MatchScope,
}

impl RegexMatcher {
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self> {
        let regex = Regex::new(&format!("(?i){pattern}")).map_err(|source| {
            EngineError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            }
        })?;
        Ok(Self {
            name: name.into(),
            regex,
            scope: MatchScope::TitleAndBody,
        })
    }

    pub fn body_only(mut self) -> Self {
        self.scope = MatchScope::BodyOnly;
        self
    }
}

impl BackportMatcher for RegexMatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn scope(&self) -> MatchScope {
        self.scope
    }

    fn extract(&self, text: &str) -> Option<u64> {
        self.regex
            .captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }
}

/// Default priority list for a repository `owner/name`.
pub fn default_matchers(repo: &str) -> Result<Vec<Box<dyn BackportMatcher>>> {
    let repo = regex::escape(repo);
    let matchers: Vec<Box<dyn BackportMatcher>> = vec![
        Box::new(RegexMatcher::new(
            "bracketed-branch",
            r"\[[\w.\-]+\]\s*(?:backport\s*)?#(\d+)",
        )?),
        Box::new(RegexMatcher::new("backport-ref", r"backport\s+#(\d+)")?),
        Box::new(RegexMatcher::new("backport-of", r"backport\s+of\s+#(\d+)")?),
        Box::new(RegexMatcher::new(
            "backports-repo-ref",
            &format!(r"backports?\s+{repo}#(\d+)"),
        )?),
        Box::new(RegexMatcher::new("ref-backport-suffix", r"#(\d+)\s*\(backport\)")?),
        Box::new(RegexMatcher::new("cherry-pick", r"cherry[- ]?pick\s+#(\d+)")?),
        Box::new(RegexMatcher::new("bot-branch-name", r"backport-(\d+)-to-")?),
        Box::new(RegexMatcher::new("first-body-ref", r"#(\d+)")?.body_only()),
    ];
    Ok(matchers)
}
