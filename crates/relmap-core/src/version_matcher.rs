//! Binding runtime releases to SDK tags by dependency fingerprint.
//!
//! 1. Score every tag sharing a (package, version) pair with the release by
//!    the number of matching packages.
//! 2. Among the top-scoring tags, pick the closest predecessor of the release
//!    date. Equal distances resolve to the greater tag name.
//! 3. Without any predecessor, fall back to the greatest tag name.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{MatchConfidence, Release, RuntimeRelease, Tag};
use crate::registry::TagRegistry;

/// Result of matching one dependency snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub tag: Option<String>,
    /// Number of tracked packages the chosen tag agrees on.
    pub score: usize,
    /// Number of tags sharing the top score.
    pub tied: usize,
    pub confidence: MatchConfidence,
}

impl MatchOutcome {
    fn unmatched() -> Self {
        Self {
            tag: None,
            score: 0,
            tied: 0,
            confidence: MatchConfidence::Unmatched,
        }
    }
}

pub struct VersionMatcher<'a> {
    registry: &'a TagRegistry,
}

impl<'a> VersionMatcher<'a> {
    pub fn new(registry: &'a TagRegistry) -> Self {
        Self { registry }
    }

    pub fn best_match(
        &self,
        versions: &BTreeMap<String, String>,
        release_date: Option<DateTime<Utc>>,
    ) -> MatchOutcome {
        let mut scores: BTreeMap<&str, usize> = BTreeMap::new();
        for (package, version) in versions {
            if let Some(names) = self.registry.tags_with(package, version) {
                for name in names {
                    *scores.entry(name.as_str()).or_default() += 1;
                }
            }
        }

        let Some(&score) = scores.values().max() else {
            return MatchOutcome::unmatched();
        };
        let tied: Vec<&Tag> = scores
            .iter()
            .filter(|(_, &s)| s == score)
            .filter_map(|(name, _)| self.registry.get(name))
            .collect();
        if tied.is_empty() {
            return MatchOutcome::unmatched();
        }

        let predecessor = release_date.and_then(|date| closest_predecessor(&tied, date));
        let (tag, confidence) = match predecessor {
            Some(tag) if tied.len() == 1 => (tag, MatchConfidence::Unique),
            Some(tag) => (tag, MatchConfidence::Temporal),
            None if tied.len() == 1 && release_date.is_none() => {
                (tied[0], MatchConfidence::Unique)
            }
            None => {
                let greatest = tied
                    .iter()
                    .copied()
                    .max_by(|a, b| a.name.cmp(&b.name))
                    .unwrap_or(tied[0]);
                (greatest, MatchConfidence::Fallback)
            }
        };

        MatchOutcome {
            tag: Some(tag.name.clone()),
            score,
            tied: tied.len(),
            confidence,
        }
    }

    /// Bind a discovered runtime release to its SDK tag.
    pub fn bind(&self, release: &RuntimeRelease) -> Release {
        let outcome = self.best_match(&release.dependency_versions, Some(release.created_at));
        let tag = outcome.tag.as_deref().and_then(|name| self.registry.get(name));
        Release {
            tag: release.tag.clone(),
            created_at: release.created_at,
            dependency_versions: release.dependency_versions.clone(),
            matched_tag: tag.map(|t| t.name.clone()),
            sdk_branch: tag.map(|t| t.branch.clone()),
            sdk_date: tag.map(|t| t.date),
            confidence: outcome.confidence,
        }
    }
}

fn closest_predecessor<'t>(tags: &[&'t Tag], date: DateTime<Utc>) -> Option<&'t Tag> {
    tags.iter()
        .copied()
        .filter(|t| t.date <= date)
        .min_by(|a, b| {
            (date - a.date)
                .cmp(&(date - b.date))
                .then_with(|| b.name.cmp(&a.name))
        })
}
