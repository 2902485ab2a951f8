//! Bidirectional backport index.
//!
//! `backport_of` maps a backport PR to its root original and `backports_of`
//! is its exact transpose. Links are flattened on write: linking to a PR that
//! is itself a backport points at that PR's original instead, and a PR that
//! gains an original hands its own backports over to that original. No PR is
//! ever a key of both maps.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::domain::InvariantViolation;

/// Rejected backport links.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackportError {
    #[error("PR #{0} cannot be a backport of itself")]
    SelfLink(u64),

    #[error("linking #{backport} to #{original} would form a cycle")]
    Cycle { backport: u64, original: u64 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackportIndex {
    backport_of: BTreeMap<u64, u64>,
    backports_of: BTreeMap<u64, BTreeSet<u64>>,
}

impl BackportIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root original of `pr`, or `pr` itself when it is not a backport.
    pub fn root_of(&self, pr: u64) -> u64 {
        self.backport_of.get(&pr).copied().unwrap_or(pr)
    }

    /// Record `backport` as a backport of `original`, flattened to the root.
    /// Returns the root original the link now points at.
    pub fn link(&mut self, backport: u64, original: u64) -> Result<u64, BackportError> {
        if backport == original {
            return Err(BackportError::SelfLink(backport));
        }
        let root = self.root_of(original);
        if root == backport {
            return Err(BackportError::Cycle { backport, original });
        }

        self.detach(backport);

        if let Some(children) = self.backports_of.remove(&backport) {
            for child in children {
                self.backport_of.insert(child, root);
                self.backports_of.entry(root).or_default().insert(child);
            }
        }

        self.backport_of.insert(backport, root);
        self.backports_of.entry(root).or_default().insert(backport);
        Ok(root)
    }

    /// Remove the forward link of `backport`, keeping the inverse in step.
    pub fn unlink(&mut self, backport: u64) -> Option<u64> {
        self.detach(backport)
    }

    fn detach(&mut self, backport: u64) -> Option<u64> {
        let previous = self.backport_of.remove(&backport)?;
        if let Some(siblings) = self.backports_of.get_mut(&previous) {
            siblings.remove(&backport);
            if siblings.is_empty() {
                self.backports_of.remove(&previous);
            }
        }
        Some(previous)
    }

    pub fn original_of(&self, backport: u64) -> Option<u64> {
        self.backport_of.get(&backport).copied()
    }

    pub fn backports_of(&self, original: u64) -> Option<&BTreeSet<u64>> {
        self.backports_of.get(&original)
    }

    pub fn forward(&self) -> &BTreeMap<u64, u64> {
        &self.backport_of
    }

    pub fn inverse(&self) -> &BTreeMap<u64, BTreeSet<u64>> {
        &self.backports_of
    }

    pub fn len(&self) -> usize {
        self.backport_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backport_of.is_empty()
    }

    /// Check that the inverse is the structural transpose of the forward map
    /// and that no backport is itself an original.
    pub fn verify(&self) -> Result<(), InvariantViolation> {
        for (&backport, &original) in &self.backport_of {
            let listed = self
                .backports_of
                .get(&original)
                .is_some_and(|set| set.contains(&backport));
            if !listed {
                return Err(self.mismatch(backport));
            }
            if self.backports_of.contains_key(&backport) || self.backport_of.contains_key(&original)
            {
                return Err(InvariantViolation::NestedBackport { pr: backport });
            }
        }
        let mut inverse_entries = 0;
        for (&original, backports) in &self.backports_of {
            if backports.is_empty() {
                return Err(InvariantViolation::BackportIndexMismatch {
                    backport: original,
                    forward: None,
                    inverse: vec![],
                });
            }
            for &backport in backports {
                inverse_entries += 1;
                if self.backport_of.get(&backport) != Some(&original) {
                    return Err(self.mismatch(backport));
                }
            }
        }
        if inverse_entries != self.backport_of.len() {
            return Err(InvariantViolation::BackportIndexMismatch {
                backport: 0,
                forward: None,
                inverse: vec![],
            });
        }
        Ok(())
    }

    fn mismatch(&self, backport: u64) -> InvariantViolation {
        InvariantViolation::BackportIndexMismatch {
            backport,
            forward: self.backport_of.get(&backport).copied(),
            inverse: self
                .backports_of
                .iter()
                .filter(|(_, set)| set.contains(&backport))
                .map(|(&original, _)| original)
                .collect(),
        }
    }

    #[cfg(test)]
    pub(crate) fn corrupt_forward(&mut self, backport: u64, original: u64) {
        self.backport_of.insert(backport, original);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_is_bidirectional() {
        let mut index = BackportIndex::new();
        assert_eq!(index.link(300, 250), Ok(250));
        assert_eq!(index.original_of(300), Some(250));
        assert!(index.backports_of(250).unwrap().contains(&300));
        index.verify().unwrap();
    }

    #[test]
    fn backport_of_backport_flattens_to_root() {
        let mut index = BackportIndex::new();
        index.link(300, 250).unwrap();
        assert_eq!(index.link(310, 300), Ok(250));
        assert_eq!(index.original_of(310), Some(250));
        assert!(index.backports_of(300).is_none());
        assert_eq!(
            index.backports_of(250).unwrap().iter().copied().collect::<Vec<_>>(),
            vec![300, 310]
        );
        index.verify().unwrap();
    }

    #[test]
    fn late_original_link_hands_over_children() {
        let mut index = BackportIndex::new();
        index.link(310, 300).unwrap();
        // 300 turns out to be a backport of 250 itself.
        index.link(300, 250).unwrap();
        assert_eq!(index.original_of(310), Some(250));
        assert_eq!(index.original_of(300), Some(250));
        assert!(index.backports_of(300).is_none());
        index.verify().unwrap();
    }

    #[test]
    fn relink_moves_between_originals() {
        let mut index = BackportIndex::new();
        index.link(300, 250).unwrap();
        index.link(300, 260).unwrap();
        assert!(index.backports_of(250).is_none());
        assert_eq!(index.original_of(300), Some(260));
        index.verify().unwrap();
    }

    #[test]
    fn rejects_self_and_cycles() {
        let mut index = BackportIndex::new();
        assert_eq!(index.link(5, 5), Err(BackportError::SelfLink(5)));
        index.link(300, 250).unwrap();
        assert_eq!(
            index.link(250, 300),
            Err(BackportError::Cycle {
                backport: 250,
                original: 300
            })
        );
        index.verify().unwrap();
    }

    #[test]
    fn unlink_keeps_transpose() {
        let mut index = BackportIndex::new();
        index.link(300, 250).unwrap();
        index.link(301, 250).unwrap();
        assert_eq!(index.unlink(300), Some(250));
        assert_eq!(index.unlink(300), None);
        assert_eq!(index.backports_of(250).unwrap().len(), 1);
        index.verify().unwrap();
    }

    #[test]
    fn verify_detects_corruption() {
        let mut index = BackportIndex::new();
        index.link(300, 250).unwrap();
        index.corrupt_forward(301, 250);
        assert!(matches!(
            index.verify(),
            Err(InvariantViolation::BackportIndexMismatch { backport: 301, .. })
        ));
    }
}
