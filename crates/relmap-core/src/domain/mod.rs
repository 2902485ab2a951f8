//! Domain records for relmap.
//!
//! Canonical definitions for the entities of one mapping run:
//! - `Tag`: an SDK release point with its tracked dependency versions
//! - `BranchInfo`: a stable branch, its divergence point and PR sets
//! - `PullRequest`: a merged SDK changeset
//! - `Release`: a runtime release bound to an SDK tag

pub mod branch;
pub mod error;
pub mod pull_request;
pub mod release;
pub mod tag;

pub use branch::{BranchInfo, Divergence, DivergenceConfidence};
pub use error::{EngineError, InvariantViolation, Result};
pub use pull_request::{AttributionKind, PullRequest};
pub use release::{MatchConfidence, Release, RuntimeRelease};
pub use tag::{Tag, TagConvention};
