//! relmap core library
//!
//! Maps SDK pull requests to the runtime release that first shipped them.
//! Re-exports the engine components for programmatic access; remote data is
//! supplied through the collaborator traits in [`source`].

pub mod analyzer;
pub mod assignment;
pub mod backport;
pub mod config;
pub mod domain;
pub mod export;
pub mod fakes;
pub mod manifest;
pub mod metrics;
pub mod obs;
pub mod pipeline;
pub mod registry;
pub mod source;
pub mod store;
pub mod telemetry;
pub mod version_matcher;

pub use analyzer::{resolve_divergence, BranchAnalyzer};
pub use assignment::{
    count_by_attribution, Assignment, AssignmentEngine, AssignmentMap, AssignmentOutcome,
    ReleaseSchedule,
};
pub use backport::{BackportError, BackportIndex, BackportMatcher, BackportResolver};
pub use config::{TrackedDependency, TrackerConfig};
pub use domain::{
    AttributionKind, BranchInfo, Divergence, DivergenceConfidence, EngineError,
    InvariantViolation, MatchConfidence, PullRequest, Release, Result, RuntimeRelease, Tag,
    TagConvention,
};
pub use export::{
    load_statistics, MappingSnapshot, PrDetails, ReleaseEntry, ReleaseSummary, RunManifest,
    Statistics,
};
pub use pipeline::{compute, Computation, Pipeline, RunMode, RunOptions, RunReport};
pub use registry::{collect_tags, TagRegistry};
pub use source::{
    CommitPoint, PrQuery, PrRecord, RuntimeReleaseRef, RuntimeSource, SdkSource, SourceError,
    SourceResult, TagRef,
};
pub use store::{EntityCache, EntityStore, SourceSnapshot};
pub use telemetry::init_tracing;
pub use version_matcher::{MatchOutcome, VersionMatcher};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    fn version_is_set() {
        assert!(!super::VERSION.is_empty());
    }
}
