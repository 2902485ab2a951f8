//! Domain-level error taxonomy for relmap.

/// Broken engine invariants. Any of these aborts the run before output is
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("PR #{pr} assigned to {count} releases: {releases:?}")]
    MultipleAssignments {
        pr: u64,
        count: usize,
        releases: Vec<String>,
    },

    #[error("backport index disagrees for #{backport}: forward={forward:?}, inverse={inverse:?}")]
    BackportIndexMismatch {
        backport: u64,
        forward: Option<u64>,
        inverse: Vec<u64>,
    },

    #[error("PR #{pr} is both a backport and the original of other backports")]
    NestedBackport { pr: u64 },

    #[error("PR #{pr} is attributed to branch {branch} both directly and from trunk")]
    OverlappingAttribution { pr: u64, branch: String },
}

/// relmap engine errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invariant violation: {0}")]
    InvariantViolation(#[from] InvariantViolation),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid tag pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("source error: {0}")]
    Source(#[from] crate::source::SourceError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for relmap engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
