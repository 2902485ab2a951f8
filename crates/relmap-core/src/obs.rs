//! Structured observability hooks for relmap run lifecycle events.
//!
//! This module provides:
//! - A run-scoped tracing span
//! - Emission functions for key lifecycle events: start, branch analysis,
//!   release matching, finish
//!
//! Events are emitted at `info!` level (configurable via `RUST_LOG`).

use tracing::info;

use crate::domain::{BranchInfo, Release};

/// Span carrying `run_id` for every event of one run. Attach it to the
/// run future with `tracing::Instrument`.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("relmap.run", run_id = %run_id)
}

/// Emit event: run started.
pub fn emit_run_started(run_id: &str, mode: &str, sdk_repo: &str, runtime_repo: &str) {
    info!(
        event = "run.started",
        run_id = %run_id,
        mode = %mode,
        sdk_repo = %sdk_repo,
        runtime_repo = %runtime_repo,
    );
}

/// Emit event: one stable branch analysed.
pub fn emit_branch_analyzed(branch: &BranchInfo) {
    info!(
        event = "branch.analyzed",
        branch = %branch.name,
        divergence = ?branch.divergence.as_ref().map(|d| d.date),
        approximate = branch.is_approximate(),
        direct_prs = branch.direct_prs.len(),
        trunk_prs = branch.trunk_prs.len(),
    );
}

/// Emit event: a runtime release bound (or not) to an SDK tag.
pub fn emit_release_matched(release: &Release) {
    info!(
        event = "release.matched",
        release = %release.tag,
        sdk_tag = release.matched_tag.as_deref().unwrap_or("-"),
        confidence = ?release.confidence,
    );
}

/// Emit event: run finished.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, assignments: usize, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        assignments = assignments,
        success = success,
    );
}

/// Emit event: run aborted before output was written (warning level).
pub fn emit_run_aborted(run_id: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "run.aborted", run_id = %run_id, error = %error);
}
