//! GitHub-backed source collaborators for relmap.
//!
//! [`GithubRepo`] implements the SDK and runtime collaborator traits of
//! `relmap-core` on top of the GitHub REST API. Transient failures are
//! retried with exponential backoff and rate limits wait for their reset;
//! whatever still fails is reported as a [`relmap_core::SourceError`] for
//! the pipeline to degrade.

pub mod client;
pub mod config;
pub mod repo;
mod wire;

#[cfg(test)]
mod testing;

pub use client::GithubClient;
pub use config::{GithubConfig, RetryConfig};
pub use repo::{GithubRepo, LOCKFILE_PATH};
