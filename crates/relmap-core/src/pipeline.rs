//! Run orchestration.
//!
//! A run has two phases:
//!
//! 1. **fetch**: bounded-concurrency remote calls materialize a
//!    [`SourceSnapshot`]. Single data points that fail degrade to missing.
//! 2. **compute**: [`compute`] runs branch analysis, backport linking,
//!    release matching and assignment over the immutable snapshot, with no
//!    I/O and no suspension points.
//!
//! Output is written only after both phases succeed and every invariant
//! holds; the entity cache is refreshed last.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::analyzer::{resolve_divergence, BranchAnalyzer};
use crate::assignment::{AssignmentEngine, ReleaseSchedule};
use crate::backport::BackportResolver;
use crate::config::TrackerConfig;
use crate::domain::{
    Divergence, InvariantViolation, PullRequest, Release, Result, RuntimeRelease, TagConvention,
};
use crate::export::{ExportInput, MappingSnapshot, RunManifest, Statistics};
use crate::manifest::locked_versions;
use crate::metrics::METRICS;
use crate::obs;
use crate::registry::{collect_tags, TagRegistry};
use crate::source::{PrQuery, RuntimeSource, SdkSource};
use crate::store::{EntityCache, EntityStore, SourceSnapshot};
use crate::version_matcher::VersionMatcher;

/// Whether a run starts from the previous snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Ignore prior output and the entity cache; recompute everything.
    Full,
    /// Keep prior assignments and only process releases not yet summarised.
    Incremental,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Full => "full",
            RunMode::Incremental => "incremental",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub output_dir: PathBuf,
    pub cache_dir: Option<PathBuf>,
    pub mode: RunMode,
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub mode: RunMode,
    pub releases_processed: usize,
    pub new_assignments: usize,
    pub degraded_fetches: u64,
    pub mapping_digest: String,
    pub statistics: Statistics,
}

/// Output of the compute phase.
#[derive(Debug, Clone)]
pub struct Computation {
    pub mapping: MappingSnapshot,
    pub releases_processed: usize,
    pub new_assignments: usize,
}

pub struct Pipeline {
    config: TrackerConfig,
    convention: TagConvention,
    resolver: BackportResolver,
    sdk: Arc<dyn SdkSource>,
    runtime: Arc<dyn RuntimeSource>,
}

impl Pipeline {
    pub fn new(
        config: TrackerConfig,
        sdk: Arc<dyn SdkSource>,
        runtime: Arc<dyn RuntimeSource>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            convention: config.convention()?,
            resolver: BackportResolver::for_repo(&config.sdk_repo)?,
            config,
            sdk,
            runtime,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Fetch, compute and atomically write one snapshot.
    pub async fn run(&self, opts: &RunOptions) -> Result<RunReport> {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id);
        let result = self.run_inner(&run_id, opts).instrument(span).await;
        if let Err(e) = &result {
            obs::emit_run_aborted(&run_id, e);
        }
        result
    }

    async fn run_inner(&self, run_id: &str, opts: &RunOptions) -> Result<RunReport> {
        let started = Instant::now();
        obs::emit_run_started(
            run_id,
            opts.mode.as_str(),
            &self.config.sdk_repo,
            &self.config.runtime_repo,
        );
        let degraded_before = METRICS.degraded_fetches();

        let (prior_cache, prior) = match (opts.mode, opts.cache_dir.as_deref()) {
            (RunMode::Full, _) => (EntityCache::default(), None),
            (RunMode::Incremental, cache_dir) => (
                cache_dir.map(EntityCache::load).unwrap_or_default(),
                MappingSnapshot::load(&opts.output_dir)?,
            ),
        };
        if opts.mode == RunMode::Incremental && prior.is_none() {
            info!("no prior snapshot, processing every release");
        }

        let snapshot = self.fetch(prior_cache).await?;
        let computation = compute(&snapshot, &self.config, prior.as_ref())?;
        let manifest = RunManifest::new(run_id, opts.mode.as_str(), &computation.mapping)?;
        computation.mapping.write(&opts.output_dir, &manifest)?;

        if let Some(dir) = &opts.cache_dir {
            EntityCache::from_snapshot(&snapshot).save(dir)?;
        }

        METRICS.flush();
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        obs::emit_run_finished(run_id, duration_ms, computation.new_assignments, true);

        Ok(RunReport {
            run_id: run_id.to_string(),
            mode: opts.mode,
            releases_processed: computation.releases_processed,
            new_assignments: computation.new_assignments,
            degraded_fetches: METRICS.degraded_fetches().saturating_sub(degraded_before),
            mapping_digest: manifest.mapping_digest,
            statistics: computation.mapping.statistics,
        })
    }

    /// Materialize every remote input of a run.
    pub async fn fetch(&self, prior: EntityCache) -> Result<SourceSnapshot> {
        let store = EntityStore::new(prior);
        let registry = collect_tags(
            Arc::clone(&self.sdk),
            &self.convention,
            &self.config.tracked,
            &store,
            self.config.max_concurrency,
        )
        .await?;

        let divergences = self.fetch_divergences(&registry).await;
        self.fetch_branch_prs(&divergences, &store).await;
        self.fetch_missing_originals(&store).await;
        let releases = self.fetch_releases().await?;

        let prs = store.freeze();
        info!(
            tags = registry.len(),
            branches = divergences.len(),
            prs = prs.len(),
            releases = releases.len(),
            "source snapshot frozen"
        );
        Ok(SourceSnapshot {
            trunk: self.config.trunk.clone(),
            registry,
            divergences,
            prs,
            releases,
        })
    }

    fn semaphore(&self) -> Arc<Semaphore> {
        Arc::new(Semaphore::new(self.config.max_concurrency.max(1)))
    }

    async fn fetch_divergences(
        &self,
        registry: &TagRegistry,
    ) -> BTreeMap<String, Option<Divergence>> {
        let sem = self.semaphore();
        let mut join_set = JoinSet::new();
        for (branch, tags) in registry.by_branch() {
            let earliest = tags.first().map(|t| t.date);
            let source = Arc::clone(&self.sdk);
            let trunk = self.config.trunk.clone();
            let sem = Arc::clone(&sem);
            join_set.spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                let divergence = resolve_divergence(source.as_ref(), &trunk, &branch, earliest).await;
                (branch, divergence)
            });
        }

        let mut divergences = BTreeMap::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((branch, divergence)) => {
                    divergences.insert(branch, divergence);
                }
                Err(e) => warn!(error = %e, "divergence task failed"),
            }
        }
        divergences
    }

    /// Searches covering every branch: merged into it, `[branch]` in the
    /// title, or `backport` plus the branch name in the title. Trunk PRs are
    /// fetched per window between consecutive divergence points.
    fn branch_queries(&self, divergences: &BTreeMap<String, Option<Divergence>>) -> Vec<PrQuery> {
        let mut queries = Vec::new();
        for branch in divergences.keys() {
            queries.push(PrQuery::targeting(branch.as_str()));
            queries.push(PrQuery::titled(&[format!("[{branch}]").as_str()]));
            queries.push(PrQuery::titled(&["backport", branch.as_str()]));
        }

        let cuts: BTreeSet<DateTime<Utc>> =
            divergences.values().flatten().map(|d| d.date).collect();
        let mut previous = self.config.trunk_floor;
        for cut in cuts {
            match previous {
                Some(after) if after < cut => queries.push(
                    PrQuery::targeting(self.config.trunk.as_str())
                        .merged_between(Some(after), Some(cut)),
                ),
                Some(_) => {}
                None => debug!(%cut, "no trunk floor, oldest branch inherits no trunk PRs"),
            }
            previous = Some(cut);
        }
        queries
    }

    async fn fetch_branch_prs(
        &self,
        divergences: &BTreeMap<String, Option<Divergence>>,
        store: &EntityStore,
    ) {
        let sem = self.semaphore();
        let mut join_set = JoinSet::new();
        for query in self.branch_queries(divergences) {
            let source = Arc::clone(&self.sdk);
            let sem = Arc::clone(&sem);
            join_set.spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                let result = source.search_merged_prs(&query).await;
                (query, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((query, Ok(records))) => {
                    debug!(?query, count = records.len(), "search complete");
                    for record in records {
                        store.put_pr(PullRequest::from(record));
                    }
                }
                Ok((query, Err(e))) => {
                    METRICS.inc_degraded_fetches();
                    warn!(?query, error = %e, "PR search failed, results missing");
                }
                Err(e) => warn!(error = %e, "search task failed"),
            }
        }
    }

    /// Fetch originals referenced by backports that no search returned.
    async fn fetch_missing_originals(&self, store: &EntityStore) {
        let mut missing = BTreeSet::new();
        for number in store.pr_numbers() {
            let Some(pr) = store.pr(number) else { continue };
            if pr.target_branch == self.config.trunk {
                continue;
            }
            if let Some(original) = self.resolver.extract_for(&pr) {
                if !store.contains_pr(original) {
                    missing.insert(original);
                }
            }
        }

        let sem = self.semaphore();
        let mut join_set = JoinSet::new();
        for number in missing {
            if let Some(cached) = store.pr(number) {
                METRICS.inc_cache_hits();
                store.put_pr(cached);
                continue;
            }
            let source = Arc::clone(&self.sdk);
            let sem = Arc::clone(&sem);
            join_set.spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                (number, source.get_pr(number).await)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_, Ok(Some(record)))) => store.put_pr(PullRequest::from(record)),
                Ok((number, Ok(None))) => debug!(pr = number, "original PR does not exist"),
                Ok((number, Err(e))) => {
                    METRICS.inc_degraded_fetches();
                    warn!(pr = number, error = %e, "original PR fetch failed");
                }
                Err(e) => warn!(error = %e, "original fetch task failed"),
            }
        }
    }

    /// Newest releases up to the configured limit, returned oldest first.
    async fn fetch_releases(&self) -> Result<Vec<RuntimeRelease>> {
        let mut listed = self.runtime.list_releases().await?;
        listed.truncate(self.config.max_releases);
        let tracked = Arc::new(self.config.tracked_names());

        let sem = self.semaphore();
        let mut join_set = JoinSet::new();
        for release in listed {
            let source = Arc::clone(&self.runtime);
            let tracked = Arc::clone(&tracked);
            let sem = Arc::clone(&sem);
            join_set.spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                let dependency_versions = match source.read_lockfile(&release.tag).await {
                    Ok(Some(lock)) => locked_versions(&lock, &tracked),
                    Ok(None) => {
                        debug!(release = %release.tag, "release has no lockfile");
                        BTreeMap::new()
                    }
                    Err(e) => {
                        METRICS.inc_degraded_fetches();
                        warn!(release = %release.tag, error = %e, "lockfile read failed");
                        BTreeMap::new()
                    }
                };
                RuntimeRelease {
                    tag: release.tag,
                    created_at: release.created_at,
                    dependency_versions,
                }
            });
        }

        let mut releases = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(release) => releases.push(release),
                Err(e) => warn!(error = %e, "lockfile task failed"),
            }
        }
        releases.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.tag.cmp(&b.tag)));
        Ok(releases)
    }
}

/// Compute the mapping over a frozen snapshot.
///
/// With a `prior` snapshot, its assignments seed the first-appearance
/// seen-set, releases it already summarises are skipped and its records are
/// carried forward.
pub fn compute(
    snapshot: &SourceSnapshot,
    config: &TrackerConfig,
    prior: Option<&MappingSnapshot>,
) -> Result<Computation> {
    let resolver = BackportResolver::for_repo(&config.sdk_repo)?;
    let index = resolver.build_index(&snapshot.prs, &snapshot.trunk);
    index.verify()?;

    let mut prs = snapshot.prs.clone();
    for pr in prs.values_mut() {
        pr.backport_of = index.original_of(pr.number);
    }

    let branches =
        BranchAnalyzer::new(&snapshot.trunk, &prs).analyze_all(&snapshot.registry, &snapshot.divergences);
    for info in branches.values() {
        if let Some(&pr) = info.direct_prs.intersection(&info.trunk_prs).next() {
            return Err(InvariantViolation::OverlappingAttribution {
                pr,
                branch: info.name.clone(),
            }
            .into());
        }
        obs::emit_branch_analyzed(info);
    }

    let summarised = prior.map(MappingSnapshot::summarised_versions).unwrap_or_default();
    let matcher = VersionMatcher::new(&snapshot.registry);
    let bound: Vec<Release> = snapshot
        .releases
        .iter()
        .filter(|r| !summarised.contains(r.version()))
        .map(|r| matcher.bind(r))
        .collect();
    for release in &bound {
        obs::emit_release_matched(release);
    }
    let schedule = ReleaseSchedule::new(bound);

    let engine = AssignmentEngine::new(&branches, &prs, &index);
    let engine = match prior {
        Some(p) => engine.with_prior(p.assignments()),
        None => engine,
    };
    let outcome = engine.assign_all(&schedule);
    outcome.verify()?;

    let mapping = MappingSnapshot::build(ExportInput {
        prs: &prs,
        index: &index,
        registry: &snapshot.registry,
        branches: &branches,
        schedule: &schedule,
        assignments: &outcome.assignments,
        by_release: &outcome.by_release,
        prior,
    });
    mapping.verify()?;

    Ok(Computation {
        mapping,
        releases_processed: schedule.len(),
        new_assignments: outcome.by_release.values().map(Vec::len).sum(),
    })
}
