//! relmap CLI
//!
//! Maps SDK pull requests to the first runtime release that shipped them.
//!
//! ## Commands
//!
//! - `run`: fetch, compute and write a mapping snapshot
//! - `stats`: print the statistics of the persisted snapshot
//! - `lookup`: show the release and backport links of one PR

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use relmap_core::{
    load_statistics, MappingSnapshot, Pipeline, PrDetails, ReleaseEntry, RunMode, RunOptions,
    RunReport, Statistics, TrackerConfig,
};
use relmap_github::{GithubClient, GithubConfig, GithubRepo};
use serde::Serialize;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "relmap")]
#[command(version = relmap_core::VERSION)]
#[command(about = "Branch-aware mapping of SDK pull requests to runtime releases", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// TOML configuration file (defaults apply when omitted)
    #[arg(short, long, global = true, env = "RELMAP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch remote data, compute the mapping and write a snapshot
    Run {
        /// Snapshot directory
        #[arg(short, long, default_value = "data", env = "RELMAP_OUTPUT")]
        output: PathBuf,

        /// Entity cache directory (tags and PRs)
        #[arg(long, env = "RELMAP_CACHE_DIR")]
        cache_dir: Option<PathBuf>,

        /// Recompute everything instead of only new releases
        #[arg(long)]
        full: bool,
    },

    /// Print statistics of the persisted snapshot
    Stats {
        /// Snapshot directory
        #[arg(short, long, default_value = "data", env = "RELMAP_OUTPUT")]
        output: PathBuf,

        #[arg(long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Show which release first shipped a PR
    Lookup {
        /// PR number
        pr: u64,

        /// Snapshot directory
        #[arg(short, long, default_value = "data", env = "RELMAP_OUTPUT")]
        output: PathBuf,

        #[arg(long, value_enum, default_value = "text")]
        format: Format,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    relmap_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            output,
            cache_dir,
            full,
        } => {
            let config = TrackerConfig::load(cli.config.as_deref())
                .context("Failed to load configuration")?;
            let mode = if full {
                RunMode::Full
            } else {
                RunMode::Incremental
            };
            cmd_run(config, output, cache_dir, mode).await
        }
        Commands::Stats { output, format } => cmd_stats(&output, format),
        Commands::Lookup { pr, output, format } => cmd_lookup(&output, pr, format),
    }
}

async fn cmd_run(
    config: TrackerConfig,
    output_dir: PathBuf,
    cache_dir: Option<PathBuf>,
    mode: RunMode,
) -> Result<()> {
    let client =
        GithubClient::new(GithubConfig::from_env()).context("Failed to build GitHub client")?;
    let sdk = Arc::new(GithubRepo::new(client.clone(), &config.sdk_repo));
    let runtime = Arc::new(GithubRepo::new(client, &config.runtime_repo));
    let pipeline = Pipeline::new(config, sdk, runtime).context("Invalid configuration")?;

    let opts = RunOptions {
        output_dir,
        cache_dir,
        mode,
    };
    let report = pipeline
        .run(&opts)
        .await
        .with_context(|| format!("Run failed; {} left untouched", opts.output_dir.display()))?;

    info!(run_id = %report.run_id, "snapshot written");
    println!("{}", render_report(&report, &opts.output_dir));
    Ok(())
}

fn render_report(report: &RunReport, output_dir: &Path) -> String {
    let mut out = format!(
        "Run {} ({})\n  releases processed: {}\n  new assignments:    {}\n",
        report.run_id, report.mode, report.releases_processed, report.new_assignments
    );
    if report.degraded_fetches > 0 {
        out.push_str(&format!(
            "  degraded fetches:   {} (see logs)\n",
            report.degraded_fetches
        ));
    }
    out.push_str(&format!(
        "  mapping digest:     {}\n  written to:         {}",
        report.mapping_digest,
        output_dir.display()
    ));
    out
}

fn cmd_stats(output: &Path, format: Format) -> Result<()> {
    let stats = load_statistics(output)
        .with_context(|| format!("No statistics in {}", output.display()))?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        Format::Text => println!("{}", render_stats(&stats)),
    }
    Ok(())
}

fn render_stats(stats: &Statistics) -> String {
    let mut lines = vec![
        format!("PRs:                  {}", stats.total_prs),
        format!("  assigned:           {}", stats.assigned_prs),
        format!("  unassigned:         {}", stats.unassigned_prs),
        format!("  backport links:     {}", stats.backport_links),
        format!("Releases:             {}", stats.total_releases),
        format!("  matched:            {}", stats.matched_releases),
        format!("  unmatched:          {}", stats.unmatched_releases),
        format!("  ambiguous matches:  {}", stats.ambiguous_matches),
        format!("Approximate branches: {}", stats.approximate_branches),
    ];
    for (kind, count) in &stats.by_attribution {
        lines.push(format!("  {:<19} {}", format!("{kind}:"), count));
    }
    lines.join("\n")
}

/// Everything the snapshot knows about one PR.
#[derive(Debug, Serialize)]
struct PrLookup {
    pr: u64,
    details: Option<PrDetails>,
    releases: Vec<ReleaseEntry>,
    backport_of: Option<u64>,
    backports: Vec<u64>,
}

fn lookup(snapshot: &MappingSnapshot, pr: u64) -> Option<PrLookup> {
    let details = snapshot.pr_details.get(&pr).cloned();
    let releases = snapshot.pr_releases.get(&pr).cloned().unwrap_or_default();
    let backport_of = snapshot.backports.backport_of.get(&pr).copied();
    let backports: Vec<u64> = snapshot
        .backports
        .backports_of
        .get(&pr)
        .map(|set| set.iter().copied().collect())
        .unwrap_or_default();
    if details.is_none() && releases.is_empty() && backport_of.is_none() && backports.is_empty() {
        return None;
    }
    Some(PrLookup {
        pr,
        details,
        releases,
        backport_of,
        backports,
    })
}

fn render_lookup(found: &PrLookup) -> String {
    let mut lines = Vec::new();
    match &found.details {
        Some(d) => {
            lines.push(format!("#{} {}", found.pr, d.title));
            lines.push(format!("  author: {}  target: {}", d.author, d.target_branch));
            if let Some(merged) = d.merged_at {
                lines.push(format!("  merged: {}", merged.format("%Y-%m-%d %H:%M UTC")));
            }
            lines.push(format!("  {}", d.url));
        }
        None => lines.push(format!("#{}", found.pr)),
    }
    match found.releases.first() {
        Some(entry) => {
            let mut line = format!(
                "First shipped in {} (SDK {} on {}, {})",
                entry.runtime_version, entry.sdk_tag, entry.sdk_branch, entry.attribution
            );
            if let Some(original) = entry.original_pr {
                line.push_str(&format!(", original #{original}"));
            }
            lines.push(line);
        }
        None => lines.push("Not shipped in any known runtime release".to_string()),
    }
    if let Some(original) = found.backport_of {
        lines.push(format!("Backport of #{original}"));
    }
    if !found.backports.is_empty() {
        let list: Vec<String> = found.backports.iter().map(|n| format!("#{n}")).collect();
        lines.push(format!("Backported as {}", list.join(", ")));
    }
    lines.join("\n")
}

fn cmd_lookup(output: &Path, pr: u64, format: Format) -> Result<()> {
    let snapshot = MappingSnapshot::load(output)
        .with_context(|| format!("Failed to read snapshot in {}", output.display()))?;
    let Some(snapshot) = snapshot else {
        bail!("No snapshot in {}; run `relmap run` first", output.display());
    };
    let Some(found) = lookup(&snapshot, pr) else {
        bail!("PR #{pr} is not in the snapshot at {}", output.display());
    };
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&found)?),
        Format::Text => println!("{}", render_lookup(&found)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use clap::CommandFactory;
    use relmap_core::fakes::MemorySource;
    use relmap_core::{PrRecord, TrackedDependency};

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn pr(number: u64, title: &str, branch: &str, merged_at: &str) -> PrRecord {
        PrRecord {
            number,
            title: title.to_string(),
            author: "dev".to_string(),
            merged_at: Some(at(merged_at)),
            labels: vec![],
            target_branch: branch.to_string(),
            body: None,
            url: format!("https://github.com/o/sdk/pull/{number}"),
        }
    }

    async fn snapshot_dir() -> tempfile::TempDir {
        let source = Arc::new(MemorySource::new());
        source.add_tag("polkadot-stable2409", "c1", at("2024-09-20T00:00:00Z"));
        source.add_tag("polkadot-stable2409-1", "c2", at("2024-10-20T00:00:00Z"));
        source.set_file("c1", "rt/Cargo.toml", "[package]\nversion = \"39.0.0\"\n");
        source.set_file("c2", "rt/Cargo.toml", "[package]\nversion = \"39.0.1\"\n");
        source.set_merge_base("stable2409", "m1", at("2024-09-01T00:00:00Z"));
        source.add_pr(pr(1, "Trunk fix", "master", "2024-08-15T00:00:00Z"));
        source.add_pr(pr(2, "Late fix", "master", "2024-10-01T00:00:00Z"));
        source.add_pr(pr(3, "[stable2409] Backport #2", "stable2409", "2024-10-10T00:00:00Z"));
        let lock = |v: &str| format!("[[package]]\nname = \"sp-runtime\"\nversion = \"{v}\"\n");
        source.add_release("v1.0.0", at("2024-09-25T00:00:00Z"), Some(&lock("39.0.0")));
        source.add_release("v1.1.0", at("2024-10-25T00:00:00Z"), Some(&lock("39.0.1")));

        let config = TrackerConfig {
            sdk_repo: "o/sdk".to_string(),
            tracked: vec![TrackedDependency::new("sp-runtime", "rt/Cargo.toml")],
            trunk_floor: Some(at("2024-01-01T00:00:00Z")),
            ..TrackerConfig::default()
        };
        let pipeline = Pipeline::new(config, source.clone(), source.clone()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        pipeline
            .run(&RunOptions {
                output_dir: dir.path().join("data"),
                cache_dir: None,
                mode: RunMode::Full,
            })
            .await
            .unwrap();
        dir
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_defaults_to_incremental() {
        let cli = Cli::parse_from(["relmap", "run", "--output", "out"]);
        match cli.command {
            Commands::Run { output, full, .. } => {
                assert_eq!(output, PathBuf::from("out"));
                assert!(!full);
            }
            _ => panic!("expected run"),
        }
    }

    #[tokio::test]
    async fn lookup_reports_backport_release() {
        let dir = snapshot_dir().await;
        let snapshot = MappingSnapshot::load(&dir.path().join("data")).unwrap().unwrap();

        let found = lookup(&snapshot, 3).unwrap();
        assert_eq!(found.releases[0].runtime_version, "1.1.0");
        assert_eq!(found.backport_of, Some(2));
        let text = render_lookup(&found);
        assert!(text.contains("First shipped in 1.1.0"));
        assert!(text.contains("Backport of #2"));

        let original = lookup(&snapshot, 2).unwrap();
        assert_eq!(original.backports, vec![3]);
        assert!(render_lookup(&original).contains("Backported as #3"));

        assert!(lookup(&snapshot, 999).is_none());
    }

    #[tokio::test]
    async fn stats_render_from_disk() {
        let dir = snapshot_dir().await;
        let stats = load_statistics(&dir.path().join("data")).unwrap();
        assert_eq!(stats.total_releases, 2);
        let text = render_stats(&stats);
        assert!(text.contains("Releases:             2"));
        assert!(text.contains("backport"));
    }

    #[test]
    fn lookup_without_snapshot_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = cmd_lookup(dir.path(), 1, Format::Text).unwrap_err();
        assert!(err.to_string().contains("No snapshot"));
    }
}
