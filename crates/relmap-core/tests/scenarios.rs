//! Mapping scenarios over hand-built source snapshots.
//!
//! Covers:
//! - Trunk inheritance at a branch cut, including the inclusive boundary
//! - First-appearance assignment across releases of different branches
//! - Backport linkage and independent assignment of backports
//! - Unmatched releases recorded as gaps
//! - Determinism and byte-identical reruns

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use relmap_core::{
    compute, AttributionKind, Divergence, MatchConfidence, PullRequest, RuntimeRelease,
    SourceSnapshot, Tag, TagRegistry, TrackerConfig,
};

fn at(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

fn tag(name: &str, branch: &str, date: &str, runtime: &str) -> Tag {
    Tag {
        name: name.to_string(),
        commit: format!("sha-{name}"),
        date: at(date),
        branch: branch.to_string(),
        versions: [("sp-runtime".to_string(), runtime.to_string())]
            .into_iter()
            .collect(),
        complete: true,
    }
}

fn pr(number: u64, target: &str, title: &str, merged_at: &str) -> PullRequest {
    PullRequest {
        number,
        title: title.to_string(),
        author: "dev".to_string(),
        merged_at: Some(at(merged_at)),
        labels: vec![],
        target_branch: target.to_string(),
        url: format!("https://github.com/paritytech/polkadot-sdk/pull/{number}"),
        body: None,
        backport_of: None,
    }
}

fn release(tag: &str, created_at: &str, runtime: &str) -> RuntimeRelease {
    RuntimeRelease {
        tag: tag.to_string(),
        created_at: at(created_at),
        dependency_versions: [("sp-runtime".to_string(), runtime.to_string())]
            .into_iter()
            .collect(),
    }
}

fn snapshot(
    tags: Vec<Tag>,
    divergences: &[(&str, Option<Divergence>)],
    prs: Vec<PullRequest>,
    releases: Vec<RuntimeRelease>,
) -> SourceSnapshot {
    SourceSnapshot {
        trunk: "master".to_string(),
        registry: TagRegistry::from_tags(tags),
        divergences: divergences
            .iter()
            .map(|(b, d)| (b.to_string(), d.clone()))
            .collect(),
        prs: prs.into_iter().map(|p| (p.number, p)).collect(),
        releases,
    }
}

fn cut(date: &str) -> Option<Divergence> {
    Some(Divergence::exact(format!("base-{date}"), at(date)))
}

// ---- Scenario 1: branch cut ----

#[test]
fn trunk_prs_before_cut_are_inherited() {
    let snap = snapshot(
        vec![tag("stable-A", "stable-A", "2025-01-15T00:00:00Z", "1.0.0")],
        &[("stable-A", cut("2025-01-10T00:00:00Z"))],
        vec![
            pr(100, "master", "before cut", "2025-01-09T00:00:00Z"),
            pr(101, "master", "after cut", "2025-01-11T00:00:00Z"),
        ],
        vec![release("v1.0", "2025-01-20T00:00:00Z", "1.0.0")],
    );
    let out = compute(&snap, &TrackerConfig::default(), None).unwrap().mapping;

    let entry = &out.pr_releases[&100][0];
    assert_eq!(entry.runtime_version, "1.0");
    assert_eq!(entry.attribution, AttributionKind::FromTrunk);
    assert!(out.pr_releases[&101].is_empty());
    assert_eq!(out.release_mapping.branches["stable-A"].pr_count, 1);
}

#[test]
fn pr_merged_exactly_at_cut_is_inherited() {
    let snap = snapshot(
        vec![tag("stable-A", "stable-A", "2025-01-15T00:00:00Z", "1.0.0")],
        &[("stable-A", cut("2025-01-10T00:00:00Z"))],
        vec![pr(102, "master", "at the cut", "2025-01-10T00:00:00Z")],
        vec![release("v1.0", "2025-01-20T00:00:00Z", "1.0.0")],
    );
    let out = compute(&snap, &TrackerConfig::default(), None).unwrap().mapping;
    assert_eq!(out.pr_releases[&102][0].attribution, AttributionKind::FromTrunk);
}

#[test]
fn approximate_divergence_is_flagged() {
    let snap = snapshot(
        vec![tag("stable-A", "stable-A", "2025-01-15T00:00:00Z", "1.0.0")],
        &[(
            "stable-A",
            Some(Divergence::approximate(at("2025-01-15T00:00:00Z"))),
        )],
        vec![pr(100, "master", "x", "2025-01-12T00:00:00Z")],
        vec![release("v1.0", "2025-01-20T00:00:00Z", "1.0.0")],
    );
    let out = compute(&snap, &TrackerConfig::default(), None).unwrap().mapping;
    assert!(out.release_mapping.branches["stable-A"].approximate);
    assert_eq!(out.statistics.approximate_branches, 1);
    assert_eq!(out.pr_releases[&100][0].runtime_version, "1.0");
}

// ---- Scenario 2: first appearance ----

fn two_branch_snapshot() -> SourceSnapshot {
    snapshot(
        vec![
            tag("S1", "S1", "2025-01-10T00:00:00Z", "1.0.0"),
            tag("S2", "S2", "2025-02-10T00:00:00Z", "2.0.0"),
        ],
        &[
            ("S1", cut("2025-01-08T00:00:00Z")),
            ("S2", cut("2025-02-05T00:00:00Z")),
        ],
        vec![
            pr(200, "master", "shared ancestry", "2025-01-05T00:00:00Z"),
            pr(201, "master", "only in S2", "2025-01-20T00:00:00Z"),
            pr(202, "S1", "S1 fix after tag", "2025-01-15T00:00:00Z"),
        ],
        vec![
            release("v1.1", "2025-02-12T00:00:00Z", "2.0.0"),
            release("v1.0", "2025-01-12T00:00:00Z", "1.0.0"),
        ],
    )
}

#[test]
fn shared_pr_goes_to_earliest_release_only() {
    let out = compute(&two_branch_snapshot(), &TrackerConfig::default(), None)
        .unwrap()
        .mapping;
    assert_eq!(out.pr_releases[&200].len(), 1);
    assert_eq!(out.pr_releases[&200][0].runtime_version, "1.0");
    assert_eq!(out.pr_releases[&201][0].runtime_version, "1.1");
    // Merged into S1 after its only tag, and never part of S2.
    assert!(out.pr_releases[&202].is_empty());

    let summaries: BTreeMap<&str, usize> = out
        .releases
        .iter()
        .map(|r| (r.version.as_str(), r.new_prs))
        .collect();
    assert_eq!(summaries["1.0"], 1);
    assert_eq!(summaries["1.1"], 1);
    assert_eq!(out.releases[0].version, "1.0");
}

#[test]
fn attributable_prs_never_land_in_a_later_release() {
    let snap = two_branch_snapshot();
    let out = compute(&snap, &TrackerConfig::default(), None).unwrap().mapping;
    let order: Vec<&str> = out.releases.iter().map(|r| r.version.as_str()).collect();

    for (position, summary) in out.releases.iter().enumerate() {
        let (Some(branch), Some(cutoff)) = (&summary.sdk_branch, summary.sdk_date) else {
            continue;
        };
        let info = &out.release_mapping.branches[branch];
        let divergence = info.divergence.as_ref().unwrap().date;
        for pr in snap.prs.values() {
            let attributable = pr.target_branch == *branch
                || (pr.target_branch == "master" && pr.merged_by(divergence));
            if !attributable || !pr.merged_by(cutoff) {
                continue;
            }
            let assigned = &out.pr_releases[&pr.number][0].runtime_version;
            let assigned_at = order.iter().position(|v| v == assigned).unwrap();
            assert!(assigned_at <= position, "#{} assigned too late", pr.number);
        }
    }
}

// ---- Scenario 3: backports ----

fn backport_snapshot() -> SourceSnapshot {
    let mut follow_up = pr(310, "stable-D", "[stable-D] Backport #300", "2025-03-10T00:00:00Z");
    follow_up.body = Some("Chained backport".to_string());
    snapshot(
        vec![
            tag("stable-C", "stable-C", "2025-02-28T00:00:00Z", "1.5.0"),
            tag("stable-B-1", "stable-B", "2025-03-05T00:00:00Z", "2.0.0"),
            tag("stable-D", "stable-D", "2025-03-12T00:00:00Z", "3.0.0"),
        ],
        &[
            ("stable-B", cut("2025-02-01T00:00:00Z")),
            ("stable-C", cut("2025-02-25T00:00:00Z")),
            ("stable-D", cut("2025-01-01T00:00:00Z")),
        ],
        vec![
            pr(250, "master", "Original fix", "2025-02-20T00:00:00Z"),
            pr(300, "stable-B", "[stable-B] Backport #250", "2025-03-01T00:00:00Z"),
            follow_up,
        ],
        vec![
            release("v1.5", "2025-03-01T00:00:00Z", "1.5.0"),
            release("v2.0", "2025-03-06T00:00:00Z", "2.0.0"),
            release("v3.0", "2025-03-13T00:00:00Z", "3.0.0"),
        ],
    )
}

#[test]
fn backport_is_linked_and_assigned_on_its_own() {
    let out = compute(&backport_snapshot(), &TrackerConfig::default(), None)
        .unwrap()
        .mapping;

    assert_eq!(out.backports.backport_of[&300], 250);
    assert!(out.backports.backports_of[&250].contains(&300));

    let original = &out.pr_releases[&250][0];
    assert_eq!(original.runtime_version, "1.5");
    assert_eq!(original.attribution, AttributionKind::FromTrunk);

    let backport = &out.pr_releases[&300][0];
    assert_eq!(backport.runtime_version, "2.0");
    assert_eq!(backport.attribution, AttributionKind::Backport);
    assert_eq!(backport.original_pr, Some(250));

    assert!(out.pr_details[&300].is_backport);
    assert!(out.pr_details[&250].has_backports);
}

#[test]
fn backport_of_backport_flattens_to_root() {
    let out = compute(&backport_snapshot(), &TrackerConfig::default(), None)
        .unwrap()
        .mapping;
    assert_eq!(out.backports.backport_of[&310], 250);
    assert!(!out.backports.backports_of.contains_key(&300));
    assert_eq!(
        out.backports.backports_of[&250].iter().copied().collect::<Vec<_>>(),
        vec![300, 310]
    );
    assert_eq!(out.pr_releases[&310][0].original_pr, Some(250));
    assert_eq!(out.statistics.backport_links, 2);
    out.verify().unwrap();
}

// ---- Scenario 4: unmatched release ----

#[test]
fn unmatched_release_is_a_recorded_gap() {
    let snap = snapshot(
        vec![tag("stable-A", "stable-A", "2025-01-15T00:00:00Z", "1.0.0")],
        &[("stable-A", cut("2025-01-10T00:00:00Z"))],
        vec![pr(100, "master", "x", "2025-01-09T00:00:00Z")],
        vec![
            release("v0.9", "2025-01-16T00:00:00Z", "0.1.0"),
            release("v1.0", "2025-01-20T00:00:00Z", "1.0.0"),
        ],
    );
    let out = compute(&snap, &TrackerConfig::default(), None).unwrap().mapping;

    let gap = out.releases.iter().find(|r| r.version == "0.9").unwrap();
    assert!(gap.sdk_tag.is_none());
    assert_eq!(gap.confidence, MatchConfidence::Unmatched);
    assert_eq!(gap.new_prs, 0);
    assert_eq!(out.statistics.unmatched_releases, 1);
    assert_eq!(out.statistics.matched_releases, 1);
    assert_eq!(out.pr_releases[&100][0].runtime_version, "1.0");
}

// ---- Determinism ----

#[test]
fn equal_distance_ties_resolve_the_same_way_every_run() {
    let build = || {
        snapshot(
            vec![
                tag("stable-A-1", "stable-A", "2025-01-15T00:00:00Z", "1.0.0"),
                tag("stable-A-2", "stable-A", "2025-01-15T00:00:00Z", "1.0.0"),
            ],
            &[("stable-A", cut("2025-01-10T00:00:00Z"))],
            vec![],
            vec![release("v1.0", "2025-01-20T00:00:00Z", "1.0.0")],
        )
    };
    let first = compute(&build(), &TrackerConfig::default(), None).unwrap().mapping;
    for _ in 0..5 {
        let again = compute(&build(), &TrackerConfig::default(), None).unwrap().mapping;
        assert_eq!(again.releases, first.releases);
    }
    assert_eq!(first.releases[0].sdk_tag.as_deref(), Some("stable-A-2"));
    assert_eq!(first.releases[0].confidence, MatchConfidence::Temporal);
}

#[test]
fn rerun_on_unchanged_snapshot_is_byte_identical() {
    let snap = backport_snapshot();
    let a = compute(&snap, &TrackerConfig::default(), None).unwrap().mapping;
    let b = compute(&snap, &TrackerConfig::default(), None).unwrap().mapping;
    assert_eq!(a.mapping_bytes().unwrap(), b.mapping_bytes().unwrap());
    assert_eq!(a.mapping_digest().unwrap(), b.mapping_digest().unwrap());
    assert_eq!(a, b);
}

#[test]
fn statistics_count_attribution_kinds() {
    let out = compute(&backport_snapshot(), &TrackerConfig::default(), None)
        .unwrap()
        .mapping;
    let stats = &out.statistics;
    assert_eq!(stats.total_prs, 3);
    assert_eq!(stats.total_releases, 3);
    assert_eq!(stats.assigned_prs, 3);
    assert_eq!(stats.by_attribution[&AttributionKind::Backport], 2);
    assert_eq!(stats.by_attribution[&AttributionKind::FromTrunk], 1);
}
