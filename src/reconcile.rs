//! Tag reconciliation
//!
//! Platforms that expose both curated releases and raw tags are merged per
//! repository here. Releases are authoritative. Tags are advisory: moving or
//! prerelease-looking tags are dropped before anything else, and a tag that
//! names an already-known `(repository, label)` pair is a duplicate signal
//! for that release and is dropped too.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::debug;

use crate::release::{sort_newest_first, ReleaseEvent};

/// Tags whose meaning moves over time
const MOVING_TAGS: &[&str] = &[
    "latest",
    "tip",
    "continuous",
    "head",
    "main",
    "master",
    "trunk",
    "develop",
    "development",
    "dev",
    "nightly",
    "edge",
    "canary",
    "release",
    "snapshot",
    "unstable",
    "experimental",
    "prerelease",
    "preview",
];

/// Bare prerelease words, rejected only when the tag is not semver-shaped
const BARE_PRERELEASE_TAGS: &[&str] = &["alpha", "beta", "rc"];

/// Prerelease identifiers inside a semver-shaped tag
const PRERELEASE_MARKERS: &[&str] = &["-alpha", "-beta", "-rc", "-pre"];

const SKIPPED_PREFIXES: &[&str] = &["pre-", "dev-", "test-", "debug-"];

fn semver_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^v?\d+\.\d+\.\d+(?:[-+].*)?$").expect("valid semver regex"))
}

fn git_describe_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-\d+-g[0-9a-f]{4,40}$").expect("valid describe regex"))
}

/// `major.minor.patch` with an optional leading `v` and optional `-`/`+` suffix
pub fn is_semver_shaped(tag: &str) -> bool {
    semver_regex().is_match(&tag.to_lowercase())
}

/// Whether a semver-shaped tag carries a prerelease identifier.
///
/// A trailing `git describe` suffix (`-212-g74599361`) is not one.
pub fn has_prerelease_identifier(tag: &str) -> bool {
    let lower = tag.to_lowercase();
    let without_describe = git_describe_regex().replace(&lower, "");
    PRERELEASE_MARKERS
        .iter()
        .any(|marker| without_describe.contains(marker))
}

/// Noise heuristics applied to every raw tag before it can become an event
pub fn should_skip_tag(tag: &str) -> bool {
    let lower = tag.trim().to_lowercase();

    if lower.is_empty() || MOVING_TAGS.contains(&lower.as_str()) {
        return true;
    }

    if is_semver_shaped(&lower) {
        if has_prerelease_identifier(&lower) {
            return true;
        }
    } else if BARE_PRERELEASE_TAGS.contains(&lower.as_str()) {
        return true;
    }

    SKIPPED_PREFIXES.iter().any(|prefix| lower.starts_with(prefix))
}

/// Merge one repository's (or one provider's) releases and tags.
///
/// Every release is kept, first occurrence winning on a repeated pair. Each
/// tag is consumed exactly once: dropped as noise, dropped as a duplicate, or
/// moved into the output marked as a derived tag. The result is sorted
/// most-recent-first.
pub fn reconcile(releases: Vec<ReleaseEvent>, tags: Vec<ReleaseEvent>) -> Vec<ReleaseEvent> {
    let mut known: HashSet<(String, String)> = HashSet::with_capacity(releases.len() + tags.len());
    let mut output = Vec::with_capacity(releases.len() + tags.len());

    for release in releases {
        if known.insert((release.repository.clone(), release.label.clone())) {
            output.push(release);
        }
    }

    let mut noisy = 0usize;
    let mut duplicates = 0usize;
    let mut derived = 0usize;

    for tag in tags {
        if should_skip_tag(&tag.label) {
            noisy += 1;
            continue;
        }

        if !known.insert((tag.repository.clone(), tag.label.clone())) {
            duplicates += 1;
            continue;
        }

        derived += 1;
        output.push(ReleaseEvent {
            is_derived_tag: true,
            ..tag
        });
    }

    if noisy + duplicates + derived > 0 {
        debug!(
            "Reconciled tags: {} kept, {} duplicates, {} skipped as noise",
            derived, duplicates, noisy
        );
    }

    sort_newest_first(&mut output);
    output
}
