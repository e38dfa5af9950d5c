//! Merge, sort and age filter
//!
//! The last pipeline stage: concatenate every provider's events, order them
//! most-recent-first, enforce `(repository, label)` uniqueness across
//! providers, and keep only what falls inside the trailing age window.

use std::collections::HashSet;
use tracing::debug;

use crate::release::{ProviderResult, ReleaseEvent};

/// Default trailing window: 90 days
pub const DEFAULT_AGE_LIMIT_SECS: i64 = 90 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    /// Events older than `now - age_limit_secs` are dropped
    pub age_limit_secs: i64,
    /// Optional cap applied after filtering
    pub max_events: Option<usize>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            age_limit_secs: DEFAULT_AGE_LIMIT_SECS,
            max_events: None,
        }
    }
}

/// Merge per-provider batches into the final feed order.
///
/// The result is non-increasing in `published_at`. On equal timestamps a
/// release sorts ahead of a derived tag; otherwise the input order is kept.
/// An event exactly at the cutoff is retained.
pub fn merge_and_filter(batches: Vec<Vec<ReleaseEvent>>, now: i64, options: &MergeOptions) -> Vec<ReleaseEvent> {
    let mut events: Vec<ReleaseEvent> = batches.into_iter().flatten().collect();
    let total = events.len();

    events.sort_by(|a, b| {
        b.published_at
            .cmp(&a.published_at)
            .then(a.is_derived_tag.cmp(&b.is_derived_tag))
    });

    let mut seen: HashSet<(String, String)> = HashSet::with_capacity(events.len());
    events.retain(|e| seen.insert((e.repository.clone(), e.label.clone())));
    let unique = events.len();

    let cutoff = now.saturating_sub(options.age_limit_secs);
    events.retain(|e| e.published_at >= cutoff);
    let in_window = events.len();

    if let Some(max) = options.max_events {
        events.truncate(max);
    }

    debug!(
        "Merged {} events: {} unique, {} inside window, {} kept",
        total,
        unique,
        in_window,
        events.len()
    );

    events
}

/// Convenience wrapper over orchestrator output
pub fn merge_results(results: &[ProviderResult], now: i64, options: &MergeOptions) -> Vec<ReleaseEvent> {
    let batches = results.iter().map(|r| r.events.clone()).collect();
    merge_and_filter(batches, now, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::TestResult;
    use quickcheck_macros::quickcheck;

    const NOW: i64 = 1_700_000_000;

    fn event(repository: &str, label: &str, ts: i64, derived: bool) -> ReleaseEvent {
        ReleaseEvent {
            repository: repository.to_string(),
            label: label.to_string(),
            published_at: ts,
            url: format!("https://example.com/{}/{}", repository, label),
            notes: String::new(),
            provider: "test".to_string(),
            is_derived_tag: derived,
        }
    }

    fn options(age: i64) -> MergeOptions {
        MergeOptions {
            age_limit_secs: age,
            max_events: None,
        }
    }

    #[test]
    fn test_age_window_boundary() {
        let n = 3600 * 24;
        let batches = vec![vec![
            event("a/edge", "v1.0.0", NOW - n, false),
            event("a/old", "v1.0.0", NOW - n - 1, false),
            event("a/recent", "v1.0.0", NOW - n + 3600, false),
        ]];

        let merged = merge_and_filter(batches, NOW, &options(n));
        let repos: Vec<&str> = merged.iter().map(|e| e.repository.as_str()).collect();
        assert_eq!(repos, vec!["a/recent", "a/edge"]);
    }

    #[test]
    fn test_default_window_is_ninety_days() {
        assert_eq!(MergeOptions::default().age_limit_secs, 7_776_000);
    }

    #[test]
    fn test_interleaves_providers_by_time() {
        let github = vec![event("gh/a", "v2", NOW - 10, false), event("gh/b", "v1", NOW - 300, false)];
        let gitlab = vec![event("gl/a", "v9", NOW - 100, false)];

        let merged = merge_and_filter(vec![github, gitlab], NOW, &MergeOptions::default());
        let repos: Vec<&str> = merged.iter().map(|e| e.repository.as_str()).collect();
        assert_eq!(repos, vec!["gh/a", "gl/a", "gh/b"]);
    }

    #[test]
    fn test_duplicate_pair_prefers_release_on_tie() {
        let tag_first = vec![event("x/y", "v1.0.0", NOW - 5, true)];
        let release_second = vec![event("x/y", "v1.0.0", NOW - 5, false)];

        let merged = merge_and_filter(vec![tag_first, release_second], NOW, &MergeOptions::default());
        assert_eq!(merged.len(), 1);
        assert!(!merged[0].is_derived_tag);
    }

    #[test]
    fn test_duplicate_pair_keeps_newest() {
        let older = vec![event("x/y", "v1.0.0", NOW - 500, false)];
        let newer = vec![event("x/y", "v1.0.0", NOW - 50, true)];

        let merged = merge_and_filter(vec![older, newer], NOW, &MergeOptions::default());
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].published_at, NOW - 50);
    }

    #[test]
    fn test_max_events_applies_after_filter() {
        let batch = vec![
            event("a/1", "v1", NOW - 1, false),
            event("a/2", "v1", NOW - 2, false),
            event("a/3", "v1", NOW - 3, false),
            event("a/old", "v1", NOW - 10_000, false),
        ];
        let opts = MergeOptions {
            age_limit_secs: 100,
            max_events: Some(2),
        };

        let merged = merge_and_filter(vec![batch], NOW, &opts);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].repository, "a/2");
    }

    #[test]
    fn test_unsorted_input_is_fully_filtered() {
        // Old event first: a prefix scan would stop here and drop the rest
        let batch = vec![event("a/old", "v1", NOW - 1_000, false), event("a/new", "v1", NOW, false)];
        let merged = merge_and_filter(vec![batch], NOW, &options(100));
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].repository, "a/new");
    }

    #[quickcheck]
    fn prop_output_is_sorted_and_unique(stamps: Vec<(u8, u16, bool)>) -> TestResult {
        let batch: Vec<ReleaseEvent> = stamps
            .iter()
            .map(|(repo, age, derived)| event(&format!("r/{}", repo % 8), &format!("v{}", age % 16), NOW - *age as i64, *derived))
            .collect();

        let merged = merge_and_filter(vec![batch], NOW, &options(40_000));

        let sorted = merged.windows(2).all(|w| w[0].published_at >= w[1].published_at);
        let mut keys = HashSet::new();
        let unique = merged.iter().all(|e| keys.insert(e.key()));
        let in_window = merged.iter().all(|e| e.published_at >= NOW - 40_000);

        TestResult::from_bool(sorted && unique && in_window)
    }

    #[quickcheck]
    fn prop_merge_is_idempotent(stamps: Vec<(u8, u32)>) -> bool {
        let batch: Vec<ReleaseEvent> = stamps
            .iter()
            .map(|(repo, age)| event(&format!("r/{}", repo), "v1", NOW - (*age as i64 % 200_000), false))
            .collect();

        let once = merge_and_filter(vec![batch], NOW, &options(100_000));
        let twice = merge_and_filter(vec![once.clone()], NOW, &options(100_000));
        once == twice
    }
}
