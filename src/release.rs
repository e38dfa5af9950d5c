//! Release data model shared by every provider
//!
//! A [`ReleaseEvent`] is created by provider code at fetch time and never
//! mutated afterwards; reconciliation and merging only move or drop values.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ProviderError;

/// One (repository, label) occurrence worth reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseEvent {
    /// Platform-qualified identifier, e.g. `owner/name` or `~user/name`
    pub repository: String,

    /// Tag or release name
    pub label: String,

    /// Unix timestamp in seconds; every ordering decision uses this
    pub published_at: i64,

    /// Canonical link to the release or tag
    pub url: String,

    /// Raw, unrendered release body (may be empty)
    pub notes: String,

    /// Short name of the originating platform
    pub provider: String,

    /// True when the event came from a raw tag rather than a release object
    pub is_derived_tag: bool,
}

impl ReleaseEvent {
    /// Identity used for deduplication
    pub fn key(&self) -> (&str, &str) {
        (&self.repository, &self.label)
    }
}

/// Sort events most-recent-first. The sort is stable.
pub fn sort_newest_first(events: &mut [ReleaseEvent]) {
    events.sort_by(|a, b| b.published_at.cmp(&a.published_at));
}

/// Outcome of one provider in one orchestration run
#[derive(Debug, Clone)]
pub struct ProviderResult {
    pub provider_name: String,
    /// Most-recent-first
    pub events: Vec<ReleaseEvent>,
    /// Set when the provider as a whole failed
    pub error: Option<ProviderError>,
    pub duration: Duration,
}

impl ProviderResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub fn duration_millis(&self) -> u128 {
        self.duration.as_millis()
    }
}

/// Repository identifier split into owner and name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRepoRef {
    /// Owner, user, or (for nested GitLab groups) the full namespace path.
    /// A SourceHut `~` prefix is stripped.
    pub owner: String,
    pub name: String,
}

impl ParsedRepoRef {
    /// Split `owner/name`, `~user/name`, or `group/sub/name`.
    ///
    /// The name is everything after the last `/`; both halves must be non-empty.
    pub fn parse(identifier: &str) -> Result<Self, ProviderError> {
        let trimmed = identifier.trim().trim_end_matches('/');
        let invalid = || ProviderError::InvalidRepository(identifier.to_string());

        let (owner, name) = trimmed.rsplit_once('/').ok_or_else(invalid)?;
        let owner = owner.strip_prefix('~').unwrap_or(owner);

        if owner.is_empty() || name.is_empty() || owner.starts_with('/') {
            return Err(invalid());
        }

        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Parse an RFC 3339 timestamp into Unix seconds
pub fn parse_timestamp(value: &str) -> Result<i64, ProviderError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.timestamp())
        .map_err(|e| ProviderError::Parse(format!("invalid timestamp {:?}: {}", value, e)))
}
