//! Release pipeline - orchestrates one complete ingestion run
//!
//! Fetch from every provider concurrently, merge the per-provider lists into
//! one deduplicated, most-recent-first list, and drop events outside the age
//! window. Provider failures are reported in the summary; they never abort
//! the run.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::error::ProviderError;
use crate::merge::{merge_results, MergeOptions};
use crate::orchestrator::Orchestrator;
use crate::provider::{build_providers, Provider};
use crate::release::{ProviderResult, ReleaseEvent};
use crate::Config;

/// Results from a complete pipeline run
#[derive(Debug, Clone)]
pub struct PipelineSummary {
    /// Final merged, filtered, most-recent-first events
    pub events: Vec<ReleaseEvent>,
    /// One entry per provider, in configuration order
    pub results: Vec<ProviderResult>,
    pub duration: Duration,
}

impl PipelineSummary {
    /// Providers whose fetch failed, with their error
    pub fn failed_providers(&self) -> Vec<(&str, &ProviderError)> {
        self.results
            .iter()
            .filter_map(|r| r.error.as_ref().map(|e| (r.provider_name.as_str(), e)))
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| !r.succeeded())
    }
}

/// The main pipeline: providers in, feed-ready events out
#[derive(Clone)]
pub struct ReleasePipeline {
    orchestrator: Orchestrator,
    options: MergeOptions,
}

impl ReleasePipeline {
    pub fn new(providers: Vec<Arc<dyn Provider>>, options: MergeOptions) -> Self {
        Self {
            orchestrator: Orchestrator::new(providers),
            options,
        }
    }

    /// Build every enabled provider and the merge options from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let providers = build_providers(config).context("Failed to set up providers")?;
        let options = MergeOptions {
            age_limit_secs: config.age_limit_secs()?,
            max_events: config.feed.max_events,
        };
        Ok(Self::new(providers, options))
    }

    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        self.orchestrator.providers()
    }

    pub fn options(&self) -> &MergeOptions {
        &self.options
    }

    /// Run against the current wall clock
    pub async fn run(&self) -> PipelineSummary {
        self.run_at(chrono::Utc::now().timestamp()).await
    }

    /// Run with an explicit "now" for the age cutoff
    pub async fn run_at(&self, now: i64) -> PipelineSummary {
        let start_time = Instant::now();

        info!("Starting release fetch");

        let results = self.orchestrator.run().await;
        let events = merge_results(&results, now, &self.options);

        let summary = PipelineSummary {
            events,
            results,
            duration: start_time.elapsed(),
        };

        let failed = summary.failed_providers();
        info!(
            "Fetch completed in {:.2}s: {} event(s), {} provider(s) ok, {} failed",
            summary.duration.as_secs_f64(),
            summary.events.len(),
            summary.results.len() - failed.len(),
            failed.len()
        );
        for (name, error) in failed {
            warn!("{}: {}", name, error);
        }

        summary
    }
}
