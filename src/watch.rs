//! Periodic polling
//!
//! Runs the pipeline once per interval and rewrites the feed each time, until
//! Ctrl+C. A run that fails to write its feed is logged and the loop carries
//! on with the next tick.

use anyhow::Result;
use chrono::Utc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::feed::{write_feed, Feed};
use crate::pipeline::{PipelineSummary, ReleasePipeline};

/// Fetch once and write the feed to `output`.
///
/// The feed is written even when some providers failed.
pub async fn run_once(pipeline: &ReleasePipeline, output: &str) -> Result<PipelineSummary> {
    let summary = pipeline.run().await;
    let feed = Feed::new(summary.events.clone(), Utc::now());
    write_feed(&feed, output)?;
    Ok(summary)
}

pub struct Watcher {
    pipeline: ReleasePipeline,
    output: String,
    period: Duration,
}

impl Watcher {
    pub fn new(pipeline: ReleasePipeline, output: impl Into<String>, period: Duration) -> Self {
        Self {
            pipeline,
            output: output.into(),
            period,
        }
    }

    /// Poll until Ctrl+C. The first run starts immediately.
    pub async fn run(&self) -> Result<()> {
        let mut timer = interval(self.period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Watching with interval: {:?}", self.period);

        let mut runs = 0u64;
        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        warn!("Failed to listen for Ctrl+C: {}", e);
                    }
                    info!("Shutdown requested after {} run(s)", runs);
                    break;
                }

                _ = timer.tick() => {
                    runs += 1;
                    debug!("Starting scheduled fetch #{}", runs);
                    self.tick().await;
                }
            }
        }

        Ok(())
    }

    async fn tick(&self) {
        match run_once(&self.pipeline, &self.output).await {
            Ok(summary) if summary.has_failures() => {
                warn!(
                    "Feed written with {} event(s); {} provider(s) failed",
                    summary.events.len(),
                    summary.failed_providers().len()
                );
            }
            Ok(summary) => {
                info!("Feed written with {} event(s)", summary.events.len());
            }
            Err(e) => {
                error!("Scheduled fetch failed: {:#}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::MergeOptions;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_run_once_writes_empty_feed() {
        let temp = TempDir::new().unwrap();
        let output = temp.path().join("nested").join("feed.json");
        let pipeline = ReleasePipeline::new(Vec::new(), MergeOptions::default());

        let summary = run_once(&pipeline, output.to_str().unwrap()).await.unwrap();
        assert!(summary.events.is_empty());

        let feed = crate::feed::read_feed(&output).unwrap();
        assert!(feed.events.is_empty());
    }
}
