//! Common test utilities and helpers for starfeed tests

#![allow(dead_code)]

use async_trait::async_trait;
use starfeed::{Provider, ProviderError, ReleaseEvent};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const NOW: i64 = 1_717_200_000;
pub const DAY: i64 = 86_400;

/// Test configuration helper
pub struct TestEnvironment {
    pub temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    pub fn create_test_config(&self, content: &str) -> PathBuf {
        let config_path = self.path("config.yml");
        std::fs::write(&config_path, content).expect("Failed to write test config");
        config_path
    }

    /// A config with every network provider disabled, writing into the temp dir
    pub fn create_offline_config(&self) -> PathBuf {
        let content = format!(
            r#"
feed:
  output: "{}"
  age_limit: "30d"
github:
  enabled: false
gitlab:
  enabled: false
codeberg:
  enabled: false
sourcehut:
  enabled: false
"#,
            self.path("out/feed.json").display()
        );
        self.create_test_config(&content)
    }
}

/// Event builder with sensible defaults
pub struct EventBuilder {
    event: ReleaseEvent,
}

impl EventBuilder {
    pub fn new(repository: &str, label: &str) -> Self {
        Self {
            event: ReleaseEvent {
                repository: repository.to_string(),
                label: label.to_string(),
                published_at: NOW,
                url: format!("https://example.com/{}/releases/{}", repository, label),
                notes: String::new(),
                provider: "fake".to_string(),
                is_derived_tag: false,
            },
        }
    }

    pub fn days_ago(mut self, days: i64) -> Self {
        self.event.published_at = NOW - days * DAY;
        self
    }

    pub fn at(mut self, published_at: i64) -> Self {
        self.event.published_at = published_at;
        self
    }

    pub fn provider(mut self, provider: &str) -> Self {
        self.event.provider = provider.to_string();
        self
    }

    pub fn notes(mut self, notes: &str) -> Self {
        self.event.notes = notes.to_string();
        self
    }

    pub fn derived(mut self) -> Self {
        self.event.is_derived_tag = true;
        self
    }

    pub fn build(self) -> ReleaseEvent {
        self.event
    }
}

/// Provider returning a canned response, counting calls
pub struct FakeProvider {
    name: String,
    response: Result<Vec<ReleaseEvent>, ProviderError>,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl FakeProvider {
    pub fn ok(name: &str, events: Vec<ReleaseEvent>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            response: Ok(events),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(name: &str, error: ProviderError) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            response: Err(error),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn slow(name: &str, events: Vec<ReleaseEvent>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            response: Ok(events),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn fetch_releases(&self) -> Result<Vec<ReleaseEvent>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.response.clone()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
