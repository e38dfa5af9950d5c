//! Provider orchestration
//!
//! One spawned task per configured provider. The provider count is small, so
//! this level is not bounded; each provider applies its own bounded fan-out
//! internally. Every provider yields exactly one [`ProviderResult`], in the
//! order the providers were given, whether it succeeded, failed, or panicked.

use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::error::ProviderError;
use crate::provider::Provider;
use crate::release::{ProviderResult, ReleaseEvent};

/// Runs every provider concurrently and isolates their failures
#[derive(Clone)]
pub struct Orchestrator {
    providers: Vec<Arc<dyn Provider>>,
}

impl Orchestrator {
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        Self { providers }
    }

    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    /// Fetch from every provider and wait for all of them.
    ///
    /// Never fails: errors end up in `ProviderResult::error`.
    pub async fn run(&self) -> Vec<ProviderResult> {
        if self.providers.is_empty() {
            info!("No providers configured");
            return Vec::new();
        }

        info!("Fetching releases from {} provider(s)", self.providers.len());

        let handles: Vec<_> = self
            .providers
            .iter()
            .map(|provider| {
                let provider = provider.clone();
                tokio::spawn(async move { run_provider(provider.as_ref()).await })
            })
            .collect();

        let names: Vec<String> = self.providers.iter().map(|p| p.name().to_string()).collect();

        join_all(handles)
            .await
            .into_iter()
            .zip(names)
            .map(|(joined, name)| match joined {
                Ok(result) => result,
                Err(e) => {
                    error!("{}: provider task aborted: {}", name, e);
                    ProviderResult {
                        provider_name: name,
                        events: Vec::new(),
                        error: Some(ProviderError::from(e)),
                        duration: Duration::ZERO,
                    }
                }
            })
            .collect()
    }
}

async fn run_provider(provider: &dyn Provider) -> ProviderResult {
    let name = provider.name().to_string();
    info!("{}: fetching releases", name);

    let start = Instant::now();
    let outcome = provider.fetch_releases().await;
    let duration = start.elapsed();

    match outcome {
        Ok(events) => {
            info!(
                "{}: {} event(s) in {:.2}s",
                name,
                events.len(),
                duration.as_secs_f64()
            );
            ProviderResult {
                provider_name: name,
                events,
                error: None,
                duration,
            }
        }
        Err(e) => {
            error!("{}: failed after {:.2}s: {}", name, duration.as_secs_f64(), e);
            ProviderResult {
                provider_name: name,
                events: Vec::<ReleaseEvent>::new(),
                error: Some(e),
                duration,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;

    struct Fixed {
        name: &'static str,
        outcome: Result<Vec<ReleaseEvent>, ProviderError>,
        delay_ms: u64,
    }

    #[async_trait]
    impl Provider for Fixed {
        async fn fetch_releases(&self) -> Result<Vec<ReleaseEvent>, ProviderError> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            self.outcome.clone()
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    struct Panics;

    #[async_trait]
    impl Provider for Panics {
        async fn fetch_releases(&self) -> Result<Vec<ReleaseEvent>, ProviderError> {
            panic!("provider blew up");
        }

        fn name(&self) -> &str {
            "panics"
        }
    }

    fn event(repository: &str, ts: i64) -> ReleaseEvent {
        ReleaseEvent {
            repository: repository.to_string(),
            label: "v1.0.0".to_string(),
            published_at: ts,
            url: String::new(),
            notes: String::new(),
            provider: "test".to_string(),
            is_derived_tag: false,
        }
    }

    #[tokio::test]
    async fn test_empty_provider_list() {
        assert!(Orchestrator::new(Vec::new()).run().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_results_keep_provider_order() {
        let orchestrator = Orchestrator::new(vec![
            Arc::new(Fixed {
                name: "slow",
                outcome: Ok(vec![event("a/slow", 10)]),
                delay_ms: 50,
            }),
            Arc::new(Fixed {
                name: "fast",
                outcome: Ok(vec![event("a/fast", 20), event("b/fast", 5)]),
                delay_ms: 0,
            }),
        ]);

        let results = orchestrator.run().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].provider_name, "slow");
        assert_eq!(results[0].events.len(), 1);
        assert_eq!(results[1].provider_name, "fast");
        assert_eq!(results[1].events.len(), 2);
        assert!(results[0].duration >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_failures_stay_with_their_provider() {
        let orchestrator = Orchestrator::new(vec![
            Arc::new(Fixed {
                name: "ok",
                outcome: Ok(vec![event("a/b", 1)]),
                delay_ms: 0,
            }),
            Arc::new(Fixed {
                name: "denied",
                outcome: Err(ProviderError::Auth { status: 401 }),
                delay_ms: 0,
            }),
            Arc::new(Panics),
        ]);

        let results = orchestrator.run().await;
        assert_eq!(results.len(), 3);
        assert!(results[0].succeeded());
        assert_eq!(results[0].events.len(), 1);
        assert_matches!(results[1].error, Some(ProviderError::Auth { status: 401 }));
        assert_eq!(results[2].provider_name, "panics");
        assert_matches!(results[2].error, Some(ProviderError::TaskFailed(_)));
    }
}
