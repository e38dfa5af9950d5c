//! Provider abstraction layer
//!
//! Every hosting platform integration implements [`Provider`]. The rest of the
//! pipeline only ever sees this trait, so adding a platform means adding one
//! module here and one entry in [`build_providers`].

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::error::ProviderError;
use crate::release::ReleaseEvent;
use crate::Config;

pub mod forgejo;
pub mod github;
pub mod gitlab;
pub mod http;
pub mod sourcehut;

pub use forgejo::ForgejoProvider;
pub use github::GitHubProvider;
pub use gitlab::GitLabProvider;
pub use sourcehut::SourceHutProvider;

/// Trait for fetching release events from a hosting platform
///
/// Implementations may use any internal strategy (REST pagination, GraphQL)
/// but must return events sorted most-recent-first. A provider without
/// credentials returns an empty list; rejected credentials are an
/// [`ProviderError::Auth`] error.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Fetch every release event this provider can see
    async fn fetch_releases(&self) -> Result<Vec<ReleaseEvent>, ProviderError>;

    /// Short provider name, used as `ReleaseEvent::provider`
    fn name(&self) -> &str;

    /// Whether credentials/configuration were found
    fn is_configured(&self) -> bool {
        true
    }
}

/// Build every enabled provider from configuration
pub fn build_providers(config: &Config) -> Result<Vec<Arc<dyn Provider>>> {
    let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

    if config.github.enabled {
        providers.push(Arc::new(GitHubProvider::new(config)?));
    }

    if config.gitlab.enabled {
        providers.push(Arc::new(GitLabProvider::new(config)?));
    }

    if config.codeberg.enabled {
        providers.push(Arc::new(ForgejoProvider::codeberg(config)?));
    }

    for instance in &config.forgejo {
        providers.push(Arc::new(ForgejoProvider::from_instance(instance, config)?));
    }

    if config.sourcehut.enabled && !config.sourcehut.repositories.is_empty() {
        providers.push(Arc::new(SourceHutProvider::new(config)?));
    }

    info!(
        "Configured {} provider(s): {}",
        providers.len(),
        providers.iter().map(|p| p.name()).collect::<Vec<_>>().join(", ")
    );

    Ok(providers)
}
