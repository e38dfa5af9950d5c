//! Forgejo / Gitea provider (Codeberg and self-hosted instances)
//!
//! Starred repositories are paginated; the page count comes from the
//! `x-total-count` header when the instance sends it, otherwise pages are
//! walked one by one while they come back full.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::http::{header_u32, pages_for_total, ApiClient, MAX_PAGES};
use super::Provider;
use crate::config::ForgejoInstance;
use crate::error::ProviderError;
use crate::fanout::{collect_pages, fan_out, flatten_outcomes, WorkerBounds};
use crate::reconcile::reconcile;
use crate::release::{parse_timestamp, sort_newest_first, ParsedRepoRef, ReleaseEvent};
use crate::Config;

const CODEBERG_NAME: &str = "codeberg";
const CODEBERG_URL: &str = "https://codeberg.org";
const PER_PAGE: u32 = 50;

#[derive(Debug, Clone, Deserialize)]
struct Repository {
    full_name: String,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct ForgejoRelease {
    tag_name: String,
    #[serde(default)]
    body: Option<String>,
    html_url: String,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    published_at: Option<String>,
    created_at: String,
}

#[derive(Debug, Deserialize)]
struct ForgejoTag {
    name: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    commit: Option<TagCommit>,
}

#[derive(Debug, Deserialize)]
struct TagCommit {
    #[serde(default)]
    created: Option<String>,
}

/// Release provider for one Forgejo/Gitea instance
pub struct ForgejoProvider {
    name: String,
    api: Option<ApiClient>,
    base_url: String,
    bounds: WorkerBounds,
}

impl ForgejoProvider {
    /// The public Codeberg instance
    pub fn codeberg(config: &Config) -> Result<Self> {
        Self::build(CODEBERG_NAME, CODEBERG_URL, config.codeberg.resolved_token(), config)
    }

    /// A configured self-hosted instance
    pub fn from_instance(instance: &ForgejoInstance, config: &Config) -> Result<Self> {
        let token = instance
            .token
            .as_ref()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        Self::build(&instance.name, &instance.base_url, token, config)
    }

    fn build(name: &str, base_url: &str, token: Option<String>, config: &Config) -> Result<Self> {
        let api = match token {
            Some(token) => Some(ApiClient::new(
                &config.fetch.user_agent,
                config.http_timeout(),
                Some(token),
            )?),
            None => None,
        };
        Ok(Self::with_api(name, api, base_url, config.worker_bounds()))
    }

    /// Build with an explicit client (used by tests against a mock server)
    pub fn with_api(name: &str, api: Option<ApiClient>, base_url: &str, bounds: WorkerBounds) -> Self {
        Self {
            name: name.to_string(),
            api,
            base_url: base_url.trim_end_matches('/').to_string(),
            bounds,
        }
    }

    fn starred_url(base_url: &str, page: u32) -> String {
        format!("{}/api/v1/user/starred?limit={}&page={}", base_url, PER_PAGE, page)
    }

    async fn list_starred(&self, api: &ApiClient) -> Result<Vec<Repository>, ProviderError> {
        let first = api
            .get_json::<Vec<Repository>>(&Self::starred_url(&self.base_url, 1))
            .await?;

        let repositories = match header_u32(&first.headers, "x-total-count") {
            Some(total) => {
                let api = api.clone();
                let base_url = self.base_url.clone();
                collect_pages(
                    &self.name,
                    first.body,
                    pages_for_total(total, PER_PAGE),
                    self.bounds,
                    move |page| {
                        let api = api.clone();
                        let url = Self::starred_url(&base_url, page);
                        async move {
                            let response = api.get_json::<Vec<Repository>>(&url).await?;
                            Ok::<_, ProviderError>(response.body)
                        }
                    },
                )
                .await
            }
            None => self.walk_pages(api, first.body).await,
        };

        info!("{}: found {} starred repositories", self.name, repositories.len());
        Ok(repositories)
    }

    /// Page-size heuristic: a full page means there may be another one
    async fn walk_pages(&self, api: &ApiClient, first_page: Vec<Repository>) -> Vec<Repository> {
        let mut all = Vec::new();
        let mut last_len = first_page.len();
        all.extend(first_page);

        let mut page = 2;
        while last_len as u32 >= PER_PAGE && page <= MAX_PAGES {
            match api
                .get_json::<Vec<Repository>>(&Self::starred_url(&self.base_url, page))
                .await
            {
                Ok(response) => {
                    last_len = response.body.len();
                    all.extend(response.body);
                }
                Err(e) => {
                    warn!("{}: failed to fetch starred page {}: {}", self.name, page, e);
                    break;
                }
            }
            page += 1;
        }

        debug!("{}: walked {} starred page(s) without a total count", self.name, page - 1);
        all
    }

    async fn fetch_repository(
        provider: String,
        api: ApiClient,
        base_url: String,
        bounds: WorkerBounds,
        repo: Repository,
    ) -> Result<Vec<ReleaseEvent>, ProviderError> {
        let parsed = ParsedRepoRef::parse(&repo.full_name)?;
        let releases_base = format!("{}/api/v1/repos/{}/{}/releases", base_url, parsed.owner, parsed.name);
        let tags_base = format!("{}/api/v1/repos/{}/{}/tags", base_url, parsed.owner, parsed.name);

        let (releases, tags) = tokio::try_join!(
            api.get_all_pages::<ForgejoRelease, _>(
                move |page| format!("{}?limit={}&page={}", releases_base, PER_PAGE, page),
                PER_PAGE,
                bounds,
            ),
            api.get_all_pages::<ForgejoTag, _>(
                move |page| format!("{}?limit={}&page={}", tags_base, PER_PAGE, page),
                PER_PAGE,
                bounds,
            ),
        )?;

        repository_events(&provider, &repo, releases, tags)
    }
}

fn repository_events(
    provider: &str,
    repo: &Repository,
    releases: Vec<ForgejoRelease>,
    tags: Vec<ForgejoTag>,
) -> Result<Vec<ReleaseEvent>, ProviderError> {
    let mut release_events = Vec::with_capacity(releases.len());
    for release in releases.into_iter().filter(|r| !r.draft) {
        let timestamp = release.published_at.as_deref().unwrap_or(&release.created_at);
        release_events.push(ReleaseEvent {
            repository: repo.full_name.clone(),
            published_at: parse_timestamp(timestamp)?,
            url: release.html_url,
            notes: release.body.unwrap_or_default(),
            provider: provider.to_string(),
            is_derived_tag: false,
            label: release.tag_name,
        });
    }

    let mut tag_events = Vec::with_capacity(tags.len());
    for tag in tags {
        let Some(created) = tag.commit.as_ref().and_then(|c| c.created.as_deref()) else {
            debug!("{}: tag {} in {} has no commit date", provider, tag.name, repo.full_name);
            continue;
        };

        tag_events.push(ReleaseEvent {
            repository: repo.full_name.clone(),
            published_at: parse_timestamp(created)?,
            url: format!("{}/src/tag/{}", repo.html_url, tag.name),
            notes: tag.message.unwrap_or_default(),
            provider: provider.to_string(),
            is_derived_tag: true,
            label: tag.name,
        });
    }

    Ok(reconcile(release_events, tag_events))
}

#[async_trait]
impl Provider for ForgejoProvider {
    async fn fetch_releases(&self) -> Result<Vec<ReleaseEvent>, ProviderError> {
        let Some(api) = &self.api else {
            warn!("{}: no token configured, skipping", self.name);
            return Ok(Vec::new());
        };

        let repositories: Vec<Repository> = self
            .list_starred(api)
            .await?
            .into_iter()
            .filter(|r| match ParsedRepoRef::parse(&r.full_name) {
                Ok(_) => true,
                Err(e) => {
                    warn!("{}: skipping repository: {}", self.name, e);
                    false
                }
            })
            .collect();

        let names: Vec<String> = repositories.iter().map(|r| r.full_name.clone()).collect();
        let provider = self.name.clone();
        let api = api.clone();
        let base_url = self.base_url.clone();
        let bounds = self.bounds;

        let slots = fan_out(repositories, self.bounds, move |repo| {
            Self::fetch_repository(provider.clone(), api.clone(), base_url.clone(), bounds, repo)
        })
        .await;

        let mut events = flatten_outcomes(&self.name, &names, slots);
        sort_newest_first(&mut events);
        Ok(events)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_configured(&self) -> bool {
        self.api.is_some()
    }
}
