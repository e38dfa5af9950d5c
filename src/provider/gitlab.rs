//! GitLab provider
//!
//! Starred projects come from `/projects?starred=true`, paginated with the
//! `x-total-pages` header. Each project is one fan-out task that fetches
//! releases and tags concurrently and reconciles them.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::http::{header_u32, ApiClient};
use super::Provider;
use crate::error::ProviderError;
use crate::fanout::{collect_pages, fan_out, flatten_outcomes, WorkerBounds};
use crate::reconcile::reconcile;
use crate::release::{parse_timestamp, sort_newest_first, ParsedRepoRef, ReleaseEvent};
use crate::Config;

const NAME: &str = "gitlab";
const PER_PAGE: u32 = 100;

#[derive(Debug, Clone, Deserialize)]
struct Project {
    id: u64,
    path_with_namespace: String,
    web_url: String,
}

#[derive(Debug, Deserialize)]
struct GitLabRelease {
    tag_name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    released_at: Option<String>,
    created_at: String,
    #[serde(default)]
    upcoming_release: bool,
    #[serde(default, rename = "_links")]
    links: Option<ReleaseLinks>,
}

#[derive(Debug, Deserialize)]
struct ReleaseLinks {
    #[serde(default, rename = "self")]
    self_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitLabTag {
    name: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    commit: Option<TagCommit>,
}

#[derive(Debug, Deserialize)]
struct TagCommit {
    #[serde(default)]
    committed_date: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

/// GitLab starred-project release provider
pub struct GitLabProvider {
    api: Option<ApiClient>,
    base_url: String,
    bounds: WorkerBounds,
}

impl GitLabProvider {
    pub fn new(config: &Config) -> Result<Self> {
        let token = config.gitlab.resolved_token();
        let api = match token {
            Some(token) => Some(ApiClient::new(
                &config.fetch.user_agent,
                config.http_timeout(),
                Some(token),
            )?),
            None => None,
        };

        Ok(Self::with_api(api, &config.gitlab.base_url, config.worker_bounds()))
    }

    /// Build with an explicit client (used by tests against a mock server)
    pub fn with_api(api: Option<ApiClient>, base_url: &str, bounds: WorkerBounds) -> Self {
        Self {
            api,
            base_url: base_url.trim_end_matches('/').to_string(),
            bounds,
        }
    }

    fn starred_url(base_url: &str, page: u32) -> String {
        format!(
            "{}/api/v4/projects?starred=true&simple=true&per_page={}&page={}",
            base_url, PER_PAGE, page
        )
    }

    /// List starred projects; an auth failure here fails the provider
    async fn list_starred(&self, api: &ApiClient) -> Result<Vec<Project>, ProviderError> {
        let first = api
            .get_json::<Vec<Project>>(&Self::starred_url(&self.base_url, 1))
            .await?;
        let total_pages = header_u32(&first.headers, "x-total-pages").unwrap_or(1);

        let api = api.clone();
        let base_url = self.base_url.clone();
        let projects = collect_pages(NAME, first.body, total_pages, self.bounds, move |page| {
            let api = api.clone();
            let url = Self::starred_url(&base_url, page);
            async move {
                let response = api.get_json::<Vec<Project>>(&url).await?;
                Ok::<_, ProviderError>(response.body)
            }
        })
        .await;

        info!("{}: found {} starred projects", NAME, projects.len());
        Ok(projects)
    }

    /// Every release and every tag of one project, all pages
    async fn fetch_project(
        api: ApiClient,
        base_url: String,
        bounds: WorkerBounds,
        project: Project,
    ) -> Result<Vec<ReleaseEvent>, ProviderError> {
        let releases_base = format!("{}/api/v4/projects/{}/releases", base_url, project.id);
        let tags_base = format!("{}/api/v4/projects/{}/repository/tags", base_url, project.id);

        let (releases, tags) = tokio::try_join!(
            api.get_all_pages::<GitLabRelease, _>(
                move |page| format!("{}?per_page={}&page={}", releases_base, PER_PAGE, page),
                PER_PAGE,
                bounds,
            ),
            api.get_all_pages::<GitLabTag, _>(
                move |page| format!("{}?per_page={}&page={}", tags_base, PER_PAGE, page),
                PER_PAGE,
                bounds,
            ),
        )?;

        project_events(&project, releases, tags)
    }
}

fn project_events(project: &Project, releases: Vec<GitLabRelease>, tags: Vec<GitLabTag>) -> Result<Vec<ReleaseEvent>, ProviderError> {
    let mut release_events = Vec::with_capacity(releases.len());
    for release in releases {
        if release.upcoming_release {
            continue;
        }
        let timestamp = release.released_at.as_deref().unwrap_or(&release.created_at);
        let url = release
            .links
            .and_then(|l| l.self_url)
            .unwrap_or_else(|| format!("{}/-/releases/{}", project.web_url, release.tag_name));

        release_events.push(ReleaseEvent {
            repository: project.path_with_namespace.clone(),
            published_at: parse_timestamp(timestamp)?,
            url,
            notes: release.description.unwrap_or_default(),
            provider: NAME.to_string(),
            is_derived_tag: false,
            label: release.tag_name,
        });
    }

    let mut tag_events = Vec::with_capacity(tags.len());
    for tag in tags {
        let Some(timestamp) = tag
            .commit
            .as_ref()
            .and_then(|c| c.committed_date.as_deref().or(c.created_at.as_deref()))
        else {
            debug!("{}: tag {} in {} has no commit date", NAME, tag.name, project.path_with_namespace);
            continue;
        };

        tag_events.push(ReleaseEvent {
            repository: project.path_with_namespace.clone(),
            published_at: parse_timestamp(timestamp)?,
            url: format!("{}/-/tags/{}", project.web_url, tag.name),
            notes: tag.message.unwrap_or_default(),
            provider: NAME.to_string(),
            is_derived_tag: true,
            label: tag.name,
        });
    }

    Ok(reconcile(release_events, tag_events))
}

#[async_trait]
impl Provider for GitLabProvider {
    async fn fetch_releases(&self) -> Result<Vec<ReleaseEvent>, ProviderError> {
        let Some(api) = &self.api else {
            warn!("{}: no token configured, skipping", NAME);
            return Ok(Vec::new());
        };

        let projects: Vec<Project> = self
            .list_starred(api)
            .await?
            .into_iter()
            .filter(|p| match ParsedRepoRef::parse(&p.path_with_namespace) {
                Ok(_) => true,
                Err(e) => {
                    warn!("{}: skipping project: {}", NAME, e);
                    false
                }
            })
            .collect();

        let names: Vec<String> = projects.iter().map(|p| p.path_with_namespace.clone()).collect();
        let api = api.clone();
        let base_url = self.base_url.clone();
        let bounds = self.bounds;

        let slots = fan_out(projects, self.bounds, move |project| {
            Self::fetch_project(api.clone(), base_url.clone(), bounds, project)
        })
        .await;

        let mut events = flatten_outcomes(NAME, &names, slots);
        sort_newest_first(&mut events);
        Ok(events)
    }

    fn name(&self) -> &str {
        NAME
    }

    fn is_configured(&self) -> bool {
        self.api.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer, token: Option<&str>) -> GitLabProvider {
        let api = token.map(|t| ApiClient::new("starfeed-test", Duration::from_secs(5), Some(t.to_string())).unwrap());
        GitLabProvider::with_api(api, &server.uri(), WorkerBounds::new(2, 4))
    }

    fn project_json(id: u64, path: &str) -> serde_json::Value {
        json!({
            "id": id,
            "path_with_namespace": path,
            "web_url": format!("https://gitlab.com/{}", path)
        })
    }

    #[test]
    fn test_project_events_reconciles_release_and_tags() {
        let project = Project {
            id: 1,
            path_with_namespace: "group/app".to_string(),
            web_url: "https://gitlab.com/group/app".to_string(),
        };
        let releases: Vec<GitLabRelease> = serde_json::from_value(json!([
            {
                "tag_name": "v1.0.0",
                "description": "First **stable** release",
                "released_at": "2024-05-01T10:00:00Z",
                "created_at": "2024-05-01T09:00:00Z",
                "_links": { "self": "https://gitlab.com/group/app/-/releases/v1.0.0" }
            },
            {
                "tag_name": "v2.0.0",
                "released_at": "2030-01-01T00:00:00Z",
                "created_at": "2024-05-02T00:00:00Z",
                "upcoming_release": true
            }
        ]))
        .unwrap();
        let tags: Vec<GitLabTag> = serde_json::from_value(json!([
            { "name": "v1.0.0", "commit": { "committed_date": "2024-05-01T08:00:00Z" } },
            { "name": "v0.9.0", "message": "beta cut", "commit": { "committed_date": "2024-04-01T08:00:00Z" } },
            { "name": "nightly", "commit": { "committed_date": "2024-05-03T08:00:00Z" } },
            { "name": "v0.8.0", "commit": null }
        ]))
        .unwrap();

        let events = project_events(&project, releases, tags).unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].label, "v1.0.0");
        assert!(!events[0].is_derived_tag);
        assert_eq!(events[0].notes, "First **stable** release");
        assert_eq!(events[0].url, "https://gitlab.com/group/app/-/releases/v1.0.0");
        assert_eq!(events[1].label, "v0.9.0");
        assert!(events[1].is_derived_tag);
        assert_eq!(events[1].url, "https://gitlab.com/group/app/-/tags/v0.9.0");
        assert_eq!(events[1].notes, "beta cut");
    }

    #[tokio::test]
    async fn test_no_token_returns_empty() {
        let server = MockServer::start().await;
        let events = provider(&server, None).fetch_releases().await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_unauthorized_listing_fails_provider() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = provider(&server, Some("bad")).fetch_releases().await.unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn test_release_on_later_page_still_wins_over_its_tag() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v4/projects"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([project_json(7, "group/deep")])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/7/releases"))
            .and(query_param("page", "1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-total-pages", "2")
                    .set_body_json(json!([])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/7/releases"))
            .and(query_param("page", "2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-total-pages", "2")
                    .set_body_json(json!([{
                        "tag_name": "v1.0.0",
                        "description": "the real notes",
                        "released_at": "2024-06-01T00:00:00Z",
                        "created_at": "2024-06-01T00:00:00Z"
                    }])),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/7/repository/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "name": "v1.0.0", "commit": { "committed_date": "2024-06-01T00:00:00Z" } }
            ])))
            .mount(&server)
            .await;

        let events = provider(&server, Some("token")).fetch_releases().await.unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].label, "v1.0.0");
        assert!(!events[0].is_derived_tag);
        assert_eq!(events[0].notes, "the real notes");
    }

    #[tokio::test]
    async fn test_failed_release_page_fails_only_that_project() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v4/projects"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                project_json(1, "group/ok"),
                project_json(2, "group/flaky")
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/1/releases"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/1/repository/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "name": "v0.1.0", "commit": { "committed_date": "2024-06-01T00:00:00Z" } }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/2/releases"))
            .and(query_param("page", "1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-total-pages", "2")
                    .set_body_json(json!([])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/2/releases"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/2/repository/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "name": "v2.0.0", "commit": { "committed_date": "2024-06-02T00:00:00Z" } }
            ])))
            .mount(&server)
            .await;

        let events = provider(&server, Some("token")).fetch_releases().await.unwrap();

        // No half-read project: its tag must not surface as a derived event
        let labels: Vec<_> = events.iter().map(|e| e.repository.as_str()).collect();
        assert_eq!(labels, vec!["group/ok"]);
    }

    #[tokio::test]
    async fn test_fetch_across_pages_and_partial_failure() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v4/projects"))
            .and(query_param("page", "1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-total-pages", "2")
                    .set_body_json(json!([project_json(1, "group/app")])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects"))
            .and(query_param("page", "2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([project_json(2, "other/tool")])),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/v4/projects/1/releases"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "tag_name": "v1.2.0",
                "description": "notes",
                "released_at": "2024-06-01T00:00:00Z",
                "created_at": "2024-06-01T00:00:00Z"
            }])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/1/repository/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "name": "v1.2.0", "commit": { "committed_date": "2024-06-01T00:00:00Z" } },
                { "name": "v1.1.0", "commit": { "committed_date": "2024-05-01T00:00:00Z" } }
            ])))
            .mount(&server)
            .await;

        // Project 2 is broken; it must not take project 1 down with it
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/2/releases"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/projects/2/repository/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let events = provider(&server, Some("token")).fetch_releases().await.unwrap();

        let labels: Vec<_> = events.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["v1.2.0", "v1.1.0"]);
        assert!(!events[0].is_derived_tag);
        assert!(events[1].is_derived_tag);
        assert!(events.iter().all(|e| e.provider == "gitlab"));
    }
}
