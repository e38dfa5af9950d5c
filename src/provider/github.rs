use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use octocrab::models::Repository;
use octocrab::Octocrab;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::env;
use std::process::Command;
use tracing::{debug, info, warn};

use super::http::graphql_data;
use super::Provider;
use crate::config::GitHubConfig;
use crate::error::ProviderError;
use crate::fanout::{collect_pages, fan_out, flatten_outcomes, WorkerBounds};
use crate::reconcile::reconcile;
use crate::release::{parse_timestamp, sort_newest_first, ParsedRepoRef, ReleaseEvent};
use crate::Config;

const NAME: &str = "github";
const PER_PAGE: u8 = 100;
/// The starred listing takes a `u8` page number
const MAX_PAGES: u32 = u8::MAX as u32;

/// Cursor pages read per repository connection
const MAX_CONNECTION_PAGES: usize = 50;

const RELEASES_QUERY: &str = r#"
query Releases($owner: String!, $name: String!, $after: String) {
  repository(owner: $owner, name: $name) {
    url
    items: releases(first: 100, after: $after, orderBy: {field: CREATED_AT, direction: DESC}) {
      pageInfo { hasNextPage endCursor }
      nodes { tagName description url isDraft publishedAt createdAt }
    }
  }
}
"#;

const TAGS_QUERY: &str = r#"
query Tags($owner: String!, $name: String!, $after: String) {
  repository(owner: $owner, name: $name) {
    url
    items: refs(refPrefix: "refs/tags/", first: 100, after: $after, orderBy: {field: TAG_COMMIT_DATE, direction: DESC}) {
      pageInfo { hasNextPage endCursor }
      nodes {
        name
        target {
          __typename
          ... on Commit { committedDate }
          ... on Tag {
            message
            target { __typename ... on Commit { committedDate } }
          }
        }
      }
    }
  }
}
"#;

/// GitHub authentication strategies
#[derive(Debug, Clone, PartialEq)]
pub enum AuthStrategy {
    /// Token set in the configuration file
    ConfigToken,
    /// Use GitHub CLI authentication
    GitHubCLI,
    /// Use environment variable token
    EnvironmentToken,
}

#[derive(Debug, Deserialize)]
struct RepositoryData<T> {
    repository: Option<RepositoryNode<T>>,
}

/// One page of a repository connection, aliased to `items` in both queries
#[derive(Debug, Deserialize)]
struct RepositoryNode<T> {
    url: String,
    items: Option<Connection<T>>,
}

#[derive(Debug, Deserialize)]
struct Connection<T> {
    #[serde(default, rename = "pageInfo")]
    page_info: PageInfo,
    #[serde(default = "Vec::new")]
    nodes: Vec<Option<T>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    #[serde(default)]
    has_next_page: bool,
    #[serde(default)]
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReleaseNode {
    tag_name: String,
    #[serde(default)]
    description: Option<String>,
    url: String,
    #[serde(default)]
    is_draft: bool,
    #[serde(default)]
    published_at: Option<String>,
    created_at: String,
}

#[derive(Debug, Deserialize)]
struct RefNode {
    name: String,
    #[serde(default)]
    target: Option<GitObject>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "__typename")]
enum GitObject {
    Commit {
        #[serde(rename = "committedDate")]
        committed_date: String,
    },
    Tag {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        target: Option<Box<GitObject>>,
    },
    #[serde(other)]
    Other,
}

impl GitObject {
    /// Commit date, following an annotated tag through one indirection
    fn commit_date(&self) -> Option<&str> {
        match self {
            GitObject::Commit { committed_date } => Some(committed_date.as_str()),
            GitObject::Tag { target, .. } => match target.as_deref() {
                Some(GitObject::Commit { committed_date }) => Some(committed_date.as_str()),
                _ => None,
            },
            GitObject::Other => None,
        }
    }

    fn message(&self) -> &str {
        match self {
            GitObject::Tag { message, .. } => message.as_deref().unwrap_or(""),
            _ => "",
        }
    }
}

/// GitHub starred-repository release provider
pub struct GitHubProvider {
    client: Option<Octocrab>,
    bounds: WorkerBounds,
}

impl GitHubProvider {
    /// Create a provider, resolving credentials the same way the CLI does.
    ///
    /// Missing credentials are not an error; the provider then yields nothing.
    pub fn new(config: &Config) -> Result<Self> {
        let client = match Self::detect_authentication(&config.github) {
            Ok((strategy, token)) => {
                info!("Using GitHub authentication strategy: {:?}", strategy);
                let client = Octocrab::builder()
                    .personal_token(token)
                    .build()
                    .context("Failed to create GitHub client")?;
                Some(client)
            }
            Err(e) => {
                debug!("GitHub authentication unavailable: {:#}", e);
                None
            }
        };

        Ok(Self::with_client(client, config.worker_bounds()))
    }

    /// Create from an existing client
    pub fn with_client(client: Option<Octocrab>, bounds: WorkerBounds) -> Self {
        Self { client, bounds }
    }

    /// Detect and obtain GitHub authentication
    pub fn detect_authentication(config: &GitHubConfig) -> Result<(AuthStrategy, String)> {
        if let Some(token) = config
            .token
            .as_ref()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
        {
            return Ok((AuthStrategy::ConfigToken, token));
        }

        match config.auth_method.as_str() {
            "auto" => {
                // Environment token first, then GitHub CLI
                if let Ok(token) = Self::try_environment_token() {
                    Ok((AuthStrategy::EnvironmentToken, token))
                } else if let Ok(token) = Self::try_github_cli() {
                    Ok((AuthStrategy::GitHubCLI, token))
                } else {
                    Err(anyhow!(
                        "No GitHub authentication found. Please either:\n\
                         1. Set github.token in the configuration file\n\
                         2. Set GITHUB_TOKEN environment variable\n\
                         3. Install and authenticate GitHub CLI: gh auth login"
                    ))
                }
            }
            "gh_cli" => {
                let token = Self::try_github_cli()
                    .context("GitHub CLI authentication failed. Run: gh auth login")?;
                Ok((AuthStrategy::GitHubCLI, token))
            }
            "token" => {
                let token = Self::try_environment_token()
                    .context("GITHUB_TOKEN environment variable not found or invalid")?;
                Ok((AuthStrategy::EnvironmentToken, token))
            }
            other => Err(anyhow!("Unknown auth method: {}", other)),
        }
    }

    /// Try to get token from GitHub CLI
    fn try_github_cli() -> Result<String> {
        debug!("Attempting GitHub CLI authentication");

        if !Self::is_command_available("gh") {
            return Err(anyhow!("GitHub CLI (gh) is not installed"));
        }

        let token_output = Command::new("gh")
            .args(["auth", "token"])
            .output()
            .context("Failed to get GitHub CLI token")?;

        if !token_output.status.success() {
            return Err(anyhow!(
                "Failed to retrieve token from GitHub CLI: {}",
                String::from_utf8_lossy(&token_output.stderr)
            ));
        }

        let token = String::from_utf8(token_output.stdout)
            .context("GitHub CLI token is not valid UTF-8")?
            .trim()
            .to_string();

        if token.is_empty() {
            return Err(anyhow!("GitHub CLI returned empty token"));
        }

        debug!("Successfully obtained token from GitHub CLI");
        Ok(token)
    }

    /// Try to get token from environment variable
    fn try_environment_token() -> Result<String> {
        let token = env::var("GITHUB_TOKEN").context("GITHUB_TOKEN environment variable not set")?;
        let token = token.trim().to_string();

        if token.is_empty() {
            return Err(anyhow!("GITHUB_TOKEN is empty"));
        }

        if !["ghp_", "gho_", "ghs_", "github_pat_"]
            .iter()
            .any(|prefix| token.starts_with(prefix))
        {
            warn!("GITHUB_TOKEN doesn't look like a GitHub token (expected ghp_, gho_, ghs_ or github_pat_ prefix)");
        }

        Ok(token)
    }

    /// Check if a command is available in PATH
    fn is_command_available(command: &str) -> bool {
        Command::new("which")
            .arg(command)
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// List starred repositories as `owner/name`.
    ///
    /// Page one is fetched first to learn the page count from the `Link`
    /// header; the rest go through the bounded page fan-out.
    async fn list_starred(&self, client: &Octocrab) -> Result<Vec<String>, ProviderError> {
        let first = client
            .current()
            .list_repos_starred_by_authenticated_user()
            .per_page(PER_PAGE)
            .page(1u8)
            .send()
            .await?;

        let mut total_pages = first.number_of_pages().unwrap_or(1);
        if total_pages > MAX_PAGES {
            warn!("{}: reached maximum pagination limit ({} pages)", NAME, MAX_PAGES);
            total_pages = MAX_PAGES;
        }

        let client = client.clone();
        let names = collect_pages(NAME, repository_names(first.items), total_pages, self.bounds, move |page| {
            let client = client.clone();
            async move {
                let page = u8::try_from(page).unwrap_or(u8::MAX);
                let response = client
                    .current()
                    .list_repos_starred_by_authenticated_user()
                    .per_page(PER_PAGE)
                    .page(page)
                    .send()
                    .await?;
                Ok::<_, ProviderError>(repository_names(response.items))
            }
        })
        .await;

        info!("{}: found {} starred repositories", NAME, names.len());
        Ok(names)
    }

    async fn fetch_repository(client: Octocrab, repo: ParsedRepoRef) -> Result<Vec<ReleaseEvent>, ProviderError> {
        let ((url, releases), (_, tags)) = tokio::try_join!(
            query_connection::<ReleaseNode>(&client, RELEASES_QUERY, &repo),
            query_connection::<RefNode>(&client, TAGS_QUERY, &repo),
        )?;

        repository_events(&repo.full_name(), &url, releases, tags)
    }
}

/// Follow one repository connection's cursor to the end.
///
/// Returns the repository URL and every node, newest first.
async fn query_connection<T: DeserializeOwned>(
    client: &Octocrab,
    query: &str,
    repo: &ParsedRepoRef,
) -> Result<(String, Vec<T>), ProviderError> {
    let mut nodes = Vec::new();
    let mut after: Option<String> = None;
    let mut url = String::new();

    for _ in 0..MAX_CONNECTION_PAGES {
        let payload = json!({
            "query": query,
            "variables": { "owner": repo.owner, "name": repo.name, "after": after },
        });

        let response: serde_json::Value = client.graphql(&payload).await?;
        let data: RepositoryData<T> = serde_json::from_value(graphql_data(response)?)?;
        let node = data
            .repository
            .ok_or_else(|| ProviderError::Parse(format!("repository {} not found", repo.full_name())))?;

        url = node.url;
        let Some(connection) = node.items else {
            return Ok((url, nodes));
        };
        nodes.extend(connection.nodes.into_iter().flatten());

        match connection.page_info {
            PageInfo {
                has_next_page: true,
                end_cursor: Some(cursor),
            } => after = Some(cursor),
            _ => return Ok((url, nodes)),
        }
    }

    warn!(
        "{}: {} has more than {} pages of results, keeping what was read",
        NAME,
        repo.full_name(),
        MAX_CONNECTION_PAGES
    );
    Ok((url, nodes))
}

fn repository_names(repositories: Vec<Repository>) -> Vec<String> {
    repositories
        .into_iter()
        .map(|repo| match (repo.full_name, repo.owner) {
            (Some(full_name), _) => full_name,
            (None, Some(owner)) => format!("{}/{}", owner.login, repo.name),
            (None, None) => repo.name,
        })
        .collect()
}

fn repository_events(
    full_name: &str,
    url: &str,
    release_nodes: Vec<ReleaseNode>,
    ref_nodes: Vec<RefNode>,
) -> Result<Vec<ReleaseEvent>, ProviderError> {
    let mut releases = Vec::new();
    for release in release_nodes {
        if release.is_draft {
            continue;
        }
        let timestamp = release.published_at.as_deref().unwrap_or(&release.created_at);
        releases.push(ReleaseEvent {
            repository: full_name.to_string(),
            published_at: parse_timestamp(timestamp)?,
            url: release.url,
            notes: release.description.unwrap_or_default(),
            provider: NAME.to_string(),
            is_derived_tag: false,
            label: release.tag_name,
        });
    }

    let mut tags = Vec::new();
    for tag in ref_nodes {
        let Some(target) = tag.target.as_ref() else {
            continue;
        };
        let Some(date) = target.commit_date() else {
            debug!("{}: tag {} in {} does not resolve to a commit", NAME, tag.name, full_name);
            continue;
        };

        tags.push(ReleaseEvent {
            repository: full_name.to_string(),
            published_at: parse_timestamp(date)?,
            url: format!("{}/tree/{}", url, tag.name),
            notes: target.message().to_string(),
            provider: NAME.to_string(),
            is_derived_tag: true,
            label: tag.name.clone(),
        });
    }

    Ok(reconcile(releases, tags))
}

#[async_trait]
impl Provider for GitHubProvider {
    async fn fetch_releases(&self) -> Result<Vec<ReleaseEvent>, ProviderError> {
        let Some(client) = &self.client else {
            warn!("{}: no authentication available, skipping", NAME);
            return Ok(Vec::new());
        };

        let mut repos = Vec::new();
        for name in self.list_starred(client).await? {
            match ParsedRepoRef::parse(&name) {
                Ok(parsed) => repos.push(parsed),
                Err(e) => warn!("{}: skipping repository: {}", NAME, e),
            }
        }

        let names: Vec<String> = repos.iter().map(ParsedRepoRef::full_name).collect();
        let client = client.clone();

        let slots = fan_out(repos, self.bounds, move |repo| Self::fetch_repository(client.clone(), repo)).await;

        let mut events = flatten_outcomes(NAME, &names, slots);
        sort_newest_first(&mut events);
        Ok(events)
    }

    fn name(&self) -> &str {
        NAME
    }

    fn is_configured(&self) -> bool {
        self.client.is_some()
    }
}
