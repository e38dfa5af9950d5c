//! SourceHut provider
//!
//! SourceHut has neither stars nor release objects. Repositories come from
//! configuration, every `refs/tags/*` reference is a candidate derived-tag
//! event, and the noise heuristics decide what survives.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::http::{ApiClient, MAX_PAGES};
use super::Provider;
use crate::error::ProviderError;
use crate::fanout::{fan_out, flatten_outcomes, WorkerBounds};
use crate::reconcile::reconcile;
use crate::release::{parse_timestamp, sort_newest_first, ParsedRepoRef, ReleaseEvent};
use crate::Config;

const NAME: &str = "sourcehut";
const TAG_PREFIX: &str = "refs/tags/";

const WHOAMI_QUERY: &str = "query { me { canonicalName } }";

const REFS_QUERY: &str = r#"
query Refs($owner: String!, $name: String!, $cursor: Cursor) {
  user(username: $owner) {
    repository(name: $name) {
      references(cursor: $cursor) {
        cursor
        results {
          name
          follow {
            __typename
            ... on Commit { committer { time } }
            ... on Tag {
              message
              target { __typename ... on Commit { committer { time } } }
            }
          }
        }
      }
    }
  }
}
"#;

#[derive(Debug, Deserialize)]
struct RefsData {
    user: Option<UserNode>,
}

#[derive(Debug, Deserialize)]
struct UserNode {
    repository: Option<RepositoryNode>,
}

#[derive(Debug, Deserialize)]
struct RepositoryNode {
    references: ReferenceCursor,
}

#[derive(Debug, Deserialize)]
struct ReferenceCursor {
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default)]
    results: Vec<Reference>,
}

#[derive(Debug, Deserialize)]
struct Reference {
    name: String,
    #[serde(default)]
    follow: Option<GitObject>,
}

#[derive(Debug, Deserialize)]
struct Signature {
    time: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "__typename")]
enum GitObject {
    Commit {
        committer: Signature,
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
    fn commit_time(&self) -> Option<&str> {
        match self {
            GitObject::Commit { committer } => Some(committer.time.as_str()),
            GitObject::Tag { target, .. } => match target.as_deref() {
                Some(GitObject::Commit { committer }) => Some(committer.time.as_str()),
                _ => None,
            },
            GitObject::Other => None,
        }
    }
}

/// SourceHut git.sr.ht provider for a configured repository list
pub struct SourceHutProvider {
    api: Option<ApiClient>,
    api_url: String,
    web_url: String,
    repositories: Vec<String>,
    bounds: WorkerBounds,
}

impl SourceHutProvider {
    pub fn new(config: &Config) -> Result<Self> {
        let api = match config.sourcehut.resolved_token() {
            Some(token) => Some(ApiClient::new(
                &config.fetch.user_agent,
                config.http_timeout(),
                Some(token),
            )?),
            None => None,
        };

        Ok(Self::with_api(
            api,
            &config.sourcehut.api_url,
            &config.sourcehut.web_url,
            config.sourcehut.repositories.clone(),
            config.worker_bounds(),
        ))
    }

    pub fn with_api(
        api: Option<ApiClient>,
        api_url: &str,
        web_url: &str,
        repositories: Vec<String>,
        bounds: WorkerBounds,
    ) -> Self {
        Self {
            api,
            api_url: api_url.to_string(),
            web_url: web_url.trim_end_matches('/').to_string(),
            repositories,
            bounds,
        }
    }

    /// Cheap authenticated query; rejected credentials fail the provider
    async fn verify_credentials(&self, api: &ApiClient) -> Result<(), ProviderError> {
        let data = api.graphql(&self.api_url, WHOAMI_QUERY, json!({})).await?;
        if let Some(name) = data.pointer("/me/canonicalName").and_then(|v| v.as_str()) {
            info!("{}: authenticated as {}", NAME, name);
        }
        Ok(())
    }

    async fn fetch_repository(
        api: ApiClient,
        api_url: String,
        web_url: String,
        repo: ParsedRepoRef,
    ) -> Result<Vec<ReleaseEvent>, ProviderError> {
        let mut references = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let data = api
                .graphql(
                    &api_url,
                    REFS_QUERY,
                    json!({ "owner": repo.owner, "name": repo.name, "cursor": cursor }),
                )
                .await?;
            let data: RefsData = serde_json::from_value(data)?;

            let page = data
                .user
                .and_then(|u| u.repository)
                .map(|r| r.references)
                .ok_or_else(|| ProviderError::Parse(format!("repository ~{} not found", repo.full_name())))?;

            references.extend(page.results);
            cursor = page.cursor;
            if cursor.is_none() {
                return tag_events(&repo, &web_url, references);
            }
        }

        warn!("{}: ~{} has more than {} pages of references", NAME, repo.full_name(), MAX_PAGES);
        tag_events(&repo, &web_url, references)
    }
}

fn tag_events(repo: &ParsedRepoRef, web_url: &str, references: Vec<Reference>) -> Result<Vec<ReleaseEvent>, ProviderError> {
    let repository = format!("~{}", repo.full_name());
    let mut tags = Vec::new();

    for reference in references {
        let Some(label) = reference.name.strip_prefix(TAG_PREFIX) else {
            continue;
        };
        let Some(object) = reference.follow.as_ref() else {
            continue;
        };
        let Some(time) = object.commit_time() else {
            debug!("{}: tag {} in {} does not resolve to a commit", NAME, label, repository);
            continue;
        };

        let notes = match object {
            GitObject::Tag { message, .. } => message.clone().unwrap_or_default(),
            _ => String::new(),
        };

        tags.push(ReleaseEvent {
            repository: repository.clone(),
            label: label.to_string(),
            published_at: parse_timestamp(time)?,
            url: format!("{}/{}/refs/{}", web_url, repository, label),
            notes,
            provider: NAME.to_string(),
            is_derived_tag: true,
        });
    }

    Ok(reconcile(Vec::new(), tags))
}

#[async_trait]
impl Provider for SourceHutProvider {
    async fn fetch_releases(&self) -> Result<Vec<ReleaseEvent>, ProviderError> {
        let Some(api) = &self.api else {
            warn!("{}: no token configured, skipping", NAME);
            return Ok(Vec::new());
        };

        self.verify_credentials(api).await?;

        let mut repos = Vec::new();
        for identifier in &self.repositories {
            match ParsedRepoRef::parse(identifier) {
                Ok(parsed) => repos.push(parsed),
                Err(e) => warn!("{}: skipping repository: {}", NAME, e),
            }
        }

        let names: Vec<String> = repos.iter().map(|r| format!("~{}", r.full_name())).collect();
        let api = api.clone();
        let api_url = self.api_url.clone();
        let web_url = self.web_url.clone();

        let slots = fan_out(repos, self.bounds, move |repo| {
            Self::fetch_repository(api.clone(), api_url.clone(), web_url.clone(), repo)
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
