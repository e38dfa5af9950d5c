//! Thin reqwest wrapper shared by the REST and GraphQL providers
//!
//! Maps transport, status, and decoding failures into [`ProviderError`] so
//! provider code only deals with the task-level taxonomy.

use reqwest::header::{HeaderMap, AUTHORIZATION, USER_AGENT};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::fanout::{try_collect_pages, WorkerBounds};

/// Upper bound on pages read from any one listing
pub const MAX_PAGES: u32 = 100;

/// Decoded body plus the response headers (for pagination)
#[derive(Debug)]
pub struct ApiResponse<T> {
    pub body: T,
    pub headers: HeaderMap,
}

/// HTTP client with a fixed timeout, user agent and optional bearer token
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(user_agent: &str, timeout: Duration, token: Option<String>) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            user_agent
                .parse()
                .map_err(|_| ProviderError::Network(format!("invalid user agent: {}", user_agent)))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self { client, token })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    /// GET a JSON document
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<ApiResponse<T>, ProviderError> {
        debug!("GET {}", url);

        let response = self.authorize(self.client.get(url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::from_status(status.as_u16(), url));
        }

        let headers = response.headers().clone();
        let bytes = response.bytes().await?;
        let body = serde_json::from_slice(&bytes)?;

        Ok(ApiResponse { body, headers })
    }

    /// Fetch every page of a JSON array listing.
    ///
    /// Page 1 comes first and supplies the page count, from `x-total-pages`
    /// or else `x-total-count`; the remaining pages go through the bounded
    /// fan-out. Without either header, pages are walked in order while they
    /// come back full. Any failed page fails the listing.
    pub async fn get_all_pages<T, U>(&self, page_url: U, per_page: u32, bounds: WorkerBounds) -> Result<Vec<T>, ProviderError>
    where
        T: DeserializeOwned + Send + 'static,
        U: Fn(u32) -> String + Send + Sync + 'static,
    {
        let first = self.get_json::<Vec<T>>(&page_url(1)).await?;

        let total_pages = header_u32(&first.headers, "x-total-pages")
            .or_else(|| header_u32(&first.headers, "x-total-count").map(|total| pages_for_total(total, per_page)));

        match total_pages {
            Some(total) => {
                if total > MAX_PAGES {
                    warn!("Listing has {} pages, reading the first {}", total, MAX_PAGES);
                }
                let api = self.clone();
                try_collect_pages(first.body, total.min(MAX_PAGES), bounds, move |page| {
                    let api = api.clone();
                    let url = page_url(page);
                    async move {
                        let response = api.get_json::<Vec<T>>(&url).await?;
                        Ok::<_, ProviderError>(response.body)
                    }
                })
                .await
            }
            None => {
                let mut last_len = first.body.len();
                let mut all = first.body;
                let mut page = 2;
                while per_page > 0 && last_len >= per_page as usize && page <= MAX_PAGES {
                    let response = self.get_json::<Vec<T>>(&page_url(page)).await?;
                    last_len = response.body.len();
                    all.extend(response.body);
                    page += 1;
                }
                Ok(all)
            }
        }
    }

    /// POST a GraphQL query and return its `data` member
    pub async fn graphql(&self, url: &str, query: &str, variables: Value) -> Result<Value, ProviderError> {
        debug!("POST {} (graphql)", url);

        let payload = json!({ "query": query, "variables": variables });
        let response = self
            .authorize(self.client.post(url))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::from_status(status.as_u16(), url));
        }

        let bytes = response.bytes().await?;
        let body: Value = serde_json::from_slice(&bytes)?;
        graphql_data(body)
    }
}

/// Extract `data` from a GraphQL response, rejecting any top-level `errors`.
///
/// No partial extraction is attempted when errors are present.
pub fn graphql_data(mut body: Value) -> Result<Value, ProviderError> {
    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            let messages: Vec<&str> = errors
                .iter()
                .filter_map(|e| e.get("message").and_then(Value::as_str))
                .collect();
            let message = if messages.is_empty() {
                format!("{} error(s)", errors.len())
            } else {
                messages.join("; ")
            };
            return Err(ProviderError::GraphQl(message));
        }
    }

    match body.get_mut("data").map(Value::take) {
        Some(data) if !data.is_null() => Ok(data),
        _ => Err(ProviderError::Parse("GraphQL response has no data".to_string())),
    }
}

/// Read a numeric response header
pub fn header_u32(headers: &HeaderMap, name: &str) -> Option<u32> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Number of pages needed for `total` items at `per_page` per page (at least one)
pub fn pages_for_total(total: u32, per_page: u32) -> u32 {
    if per_page == 0 {
        return 1;
    }
    total.div_ceil(per_page).max(1)
}
