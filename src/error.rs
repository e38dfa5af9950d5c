//! Error taxonomy for provider fetches
//!
//! Errors are attached to the narrowest scope that produced them: a single
//! repository or page task, or a whole provider. Nothing here ever escapes the
//! orchestrator; the caller decides what a non-empty error set means.

use thiserror::Error;

/// Errors that can occur while fetching releases from a hosting platform.
///
/// Variants carry rendered messages rather than source errors so results can
/// be cloned into `ProviderResult` and compared in tests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Credentials were rejected (HTTP 401/403)
    #[error("Authentication failed: HTTP {status}")]
    Auth { status: u16 },

    /// Non-success HTTP status other than an auth failure
    #[error("HTTP error: status {status} for {url}")]
    Http { status: u16, url: String },

    /// Non-success response whose body explained the failure
    #[error("API error: status {status}: {message}")]
    Api { status: u16, message: String },

    /// Network-level error (DNS, connection, TLS, timeout)
    #[error("Request failed: {0}")]
    Network(String),

    /// Payload could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),

    /// Well-formed GraphQL response carrying a top-level `errors` array
    #[error("GraphQL error: {0}")]
    GraphQl(String),

    /// Repository identifier could not be split into owner and name
    #[error("Invalid repository identifier: {0}")]
    InvalidRepository(String),

    /// A spawned task panicked or was aborted
    #[error("Task failed: {0}")]
    TaskFailed(String),
}

impl ProviderError {
    /// Whether this error means the provider's credentials were rejected
    pub fn is_auth(&self) -> bool {
        matches!(self, ProviderError::Auth { .. })
    }

    /// Classify an HTTP status into the auth or generic HTTP bucket
    pub fn from_status(status: u16, url: impl Into<String>) -> Self {
        match status {
            401 | 403 => ProviderError::Auth { status },
            _ => ProviderError::Http {
                status,
                url: url.into(),
            },
        }
    }

    /// Classify a status plus the server's own error message
    pub fn from_api_message(status: u16, message: impl Into<String>) -> Self {
        match status {
            401 | 403 => ProviderError::Auth { status },
            _ => ProviderError::Api {
                status,
                message: message.into(),
            },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return ProviderError::Parse(err.to_string());
        }
        match err.status() {
            Some(status) => ProviderError::from_status(
                status.as_u16(),
                err.url().map(|u| u.to_string()).unwrap_or_default(),
            ),
            None => ProviderError::Network(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Parse(err.to_string())
    }
}

impl From<octocrab::Error> for ProviderError {
    fn from(err: octocrab::Error) -> Self {
        match err {
            octocrab::Error::GitHub { source, .. } => {
                ProviderError::from_api_message(source.status_code.as_u16(), source.message.clone())
            }
            octocrab::Error::Serde { source, .. } => ProviderError::Parse(source.to_string()),
            other => ProviderError::Network(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ProviderError {
    fn from(err: tokio::task::JoinError) -> Self {
        ProviderError::TaskFailed(err.to_string())
    }
}
