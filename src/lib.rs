//! starfeed - Release feed for starred repositories
//!
//! starfeed collects new releases (and, where a project only tags, qualifying
//! tags) from every repository you starred across several git hosting
//! platforms, and produces one deduplicated, most-recent-first list limited
//! to a trailing age window.
//!
//! ## Pipeline
//!
//! 1. [`orchestrator`]: one concurrent task per [`provider::Provider`]
//! 2. [`fanout`]: each provider fetches its repositories and extra pages
//!    through a bounded worker pool
//! 3. [`reconcile`]: releases and raw tags are merged per repository, noisy
//!    tags are dropped
//! 4. [`merge`]: all providers are merged, sorted and age filtered
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and parsing
//! - [`provider`]: GitHub, GitLab, Forgejo/Codeberg and SourceHut integrations
//! - [`pipeline`]: One complete run and its summary
//! - [`feed`]: JSON feed output

pub mod config;
pub mod error;
pub mod fanout;
pub mod feed;
pub mod merge;
pub mod orchestrator;
pub mod pipeline;
pub mod provider;
pub mod reconcile;
pub mod release;
pub mod watch;

pub use config::Config;
pub use error::ProviderError;
pub use merge::{merge_and_filter, MergeOptions};
pub use orchestrator::Orchestrator;
pub use pipeline::{PipelineSummary, ReleasePipeline};
pub use provider::Provider;
pub use release::{ParsedRepoRef, ProviderResult, ReleaseEvent};
