//! JSON feed output
//!
//! A plain serialization of the final event list. Release notes are written
//! verbatim; rendering them is left to whatever consumes the file.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::release::ReleaseEvent;

/// Output target meaning "standard output"
pub const STDOUT: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    pub generated_at: DateTime<Utc>,
    pub events: Vec<ReleaseEvent>,
}

impl Feed {
    pub fn new(events: Vec<ReleaseEvent>, generated_at: DateTime<Utc>) -> Self {
        Self { generated_at, events }
    }
}

/// Pretty-printed JSON, terminated by a newline
pub fn render_feed(feed: &Feed) -> Result<String> {
    let mut rendered = serde_json::to_string_pretty(feed).context("Failed to serialize feed")?;
    rendered.push('\n');
    Ok(rendered)
}

/// Write the feed to `output`, or to stdout when `output` is `-`.
///
/// Parent directories are created as needed.
pub fn write_feed(feed: &Feed, output: &str) -> Result<()> {
    let rendered = render_feed(feed)?;

    if output == STDOUT {
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(rendered.as_bytes())
            .context("Failed to write feed to stdout")?;
        return Ok(());
    }

    let path = Path::new(output);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create feed directory: {:?}", parent))?;
    }

    std::fs::write(path, rendered).with_context(|| format!("Failed to write feed: {:?}", path))?;
    info!("Wrote {} event(s) to {:?}", feed.events.len(), path);

    Ok(())
}

/// Read a previously written feed
pub fn read_feed(path: &Path) -> Result<Feed> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read feed: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse feed: {:?}", path))
}
