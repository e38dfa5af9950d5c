//! Bounded fan-out / fan-in
//!
//! Turns "N repositories to check" or "M extra pages to fetch" into spawned
//! tasks gated by a semaphore. Each task returns its outcome by value through
//! its own join handle; handles are awaited in dispatch order, so slot `i` of
//! the result always belongs to item `i` and no task ever touches another
//! task's result.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ProviderError;

/// Outcome of one fan-out task
pub type TaskOutcome<T> = Result<T, ProviderError>;

/// Worker count policy for repository and page fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerBounds {
    /// Minimum workers, enough to hide network latency on small machines
    pub floor: usize,
    /// Maximum workers, to stay clear of platform rate limits
    pub ceiling: usize,
}

impl Default for WorkerBounds {
    fn default() -> Self {
        Self {
            floor: 8,
            ceiling: 20,
        }
    }
}

impl WorkerBounds {
    pub fn new(floor: usize, ceiling: usize) -> Self {
        Self { floor, ceiling }
    }

    /// `min(max(available_parallelism, floor), ceiling)`, never below one
    pub fn workers(&self) -> usize {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.workers_for(parallelism)
    }

    pub fn workers_for(&self, parallelism: usize) -> usize {
        parallelism.max(self.floor).min(self.ceiling).max(1)
    }

    /// Bounds for a secondary page fan-out: never more workers than pages
    pub fn for_pages(&self, pages: usize) -> Self {
        let ceiling = self.ceiling.min(pages).max(1);
        Self {
            floor: self.floor.min(ceiling),
            ceiling,
        }
    }
}

/// Run `task` once per item with at most `bounds.workers()` tasks in flight.
///
/// Waits for every task. The returned vector has one slot per input item, in
/// input order. A panicking task yields `ProviderError::TaskFailed` in its own
/// slot and does not affect its siblings.
pub async fn fan_out<I, T, F, Fut>(items: Vec<I>, bounds: WorkerBounds, task: F) -> Vec<TaskOutcome<T>>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskOutcome<T>> + Send + 'static,
{
    if items.is_empty() {
        return Vec::new();
    }

    let workers = bounds.workers().min(items.len());
    debug!("Fanning out {} tasks over {} workers", items.len(), workers);

    let semaphore = Arc::new(Semaphore::new(workers));
    let task = Arc::new(task);

    let handles: Vec<JoinHandle<TaskOutcome<T>>> = items
        .into_iter()
        .map(|item| {
            let semaphore = semaphore.clone();
            let task = task.clone();
            tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| ProviderError::TaskFailed(e.to_string()))?;
                task(item).await
            })
        })
        .collect();

    let mut slots = Vec::with_capacity(handles.len());
    for handle in handles {
        slots.push(handle.await.unwrap_or_else(|e| Err(e.into())));
    }
    slots
}

/// Concatenate per-task results in slot order, logging failed tasks.
///
/// `names[i]` labels slot `i` in the log output.
pub fn flatten_outcomes<T>(provider: &str, names: &[String], slots: Vec<TaskOutcome<Vec<T>>>) -> Vec<T> {
    let mut combined = Vec::new();
    let mut failures = 0usize;

    for (index, slot) in slots.into_iter().enumerate() {
        match slot {
            Ok(items) => combined.extend(items),
            Err(e) => {
                failures += 1;
                let name = names.get(index).map(String::as_str).unwrap_or("unknown");
                warn!("{}: failed to fetch {}: {}", provider, name, e);
            }
        }
    }

    if failures > 0 {
        warn!("{}: {} task(s) failed, continuing with partial results", provider, failures);
    }

    combined
}

/// Complete a paginated listing whose first page has already been fetched.
///
/// Pages `2..=total_pages` are fetched through the bounded fan-out and
/// appended to `first_page` in page order. A failed page is logged and
/// contributes nothing; it never discards the other pages.
pub async fn collect_pages<T, F, Fut>(
    provider: &str,
    first_page: Vec<T>,
    total_pages: u32,
    bounds: WorkerBounds,
    fetch_page: F,
) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(u32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskOutcome<Vec<T>>> + Send + 'static,
{
    if total_pages <= 1 {
        return first_page;
    }

    let pages: Vec<u32> = (2..=total_pages).collect();
    let names: Vec<String> = pages.iter().map(|p| format!("page {}", p)).collect();
    let page_bounds = bounds.for_pages(pages.len());

    debug!("{}: fetching {} additional pages", provider, pages.len());

    let slots = fan_out(pages, page_bounds, fetch_page).await;

    let mut all = first_page;
    all.extend(flatten_outcomes(provider, &names, slots));
    all
}

/// Like [`collect_pages`], but a failed page fails the whole listing.
///
/// Used where a missing page would change the meaning of the rest, such as a
/// repository's release list feeding tag reconciliation.
pub async fn try_collect_pages<T, F, Fut>(
    first_page: Vec<T>,
    total_pages: u32,
    bounds: WorkerBounds,
    fetch_page: F,
) -> TaskOutcome<Vec<T>>
where
    T: Send + 'static,
    F: Fn(u32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskOutcome<Vec<T>>> + Send + 'static,
{
    if total_pages <= 1 {
        return Ok(first_page);
    }

    let pages: Vec<u32> = (2..=total_pages).collect();
    let page_bounds = bounds.for_pages(pages.len());

    let mut all = first_page;
    for slot in fan_out(pages, page_bounds, fetch_page).await {
        all.extend(slot?);
    }
    Ok(all)
}
