//! Source adapter contract and the shared extract-and-commit loop
//!
//! Every adapter exposes one [`StreamSource`] per stream it feeds. A source
//! answers `(cursor, window) -> page` queries; [`drain_stream`] walks the
//! source's [`WindowPlan`], commits each page to the store as soon as it
//! arrives, and only then advances the persisted cursor. The cursor never
//! passes a record that has not been committed.

use async_trait::async_trait;
use glucosync_common::types::{coalesce, millis_to_secs};
use glucosync_common::{GlucoError, InsertMode, Result, Sample, StreamKey};
use std::time::Duration;
use tracing::{debug, warn};

use crate::store::StreamStore;

/// Half-open time range `(start, end]` in epoch seconds. `end: None` is open-ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub start: f64,
    pub end: Option<f64>,
}

/// One response from a source, in ascending time order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub samples: Vec<Sample>,
    /// The source returned as many records as it was asked for, so more may
    /// remain in the same window.
    pub saturated: bool,
    /// Oldest record timestamp in the response, counting records that
    /// yielded no sample
    pub oldest: Option<f64>,
}

impl Page {
    pub fn new(samples: Vec<Sample>, saturated: bool) -> Self {
        let oldest = samples.iter().map(|s| s.t).reduce(f64::min);
        Self {
            samples,
            saturated,
            oldest,
        }
    }

    pub fn with_oldest(mut self, oldest: Option<f64>) -> Self {
        self.oldest = oldest;
        self
    }

    /// Cursor value after this page is committed
    pub fn next_cursor(&self) -> Option<f64> {
        self.samples.iter().map(|s| s.t).reduce(f64::max)
    }
}

/// Which end of a range a capped response keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageOrder {
    /// The oldest records; the rest of the range follows the page
    #[default]
    OldestFirst,
    /// The newest records; the rest of the range precedes the page
    NewestFirst,
}

/// How a source is walked from a starting cursor up to now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowPlan {
    /// A single open window, re-queried with the advancing cursor
    #[default]
    Unbounded,
    /// Fixed-width windows starting `lookback` before the cursor, followed
    /// by an open window reaching the present
    Yearly { width: Duration, lookback: Duration },
}

impl WindowPlan {
    pub fn windows(&self, start: f64, now: f64) -> Vec<Window> {
        match *self {
            WindowPlan::Unbounded => vec![Window { start, end: None }],
            WindowPlan::Yearly { width, lookback } => {
                let width = width.as_secs_f64();
                let mut s = (start - lookback.as_secs_f64()).max(0.0);
                let mut windows = Vec::new();

                if width > 0.0 {
                    while s < now - width {
                        windows.push(Window {
                            start: s,
                            end: Some(s + width),
                        });
                        s += width;
                    }
                }

                windows.push(Window { start: s, end: None });
                windows
            },
        }
    }
}

/// Extraction logic for one stream of one source
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Stream this source feeds
    fn stream(&self) -> StreamKey;

    /// Human-readable origin, used in logs and error messages
    fn describe(&self) -> String;

    fn plan(&self) -> WindowPlan {
        WindowPlan::Unbounded
    }

    fn page_order(&self) -> PageOrder {
        PageOrder::OldestFirst
    }

    /// Starting point when neither a cursor nor stored data exist
    async fn discover_start(&self) -> Result<f64> {
        Ok(0.0)
    }

    /// Samples with `after < t <= until` (no upper bound when `until` is None)
    async fn extract(&self, after: f64, until: Option<f64>) -> Result<Page>;
}

/// Outcome of draining one stream
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DrainStats {
    pub pages: usize,
    pub fetched: usize,
    pub written: usize,
    /// Timestamp of the newest committed sample
    pub last_t: Option<f64>,
}

/// Current wall-clock time in epoch seconds
pub fn now_secs() -> f64 {
    millis_to_secs(chrono::Utc::now().timestamp_millis())
}

/// Pull everything after `start` from a source into the store.
///
/// Each non-empty page is coalesced and inserted before the next page is
/// requested. The stream cursor (when `cursor_key` is set) only ever
/// moves to a timestamp below which the window has been fully committed:
///
/// - [`PageOrder::OldestFirst`]: the cursor follows every page, and a
///   saturated page is followed by a request starting at its newest
///   timestamp.
/// - [`PageOrder::NewestFirst`]: a saturated page is followed by a request
///   for the part of the window at or before its oldest record, and the
///   cursor moves once the window has no older records left to fetch.
pub async fn drain_stream(
    store: &dyn StreamStore,
    source: &dyn StreamSource,
    target_id: &str,
    start: f64,
    mode: InsertMode,
    cursor_key: Option<&str>,
) -> Result<DrainStats> {
    let drain = Drain {
        store,
        source,
        target_id,
        stream: source.stream(),
        mode,
        cursor_key,
    };
    let mut stats = DrainStats::default();

    for window in source.plan().windows(start, now_secs()) {
        match source.page_order() {
            PageOrder::OldestFirst => drain.forward(window, &mut stats).await?,
            PageOrder::NewestFirst => drain.backward(window, &mut stats).await?,
        }
    }

    Ok(stats)
}

struct Drain<'a> {
    store: &'a dyn StreamStore,
    source: &'a dyn StreamSource,
    target_id: &'a str,
    stream: StreamKey,
    mode: InsertMode,
    cursor_key: Option<&'a str>,
}

impl Drain<'_> {
    async fn forward(&self, window: Window, stats: &mut DrainStats) -> Result<()> {
        let mut after = window.start;

        loop {
            let page = self.source.extract(after, window.end).await?;
            let saturated = page.saturated;
            let Some(page_last) = self.commit(page, after, window.end, stats).await? else {
                return Ok(());
            };
            self.advance_cursor(page_last).await?;

            if !saturated {
                return Ok(());
            }
            if page_last <= after {
                warn!(
                    target_id = self.target_id,
                    stream = %self.stream,
                    source = %self.source.describe(),
                    "Saturated page made no progress, leaving window"
                );
                return Ok(());
            }
            after = page_last;
        }
    }

    async fn backward(&self, window: Window, stats: &mut DrainStats) -> Result<()> {
        let mut until = window.end;
        let mut newest: Option<f64> = None;

        loop {
            let page = self.source.extract(window.start, until).await?;
            let saturated = page.saturated;
            let oldest = page.oldest;

            if let Some(page_last) = self.commit(page, window.start, until, stats).await? {
                newest = Some(newest.map_or(page_last, |t| t.max(page_last)));
            }

            let Some(oldest) = oldest.filter(|_| saturated) else {
                break;
            };
            if until.is_some_and(|u| oldest >= u) {
                // Every record of the page shares one timestamp; narrowing
                // further cannot reach the older ones.
                return Err(GlucoError::remote(format!(
                    "{}: more than one page of records at {}",
                    self.source.describe(),
                    oldest
                )));
            }

            debug!(
                target_id = self.target_id,
                stream = %self.stream,
                oldest,
                "Saturated page, fetching the older part of the window"
            );
            until = Some(oldest);
        }

        if let Some(newest) = newest {
            self.advance_cursor(newest).await?;
        }
        Ok(())
    }

    /// Insert one page; returns its newest timestamp, or None when it was empty
    async fn commit(
        &self,
        page: Page,
        after: f64,
        until: Option<f64>,
        stats: &mut DrainStats,
    ) -> Result<Option<f64>> {
        stats.pages += 1;
        let Some(page_last) = page.next_cursor() else {
            return Ok(None);
        };

        stats.fetched += page.samples.len();
        let batch = coalesce(page.samples);
        let written = self
            .store
            .insert_batch(self.target_id, self.stream, &batch, self.mode)
            .await?;
        stats.written += written;
        stats.last_t = Some(stats.last_t.map_or(page_last, |t| t.max(page_last)));

        debug!(
            target_id = self.target_id,
            stream = %self.stream,
            after,
            until = ?until,
            fetched = batch.len(),
            written,
            "Committed page"
        );

        Ok(Some(page_last))
    }

    async fn advance_cursor(&self, t: f64) -> Result<()> {
        match self.cursor_key {
            Some(key) => self.store.set_cursor(self.target_id, self.stream, key, t).await,
            None => Ok(()),
        }
    }
}
