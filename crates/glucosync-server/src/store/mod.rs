//! Time-series storage collaborator
//!
//! The ingestion core only ever talks to a [`StreamStore`]: it reads the last
//! sample of a stream, inserts ordered batches, and keeps per-stream cursor
//! watermarks in a small key-value namespace. It never deletes or reorders
//! existing samples.
//!
//! Two implementations ship with the server:
//!
//! - [`MemoryStreamStore`]: ordered in-process maps, used by tests and
//!   embedders that bring their own persistence
//! - [`SqliteStreamStore`]: SQLx-backed store used by the binary

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use glucosync_common::{InsertMode, Result, Sample, StreamKey};

pub use memory::MemoryStreamStore;
pub use sqlite::SqliteStreamStore;

/// Append-biased, ordered sample storage addressed per target and stream.
///
/// Implementations serialize their own writes per stream.
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Sample with the greatest timestamp, if the stream has any.
    async fn last_sample(&self, target_id: &str, stream: StreamKey) -> Result<Option<Sample>>;

    /// Insert an ascending batch. Returns the number of samples written.
    ///
    /// With [`InsertMode::Append`] samples colliding with an existing
    /// timestamp are skipped; with [`InsertMode::Overwrite`] they replace it.
    async fn insert_batch(
        &self,
        target_id: &str,
        stream: StreamKey,
        samples: &[Sample],
        mode: InsertMode,
    ) -> Result<usize>;

    /// Read a cursor value from the stream's metadata.
    async fn get_cursor(&self, target_id: &str, stream: StreamKey, key: &str)
        -> Result<Option<f64>>;

    /// Persist a cursor value. A stored cursor never moves backwards.
    async fn set_cursor(
        &self,
        target_id: &str,
        stream: StreamKey,
        key: &str,
        value: f64,
    ) -> Result<()>;

    /// All samples of a stream in ascending order.
    async fn samples(&self, target_id: &str, stream: StreamKey) -> Result<Vec<Sample>>;
}
