//! Import job definitions

use chrono::{DateTime, Utc};
use glucosync_common::StreamKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use super::ImportAdapter;

/// Uploaded file owned by the import machinery.
///
/// The file is deleted when the guard is dropped, whichever path the
/// request takes: rejected on submit, failed, or imported.
#[derive(Debug)]
pub struct TempUpload {
    path: PathBuf,
}

impl TempUpload {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed upload"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => tracing::warn!(path = %self.path.display(), "Could not remove upload: {}", e),
        }
    }
}

/// What a caller hands to [`super::ImportPipeline::submit`]
#[derive(Debug)]
pub struct ImportRequest {
    /// Target whose streams receive the data
    pub target_id: String,
    /// Adapter name (the upload `data_type`)
    pub adapter_name: String,
    pub upload: TempUpload,
    /// Original file name, shown in notifications
    pub display_name: String,
    /// Reprocess the whole file and replace samples at equal timestamps
    pub overwrite: bool,
}

impl ImportRequest {
    pub fn new(
        target_id: impl Into<String>,
        adapter_name: impl Into<String>,
        upload: TempUpload,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            adapter_name: adapter_name.into(),
            upload,
            display_name: display_name.into(),
            overwrite: false,
        }
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

/// A queued import, consumed exactly once by a worker
pub struct ImportJob {
    pub id: Uuid,
    pub target_id: String,
    pub adapter: Arc<dyn ImportAdapter>,
    pub upload: TempUpload,
    pub display_name: String,
    pub overwrite: bool,
    pub queued_at: DateTime<Utc>,
}

impl ImportJob {
    pub(crate) fn new(request: ImportRequest, adapter: Arc<dyn ImportAdapter>) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_id: request.target_id,
            adapter,
            upload: request.upload,
            display_name: request.display_name,
            overwrite: request.overwrite,
            queued_at: Utc::now(),
        }
    }

    /// `"<file> (<adapter>)"`, as used in notification titles
    pub fn label(&self) -> String {
        format!("{} ({})", self.display_name, self.adapter.name())
    }
}

impl std::fmt::Debug for ImportJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportJob")
            .field("id", &self.id)
            .field("target_id", &self.target_id)
            .field("adapter", &self.adapter.name())
            .field("upload", &self.upload.path())
            .field("display_name", &self.display_name)
            .field("overwrite", &self.overwrite)
            .finish()
    }
}

/// Statistics collected while importing one file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ImportStats {
    /// Samples written per stream
    pub written: BTreeMap<StreamKey, usize>,
    /// Source rows read, before coalescing
    pub fetched: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
}

impl ImportStats {
    pub fn new() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn record(&mut self, stream: StreamKey, fetched: usize, written: usize) {
        self.fetched += fetched;
        *self.written.entry(stream).or_default() += written;
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
        if let (Some(start), Some(end)) = (self.started_at, self.completed_at) {
            self.duration_secs = (end - start).num_milliseconds() as f64 / 1000.0;
        }
    }

    pub fn total_written(&self) -> usize {
        self.written.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_upload_removed_on_drop() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("upload.zip");
        std::fs::write(&path, b"data").unwrap();

        drop(TempUpload::new(&path));

        assert!(!path.exists());
    }

    #[test]
    fn test_stats_accumulate_per_stream() {
        let mut stats = ImportStats::new();
        stats.record(StreamKey::Cgm, 10, 8);
        stats.record(StreamKey::Cgm, 5, 5);
        stats.record(StreamKey::Events, 1, 1);
        stats.complete();

        assert_eq!(stats.written[&StreamKey::Cgm], 13);
        assert_eq!(stats.total_written(), 14);
        assert_eq!(stats.fetched, 16);
        assert!(stats.completed_at.is_some());
    }
}
