//! Import pipeline
//!
//! Uploads are queued in memory and processed by a small pool of workers.
//! A worker is spawned on submit only while fewer than `max_workers` are
//! active; each worker drains the queue until it is empty and then exits.
//! The queue and the active-worker count share one lock, so a worker
//! never exits while a job it should have picked up sits in the queue.
//!
//! A worker takes the oldest job whose target is free in the shared
//! [`TargetLocks`] and holds the target until the job is reported. Jobs for
//! a busy target (another import, or a sync run) wait in the queue, so
//! imports into one target run one after another in submission order.
//!
//! Every job runs in its own task. Its batches are committed as they are
//! read, so a failure part-way through keeps what was written. The upload
//! and the scratch directory are removed when the job ends, however it ends.

use glucosync_common::{InsertMode, Result};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job::{ImportJob, ImportRequest, ImportStats};
use super::AdapterRegistry;
use crate::ingest::lock::{TargetGuard, TargetLocks};
use crate::ingest::source::drain_stream;
use crate::notify::{Notification, NotificationSink, IMPORTER_CATEGORY, IMPORTER_STATUS_CATEGORY};
use crate::store::StreamStore;

pub const DEFAULT_MAX_WORKERS: usize = 2;

#[derive(Debug, Clone)]
pub struct ImportPipelineConfig {
    /// Upper bound on concurrently running import workers
    pub max_workers: usize,
}

impl Default for ImportPipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

#[derive(Default)]
struct WorkQueue {
    jobs: VecDeque<ImportJob>,
    active: usize,
}

impl WorkQueue {
    /// Remove the oldest job whose target can be claimed
    fn claim(&mut self, locks: &Arc<TargetLocks>) -> Option<(ImportJob, TargetGuard)> {
        let (index, guard) = self
            .jobs
            .iter()
            .enumerate()
            .find_map(|(index, job)| locks.try_acquire(&job.target_id).map(|guard| (index, guard)))?;
        let job = self.jobs.remove(index)?;
        Some((job, guard))
    }
}

struct PipelineInner {
    store: Arc<dyn StreamStore>,
    notifier: Arc<dyn NotificationSink>,
    adapters: AdapterRegistry,
    config: ImportPipelineConfig,
    locks: Arc<TargetLocks>,
    queue: Mutex<WorkQueue>,
    active: watch::Sender<usize>,
}

#[derive(Clone)]
pub struct ImportPipeline {
    inner: Arc<PipelineInner>,
}

impl ImportPipeline {
    pub fn new(
        store: Arc<dyn StreamStore>,
        notifier: Arc<dyn NotificationSink>,
        adapters: AdapterRegistry,
        config: ImportPipelineConfig,
        locks: Arc<TargetLocks>,
    ) -> Self {
        let config = ImportPipelineConfig {
            max_workers: config.max_workers.max(1),
        };

        Self {
            inner: Arc::new(PipelineInner {
                store,
                notifier,
                adapters,
                config,
                locks,
                queue: Mutex::new(WorkQueue::default()),
                active: watch::Sender::new(0),
            }),
        }
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.inner.adapters
    }

    /// Queue an upload for import.
    ///
    /// Fails with `UnknownAdapter` before anything is queued; the upload
    /// is deleted on that path because the request is dropped.
    pub async fn submit(&self, request: ImportRequest) -> Result<Uuid> {
        let adapter = self.inner.adapters.get(&request.adapter_name)?;
        let job = ImportJob::new(request, adapter);
        let id = job.id;

        debug!(job_id = %id, target_id = %job.target_id, upload = %job.upload.path().display(), "Import submitted");

        self.inner
            .post(Notification::info(
                &job.target_id,
                IMPORTER_STATUS_CATEGORY,
                format!("{} queued for Import ({})", job.display_name, job.adapter.name()),
            ))
            .await;

        let spawn_worker = {
            let mut queue = self.inner.queue.lock().await;
            queue.jobs.push_back(job);

            if queue.active < self.inner.config.max_workers && !queue.jobs.is_empty() {
                queue.active += 1;
                self.inner.active.send_replace(queue.active);
                true
            } else {
                false
            }
        };

        if spawn_worker {
            tokio::spawn(worker(self.inner.clone()));
        }

        Ok(id)
    }

    /// Jobs waiting for a worker
    pub async fn queued(&self) -> usize {
        self.inner.queue.lock().await.jobs.len()
    }

    /// Workers currently running
    pub fn active_workers(&self) -> usize {
        *self.inner.active.borrow()
    }

    /// Resolves once no worker is running and the queue is empty
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.active.subscribe();
        let _ = rx.wait_for(|active| *active == 0).await;
    }
}

async fn worker(inner: Arc<PipelineInner>) {
    debug!("Started import worker");

    loop {
        let released = inner.locks.released();
        tokio::pin!(released);
        released.as_mut().enable();

        let claimed = {
            let mut queue = inner.queue.lock().await;
            if queue.jobs.is_empty() {
                queue.active = queue.active.saturating_sub(1);
                inner.active.send_replace(queue.active);
                break;
            }
            queue.claim(&inner.locks)
        };

        match claimed {
            Some((job, guard)) => inner.clone().process(job, guard).await,
            None => {
                debug!("Every queued import targets a busy target, waiting");
                released.await;
            },
        }
    }

    debug!("Stopping import worker");
}

impl PipelineInner {
    /// Run one job while holding its target
    async fn process(self: Arc<Self>, job: ImportJob, _guard: TargetGuard) {
        let target_id = job.target_id.clone();
        let label = job.label();
        let job_id = job.id;
        let waited_ms = (chrono::Utc::now() - job.queued_at).num_milliseconds();

        info!(job_id = %job_id, target_id = %target_id, waited_ms, "Importing {}", label);
        self.post(Notification::info(&target_id, IMPORTER_STATUS_CATEGORY, format!("Importing {label}...")))
            .await;

        let run = self.clone();
        let outcome = tokio::spawn(async move {
            let result = run.import(&job).await;
            // Dropping the job here removes the upload before we report.
            drop(job);
            result
        })
        .await;

        let notification = match outcome {
            Ok(Ok(stats)) => {
                info!(
                    job_id = %job_id,
                    target_id = %target_id,
                    written = stats.total_written(),
                    duration_secs = stats.duration_secs,
                    "{} imported successfully",
                    label
                );
                Notification::success(&target_id, IMPORTER_CATEGORY, format!("{label} imported successfully"))
                    .with_description(format!("{} new datapoints", stats.total_written()))
            },
            Ok(Err(e)) => {
                error!(job_id = %job_id, target_id = %target_id, "Import of {} failed: {}", label, e);
                Notification::failure(&target_id, IMPORTER_CATEGORY, format!("Failed to upload {label}"), &e)
            },
            Err(e) => {
                error!(job_id = %job_id, target_id = %target_id, "Import of {} aborted: {}", label, e);
                Notification::failure(&target_id, IMPORTER_CATEGORY, format!("Failed to upload {label}"), &e)
            },
        };

        self.post(notification).await;
        if let Err(e) = self.notifier.clear(&target_id, IMPORTER_STATUS_CATEGORY).await {
            warn!(target_id = %target_id, "Could not clear import status: {}", e);
        }
    }

    async fn import(&self, job: &ImportJob) -> Result<ImportStats> {
        let mut stats = ImportStats::new();

        let scratch_parent = job
            .upload
            .path()
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);
        let scratch = tempfile::Builder::new().prefix("glucosync-import-").tempdir_in(scratch_parent)?;

        let sources = job.adapter.open(job.upload.path(), scratch.path()).await?;

        let mode = if job.overwrite { InsertMode::Overwrite } else { InsertMode::Append };

        for source in &sources {
            let stream = source.stream();
            let start = if job.overwrite {
                0.0
            } else {
                self.store
                    .last_sample(&job.target_id, stream)
                    .await?
                    .map_or(0.0, |last| last.t)
            };

            debug!(job_id = %job.id, stream = %stream, start, "Importing {} from {}", stream, start);

            let drained =
                drain_stream(self.store.as_ref(), source.as_ref(), &job.target_id, start, mode, None)
                    .await?;
            stats.record(stream, drained.fetched, drained.written);
        }

        drop(sources);
        stats.complete();

        Ok(stats)
    }

    async fn post(&self, notification: Notification) {
        let target_id = notification.target_id.clone();
        if let Err(e) = self.notifier.notify(notification).await {
            warn!(target_id = %target_id, "Could not post import notification: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::import::{ImportAdapter, TempUpload};
    use crate::ingest::source::{Page, StreamSource};
    use crate::notify::{RecordingNotifier, Severity};
    use crate::store::MemoryStreamStore;
    use async_trait::async_trait;
    use glucosync_common::{GlucoError, Sample, StreamKey};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Reads "t,value" lines from the upload; a line "boom" fails the batch
    struct CsvAdapter;

    struct CsvSource {
        lines: Vec<String>,
    }

    #[async_trait]
    impl StreamSource for CsvSource {
        fn stream(&self) -> StreamKey {
            StreamKey::Cgm
        }

        fn describe(&self) -> String {
            "csv".into()
        }

        async fn extract(&self, after: f64, _until: Option<f64>) -> Result<Page> {
            let mut samples = Vec::new();
            for line in &self.lines {
                if line == "boom" {
                    if samples.is_empty() {
                        return Err(GlucoError::source_format("bad line"));
                    }
                    break;
                }
                let (t, v) = line
                    .split_once(',')
                    .ok_or_else(|| GlucoError::source_format("missing comma"))?;
                let t: f64 = t.parse().map_err(|_| GlucoError::source_format("bad t"))?;
                let v: f64 = v.parse().map_err(|_| GlucoError::source_format("bad v"))?;
                if t > after {
                    samples.push(Sample::numeric(t, v));
                    if samples.len() == 2 {
                        return Ok(Page::new(samples, true));
                    }
                }
            }
            Ok(Page::new(samples, false))
        }
    }

    #[async_trait]
    impl ImportAdapter for CsvAdapter {
        fn name(&self) -> &'static str {
            "csv"
        }

        async fn open(&self, upload: &Path, scratch: &Path) -> Result<Vec<Box<dyn StreamSource>>> {
            assert!(scratch.is_dir());
            let text = tokio::fs::read_to_string(upload).await?;
            Ok(vec![Box::new(CsvSource {
                lines: text.lines().map(str::to_string).collect(),
            })])
        }
    }

    /// Sleeps inside every extract and records how many of its sources
    /// were extracting at once, per target
    #[derive(Default)]
    struct SlowAdapter {
        running: Arc<std::sync::Mutex<HashMap<String, usize>>>,
        peak: Arc<std::sync::Mutex<HashMap<String, usize>>>,
    }

    struct SlowSource {
        target_id: String,
        running: Arc<std::sync::Mutex<HashMap<String, usize>>>,
        peak: Arc<std::sync::Mutex<HashMap<String, usize>>>,
    }

    #[async_trait]
    impl StreamSource for SlowSource {
        fn stream(&self) -> StreamKey {
            StreamKey::Cgm
        }

        fn describe(&self) -> String {
            "slow".into()
        }

        async fn extract(&self, after: f64, _until: Option<f64>) -> Result<Page> {
            {
                let mut running = self.running.lock().unwrap();
                let now = running.entry(self.target_id.clone()).or_default();
                *now += 1;
                let mut peak = self.peak.lock().unwrap();
                let seen = peak.entry(self.target_id.clone()).or_default();
                *seen = (*seen).max(*now);
            }
            tokio::time::sleep(Duration::from_millis(30)).await;
            *self.running.lock().unwrap().entry(self.target_id.clone()).or_default() -= 1;

            let samples = if after < 1.0 { vec![Sample::numeric(1.0, 100.0)] } else { Vec::new() };
            Ok(Page::new(samples, false))
        }
    }

    #[async_trait]
    impl ImportAdapter for SlowAdapter {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn open(&self, upload: &Path, _scratch: &Path) -> Result<Vec<Box<dyn StreamSource>>> {
            // The upload holds the target id.
            let target_id = tokio::fs::read_to_string(upload).await?;
            Ok(vec![Box::new(SlowSource {
                target_id,
                running: self.running.clone(),
                peak: self.peak.clone(),
            })])
        }
    }

    struct Harness {
        dir: TempDir,
        pipeline: ImportPipeline,
        store: Arc<MemoryStreamStore>,
        notifier: Arc<RecordingNotifier>,
        uploads: AtomicUsize,
    }

    impl Harness {
        fn new(max_workers: usize) -> Self {
            let store = Arc::new(MemoryStreamStore::new());
            let notifier = Arc::new(RecordingNotifier::new());
            let mut adapters = AdapterRegistry::new();
            adapters.register(Arc::new(CsvAdapter));
            let pipeline = ImportPipeline::new(
                store.clone(),
                notifier.clone(),
                adapters,
                ImportPipelineConfig { max_workers },
                TargetLocks::new(),
            );
            Self {
                dir: TempDir::new().unwrap(),
                pipeline,
                store,
                notifier,
                uploads: AtomicUsize::new(0),
            }
        }

        fn upload(&self, contents: &str) -> TempUpload {
            let n = self.uploads.fetch_add(1, Ordering::SeqCst);
            let path = self.dir.path().join(format!("upload-{n}.csv"));
            std::fs::write(&path, contents).unwrap();
            TempUpload::new(path)
        }

        fn leftover_files(&self) -> usize {
            std::fs::read_dir(self.dir.path()).unwrap().count()
        }
    }

    #[tokio::test]
    async fn test_import_commits_and_cleans_up() {
        let h = Harness::new(2);
        let request = ImportRequest::new("app", "csv", h.upload("1,100\n2,110\n3,120\n"), "readings.csv");

        h.pipeline.submit(request).await.unwrap();
        h.pipeline.wait_idle().await;

        assert_eq!(h.store.samples("app", StreamKey::Cgm).await.unwrap().len(), 3);
        assert_eq!(h.leftover_files(), 0);

        let result = h.notifier.current("app", IMPORTER_CATEGORY).await.unwrap();
        assert_eq!(result.title, "readings.csv (csv) imported successfully");
        assert_eq!(result.severity, Severity::Success);
        assert!(h.notifier.current("app", IMPORTER_STATUS_CATEGORY).await.is_none());

        let statuses: Vec<String> = h
            .notifier
            .posted("app", IMPORTER_STATUS_CATEGORY)
            .await
            .into_iter()
            .map(|n| n.title)
            .collect();
        assert_eq!(statuses, vec!["readings.csv queued for Import (csv)", "Importing readings.csv (csv)..."]);
    }

    #[tokio::test]
    async fn test_failure_keeps_committed_batches() {
        let h = Harness::new(1);
        let request = ImportRequest::new("app", "csv", h.upload("1,100\n2,110\nboom\n"), "bad.csv");

        h.pipeline.submit(request).await.unwrap();
        h.pipeline.wait_idle().await;

        assert_eq!(h.store.samples("app", StreamKey::Cgm).await.unwrap().len(), 2);
        let failure = h.notifier.current("app", IMPORTER_CATEGORY).await.unwrap();
        assert_eq!(failure.title, "Failed to upload bad.csv (csv)");
        assert!(failure.description.contains("bad line"));
        assert_eq!(h.leftover_files(), 0);
    }

    #[tokio::test]
    async fn test_unknown_adapter_rejected_without_queueing() {
        let h = Harness::new(2);
        let upload = h.upload("1,100\n");
        let path = upload.path().to_path_buf();

        let err = h
            .pipeline
            .submit(ImportRequest::new("app", "dexcom", upload, "x.zip"))
            .await
            .unwrap_err();

        assert!(matches!(err, GlucoError::UnknownAdapter(_)));
        assert!(!path.exists());
        assert_eq!(h.pipeline.queued().await, 0);
        assert_eq!(h.pipeline.active_workers(), 0);
        assert!(h.notifier.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_many_jobs_all_processed_by_bounded_pool() {
        let h = Harness::new(2);
        for i in 0..6 {
            let target = format!("app-{i}");
            let request = ImportRequest::new(target, "csv", h.upload("1,100\n2,110\n"), "r.csv");
            h.pipeline.submit(request).await.unwrap();
            assert!(h.pipeline.active_workers() <= 2);
        }
        h.pipeline.wait_idle().await;

        for i in 0..6 {
            let samples = h.store.samples(&format!("app-{i}"), StreamKey::Cgm).await.unwrap();
            assert_eq!(samples.len(), 2);
        }
        assert_eq!(h.pipeline.queued().await, 0);
        assert_eq!(h.leftover_files(), 0);
    }

    #[tokio::test]
    async fn test_imports_into_one_target_never_overlap() {
        let locks = TargetLocks::new();
        let store = Arc::new(MemoryStreamStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let slow = Arc::new(SlowAdapter::default());
        let peak = slow.peak.clone();
        let mut adapters = AdapterRegistry::new();
        adapters.register(slow);
        let pipeline = ImportPipeline::new(
            store.clone(),
            notifier.clone(),
            adapters,
            ImportPipelineConfig { max_workers: 2 },
            locks.clone(),
        );
        let dir = TempDir::new().unwrap();

        for (i, target) in ["app", "app", "other"].into_iter().enumerate() {
            let path = dir.path().join(format!("upload-{i}"));
            std::fs::write(&path, target).unwrap();
            let request = ImportRequest::new(target, "slow", TempUpload::new(path), format!("{i}.zip"));
            pipeline.submit(request).await.unwrap();
        }
        pipeline.wait_idle().await;

        let peak = peak.lock().unwrap().clone();
        assert_eq!(peak.get("app"), Some(&1));
        assert_eq!(peak.get("other"), Some(&1));
        let results = notifier.posted("app", IMPORTER_CATEGORY).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|n| n.severity == Severity::Success));
        assert!(locks.try_acquire("app").is_some());
    }

    #[tokio::test]
    async fn test_import_waits_for_target_held_elsewhere() {
        let h = Harness::new(2);
        let locks = h.pipeline.inner.locks.clone();
        let held = locks.try_acquire("app").unwrap();

        let request = ImportRequest::new("app", "csv", h.upload("1,100\n"), "readings.csv");
        h.pipeline.submit(request).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(h.pipeline.queued().await, 1);
        assert!(h.store.samples("app", StreamKey::Cgm).await.unwrap().is_empty());

        drop(held);
        h.pipeline.wait_idle().await;
        assert_eq!(h.store.samples("app", StreamKey::Cgm).await.unwrap().len(), 1);
    }
}
