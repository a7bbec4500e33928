//! Sync engine
//!
//! At most one run per target is in flight. A trigger that arrives while a
//! run is active is logged and dropped; triggers are not queued. A run walks
//! the target's services in configured order, and the first failing service
//! ends the run. Whatever earlier services committed stays committed.
//!
//! A run holds its target in the [`TargetLocks`] shared with the import
//! pipeline, waiting first for any import into that target to finish.

use glucosync_common::{InsertMode, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use super::{SyncServiceRegistry, SyncStream};
use crate::ingest::lock::TargetLocks;
use crate::ingest::source::{drain_stream, StreamSource};
use crate::notify::{Notification, NotificationSink, SYNC_CATEGORY, SYNC_STATUS_CATEGORY};
use crate::settings::{ServiceConfig, SettingsProvider};
use crate::store::StreamStore;

/// Result of asking for a sync
#[derive(Debug)]
pub enum SyncTrigger {
    /// A new run was spawned
    Started(RunWatch),
    /// A run for this target was already in flight; nothing was done
    AlreadyRunning,
}

impl SyncTrigger {
    pub fn is_started(&self) -> bool {
        matches!(self, SyncTrigger::Started(_))
    }
}

/// Handle on a spawned run
#[derive(Debug)]
pub struct RunWatch(watch::Receiver<bool>);

impl RunWatch {
    /// Resolves once the run has ended, whatever its outcome
    pub async fn finished(mut self) {
        let _ = self.0.wait_for(|running| !*running).await;
    }
}

/// Per-target run state, created on the first trigger and reused afterwards
#[derive(Debug)]
struct SyncRunState {
    running: Arc<watch::Sender<bool>>,
}

impl SyncRunState {
    fn new() -> Self {
        Self {
            running: Arc::new(watch::Sender::new(false)),
        }
    }
}

struct EngineInner {
    store: Arc<dyn StreamStore>,
    notifier: Arc<dyn NotificationSink>,
    settings: Arc<dyn SettingsProvider>,
    services: SyncServiceRegistry,
    locks: Arc<TargetLocks>,
    runs: Mutex<HashMap<String, SyncRunState>>,
}

#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn StreamStore>,
        notifier: Arc<dyn NotificationSink>,
        settings: Arc<dyn SettingsProvider>,
        services: SyncServiceRegistry,
        locks: Arc<TargetLocks>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                notifier,
                settings,
                services,
                locks,
                runs: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start a run for `target_id` unless one is already in flight.
    pub async fn trigger_sync(&self, target_id: &str) -> SyncTrigger {
        let running = {
            let mut runs = self.inner.runs.lock().await;
            let state = runs.entry(target_id.to_string()).or_insert_with(SyncRunState::new);

            if *state.running.borrow() {
                info!(target_id, "Sync already in progress - not starting a new one");
                return SyncTrigger::AlreadyRunning;
            }

            state.running.send_replace(true);
            state.running.clone()
        };

        let watch = RunWatch(running.subscribe());
        let inner = self.inner.clone();
        let target = target_id.to_string();

        tokio::spawn(async move {
            let run_inner = inner.clone();
            let run_target = target.clone();
            let outcome = tokio::spawn(async move { run_inner.run(&run_target).await }).await;

            if let Err(e) = outcome {
                error!(target_id = %target, "Sync run aborted: {}", e);
                inner.report_failure(&target, "CGM: Sync Failed".to_string(), e.to_string()).await;
                inner.clear_status(&target).await;
            }

            running.send_replace(false);
        });

        SyncTrigger::Started(watch)
    }

    /// Whether a run for `target_id` is in flight
    pub async fn is_running(&self, target_id: &str) -> bool {
        self.inner
            .runs
            .lock()
            .await
            .get(target_id)
            .is_some_and(|state| *state.running.borrow())
    }
}

impl EngineInner {
    async fn run(&self, target_id: &str) {
        info!(target_id, "Starting sync");

        if let Err(e) = self
            .notifier
            .notify(Notification::info(target_id, SYNC_STATUS_CATEGORY, "CGM: Syncing..."))
            .await
        {
            warn!(target_id, "Could not post sync status: {}", e);
        }

        let guard = self.locks.acquire(target_id).await;
        if let Err(e) = self.run_services(target_id).await {
            error!(target_id, "Error in sync: {}", e);
            self.report_failure(target_id, "CGM: Sync Failed".to_string(), e.to_string()).await;
        }
        drop(guard);

        self.clear_status(target_id).await;
    }

    async fn run_services(&self, target_id: &str) -> Result<()> {
        let target = self.settings.sync_target(target_id).await?;

        if target.services.is_empty() {
            info!(target_id, "No sync services configured");
            return self.notifier.clear(target_id, SYNC_CATEGORY).await;
        }

        for service in &target.services {
            let stype = service.service_type.as_str();
            info!(target_id, service = stype, "Syncing {}", stype);

            if let Err(e) = self.sync_service(target_id, service).await {
                error!(target_id, service = stype, "Error in sync {}: {}", stype, e);
                self.report_failure(target_id, format!("CGM: Sync Failed ({stype})"), e.to_string()).await;
                return Ok(());
            }
        }

        info!(target_id, services = target.services.len(), "Sync completed");
        self.notifier.clear(target_id, SYNC_CATEGORY).await
    }

    async fn sync_service(&self, target_id: &str, service: &ServiceConfig) -> Result<()> {
        let streams = self.services.get(&service.service_type)?.streams(service)?;

        for SyncStream { source, cursor_key } in streams {
            let start = self.resolve_start(target_id, source.as_ref(), &cursor_key).await?;
            debug!(target_id, source = %source.describe(), start, "Start sync time");

            let stats = drain_stream(
                self.store.as_ref(),
                source.as_ref(),
                target_id,
                start,
                InsertMode::Overwrite,
                Some(&cursor_key),
            )
            .await?;

            info!(
                target_id,
                stream = %source.stream(),
                pages = stats.pages,
                written = stats.written,
                "Synced {}",
                source.describe()
            );
        }

        Ok(())
    }

    /// Cursor if one was stored, else the newest stored sample, else ask
    /// the source where its history begins.
    async fn resolve_start(
        &self,
        target_id: &str,
        source: &dyn StreamSource,
        cursor_key: &str,
    ) -> Result<f64> {
        let stream = source.stream();

        if let Some(cursor) = self.store.get_cursor(target_id, stream, cursor_key).await? {
            return Ok(cursor);
        }

        if let Some(last) = self.store.last_sample(target_id, stream).await? {
            return Ok(last.t);
        }

        debug!(
            target_id,
            source = %source.describe(),
            "No cursor or data for this stream - discovering where the source starts"
        );
        source.discover_start().await
    }

    async fn report_failure(&self, target_id: &str, title: String, detail: String) {
        let notification = Notification::failure(target_id, SYNC_CATEGORY, title, &detail);
        if let Err(e) = self.notifier.notify(notification).await {
            error!(target_id, "Could not post sync failure: {}", e);
        }
    }

    async fn clear_status(&self, target_id: &str) {
        if let Err(e) = self.notifier.clear(target_id, SYNC_STATUS_CATEGORY).await {
            warn!(target_id, "Could not clear sync status: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::source::Page;
    use crate::ingest::sync::SyncService;
    use crate::notify::RecordingNotifier;
    use crate::settings::StaticSettings;
    use crate::store::MemoryStreamStore;
    use async_trait::async_trait;
    use glucosync_common::{GlucoError, Sample, StreamKey};

    struct OneShotSource;

    #[async_trait]
    impl StreamSource for OneShotSource {
        fn stream(&self) -> StreamKey {
            StreamKey::Cgm
        }

        fn describe(&self) -> String {
            "one-shot".into()
        }

        async fn discover_start(&self) -> Result<f64> {
            Ok(100.0)
        }

        async fn extract(&self, after: f64, _until: Option<f64>) -> Result<Page> {
            if after < 150.0 {
                Ok(Page::new(vec![Sample::numeric(150.0, 99.0)], false))
            } else {
                Ok(Page::default())
            }
        }
    }

    struct OneShotService;

    impl SyncService for OneShotService {
        fn service_type(&self) -> &'static str {
            "one-shot"
        }

        fn streams(&self, _config: &ServiceConfig) -> Result<Vec<SyncStream>> {
            Ok(vec![SyncStream {
                source: Box::new(OneShotSource),
                cursor_key: "one-shot".into(),
            }])
        }
    }

    fn engine(settings: Arc<StaticSettings>) -> (SyncEngine, Arc<MemoryStreamStore>, Arc<RecordingNotifier>) {
        let store = Arc::new(MemoryStreamStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let mut services = SyncServiceRegistry::new();
        services.register(Arc::new(OneShotService));
        let engine = SyncEngine::new(store.clone(), notifier.clone(), settings, services, TargetLocks::new());
        (engine, store, notifier)
    }

    #[tokio::test]
    async fn test_no_services_clears_stale_failure() {
        let settings = Arc::new(StaticSettings::default());
        let (engine, _store, notifier) = engine(settings);
        notifier
            .notify(Notification::failure("app", SYNC_CATEGORY, "old", &"stale"))
            .await
            .unwrap();

        let SyncTrigger::Started(run) = engine.trigger_sync("app").await else {
            panic!("expected a run");
        };
        run.finished().await;

        assert!(notifier.current("app", SYNC_CATEGORY).await.is_none());
        assert!(notifier.current("app", SYNC_STATUS_CATEGORY).await.is_none());
        assert!(!engine.is_running("app").await);
    }

    #[tokio::test]
    async fn test_discovers_start_then_resumes_from_cursor() {
        let settings = Arc::new(StaticSettings::default());
        settings.set_services("app", vec![ServiceConfig::new("one-shot")]).await;
        let (engine, store, notifier) = engine(settings);

        for _ in 0..2 {
            let SyncTrigger::Started(run) = engine.trigger_sync("app").await else {
                panic!("expected a run");
            };
            run.finished().await;
        }

        assert_eq!(store.samples("app", StreamKey::Cgm).await.unwrap(), vec![Sample::numeric(150.0, 99.0)]);
        assert_eq!(store.get_cursor("app", StreamKey::Cgm, "one-shot").await.unwrap(), Some(150.0));
        assert!(notifier.current("app", SYNC_CATEGORY).await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_service_type_fails_run() {
        let settings = Arc::new(StaticSettings::default());
        settings.set_services("app", vec![ServiceConfig::new("dexcom")]).await;
        let (engine, _store, notifier) = engine(settings);

        let SyncTrigger::Started(run) = engine.trigger_sync("app").await else {
            panic!("expected a run");
        };
        run.finished().await;

        let failure = notifier.current("app", SYNC_CATEGORY).await.unwrap();
        assert_eq!(failure.title, "CGM: Sync Failed (dexcom)");
        assert!(failure.description.contains(&GlucoError::UnknownAdapter("dexcom".into()).to_string()));
    }
}
