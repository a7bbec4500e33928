//! Recurring sync driver
//!
//! Waits a warm-up delay, then sweeps every target that has at least one
//! configured service. Each sweep runs in its own task so that an error or a
//! panic in one sweep is logged and the next sweep still happens. The sweep
//! interval is read from settings before every sleep.

use glucosync_common::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::engine::SyncEngine;
use crate::settings::SettingsProvider;

/// Used when the settings cannot be read or name a zero interval
const FALLBACK_INTERVAL: Duration = Duration::from_secs(60);

pub struct SyncScheduler {
    engine: SyncEngine,
    settings: Arc<dyn SettingsProvider>,
    warmup: Duration,
}

impl SyncScheduler {
    pub fn new(engine: SyncEngine, settings: Arc<dyn SettingsProvider>, warmup: Duration) -> Self {
        Self {
            engine,
            settings,
            warmup,
        }
    }

    /// Start the scheduler in background
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(warmup_secs = self.warmup.as_secs(), "Sync scheduler started");

            sleep(self.warmup).await;

            loop {
                let engine = self.engine.clone();
                let settings = self.settings.clone();

                match tokio::spawn(async move { sweep(&engine, settings.as_ref()).await }).await {
                    Ok(Ok(started)) => debug!(started, "Sync sweep finished"),
                    Ok(Err(e)) => error!("Sync sweep failed: {}", e),
                    Err(e) => error!("Sync sweep aborted: {}", e),
                }

                let interval = match self.settings.sweep_interval().await {
                    Ok(interval) if !interval.is_zero() => interval,
                    Ok(_) => FALLBACK_INTERVAL,
                    Err(e) => {
                        warn!("Could not read sweep interval, using {:?}: {}", FALLBACK_INTERVAL, e);
                        FALLBACK_INTERVAL
                    },
                };

                sleep(interval).await;
            }
        })
    }
}

/// Trigger a sync for every target with services. Returns how many runs started.
///
/// A target whose settings cannot be read is logged and skipped.
pub async fn sweep(engine: &SyncEngine, settings: &dyn SettingsProvider) -> Result<usize> {
    let mut started = 0;

    for target_id in settings.targets().await? {
        let target = match settings.sync_target(&target_id).await {
            Ok(target) => target,
            Err(e) => {
                error!(target_id = %target_id, "Could not read sync settings: {}", e);
                continue;
            },
        };
        if target.services.is_empty() {
            continue;
        }

        if engine.trigger_sync(&target_id).await.is_started() {
            started += 1;
        }
    }

    Ok(started)
}
