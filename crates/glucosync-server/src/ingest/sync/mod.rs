//! Recurring sync from remote services
//!
//! - **engine**: per-target run guard and the sequential service runner
//! - **scheduler**: warm-up plus interval sweeps over all configured targets
//!
//! Remote services plug in through [`SyncService`], looked up by the
//! `service_type` of each configured service.

pub mod engine;
pub mod scheduler;

use glucosync_common::{GlucoError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::nightscout::{NightscoutConfig, NightscoutService};
use super::source::StreamSource;
use crate::settings::ServiceConfig;

pub use engine::{RunWatch, SyncEngine, SyncTrigger};
pub use scheduler::SyncScheduler;

/// A stream fed by a remote service, with the key its cursor is stored under
pub struct SyncStream {
    pub source: Box<dyn StreamSource>,
    pub cursor_key: String,
}

impl std::fmt::Debug for SyncStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStream")
            .field("source", &self.source.describe())
            .field("cursor_key", &self.cursor_key)
            .finish()
    }
}

/// Factory turning a configured service into the streams it syncs
pub trait SyncService: Send + Sync {
    fn service_type(&self) -> &'static str;

    /// Streams to sync, in order, for one configured instance
    fn streams(&self, config: &ServiceConfig) -> Result<Vec<SyncStream>>;
}

/// Known sync services by `service_type`
#[derive(Clone, Default)]
pub struct SyncServiceRegistry {
    services: BTreeMap<&'static str, Arc<dyn SyncService>>,
}

impl SyncServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(nightscout: NightscoutConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(NightscoutService::new(nightscout)));
        registry
    }

    pub fn register(&mut self, service: Arc<dyn SyncService>) {
        self.services.insert(service.service_type(), service);
    }

    pub fn get(&self, service_type: &str) -> Result<Arc<dyn SyncService>> {
        self.services
            .get(service_type)
            .cloned()
            .ok_or_else(|| GlucoError::UnknownAdapter(service_type.to_string()))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.services.keys().copied().collect()
    }
}

impl std::fmt::Debug for SyncServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncServiceRegistry").field("services", &self.names()).finish()
    }
}
