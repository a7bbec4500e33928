//! Import of uploaded export files
//!
//! - **job**: import requests, jobs, the temp-file guard and per-job stats
//! - **pipeline**: bounded worker pool draining the import queue
//!
//! File formats plug in through [`ImportAdapter`] and are looked up by name
//! in an [`AdapterRegistry`].

pub mod job;
pub mod pipeline;

use async_trait::async_trait;
use glucosync_common::{GlucoError, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use super::source::StreamSource;
use super::xdrip::XdripAdapter;

pub use job::{ImportJob, ImportRequest, ImportStats, TempUpload};
pub use pipeline::{ImportPipeline, ImportPipelineConfig};

/// Parser for one upload format
#[async_trait]
pub trait ImportAdapter: Send + Sync {
    /// Name clients use to select this adapter (the upload `data_type`)
    fn name(&self) -> &'static str;

    /// Prepare an uploaded file for extraction.
    ///
    /// Anything unpacked from the upload goes under `scratch`, which the
    /// pipeline removes once the job ends.
    async fn open(&self, upload: &Path, scratch: &Path) -> Result<Vec<Box<dyn StreamSource>>>;
}

/// Known import adapters by name
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<&'static str, Arc<dyn ImportAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in adapter
    pub fn with_defaults(batch_size: usize) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(XdripAdapter::new(batch_size)));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn ImportAdapter>) {
        self.adapters.insert(adapter.name(), adapter);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ImportAdapter>> {
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| GlucoError::UnknownAdapter(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.adapters.keys().copied().collect()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry").field("adapters", &self.names()).finish()
    }
}
