//! Per-target sync settings
//!
//! Settings are never cached by the core: the sync engine asks for a
//! target's services at the start of every run and the scheduler asks for
//! the sweep interval before every sleep, so edits apply on the next tick.

use async_trait::async_trait;
use glucosync_common::{GlucoError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::RwLock;

/// Sweep interval used when the settings do not name one
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// One remote service configured for a target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub service_type: String,
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl ServiceConfig {
    pub fn new(service_type: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            params: serde_json::Map::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// String parameter, if present
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    /// String parameter that must be present and non-empty
    pub fn require(&self, key: &str) -> Result<&str> {
        match self.param(key) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(GlucoError::config(format!(
                "{} service is missing required parameter '{}'",
                self.service_type, key
            ))),
        }
    }
}

/// A target and its ordered list of services
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncTarget {
    #[serde(rename = "id")]
    pub target_id: String,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

#[async_trait]
pub trait SettingsProvider: Send + Sync {
    /// All known target ids
    async fn targets(&self) -> Result<Vec<String>>;

    /// Current configuration of one target. Unknown targets have no services.
    async fn sync_target(&self, target_id: &str) -> Result<SyncTarget>;

    /// Delay between scheduler sweeps
    async fn sweep_interval(&self) -> Result<Duration>;
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    sweep_interval_secs: Option<u64>,
    #[serde(default)]
    targets: Vec<SyncTarget>,
}

/// Settings read from a TOML file on every call
#[derive(Debug, Clone)]
pub struct FileSettings {
    path: PathBuf,
    default_interval: Duration,
}

impl FileSettings {
    pub fn new(path: impl Into<PathBuf>, default_interval: Duration) -> Self {
        Self {
            path: path.into(),
            default_interval,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<SettingsFile> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "Settings file not found, no targets configured");
                return Ok(SettingsFile::default());
            },
            Err(e) => return Err(e.into()),
        };

        toml::from_str(&raw).map_err(|e| {
            GlucoError::config(format!("invalid settings file {}: {}", self.path.display(), e))
        })
    }
}

#[async_trait]
impl SettingsProvider for FileSettings {
    async fn targets(&self) -> Result<Vec<String>> {
        Ok(self.read().await?.targets.into_iter().map(|t| t.target_id).collect())
    }

    async fn sync_target(&self, target_id: &str) -> Result<SyncTarget> {
        let file = self.read().await?;
        Ok(file
            .targets
            .into_iter()
            .find(|t| t.target_id == target_id)
            .unwrap_or_else(|| SyncTarget {
                target_id: target_id.to_string(),
                services: Vec::new(),
            }))
    }

    async fn sweep_interval(&self) -> Result<Duration> {
        Ok(self
            .read()
            .await?
            .sweep_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_interval))
    }
}

/// Mutable in-memory settings
#[derive(Debug)]
pub struct StaticSettings {
    targets: RwLock<BTreeMap<String, Vec<ServiceConfig>>>,
    interval: RwLock<Duration>,
}

impl Default for StaticSettings {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS))
    }
}

impl StaticSettings {
    pub fn new(interval: Duration) -> Self {
        Self {
            targets: RwLock::new(BTreeMap::new()),
            interval: RwLock::new(interval),
        }
    }

    pub async fn set_services(&self, target_id: impl Into<String>, services: Vec<ServiceConfig>) {
        self.targets.write().await.insert(target_id.into(), services);
    }

    pub async fn set_interval(&self, interval: Duration) {
        *self.interval.write().await = interval;
    }
}

#[async_trait]
impl SettingsProvider for StaticSettings {
    async fn targets(&self) -> Result<Vec<String>> {
        Ok(self.targets.read().await.keys().cloned().collect())
    }

    async fn sync_target(&self, target_id: &str) -> Result<SyncTarget> {
        let services = self.targets.read().await.get(target_id).cloned().unwrap_or_default();
        Ok(SyncTarget {
            target_id: target_id.to_string(),
            services,
        })
    }

    async fn sweep_interval(&self) -> Result<Duration> {
        Ok(*self.interval.read().await)
    }
}
