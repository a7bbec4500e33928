//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::ingest::import::pipeline::DEFAULT_MAX_WORKERS;
use crate::ingest::nightscout::config::{
    DEFAULT_LOOKBACK_SECS, DEFAULT_MIN_YEAR, DEFAULT_PAGE_LIMIT, DEFAULT_TIMEOUT_SECS, DEFAULT_WINDOW_DAYS,
};
use crate::ingest::nightscout::NightscoutConfig;
use crate::ingest::xdrip::DEFAULT_BATCH_SIZE;
use crate::settings::DEFAULT_SWEEP_INTERVAL_SECS;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://glucosync.db";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

// ============================================================================
// Ingestion Configuration Constants
// ============================================================================

/// Default directory uploads are written to before import.
pub const DEFAULT_UPLOAD_DIR: &str = "uploads";

/// Default upload size limit (512 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

/// Default per-target sync settings file.
pub const DEFAULT_SETTINGS_PATH: &str = "sync.toml";

/// Default delay before the first sync sweep, in seconds.
pub const DEFAULT_SYNC_WARMUP_SECS: u64 = 5;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub import: ImportConfig,
    pub sync: SyncConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Import pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    pub max_workers: usize,
    pub batch_size: usize,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

/// Sync engine and scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub enabled: bool,
    pub settings_path: PathBuf,
    pub warmup_secs: u64,
    pub default_interval_secs: u64,
    pub http_timeout_secs: u64,
    pub window_days: u64,
    pub page_limit: usize,
    pub min_year: i32,
    pub lookback_secs: u64,
}

impl SyncConfig {
    pub fn warmup(&self) -> Duration {
        Duration::from_secs(self.warmup_secs)
    }

    pub fn default_interval(&self) -> Duration {
        Duration::from_secs(self.default_interval_secs)
    }

    pub fn nightscout(&self) -> NightscoutConfig {
        NightscoutConfig::builder()
            .window(Duration::from_secs(self.window_days * 86_400))
            .lookback(Duration::from_secs(self.lookback_secs))
            .page_limit(self.page_limit)
            .min_year(self.min_year)
            .timeout_secs(self.http_timeout_secs)
            .build()
    }
}

/// Parse `key` from the environment, falling back to `default` when unset
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid value for {}: '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: env_string("GLUCOSYNC_HOST", DEFAULT_SERVER_HOST),
                port: env_or("GLUCOSYNC_PORT", DEFAULT_SERVER_PORT)?,
                shutdown_timeout_secs: env_or("GLUCOSYNC_SHUTDOWN_TIMEOUT", DEFAULT_SHUTDOWN_TIMEOUT_SECS)?,
            },
            database: DatabaseConfig {
                url: env_string("GLUCOSYNC_DATABASE_URL", DEFAULT_DATABASE_URL),
                max_connections: env_or("GLUCOSYNC_DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS)?,
            },
            import: ImportConfig {
                max_workers: env_or("GLUCOSYNC_IMPORT_MAX_WORKERS", DEFAULT_MAX_WORKERS)?,
                batch_size: env_or("GLUCOSYNC_IMPORT_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
                upload_dir: env_string("GLUCOSYNC_UPLOAD_DIR", DEFAULT_UPLOAD_DIR).into(),
                max_upload_bytes: env_or("GLUCOSYNC_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            },
            sync: SyncConfig {
                enabled: env_or("GLUCOSYNC_SYNC_ENABLED", true)?,
                settings_path: env_string("GLUCOSYNC_SETTINGS_PATH", DEFAULT_SETTINGS_PATH).into(),
                warmup_secs: env_or("GLUCOSYNC_SYNC_WARMUP", DEFAULT_SYNC_WARMUP_SECS)?,
                default_interval_secs: env_or("GLUCOSYNC_SYNC_INTERVAL", DEFAULT_SWEEP_INTERVAL_SECS)?,
                http_timeout_secs: env_or("GLUCOSYNC_SYNC_HTTP_TIMEOUT", DEFAULT_TIMEOUT_SECS)?,
                window_days: env_or("GLUCOSYNC_NIGHTSCOUT_WINDOW_DAYS", DEFAULT_WINDOW_DAYS)?,
                page_limit: env_or("GLUCOSYNC_NIGHTSCOUT_PAGE_LIMIT", DEFAULT_PAGE_LIMIT)?,
                min_year: env_or("GLUCOSYNC_NIGHTSCOUT_MIN_YEAR", DEFAULT_MIN_YEAR)?,
                lookback_secs: env_or("GLUCOSYNC_NIGHTSCOUT_LOOKBACK", DEFAULT_LOOKBACK_SECS)?,
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.import.max_workers == 0 {
            anyhow::bail!("Import max_workers must be greater than 0");
        }

        if self.import.batch_size == 0 {
            anyhow::bail!("Import batch_size must be greater than 0");
        }

        if self.sync.default_interval_secs == 0 {
            anyhow::bail!("Sync interval must be greater than 0");
        }

        if let Err(e) = self.sync.nightscout().validate() {
            anyhow::bail!("Invalid Nightscout settings: {}", e);
        }

        if self.sync.min_year >= chrono::Datelike::year(&chrono::Utc::now()) {
            tracing::warn!(
                "Nightscout min_year {} is not in the past - start discovery will always fail",
                self.sync.min_year
            );
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            },
            import: ImportConfig {
                max_workers: DEFAULT_MAX_WORKERS,
                batch_size: DEFAULT_BATCH_SIZE,
                upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
                max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            },
            sync: SyncConfig {
                enabled: true,
                settings_path: PathBuf::from(DEFAULT_SETTINGS_PATH),
                warmup_secs: DEFAULT_SYNC_WARMUP_SECS,
                default_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
                http_timeout_secs: DEFAULT_TIMEOUT_SECS,
                window_days: DEFAULT_WINDOW_DAYS,
                page_limit: DEFAULT_PAGE_LIMIT,
                min_year: DEFAULT_MIN_YEAR,
                lookback_secs: DEFAULT_LOOKBACK_SECS,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.import.max_workers, 2);
        assert_eq!(config.import.batch_size, 100_000);
    }

    #[test]
    fn test_nightscout_settings_carry_over() {
        let mut config = Config::default();
        config.sync.page_limit = 500;
        config.sync.window_days = 30;

        let ns = config.sync.nightscout();
        assert_eq!(ns.page_limit, 500);
        assert_eq!(ns.window, Duration::from_secs(30 * 86_400));
        assert_eq!(ns.min_year, 1980);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = Config::default();
        config.import.max_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unparsable_env_value_is_an_error() {
        std::env::set_var("GLUCOSYNC_TEST_ENV_WORKERS", "two");
        let err = env_or("GLUCOSYNC_TEST_ENV_WORKERS", 2usize).unwrap_err();
        assert!(err.to_string().contains("GLUCOSYNC_TEST_ENV_WORKERS"));

        std::env::set_var("GLUCOSYNC_TEST_ENV_WORKERS", " 4 ");
        assert_eq!(env_or("GLUCOSYNC_TEST_ENV_WORKERS", 2usize).unwrap(), 4);

        std::env::remove_var("GLUCOSYNC_TEST_ENV_WORKERS");
        assert_eq!(env_or("GLUCOSYNC_TEST_ENV_WORKERS", 2usize).unwrap(), 2);
    }
}
