// Nightscout sync configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One year, the default width of a history window
pub const DEFAULT_WINDOW_DAYS: u64 = 365;
/// Records requested per page. A year of five-minute readings is ~105k
/// entries and of one-minute readings ~525k, so a full page is a warning sign.
pub const DEFAULT_PAGE_LIMIT: usize = 1_000_000;
/// Oldest year the start probe will accept
pub const DEFAULT_MIN_YEAR: i32 = 1980;
/// How far before the cursor each run starts looking again
pub const DEFAULT_LOOKBACK_SECS: u64 = 86_400;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Configuration shared by every Nightscout service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NightscoutConfig {
    /// Width of each bounded history window
    pub window: Duration,

    /// Re-fetch margin before the stored cursor
    pub lookback: Duration,

    /// `count` sent with every window request
    pub page_limit: usize,

    /// Start discovery fails once the probe passes this year
    pub min_year: i32,

    /// HTTP timeout in seconds
    pub timeout_secs: u64,
}

impl Default for NightscoutConfig {
    fn default() -> Self {
        NightscoutConfig {
            window: Duration::from_secs(DEFAULT_WINDOW_DAYS * 86_400),
            lookback: Duration::from_secs(DEFAULT_LOOKBACK_SECS),
            page_limit: DEFAULT_PAGE_LIMIT,
            min_year: DEFAULT_MIN_YEAR,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl NightscoutConfig {
    pub fn builder() -> NightscoutConfigBuilder {
        NightscoutConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.window.is_zero() {
            return Err("Window width must be greater than 0".to_string());
        }

        if self.page_limit == 0 {
            return Err("Page limit must be greater than 0".to_string());
        }

        if self.timeout_secs == 0 {
            return Err("Timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct NightscoutConfigBuilder {
    window: Option<Duration>,
    lookback: Option<Duration>,
    page_limit: Option<usize>,
    min_year: Option<i32>,
    timeout_secs: Option<u64>,
}

impl NightscoutConfigBuilder {
    pub fn window(mut self, window: Duration) -> Self {
        self.window = Some(window);
        self
    }

    pub fn lookback(mut self, lookback: Duration) -> Self {
        self.lookback = Some(lookback);
        self
    }

    pub fn page_limit(mut self, limit: usize) -> Self {
        self.page_limit = Some(limit);
        self
    }

    pub fn min_year(mut self, year: i32) -> Self {
        self.min_year = Some(year);
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn build(self) -> NightscoutConfig {
        let default = NightscoutConfig::default();

        NightscoutConfig {
            window: self.window.unwrap_or(default.window),
            lookback: self.lookback.unwrap_or(default.lookback),
            page_limit: self.page_limit.unwrap_or(default.page_limit),
            min_year: self.min_year.unwrap_or(default.min_year),
            timeout_secs: self.timeout_secs.unwrap_or(default.timeout_secs),
        }
    }
}
