// Nightscout sync service
//
// Pulls sensor glucose (`entries/sgv.json`, field `sgv`) into the `cgm`
// stream and manual blood glucose (`entries/mbg.json`, field `mbg`) into
// `blood_test`. Each endpoint keeps its own cursor, keyed by its URL, so
// pointing a target at a different Nightscout site starts a fresh history.
//
// Service parameters:
// - `url`: site root, e.g. `https://ns.example.com/`
// - `api_key`: sent as the `API-SECRET` header (optional for open sites)

pub mod client;
pub mod config;

use glucosync_common::{GlucoError, Result, StreamKey};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use std::time::Duration;

use crate::ingest::sync::{SyncService, SyncStream};
use crate::settings::ServiceConfig;

pub use client::NightscoutSource;
pub use config::NightscoutConfig;

pub const SERVICE_TYPE: &str = "nightscout";

/// Endpoint path, entry field and destination stream
const ENDPOINTS: [(&str, &str, StreamKey); 2] = [
    ("entries/sgv.json", "sgv", StreamKey::Cgm),
    ("entries/mbg.json", "mbg", StreamKey::BloodTest),
];

/// Cursor key under which an endpoint's sync position is stored
pub fn cursor_key(endpoint: &str) -> String {
    format!("nightscout_sync_time.{endpoint}")
}

/// `https://host/` -> `https://host/api/v1`
pub fn api_base(url: &str) -> String {
    format!("{}/api/v1", url.trim_end_matches('/'))
}

#[derive(Debug, Clone, Default)]
pub struct NightscoutService {
    config: NightscoutConfig,
}

impl NightscoutService {
    pub fn new(config: NightscoutConfig) -> Self {
        Self { config }
    }

    fn client(&self, api_key: Option<&str>) -> Result<Client> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(key)
                .map_err(|_| GlucoError::config("nightscout api_key is not a valid header value"))?;
            headers.insert("API-SECRET", value);
        }

        Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .user_agent(concat!("glucosync/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(|e| GlucoError::remote(format!("cannot build HTTP client: {e}")))
    }
}

impl SyncService for NightscoutService {
    fn service_type(&self) -> &'static str {
        SERVICE_TYPE
    }

    fn streams(&self, service: &ServiceConfig) -> Result<Vec<SyncStream>> {
        let base = api_base(service.require("url")?);
        let client = self.client(service.param("api_key"))?;

        Ok(ENDPOINTS
            .iter()
            .map(|&(path, field, stream)| {
                let endpoint = format!("{base}/{path}");
                SyncStream {
                    cursor_key: cursor_key(&endpoint),
                    source: Box::new(NightscoutSource::new(
                        client.clone(),
                        endpoint,
                        field,
                        stream,
                        self.config.clone(),
                    )),
                }
            })
            .collect())
    }
}
