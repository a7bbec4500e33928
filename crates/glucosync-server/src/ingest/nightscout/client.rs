//! Nightscout `entries` endpoint as a stream source
//!
//! Nightscout has no real cursor pagination, so a window is fetched in one
//! request with a very large `count`. Entries come back newest first and
//! `count` is applied after sorting, so a response that fills the whole
//! page holds the newest records of the range. It is flagged as saturated
//! and the drain loop asks again for the part of the window at or before
//! the oldest entry it received.

use async_trait::async_trait;
use chrono::{Datelike, TimeZone, Utc};
use glucosync_common::types::secs_to_millis;
use glucosync_common::{GlucoError, Result, Sample, StreamKey};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::config::NightscoutConfig;
use crate::ingest::source::{Page, PageOrder, StreamSource, WindowPlan};

/// Raw entry as returned by `/api/v1/entries/*.json`
#[derive(Debug, Deserialize)]
struct Entry {
    /// Epoch milliseconds
    date: f64,
    #[serde(rename = "dateString")]
    date_string: Option<String>,
    #[serde(flatten)]
    fields: serde_json::Map<String, serde_json::Value>,
}

/// One Nightscout endpoint feeding one stream
#[derive(Debug, Clone)]
pub struct NightscoutSource {
    client: Client,
    endpoint: String,
    field: &'static str,
    stream: StreamKey,
    config: NightscoutConfig,
}

impl NightscoutSource {
    pub fn new(
        client: Client,
        endpoint: String,
        field: &'static str,
        stream: StreamKey,
        config: NightscoutConfig,
    ) -> Self {
        Self {
            client,
            endpoint,
            field,
            stream,
            config,
        }
    }

    async fn fetch(&self, params: &[(&str, String)]) -> Result<Vec<Entry>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(params)
            .send()
            .await
            .map_err(|e| GlucoError::remote(format!("{}: {}", self.endpoint, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GlucoError::remote(format!("{} returned HTTP {}", self.endpoint, status)));
        }

        response
            .json::<Vec<Entry>>()
            .await
            .map_err(|e| GlucoError::remote(format!("{}: invalid response body: {}", self.endpoint, e)))
    }
}

#[async_trait]
impl StreamSource for NightscoutSource {
    fn stream(&self) -> StreamKey {
        self.stream
    }

    fn describe(&self) -> String {
        self.endpoint.clone()
    }

    fn plan(&self) -> WindowPlan {
        WindowPlan::Yearly {
            width: self.config.window,
            lookback: self.config.lookback,
        }
    }

    fn page_order(&self) -> PageOrder {
        PageOrder::NewestFirst
    }

    /// Walk back one calendar year at a time until a year has no records
    /// on or before its January 1st.
    async fn discover_start(&self) -> Result<f64> {
        let mut year = Utc::now().year();

        while year > self.config.min_year {
            debug!(endpoint = %self.endpoint, year, "Checking Nightscout for data before year");

            let entries = self
                .fetch(&[
                    ("count", "1".to_string()),
                    ("find[dateString][$lte]", format!("{year}-01-01")),
                ])
                .await?;

            if entries.is_empty() {
                let start = Utc
                    .with_ymd_and_hms(year, 1, 1, 0, 0, 0)
                    .single()
                    .ok_or_else(|| GlucoError::Internal(format!("invalid probe year {year}")))?;
                info!(endpoint = %self.endpoint, year, "Nightscout data starts after {}", start);
                return Ok(start.timestamp() as f64);
            }

            year -= 1;
        }

        Err(GlucoError::HistoryExhausted {
            min_year: self.config.min_year,
        })
    }

    async fn extract(&self, after: f64, until: Option<f64>) -> Result<Page> {
        let mut params = vec![
            ("count", self.config.page_limit.to_string()),
            ("find[date][$gt]", secs_to_millis(after).to_string()),
        ];
        if let Some(until) = until {
            params.push(("find[date][$lte]", secs_to_millis(until).to_string()));
        }

        let mut entries = self.fetch(&params).await?;
        let received = entries.len();
        entries.sort_by(|a, b| a.date.total_cmp(&b.date));

        if let (Some(first), Some(last)) = (entries.first(), entries.last()) {
            debug!(
                endpoint = %self.endpoint,
                count = received,
                from = first.date_string.as_deref().unwrap_or("?"),
                to = last.date_string.as_deref().unwrap_or("?"),
                "Got Nightscout entries"
            );
        }

        let samples: Vec<Sample> = entries
            .iter()
            .filter_map(|entry| {
                let value = entry.fields.get(self.field).and_then(|v| v.as_f64());
                if value.is_none() {
                    debug!(endpoint = %self.endpoint, date = entry.date, "Entry without {} value skipped", self.field);
                }
                value.map(|v| Sample::numeric(entry.date / 1000.0, v))
            })
            .collect();

        let saturated = received >= self.config.page_limit;
        if saturated {
            warn!(
                endpoint = %self.endpoint,
                page_limit = self.config.page_limit,
                after,
                until = ?until,
                "Nightscout page reached the record cap, requesting the older part of the window"
            );
        }

        let oldest = entries.first().map(|entry| entry.date / 1000.0);
        Ok(Page::new(samples, saturated).with_oldest(oldest))
    }
}
