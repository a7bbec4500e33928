//! In-memory stream store

use async_trait::async_trait;
use glucosync_common::types::secs_to_millis;
use glucosync_common::{InsertMode, Result, Sample, StreamKey};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::StreamStore;

type StreamId = (String, StreamKey);

/// Stream store keeping everything in process memory.
///
/// Samples are keyed by millisecond timestamp, so two samples whose
/// timestamps round to the same millisecond collide.
#[derive(Debug, Default)]
pub struct MemoryStreamStore {
    streams: RwLock<HashMap<StreamId, BTreeMap<i64, Sample>>>,
    cursors: RwLock<HashMap<(String, StreamKey, String), f64>>,
}

impl MemoryStreamStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StreamStore for MemoryStreamStore {
    async fn last_sample(&self, target_id: &str, stream: StreamKey) -> Result<Option<Sample>> {
        let streams = self.streams.read().await;
        Ok(streams
            .get(&(target_id.to_string(), stream))
            .and_then(|samples| samples.values().next_back().cloned()))
    }

    async fn insert_batch(
        &self,
        target_id: &str,
        stream: StreamKey,
        samples: &[Sample],
        mode: InsertMode,
    ) -> Result<usize> {
        let mut streams = self.streams.write().await;
        let entries = streams.entry((target_id.to_string(), stream)).or_default();

        let mut written = 0;
        for sample in samples {
            let key = secs_to_millis(sample.t);
            match mode {
                InsertMode::Append if entries.contains_key(&key) => continue,
                _ => {
                    entries.insert(key, sample.clone());
                    written += 1;
                },
            }
        }

        Ok(written)
    }

    async fn get_cursor(
        &self,
        target_id: &str,
        stream: StreamKey,
        key: &str,
    ) -> Result<Option<f64>> {
        let cursors = self.cursors.read().await;
        Ok(cursors
            .get(&(target_id.to_string(), stream, key.to_string()))
            .copied())
    }

    async fn set_cursor(
        &self,
        target_id: &str,
        stream: StreamKey,
        key: &str,
        value: f64,
    ) -> Result<()> {
        let mut cursors = self.cursors.write().await;
        let slot = cursors
            .entry((target_id.to_string(), stream, key.to_string()))
            .or_insert(value);
        if value > *slot {
            *slot = value;
        }
        Ok(())
    }

    async fn samples(&self, target_id: &str, stream: StreamKey) -> Result<Vec<Sample>> {
        let streams = self.streams.read().await;
        Ok(streams
            .get(&(target_id.to_string(), stream))
            .map(|samples| samples.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_last_sample_is_max_timestamp() {
        let store = MemoryStreamStore::new();
        let batch: Vec<Sample> = (0..50).map(|i| Sample::numeric(i as f64 * 300.0, 100.0 + i as f64)).collect();

        store
            .insert_batch("app", StreamKey::Cgm, &batch[..25], InsertMode::Append)
            .await
            .unwrap();
        store
            .insert_batch("app", StreamKey::Cgm, &batch[25..], InsertMode::Append)
            .await
            .unwrap();

        let last = store.last_sample("app", StreamKey::Cgm).await.unwrap().unwrap();
        assert_eq!(last, batch[49]);
        assert!(store.last_sample("app", StreamKey::Events).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_append_keeps_existing_and_overwrite_replaces() {
        let store = MemoryStreamStore::new();
        store
            .insert_batch("app", StreamKey::Cgm, &[Sample::numeric(10.0, 100.0)], InsertMode::Append)
            .await
            .unwrap();

        let written = store
            .insert_batch("app", StreamKey::Cgm, &[Sample::numeric(10.0, 150.0)], InsertMode::Append)
            .await
            .unwrap();
        assert_eq!(written, 0);
        assert_eq!(store.samples("app", StreamKey::Cgm).await.unwrap(), vec![Sample::numeric(10.0, 100.0)]);

        store
            .insert_batch("app", StreamKey::Cgm, &[Sample::numeric(10.0, 150.0)], InsertMode::Overwrite)
            .await
            .unwrap();
        assert_eq!(store.samples("app", StreamKey::Cgm).await.unwrap(), vec![Sample::numeric(10.0, 150.0)]);
    }

    #[tokio::test]
    async fn test_cursor_never_regresses() {
        let store = MemoryStreamStore::new();
        store.set_cursor("app", StreamKey::Cgm, "k", 50.0).await.unwrap();
        store.set_cursor("app", StreamKey::Cgm, "k", 20.0).await.unwrap();
        assert_eq!(store.get_cursor("app", StreamKey::Cgm, "k").await.unwrap(), Some(50.0));
        assert_eq!(store.get_cursor("app", StreamKey::BloodTest, "k").await.unwrap(), None);
    }
}
