//! SQLite-backed stream store

use async_trait::async_trait;
use glucosync_common::types::secs_to_millis;
use glucosync_common::{GlucoError, InsertMode, Result, Sample, SampleValue, StreamKey};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

use super::StreamStore;

/// Open (creating if needed) the server database and apply migrations.
pub async fn connect(url: &str, max_connections: u32) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .map_err(|e| GlucoError::config(format!("invalid database url '{url}': {e}")))?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .map_err(store_err)?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| GlucoError::store(format!("migration failed: {e}")))?;

    Ok(pool)
}

pub(crate) fn store_err(err: sqlx::Error) -> GlucoError {
    GlucoError::store(err.to_string())
}

/// Stream store persisting samples and cursors in SQLite
#[derive(Debug, Clone)]
pub struct SqliteStreamStore {
    pool: SqlitePool,
}

impl SqliteStreamStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_sample(row: &SqliteRow) -> Result<Sample> {
        let t: f64 = row.try_get("t").map_err(store_err)?;
        let value_num: Option<f64> = row.try_get("value_num").map_err(store_err)?;
        let value_tag: Option<String> = row.try_get("value_tag").map_err(store_err)?;

        let value = match (value_num, value_tag) {
            (Some(n), _) => SampleValue::Number(n),
            (None, Some(tag)) => SampleValue::Tag(tag),
            (None, None) => {
                return Err(GlucoError::store(format!("sample at {t} has no value")));
            },
        };

        Ok(Sample::new(t, value))
    }
}

#[async_trait]
impl StreamStore for SqliteStreamStore {
    async fn last_sample(&self, target_id: &str, stream: StreamKey) -> Result<Option<Sample>> {
        let row = sqlx::query(
            r#"
            SELECT t, value_num, value_tag FROM samples
            WHERE target_id = ?1 AND stream = ?2
            ORDER BY t_ms DESC
            LIMIT 1
            "#,
        )
        .bind(target_id)
        .bind(stream.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.as_ref().map(Self::row_to_sample).transpose()
    }

    async fn insert_batch(
        &self,
        target_id: &str,
        stream: StreamKey,
        samples: &[Sample],
        mode: InsertMode,
    ) -> Result<usize> {
        let statement = match mode {
            InsertMode::Append => {
                r#"
                INSERT INTO samples (target_id, stream, t_ms, t, value_num, value_tag)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(target_id, stream, t_ms) DO NOTHING
                "#
            },
            InsertMode::Overwrite => {
                r#"
                INSERT INTO samples (target_id, stream, t_ms, t, value_num, value_tag)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(target_id, stream, t_ms) DO UPDATE SET
                    t = excluded.t,
                    value_num = excluded.value_num,
                    value_tag = excluded.value_tag
                "#
            },
        };

        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let mut written = 0usize;

        for sample in samples {
            let result = sqlx::query(statement)
                .bind(target_id)
                .bind(stream.as_str())
                .bind(secs_to_millis(sample.t))
                .bind(sample.t)
                .bind(sample.value.as_number())
                .bind(sample.value.as_tag())
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            written += result.rows_affected() as usize;
        }

        tx.commit().await.map_err(store_err)?;

        Ok(written)
    }

    async fn get_cursor(
        &self,
        target_id: &str,
        stream: StreamKey,
        key: &str,
    ) -> Result<Option<f64>> {
        let row = sqlx::query(
            r#"
            SELECT value FROM stream_meta
            WHERE target_id = ?1 AND stream = ?2 AND key = ?3
            "#,
        )
        .bind(target_id)
        .bind(stream.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(|r| r.try_get::<f64, _>("value").map_err(store_err))
            .transpose()
    }

    async fn set_cursor(
        &self,
        target_id: &str,
        stream: StreamKey,
        key: &str,
        value: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stream_meta (target_id, stream, key, value, updated_at)
            VALUES (?1, ?2, ?3, ?4, datetime('now'))
            ON CONFLICT(target_id, stream, key) DO UPDATE SET
                value = MAX(stream_meta.value, excluded.value),
                updated_at = datetime('now')
            "#,
        )
        .bind(target_id)
        .bind(stream.as_str())
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    async fn samples(&self, target_id: &str, stream: StreamKey) -> Result<Vec<Sample>> {
        let rows = sqlx::query(
            r#"
            SELECT t, value_num, value_tag FROM samples
            WHERE target_id = ?1 AND stream = ?2
            ORDER BY t_ms ASC
            "#,
        )
        .bind(target_id)
        .bind(stream.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter().map(Self::row_to_sample).collect()
    }
}
