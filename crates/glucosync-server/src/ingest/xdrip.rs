//! xDrip+ database export adapter
//!
//! xDrip+ exports its SQLite database as a zip archive holding exactly one
//! `*.sqlite` file. The archive is unpacked into the job's scratch directory
//! and read with keyset batches (`timestamp > cursor ... LIMIT batch`), so
//! memory stays bounded however large the export is.
//!
//! | Stream       | Table        | Value                                  |
//! |--------------|--------------|----------------------------------------|
//! | `cgm`        | `BgReadings` | `AVG(calculated_value)` where `> 0`    |
//! | `blood_test` | `BloodTest`  | `AVG(mgdl)` where `> 0`                |
//! | `events`     | `Sensors`    | `started_at` as a `sensor_start` tag   |

use async_trait::async_trait;
use glucosync_common::types::{secs_to_millis, SENSOR_START_TAG};
use glucosync_common::{GlucoError, Result, Sample, SampleValue, StreamKey};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::import::ImportAdapter;
use super::source::{Page, StreamSource};

/// Rows fetched per query
pub const DEFAULT_BATCH_SIZE: usize = 100_000;

const CGM_QUERY: &str = r#"
    SELECT CAST(timestamp AS INTEGER) AS ts, CAST(AVG(calculated_value) AS REAL) AS value
    FROM BgReadings
    WHERE timestamp > ?1 AND calculated_value > 0
    GROUP BY timestamp
    ORDER BY timestamp ASC
    LIMIT ?2
"#;

const BLOOD_TEST_QUERY: &str = r#"
    SELECT CAST(timestamp AS INTEGER) AS ts, CAST(AVG(mgdl) AS REAL) AS value
    FROM BloodTest
    WHERE timestamp > ?1 AND mgdl > 0
    GROUP BY timestamp
    ORDER BY timestamp ASC
    LIMIT ?2
"#;

const SENSOR_START_QUERY: &str = r#"
    SELECT CAST(started_at AS INTEGER) AS ts
    FROM Sensors
    WHERE started_at > ?1
    GROUP BY started_at
    ORDER BY started_at ASC
    LIMIT ?2
"#;

#[derive(Debug, Clone)]
pub struct XdripAdapter {
    batch_size: usize,
}

impl Default for XdripAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl XdripAdapter {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }
}

/// Check the archive layout and unpack its single database into `scratch`.
fn unpack_export(upload: &Path, scratch: &Path) -> Result<PathBuf> {
    let file = File::open(upload)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| GlucoError::source_format(format!("upload is not a zip archive: {e}")))?;

    if archive.len() != 1 {
        return Err(GlucoError::source_format(
            "Zip file contains more than one file, an xdrip database export is expected.",
        ));
    }

    let mut entry = archive
        .by_index(0)
        .map_err(|e| GlucoError::source_format(format!("unreadable zip entry: {e}")))?;

    if entry.is_dir() || !entry.name().ends_with(".sqlite") {
        return Err(GlucoError::source_format(
            "Zip file does not contain an sqlite xdrip database export",
        ));
    }

    let file_name = entry
        .enclosed_name()
        .and_then(|p| p.file_name().map(|n| n.to_owned()))
        .ok_or_else(|| GlucoError::source_format(format!("unsafe entry name: {}", entry.name())))?;

    let db_path = scratch.join(file_name);
    let mut out = File::create(&db_path)?;
    std::io::copy(&mut entry, &mut out)?;

    Ok(db_path)
}

#[async_trait]
impl ImportAdapter for XdripAdapter {
    fn name(&self) -> &'static str {
        "xdrip"
    }

    async fn open(&self, upload: &Path, scratch: &Path) -> Result<Vec<Box<dyn StreamSource>>> {
        let (upload_owned, scratch_owned) = (upload.to_path_buf(), scratch.to_path_buf());
        let db_path = tokio::task::spawn_blocking(move || unpack_export(&upload_owned, &scratch_owned))
            .await
            .map_err(|e| GlucoError::Internal(format!("unpack task failed: {e}")))??;

        debug!(db = %db_path.display(), "Unpacked xdrip export");

        let options = SqliteConnectOptions::new().filename(&db_path).read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| GlucoError::source_format(format!("cannot open xdrip database: {e}")))?;

        let batch_size = self.batch_size;
        let source = |stream| -> Box<dyn StreamSource> {
            Box::new(XdripSource {
                pool: pool.clone(),
                stream,
                batch_size,
            })
        };

        Ok(vec![
            source(StreamKey::Cgm),
            source(StreamKey::BloodTest),
            source(StreamKey::Events),
        ])
    }
}

/// One table of an unpacked xDrip+ database
struct XdripSource {
    pool: SqlitePool,
    stream: StreamKey,
    batch_size: usize,
}

impl XdripSource {
    fn query(&self) -> &'static str {
        match self.stream {
            StreamKey::Cgm => CGM_QUERY,
            StreamKey::BloodTest => BLOOD_TEST_QUERY,
            StreamKey::Events => SENSOR_START_QUERY,
        }
    }
}

#[async_trait]
impl StreamSource for XdripSource {
    fn stream(&self) -> StreamKey {
        self.stream
    }

    fn describe(&self) -> String {
        format!("xdrip:{}", self.stream)
    }

    async fn extract(&self, after: f64, _until: Option<f64>) -> Result<Page> {
        let format_err = |e: sqlx::Error| {
            GlucoError::source_format(format!("reading {} from xdrip export: {e}", self.stream))
        };

        let rows = sqlx::query(self.query())
            .bind(secs_to_millis(after))
            .bind(self.batch_size as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(format_err)?;

        let mut samples = Vec::with_capacity(rows.len());
        for row in &rows {
            let ts: i64 = row.try_get("ts").map_err(format_err)?;
            let value = match self.stream {
                StreamKey::Events => SampleValue::Tag(SENSOR_START_TAG.to_string()),
                _ => SampleValue::Number(row.try_get::<f64, _>("value").map_err(format_err)?),
            };
            samples.push(Sample::from_millis(ts, value));
        }

        debug!(stream = %self.stream, rows = samples.len(), after, "Read xdrip batch");

        let saturated = samples.len() == self.batch_size;
        Ok(Page::new(samples, saturated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::source::drain_stream;
    use crate::store::{MemoryStreamStore, StreamStore};
    use glucosync_common::InsertMode;
    use sqlx::sqlite::SqliteJournalMode;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    async fn write_export_db(path: &Path) {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Delete);
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await.unwrap();

        for stmt in [
            "CREATE TABLE BgReadings (timestamp INTEGER, calculated_value REAL)",
            "CREATE TABLE BloodTest (timestamp INTEGER, mgdl REAL)",
            "CREATE TABLE Sensors (started_at INTEGER)",
            "INSERT INTO BgReadings VALUES (1000, 100), (1000, 110), (2000, 0), (3000, 120), (4000, 130)",
            "INSERT INTO BloodTest VALUES (1500, 95)",
            "INSERT INTO Sensors VALUES (500)",
        ] {
            sqlx::query(stmt).execute(&pool).await.unwrap();
        }
        pool.close().await;
    }

    fn zip_files(zip_path: &Path, files: &[(&str, &Path)]) {
        let mut writer = zip::ZipWriter::new(File::create(zip_path).unwrap());
        for (name, path) in files {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(&std::fs::read(path).unwrap()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[tokio::test]
    async fn test_reads_all_streams_in_batches() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("export.sqlite");
        write_export_db(&db).await;
        let upload = dir.path().join("upload.zip");
        zip_files(&upload, &[("export.sqlite", &db)]);
        let scratch = TempDir::new().unwrap();

        let sources = XdripAdapter::new(2).open(&upload, scratch.path()).await.unwrap();
        let store = MemoryStreamStore::new();
        for source in &sources {
            drain_stream(&store, source.as_ref(), "app", 0.0, InsertMode::Append, None)
                .await
                .unwrap();
        }

        assert_eq!(
            store.samples("app", StreamKey::Cgm).await.unwrap(),
            vec![
                Sample::numeric(1.0, 105.0),
                Sample::numeric(3.0, 120.0),
                Sample::numeric(4.0, 130.0),
            ]
        );
        assert_eq!(
            store.samples("app", StreamKey::BloodTest).await.unwrap(),
            vec![Sample::numeric(1.5, 95.0)]
        );
        assert_eq!(
            store.samples("app", StreamKey::Events).await.unwrap(),
            vec![Sample::tag(0.5, SENSOR_START_TAG)]
        );
    }

    #[tokio::test]
    async fn test_rejects_archives_with_extra_entries() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("export.sqlite");
        std::fs::write(&db, b"not really").unwrap();
        let upload = dir.path().join("upload.zip");
        zip_files(&upload, &[("export.sqlite", &db), ("readme.txt", &db)]);

        let err = XdripAdapter::default().open(&upload, dir.path()).await.err().unwrap();
        assert!(matches!(err, GlucoError::SourceFormat(msg) if msg.contains("more than one file")));
    }

    #[tokio::test]
    async fn test_rejects_non_sqlite_entry_and_non_zip() {
        let dir = TempDir::new().unwrap();
        let other = dir.path().join("notes.txt");
        std::fs::write(&other, b"hello").unwrap();
        let upload = dir.path().join("upload.zip");
        zip_files(&upload, &[("notes.txt", &other)]);

        let err = XdripAdapter::default().open(&upload, dir.path()).await.err().unwrap();
        assert!(matches!(err, GlucoError::SourceFormat(_)));

        let err = XdripAdapter::default().open(&other, dir.path()).await.err().unwrap();
        assert!(matches!(err, GlucoError::SourceFormat(_)));
    }
}
