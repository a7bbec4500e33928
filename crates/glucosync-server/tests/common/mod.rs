//! Shared helpers for integration tests
#![allow(dead_code)]

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;

use glucosync_server::store::sqlite::connect;

/// Rows of a synthetic xDrip+ export, timestamps in milliseconds
#[derive(Debug, Default, Clone)]
pub struct XdripExport {
    pub bg_readings: Vec<(i64, f64)>,
    pub blood_tests: Vec<(i64, f64)>,
    pub sensor_starts: Vec<i64>,
}

impl XdripExport {
    /// Write the export as `<dir>/<name>.zip` holding `export.sqlite`
    pub async fn write_zip(&self, dir: &Path, name: &str) -> PathBuf {
        let db_path = dir.join(format!("{name}.sqlite"));
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Delete);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();

        sqlx::query("CREATE TABLE BgReadings (_id INTEGER PRIMARY KEY, timestamp INTEGER, calculated_value REAL)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("CREATE TABLE BloodTest (_id INTEGER PRIMARY KEY, timestamp INTEGER, mgdl REAL)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("CREATE TABLE Sensors (_id INTEGER PRIMARY KEY, started_at INTEGER, stopped_at INTEGER)")
            .execute(&pool)
            .await
            .unwrap();

        for (ts, value) in &self.bg_readings {
            sqlx::query("INSERT INTO BgReadings (timestamp, calculated_value) VALUES (?1, ?2)")
                .bind(ts)
                .bind(value)
                .execute(&pool)
                .await
                .unwrap();
        }
        for (ts, value) in &self.blood_tests {
            sqlx::query("INSERT INTO BloodTest (timestamp, mgdl) VALUES (?1, ?2)")
                .bind(ts)
                .bind(value)
                .execute(&pool)
                .await
                .unwrap();
        }
        for ts in &self.sensor_starts {
            sqlx::query("INSERT INTO Sensors (started_at) VALUES (?1)")
                .bind(ts)
                .execute(&pool)
                .await
                .unwrap();
        }
        pool.close().await;

        let zip_path = dir.join(format!("{name}.zip"));
        let mut writer = zip::ZipWriter::new(File::create(&zip_path).unwrap());
        writer.start_file("export.sqlite", SimpleFileOptions::default()).unwrap();
        writer.write_all(&std::fs::read(&db_path).unwrap()).unwrap();
        writer.finish().unwrap();
        std::fs::remove_file(&db_path).unwrap();

        zip_path
    }
}

/// Server database in a temp directory, migrations applied
pub async fn server_db(dir: &Path) -> SqlitePool {
    let url = format!("sqlite://{}", dir.join("glucosync.db").display());
    connect(&url, 4).await.unwrap()
}

/// Copy a file into `dir` under a fresh name, as the upload handler would
pub fn stage_upload(src: &Path, dir: &Path) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let dest = dir.join(format!("{}.zip", uuid::Uuid::new_v4()));
    std::fs::copy(src, &dest).unwrap();
    dest
}

pub fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}
