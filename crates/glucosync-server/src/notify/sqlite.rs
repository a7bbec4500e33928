//! Notifications persisted in the server database

use async_trait::async_trait;
use glucosync_common::Result;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use super::{Notification, NotificationSink, Severity};
use crate::store::sqlite::store_err;

/// Sink that keeps the latest notification per key in SQLite and logs it
#[derive(Debug, Clone)]
pub struct SqliteNotifier {
    pool: SqlitePool,
}

impl SqliteNotifier {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Notifications currently visible for a target, newest first
    pub async fn list(&self, target_id: &str) -> Result<Vec<Notification>> {
        let rows = sqlx::query(
            r#"
            SELECT target_id, category, title, description, severity, persistent
            FROM notifications
            WHERE target_id = ?1
            ORDER BY created_at DESC, category ASC
            "#,
        )
        .bind(target_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter()
            .map(|row| {
                Ok(Notification {
                    target_id: row.try_get("target_id").map_err(store_err)?,
                    category: row.try_get("category").map_err(store_err)?,
                    title: row.try_get("title").map_err(store_err)?,
                    description: row.try_get("description").map_err(store_err)?,
                    severity: Severity::from(row.try_get::<String, _>("severity").map_err(store_err)?),
                    persistent: row.try_get("persistent").map_err(store_err)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl NotificationSink for SqliteNotifier {
    async fn notify(&self, n: Notification) -> Result<()> {
        tracing::debug!(
            target_id = %n.target_id,
            category = %n.category,
            severity = %n.severity,
            "{}",
            n.title
        );

        sqlx::query(
            r#"
            INSERT INTO notifications (target_id, category, title, description, severity, persistent, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))
            ON CONFLICT(target_id, category) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                severity = excluded.severity,
                persistent = excluded.persistent,
                created_at = excluded.created_at
            "#,
        )
        .bind(&n.target_id)
        .bind(&n.category)
        .bind(&n.title)
        .bind(&n.description)
        .bind(n.severity.as_str())
        .bind(n.persistent)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    async fn clear(&self, target_id: &str, category: &str) -> Result<()> {
        sqlx::query("DELETE FROM notifications WHERE target_id = ?1 AND category = ?2")
            .bind(target_id)
            .bind(category)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::SYNC_CATEGORY;
    use crate::store::sqlite::connect;

    #[tokio::test]
    async fn test_notify_replaces_and_clear_removes() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("n.db").display());
        let notifier = SqliteNotifier::new(connect(&url, 1).await.unwrap());

        notifier
            .notify(Notification::info("app", SYNC_CATEGORY, "first"))
            .await
            .unwrap();
        notifier
            .notify(Notification::failure("app", SYNC_CATEGORY, "second", &"bad url"))
            .await
            .unwrap();

        let listed = notifier.list("app").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "second");
        assert_eq!(listed[0].severity, Severity::Error);
        assert!(listed[0].persistent);

        notifier.clear("app", SYNC_CATEGORY).await.unwrap();
        assert!(notifier.list("app").await.unwrap().is_empty());
    }
}
