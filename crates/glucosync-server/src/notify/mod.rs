//! User-facing notifications
//!
//! Notifications are keyed by `(target_id, category)`: posting again under
//! the same key replaces the previous one, and [`NotificationSink::clear`]
//! removes it. Persistent notifications stay until cleared or replaced.

pub mod sqlite;

use async_trait::async_trait;
use glucosync_common::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::Mutex;

pub use sqlite::SqliteNotifier;

/// Terminal import results (success or failure) for a target
pub const IMPORTER_CATEGORY: &str = "importer";
/// Transient import progress (queued, importing)
pub const IMPORTER_STATUS_CATEGORY: &str = "importer.status";
/// Sync failures, cleared by the next successful run
pub const SYNC_CATEGORY: &str = "syncer";
/// Transient "syncing" notice
pub const SYNC_STATUS_CATEGORY: &str = "syncer.status";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Error => "error",
        }
    }
}

impl From<String> for Severity {
    fn from(s: String) -> Self {
        match s.as_str() {
            "success" => Severity::Success,
            "error" => Severity::Error,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub target_id: String,
    pub category: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub persistent: bool,
}

impl Notification {
    pub fn new(
        target_id: impl Into<String>,
        category: impl Into<String>,
        title: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            category: category.into(),
            title: title.into(),
            description: String::new(),
            severity,
            persistent: false,
        }
    }

    pub fn info(target_id: impl Into<String>, category: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(target_id, category, title, Severity::Info)
    }

    pub fn success(target_id: impl Into<String>, category: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(target_id, category, title, Severity::Success).persistent()
    }

    /// Persistent error carrying the error text in a fenced block
    pub fn failure(
        target_id: impl Into<String>,
        category: impl Into<String>,
        title: impl Into<String>,
        error: &dyn fmt::Display,
    ) -> Self {
        Self::new(target_id, category, title, Severity::Error)
            .with_description(format!("```\n{error}\n```"))
            .persistent()
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }
}

/// Delivery of lifecycle notifications to the user
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;

    async fn clear(&self, target_id: &str, category: &str) -> Result<()>;
}

/// What happened to a recorded notification key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyEvent {
    Posted(Notification),
    Cleared { target_id: String, category: String },
}

/// Sink keeping every event in memory, in order
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotifyEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<NotifyEvent> {
        self.events.lock().await.clone()
    }

    /// Every notification posted for a target under a category
    pub async fn posted(&self, target_id: &str, category: &str) -> Vec<Notification> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|event| match event {
                NotifyEvent::Posted(n) if n.target_id == target_id && n.category == category => {
                    Some(n.clone())
                },
                _ => None,
            })
            .collect()
    }

    /// The notification a user would currently see under a key
    pub async fn current(&self, target_id: &str, category: &str) -> Option<Notification> {
        let events = self.events.lock().await;
        let mut current = None;
        for event in events.iter() {
            match event {
                NotifyEvent::Posted(n) if n.target_id == target_id && n.category == category => {
                    current = Some(n.clone());
                },
                NotifyEvent::Cleared { target_id: t, category: c }
                    if t == target_id && c == category =>
                {
                    current = None;
                },
                _ => {},
            }
        }
        current
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        self.events.lock().await.push(NotifyEvent::Posted(notification));
        Ok(())
    }

    async fn clear(&self, target_id: &str, category: &str) -> Result<()> {
        self.events.lock().await.push(NotifyEvent::Cleared {
            target_id: target_id.to_string(),
            category: category.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_wraps_error_text() {
        let n = Notification::failure("app", SYNC_CATEGORY, "CGM: Sync Failed", &"boom");
        assert_eq!(n.description, "```\nboom\n```");
        assert_eq!(n.severity, Severity::Error);
        assert!(n.persistent);
    }

    #[tokio::test]
    async fn test_recording_current_respects_clear() {
        let sink = RecordingNotifier::new();
        sink.notify(Notification::info("app", SYNC_CATEGORY, "one")).await.unwrap();
        assert_eq!(sink.current("app", SYNC_CATEGORY).await.unwrap().title, "one");

        sink.clear("app", SYNC_CATEGORY).await.unwrap();
        assert!(sink.current("app", SYNC_CATEGORY).await.is_none());
        assert_eq!(sink.posted("app", SYNC_CATEGORY).await.len(), 1);
    }
}
