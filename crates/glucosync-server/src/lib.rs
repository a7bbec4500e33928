//! Glucosync server library
//!
//! Ingests CGM readings into per-target time series from uploaded export
//! files ([`ingest::ImportPipeline`]) and from remote services polled on a
//! schedule ([`ingest::SyncEngine`], [`ingest::SyncScheduler`]).
//!
//! Storage, notification delivery and per-target settings are collaborators
//! behind the [`store::StreamStore`], [`notify::NotificationSink`] and
//! [`settings::SettingsProvider`] traits.

pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod middleware;
pub mod notify;
pub mod settings;
pub mod store;

pub use config::Config;
pub use error::{ApiResult, AppError};
