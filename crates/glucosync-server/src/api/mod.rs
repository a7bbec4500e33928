//! HTTP surface
//!
//! - `POST /api/cgm/:target/upload` queue an export file for import
//! - `POST /api/cgm/:target/sync` trigger a sync run
//! - `GET  /api/cgm/:target/notifications` current notifications
//! - `GET  /health`

pub mod response;
pub mod routes;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use sqlx::SqlitePool;
use std::path::PathBuf;

use crate::ingest::{ImportPipeline, SyncEngine};
use crate::middleware;
use crate::notify::SqliteNotifier;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub pipeline: ImportPipeline,
    pub engine: SyncEngine,
    pub notifications: SqliteNotifier,
    /// Where uploads are streamed before they are queued
    pub upload_dir: PathBuf,
}

/// Create the application router with all routes and middleware
pub fn create_router(state: AppState, max_upload_bytes: usize) -> Router {
    let cgm = Router::new()
        .route(
            "/:target/upload",
            post(routes::upload).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/:target/sync", post(routes::sync))
        .route("/:target/notifications", get(routes::notifications));

    Router::new()
        .route("/health", get(routes::health_check))
        .nest("/api/cgm", cgm)
        .with_state(state)
        .layer(middleware::tracing_layer())
}
