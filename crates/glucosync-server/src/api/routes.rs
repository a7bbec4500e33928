//! Route handlers

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::response::ApiResponse;
use super::AppState;
use crate::error::{ApiResult, AppError};
use crate::ingest::{ImportRequest, SyncTrigger, TempUpload};
use crate::notify::Notification;

const DEFAULT_DATA_TYPE: &str = "xdrip";

#[derive(Debug, Serialize)]
pub struct UploadAccepted {
    pub job_id: Uuid,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct SyncStatus {
    pub status: &'static str,
}

/// Accept a multipart upload with fields `data_type`, `overwrite` and `data`.
///
/// The file is streamed to the upload directory and queued. Any rejection
/// after the file was written drops its guard, which deletes it.
#[tracing::instrument(skip(state, multipart), fields(target = %target))]
pub async fn upload(
    State(state): State<AppState>,
    Path(target): Path<String>,
    mut multipart: Multipart,
) -> ApiResult<Response> {
    let mut data_type = DEFAULT_DATA_TYPE.to_string();
    let mut overwrite = false;
    let mut upload: Option<(TempUpload, String)> = None;

    while let Some(mut field) = multipart.next_field().await? {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "data_type" => {
                let value = field.text().await?;
                if !state.pipeline.adapters().contains(&value) {
                    return Err(AppError::BadRequest("Unknown upload type".to_string()));
                }
                data_type = value;
            },
            "overwrite" => {
                overwrite = match field.text().await?.as_str() {
                    "true" => true,
                    "false" => false,
                    _ => return Err(AppError::BadRequest("Overwrite was not a boolean".to_string())),
                };
            },
            "data" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let extension = std::path::Path::new(&filename)
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| format!(".{e}"))
                    .unwrap_or_default();
                let path = state.upload_dir.join(format!("{}{}", Uuid::new_v4(), extension));

                // Guard first, so a failed write still removes the partial file.
                let guard = TempUpload::new(&path);
                let mut file = tokio::fs::File::create(&path).await?;
                while let Some(chunk) = field.chunk().await? {
                    file.write_all(&chunk).await?;
                }
                file.flush().await?;

                tracing::debug!(path = %path.display(), filename = %filename, "Upload written");
                upload = Some((guard, filename));
            },
            other => {
                return Err(AppError::BadRequest(format!("Unrecognized field: {other}")));
            },
        }
    }

    let (guard, filename) =
        upload.ok_or_else(|| AppError::BadRequest("No file was uploaded".to_string()))?;

    let request = ImportRequest::new(&target, data_type, guard, filename).with_overwrite(overwrite);
    let job_id = state.pipeline.submit(request).await?;

    tracing::info!(job_id = %job_id, "Upload queued for import");

    Ok(ApiResponse::success(UploadAccepted {
        job_id,
        status: "queued",
    })
    .with_status(StatusCode::ACCEPTED))
}

/// Trigger a sync run; a run already in flight makes this a no-op
#[tracing::instrument(skip(state))]
pub async fn sync(State(state): State<AppState>, Path(target): Path<String>) -> ApiResult<Response> {
    let status = match state.engine.trigger_sync(&target).await {
        SyncTrigger::Started(_) => "started",
        SyncTrigger::AlreadyRunning => "already_running",
    };

    Ok(ApiResponse::success(SyncStatus { status }).with_status(StatusCode::ACCEPTED))
}

pub async fn notifications(
    State(state): State<AppState>,
    Path(target): Path<String>,
) -> ApiResult<ApiResponse<Vec<Notification>>> {
    let list = state.notifications.list(&target).await?;
    Ok(ApiResponse::success(list))
}

/// Health check handler
pub async fn health_check(State(state): State<AppState>) -> Result<Response, StatusCode> {
    match sqlx::query("SELECT 1").fetch_one(&state.db).await {
        Ok(_) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected",
                "import_workers": state.pipeline.active_workers(),
                "import_queued": state.pipeline.queued().await,
            })),
        )
            .into_response()),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        },
    }
}
