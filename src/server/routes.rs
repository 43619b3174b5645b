// Route table and handlers.
// Responses only ever carry display names and bundle names, never scratch paths.

use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use super::AppState;
use crate::error::{ApiError, SessionError};
use crate::playlist::export::{export_bundle, take_bundle};
use crate::session::analysis::{analyze_session, TrackReport};
use crate::session::upload;
use crate::session::{Session, SessionId};

/// Multipart field that carries the uploaded files
pub const UPLOAD_FIELD: &str = "folder";

#[derive(Debug, Serialize)]
pub struct SessionCreated {
    pub session_id: SessionId,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub tracks: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub results: Vec<TrackReport>,
}

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub message: String,
    pub zip_file: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(create_session))
        .route("/upload/{session_id}", post(upload_tracks))
        .route("/analyze/{session_id}", get(analyze))
        .route("/export/{session_id}", post(export))
        .route("/download/{zip_file}", get(download))
        .route("/cleanup/{session_id}", post(cleanup))
}

/// Lock the session for the rest of the request and mark it as in use.
async fn open_session(state: &AppState, id: &str) -> Result<OwnedMutexGuard<Session>, ApiError> {
    let handle = state
        .sessions
        .get(&SessionId::from(id))
        .ok_or(SessionError::NotFound)?;
    let mut session = handle.lock_owned().await;
    session.touch();
    Ok(session)
}

async fn create_session(State(state): State<AppState>) -> Result<Json<SessionCreated>, ApiError> {
    let handle = state.sessions.create()?;
    let session_id = handle.lock().await.id().clone();
    info!(session = %session_id, "New session");
    Ok(Json(SessionCreated { session_id }))
}

/// Replace the session's batch with the supported files of this upload.
async fn upload_tracks(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut session = open_session(&state, &session_id).await?;
    session.clear_tracks().map_err(SessionError::from)?;

    let mut saw_field = false;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        saw_field = true;

        let Some(name) = field.file_name().and_then(upload::accept) else {
            debug!("Skipping upload {:?}", field.file_name());
            continue;
        };
        let bytes = field.bytes().await?;
        session.add_track(name, &bytes).await.map_err(SessionError::from)?;
    }

    if !saw_field {
        return Err(ApiError::BadRequest("No folder uploaded".to_string()));
    }
    if session.tracks().is_empty() {
        return Err(SessionError::NoSupportedFiles.into());
    }

    let tracks: Vec<String> = session
        .tracks()
        .iter()
        .map(|t| t.display_name.clone())
        .collect();
    info!(session = %session.id(), count = tracks.len(), "Upload accepted");
    Ok(Json(UploadResponse {
        message: format!("Uploaded {} valid audio files", tracks.len()),
        tracks,
    }))
}

async fn analyze(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let mut session = open_session(&state, &session_id).await?;
    let results = analyze_session(&mut session, state.analysis.clone()).await?;
    Ok(Json(AnalyzeResponse { results }))
}

async fn export(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ExportResponse>, ApiError> {
    let session = open_session(&state, &session_id).await?;
    let scorer = state.scorer.clone();
    let export_dir = state.config.storage.export_dir.clone();
    // Copying audio into the archive is blocking file IO
    let bundle = tokio::task::spawn_blocking(move || export_bundle(&session, &scorer, &export_dir))
        .await
        .map_err(|e| ApiError::Internal(format!("Export failed: {}", e)))??;
    Ok(Json(ExportResponse {
        message: "Playlist exported as ZIP".to_string(),
        zip_file: bundle.file_name,
    }))
}

async fn download(
    State(state): State<AppState>,
    Path(zip_file): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let export_dir = state.config.storage.export_dir.clone();
    let name = zip_file.clone();
    let bytes = tokio::task::spawn_blocking(move || take_bundle(&export_dir, &name))
        .await
        .map_err(|e| ApiError::Internal(format!("Download failed: {}", e)))??;

    debug!(bundle = %zip_file, size = bytes.len(), "Sending bundle");
    let disposition = format!("attachment; filename=\"{}\"", zip_file);
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}

/// Forget the session and release its scratch storage. Unknown ids are fine.
async fn cleanup(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<MessageResponse> {
    if state.sessions.delete(&SessionId::from(session_id.as_str())).is_some() {
        info!(session = %session_id, "Session cleaned up");
    }
    Json(MessageResponse {
        message: "Session cleaned up".to_string(),
    })
}
