// Error types shared across the analysis, sequencing, session and export layers.
//
// Estimator-level problems (empty signal, failed key detection, scoring failure)
// are deliberately absent: they degrade to 0.0 BPM, Unknown and +inf in place.

use std::path::PathBuf;

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::error;

use crate::session::TrackStatus;

/// Failure to turn a file into mono PCM at the analysis sample rate.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Failed to open audio file: {0}")]
    Open(#[from] std::io::Error),

    #[error("Failed to probe audio format: {0}")]
    Probe(String),

    #[error("No audio tracks found")]
    NoTrack,

    #[error("Failed to create decoder: {0}")]
    Codec(String),

    #[error("Error reading packet: {0}")]
    Packet(String),

    #[error("Resampling failed: {0}")]
    Resample(String),
}

/// Raised by the sequencer before any placement happens.
#[derive(Debug, Error, PartialEq)]
pub enum SequenceError {
    #[error("track {handle} is not analyzed (status: {status})")]
    PreconditionViolation { handle: String, status: TrackStatus },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid session")]
    NotFound,

    #[error("No supported audio files (.mp3, .wav, .flac, .aiff) found")]
    NoSupportedFiles,

    #[error("No tracks uploaded")]
    NoTracks,

    #[error("Session storage error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Analyze tracks first")]
    NotAnalyzed,

    #[error("Source file {0} not found")]
    MissingSource(PathBuf),

    #[error("ZIP file not found")]
    BundleNotFound(String),

    #[error(transparent)]
    Sequence(#[from] SequenceError),

    #[error("Export I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to write archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Error returned by HTTP handlers, rendered as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(message) = &self {
            error!("{}", message);
        }
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Io(_) => ApiError::Internal(e.to_string()),
            SessionError::NotFound | SessionError::NoSupportedFiles | SessionError::NoTracks => {
                ApiError::BadRequest(e.to_string())
            }
        }
    }
}

impl From<ExportError> for ApiError {
    fn from(e: ExportError) -> Self {
        match e {
            ExportError::NotAnalyzed | ExportError::Sequence(_) => {
                ApiError::BadRequest(e.to_string())
            }
            ExportError::BundleNotFound(_) => ApiError::NotFound(e.to_string()),
            ExportError::MissingSource(_) | ExportError::Io(_) | ExportError::Zip(_) => {
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::BadRequest(format!("Invalid upload: {}", e.body_text()))
    }
}
