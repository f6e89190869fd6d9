//! HTTP routes
//!
//! Provides the landing page, the upload-and-convert endpoint, artifact
//! downloads and a health check.

use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use super::assets;
use super::converter::Converter;
use super::workspace::{classify_name, Layout, Workspace};

/// Success message of the upload endpoint
pub const UPLOAD_SUCCESS_MESSAGE: &str = "File processed successfully";

/// Error message for missing artifacts
pub const FILE_NOT_FOUND: &str = "File not found";

/// MIME type of `.xlsx` files
pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Application state shared across handlers
pub struct AppState {
    pub workspace: Workspace,
    pub converter: Converter,
    pub version: String,
    pub started_at: DateTime<Utc>,
    started: Instant,
}

impl AppState {
    pub fn new(workspace: Workspace, converter: Converter) -> Self {
        Self {
            workspace,
            converter,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

/// Build the router
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(index))
        .route("/upload", post(upload_file))
        .route("/upload/", post(upload_file))
        .route("/files/{filename}", get(get_file))
        .route("/files/{request_id}/{filename}", get(get_request_file))
        .route("/static/{*path}", get(static_file))
        .route("/health", get(health_check))
        .fallback(not_found)
}

async fn index() -> Result<Html<String>, AppError> {
    assets::index_page()
        .map(Html)
        .ok_or_else(|| AppError::Internal("Landing page missing".to_string()))
}

async fn static_file(Path(path): Path<String>) -> Result<Response, AppError> {
    let asset = assets::static_asset(&path)
        .ok_or_else(|| AppError::NotFound(FILE_NOT_FOUND.to_string()))?;
    Ok(([(header::CONTENT_TYPE, asset.mime)], asset.data.into_owned()).into_response())
}

async fn not_found() -> AppError {
    AppError::NotFound("Not found".to_string())
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub converter: ConverterStatus,
    pub work_dir: String,
    pub layout: Layout,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct ConverterStatus {
    pub program: String,
    pub found: bool,
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        converter: ConverterStatus {
            program: state.converter.config().program.clone(),
            found: state.converter.is_available(),
        },
        work_dir: state.workspace.root().display().to_string(),
        layout: state.workspace.layout(),
        started_at: state.started_at,
        uptime_seconds: state.uptime_seconds(),
    })
}

/// Upload response
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub output_file: String,
}

/// Persist an uploaded XML file, run the converter, return the download link
async fn upload_file(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    let mut custom_name: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("").to_string();
                let data = field.bytes().await?;
                upload = Some((filename, data.to_vec()));
            }
            "custom_name" => {
                custom_name = Some(field.text().await?);
            }
            _ => {}
        }
    }

    let (filename, data) =
        upload.ok_or_else(|| AppError::Unprocessable("No file uploaded".to_string()))?;
    if filename.is_empty() {
        return Err(AppError::Unprocessable(
            "Uploaded file has no filename".to_string(),
        ));
    }
    let custom_name = custom_name
        .ok_or_else(|| AppError::Unprocessable("Missing form field: custom_name".to_string()))?;

    for (field, value) in [("filename", &filename), ("custom_name", &custom_name)] {
        let kind = classify_name(value);
        if kind.is_suspicious() {
            tracing::warn!(field, value = %value, %kind, "suspicious name passed through unchanged");
        }
    }

    let paths = state.workspace.plan(&filename, &custom_name);
    tracing::info!(
        request_id = %paths.request_id,
        %filename,
        %custom_name,
        bytes = data.len(),
        "upload received"
    );

    // Held until the response is built so colliding names cannot interleave
    let _guard = state.workspace.lock(&paths).await;

    state
        .workspace
        .store_upload(&paths, &data)
        .await
        .map_err(|e| {
            tracing::error!(request_id = %paths.request_id, error = %e, "failed to save upload");
            AppError::Internal(format!("Failed to save upload: {}", e))
        })?;

    match state.converter.run(&paths).await {
        Ok(outcome) => {
            tracing::info!(
                request_id = %paths.request_id,
                output = %paths.output_name,
                size = ?outcome.output_size,
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                "conversion succeeded"
            );
            Ok(Json(UploadResponse {
                message: UPLOAD_SUCCESS_MESSAGE.to_string(),
                output_file: paths.download_url,
            }))
        }
        Err(e) => {
            tracing::warn!(request_id = %paths.request_id, error = %e, "conversion failed");
            Err(AppError::Internal(e.client_message()))
        }
    }
}

/// Download an artifact from the working directory root
async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<FileDownload, AppError> {
    let kind = classify_name(&filename);
    if kind.is_suspicious() {
        tracing::warn!(%filename, %kind, "suspicious download name passed through unchanged");
    }
    FileDownload::load(state.workspace.artifact_path(&filename), &filename).await
}

/// Download an artifact from a per-request directory
async fn get_request_file(
    State(state): State<Arc<AppState>>,
    Path((request_id, filename)): Path<(String, String)>,
) -> Result<FileDownload, AppError> {
    let request_id = Uuid::parse_str(&request_id)
        .map_err(|_| AppError::NotFound(FILE_NOT_FOUND.to_string()))?;
    FileDownload::load(
        state.workspace.request_artifact_path(request_id, &filename),
        &filename,
    )
    .await
}

/// File sent as a browser download
#[derive(Debug)]
pub struct FileDownload {
    data: Vec<u8>,
    filename: String,
}

impl FileDownload {
    /// Read `path`, or report 404 when it is not a regular file
    async fn load(path: PathBuf, requested: &str) -> Result<Self, AppError> {
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(AppError::NotFound(FILE_NOT_FOUND.to_string())),
        }

        let data = tokio::fs::read(&path).await.map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "failed to read artifact");
            AppError::Internal(format!("Failed to read file: {}", e))
        })?;

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(requested)
            .to_string();

        Ok(Self { data, filename })
    }
}

/// Content type by file extension
pub fn content_type_for(filename: &str) -> &'static str {
    let ext = filename.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("xlsx") => XLSX_MIME,
        Some("xml") => "application/xml",
        _ => "application/octet-stream",
    }
}

/// RFC 5987 `attr-char`: everything else is percent-encoded
const ATTR_CHAR_ESCAPES: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// `Content-Disposition` value for a download
///
/// Non-ASCII names get an ASCII `filename` fallback plus `filename*`.
pub fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();

    if fallback == filename {
        return format!("attachment; filename=\"{}\"", filename);
    }
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        utf8_percent_encode(filename, ATTR_CHAR_ESCAPES)
    )
}

impl IntoResponse for FileDownload {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type_for(&self.filename).to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    content_disposition(&self.filename),
                ),
            ],
            self.data,
        )
            .into_response()
    }
}

/// API error type
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    PayloadTooLarge(String),
    Unprocessable(String),
    Internal(String),
}

impl From<MultipartError> for AppError {
    fn from(e: MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(e.body_text())
        } else {
            AppError::BadRequest(e.body_text())
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
        }

        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            AppError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
