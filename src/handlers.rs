use std::path::{Path as FsPath, PathBuf};

use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::cache::CachedContent;
use crate::error::FileServerError;
use crate::paths;

/// Content type of zipped directories, and of uploads that should be unpacked
pub const ZIP_CONTENT_TYPE: &str = "application/zip";
/// Content type of plain file downloads
pub const RAW_CONTENT_TYPE: &str = "raw";

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub root: String,
}

// ============================================================================
// Helper functions
// ============================================================================

fn content_response(content: CachedContent) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, content.content_type)],
        content.body,
    )
        .into_response()
}

/// True when the header names a zip payload, ignoring parameters and case.
fn is_zip_upload(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|essence| essence.trim().eq_ignore_ascii_case(ZIP_CONTENT_TYPE))
        .unwrap_or(false)
}

/// Cache key for `path`: its canonical form, so every alias of a file shares
/// one entry. Falls back to `path` when it cannot be canonicalized.
async fn cache_key(path: &FsPath) -> PathBuf {
    fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf())
}

async fn read_entry_names(path: &FsPath) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

/// Create missing parents, then create or truncate `path` and write `data`.
async fn write_raw_file(path: &FsPath, data: &[u8]) -> Result<(), FileServerError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .await
            .map_err(|source| FileServerError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
    }

    let mut file = fs::File::create(path)
        .await
        .map_err(|source| FileServerError::OpenFile {
            path: path.to_path_buf(),
            source,
        })?;

    let write = async {
        file.write_all(data).await?;
        file.flush().await
    };
    write.await.map_err(|source| FileServerError::WriteFile {
        path: path.to_path_buf(),
        source,
    })
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health - Health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        root: state.root_dir.display().to_string(),
    })
}

/// GET /entries - List the root directory
pub async fn list_root_entries(State(state): State<AppState>) -> Result<String, FileServerError> {
    entries(state, String::new()).await
}

/// GET /entries/{*path} - List the names in a directory, comma separated
///
/// Names come back in the order the filesystem enumerates them.
pub async fn list_entries(
    State(state): State<AppState>,
    Path(request_path): Path<String>,
) -> Result<String, FileServerError> {
    entries(state, request_path).await
}

async fn entries(state: AppState, request_path: String) -> Result<String, FileServerError> {
    let path = paths::resolve(&state.root_dir, &request_path)?;
    debug!(addr = %request_path, full_path = %path.display(), "Received entries request");

    let names = match read_entry_names(&path).await {
        Ok(names) => names,
        Err(source) => {
            warn!(error = %source, dir_path = %path.display(), "Failed to get entries in directory");
            return Err(FileServerError::ReadDir { path, source });
        }
    };

    let body = names.join(",");
    info!(entries = %body, dir_path = %path.display(), "Successfully processed entries request");
    Ok(body)
}

/// GET /content - Root directory as zip
pub async fn get_root_content(State(state): State<AppState>) -> Result<Response, FileServerError> {
    content(state, String::new()).await
}

/// GET /content/{*path} - File bytes, or a directory packed as zip
///
/// With caching enabled a previous response for the same resolved path is
/// returned as-is, with the content type it was first served with.
pub async fn get_content(
    State(state): State<AppState>,
    Path(request_path): Path<String>,
) -> Result<Response, FileServerError> {
    content(state, request_path).await
}

async fn content(state: AppState, request_path: String) -> Result<Response, FileServerError> {
    let path = paths::resolve(&state.root_dir, &request_path)?;
    debug!(addr = %request_path, full_path = %path.display(), "Received get file request");

    let generation = state.cache.generation();
    let key = cache_key(&path).await;

    if state.config.cache_enabled() {
        if let Some(cached) = state.cache.get(&key) {
            info!(
                path = %path.display(),
                content_type = cached.content_type,
                "Returned cached data"
            );
            return Ok(content_response(cached));
        }
    }

    let metadata = match fs::metadata(&path).await {
        Ok(metadata) => metadata,
        Err(source) => {
            warn!(error = %source, path = %path.display(), "Failed to read file data");
            return Err(FileServerError::Stat { path, source });
        }
    };

    let content = if metadata.is_dir() {
        if !state.config.dirs_enabled() {
            warn!(path = %path.display(), "Refusing to return directory, directories are disabled");
            return Err(FileServerError::DirectoriesDisabled(path));
        }

        let codec = state.codec.clone();
        let dir = path.clone();
        let zipped = tokio::task::spawn_blocking(move || codec.zip_dir(&dir))
            .await
            .map_err(|err| FileServerError::Task(err.to_string()))?;

        match zipped {
            Ok(data) => {
                info!(path = %path.display(), bytes = data.len(), "Successfully returned directory as zip");
                CachedContent {
                    body: Bytes::from(data),
                    content_type: ZIP_CONTENT_TYPE,
                }
            }
            Err(source) => {
                warn!(error = %source, path = %path.display(), "Failed to zip dir");
                return Err(FileServerError::ZipDir { path, source });
            }
        }
    } else {
        let data = fs::read(&path)
            .await
            .map_err(|source| FileServerError::ReadFile {
                path: path.clone(),
                source,
            })?;

        info!(path = %path.display(), bytes = data.len(), "Successfully returned file as raw data");
        CachedContent {
            body: Bytes::from(data),
            content_type: RAW_CONTENT_TYPE,
        }
    };

    if state.config.cache_enabled() {
        state.cache.insert_if_unchanged(key, content.clone(), generation);
    }

    Ok(content_response(content))
}

/// POST /content/{*path} - Upload a raw file, or a zip archive to unpack
///
/// A `content-type` of `application/zip` unpacks the body below the
/// destination; anything else is written to the destination as one file.
/// Cached responses the upload may have made stale are dropped.
pub async fn upload_content(
    State(state): State<AppState>,
    Path(request_path): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<String, FileServerError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let path = paths::resolve(&state.root_dir, &request_path)?;
    debug!(
        content_type = %content_type,
        dest_addr = %request_path,
        full_path = %path.display(),
        "Received upload file request"
    );

    let data = match axum::body::to_bytes(body, state.config.max_upload_size).await {
        Ok(data) => data,
        Err(err) => {
            warn!(error = %err, "Failed to read upload file request data");
            return Err(FileServerError::ReadBody(err.to_string()));
        }
    };
    let size = data.len();

    if is_zip_upload(&content_type) {
        if !state.config.dirs_enabled() {
            warn!(path = %path.display(), "Rejected zip upload, directories are disabled");
            return Err(FileServerError::ZipDisabled);
        }

        let codec = state.codec.clone();
        let dest = path.clone();
        let unpacked = tokio::task::spawn_blocking(move || codec.extract(&data, &dest))
            .await
            .map_err(|err| FileServerError::Task(err.to_string()))?;

        if let Err(source) = unpacked {
            warn!(error = %source, path = %path.display(), "Failed to unzip upload file request data");
            return Err(FileServerError::Unzip { path, source });
        }
    } else if let Err(err) = write_raw_file(&path, &data).await {
        warn!(error = %err, file = %path.display(), "Failed to write upload file request data");
        return Err(err);
    }

    let invalidated = state.cache.invalidate(&cache_key(&path).await);
    info!(
        path = %path.display(),
        bytes = size,
        invalidated,
        "File data successfully uploaded"
    );
    Ok(format!("Successfully wrote data to '{}'", path.display()))
}
