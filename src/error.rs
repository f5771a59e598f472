use std::path::PathBuf;

use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::archive::ArchiveError;

/// Request-level failures.
///
/// Every variant is answered with `400 Bad Request` and a plain-text body
/// carrying the resolved path and the underlying error text.
#[derive(Error, Debug)]
pub enum FileServerError {
    #[error("Failed to read request data: {0}")]
    ReadBody(String),

    #[error("Failed to read file at '{}': {source}", path.display())]
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read file at '{}': {source}", path.display())]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read directory '{}': {source}", path.display())]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("'{}' is a directory and directory serving is disabled", .0.display())]
    DirectoriesDisabled(PathBuf),

    #[error("zip content is not permitted while directory serving is disabled")]
    ZipDisabled,

    #[error("Failed to zip dir '{}': {source}", path.display())]
    ZipDir {
        path: PathBuf,
        source: ArchiveError,
    },

    #[error("Failed to unzip into '{}': {source}", path.display())]
    Unzip {
        path: PathBuf,
        source: ArchiveError,
    },

    #[error("Failed to make dirs '{}': {source}", path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to open file '{}': {source}", path.display())]
    OpenFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write data to file '{}': {source}", path.display())]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Path '{0}' resolves outside the root directory")]
    PathTraversal(String),

    #[error("Worker task failed: {0}")]
    Task(String),
}

impl IntoResponse for FileServerError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}
