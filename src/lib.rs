//! Minimal HTTP file server.
//!
//! Lists directories, serves files (directories are zipped on the fly) and
//! accepts raw file or zip archive uploads below a single root directory.
//! The crate is used by the `filedrop` binary but the router can be embedded
//! in another application.

pub mod archive;
pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod paths;
pub mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

pub use archive::{ArchiveCodec, ZipCodec};
pub use cache::ResponseCache;
pub use config::Config;
pub use error::FileServerError;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Canonical root directory every request path is joined onto
    pub root_dir: PathBuf,
    /// Configuration
    pub config: Arc<Config>,
    /// Previously served bodies keyed by resolved path
    pub cache: ResponseCache,
    /// Packs directories for download and unpacks zip uploads
    pub codec: Arc<dyn ArchiveCodec>,
}

impl AppState {
    /// Create a new AppState backed by the zip codec.
    pub fn new(root_dir: PathBuf, config: Config) -> Self {
        Self::with_codec(root_dir, config, Arc::new(ZipCodec))
    }

    /// Create a new AppState with a custom archive codec.
    pub fn with_codec(root_dir: PathBuf, config: Config, codec: Arc<dyn ArchiveCodec>) -> Self {
        Self {
            root_dir,
            config: Arc::new(config),
            cache: ResponseCache::new(),
            codec,
        }
    }
}

/// Build the router with request tracing attached.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::file_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
