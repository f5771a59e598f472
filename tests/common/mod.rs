//! Test utilities and common setup.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, Response, header};
use tempfile::TempDir;
use tower::ServiceExt;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use filedrop::archive::{ArchiveCodec, ArchiveError, ZipCodec};
use filedrop::config::{Config, prepare_root_dir};
use filedrop::{AppState, app};

/// Zip codec that counts how often each operation runs.
#[derive(Default)]
pub struct CountingCodec {
    pub zips: AtomicUsize,
    pub extracts: AtomicUsize,
}

impl CountingCodec {
    pub fn zip_calls(&self) -> usize {
        self.zips.load(Ordering::SeqCst)
    }
}

impl ArchiveCodec for CountingCodec {
    fn zip_dir(&self, dir: &Path) -> Result<Vec<u8>, ArchiveError> {
        self.zips.fetch_add(1, Ordering::SeqCst);
        ZipCodec.zip_dir(dir)
    }

    fn extract(&self, archive: &[u8], dest: &Path) -> Result<(), ArchiveError> {
        self.extracts.fetch_add(1, Ordering::SeqCst);
        ZipCodec.extract(archive, dest)
    }
}

/// A router over a fresh temporary root.
pub struct TestServer {
    pub app: Router,
    pub root: PathBuf,
    pub codec: Arc<CountingCodec>,
    _temp_dir: TempDir,
}

impl TestServer {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(mut config: Config) -> Self {
        let temp_dir = TempDir::new().unwrap();
        config.root_dir = Some(temp_dir.path().to_path_buf());
        let root = prepare_root_dir(temp_dir.path()).unwrap();

        let codec = Arc::new(CountingCodec::default());
        let state = AppState::with_codec(root.clone(), config, codec.clone());

        Self {
            app: app(state),
            root,
            codec,
            _temp_dir: temp_dir,
        }
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .method(Method::GET)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    pub async fn post(&self, uri: &str, content_type: &str, body: Vec<u8>) -> Response<Body> {
        self.app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .method(Method::POST)
                    .header(header::CONTENT_TYPE, content_type)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap()
    }
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), 64 * 1024 * 1024)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

pub fn content_type(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Build an in-memory zip archive from name/content pairs.
pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, data) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}
