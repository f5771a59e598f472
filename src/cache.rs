use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;

/// Bytes last served for a path, along with the content type they went out with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedContent {
    pub body: Bytes,
    pub content_type: &'static str,
}

/// Concurrent map from canonical path to previously served content.
///
/// The cache is unbounded: an entry lives until an upload touching its path
/// invalidates it or the process exits. Clones share the same map.
///
/// Every invalidation bumps a generation counter. Readers take the
/// generation before touching the disk and store through
/// [`ResponseCache::insert_if_unchanged`], so bytes read before a concurrent
/// upload never outlive that upload's invalidation.
#[derive(Debug, Clone, Default)]
pub struct ResponseCache {
    entries: Arc<DashMap<PathBuf, CachedContent>>,
    generation: Arc<AtomicU64>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<CachedContent> {
        self.entries.get(path).map(|entry| entry.value().clone())
    }

    /// Store content for `path`, replacing any previous entry.
    pub fn insert(&self, path: PathBuf, content: CachedContent) {
        self.entries.insert(path, content);
    }

    /// Current invalidation generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Store content read while `generation` was current.
    ///
    /// If an invalidation ran since then the entry is not kept. Returns
    /// whether it was.
    pub fn insert_if_unchanged(
        &self,
        path: PathBuf,
        content: CachedContent,
        generation: u64,
    ) -> bool {
        if self.generation() != generation {
            return false;
        }

        self.entries.insert(path.clone(), content.clone());
        // An invalidation between the check and the insert has already bumped
        // the counter; its removal pass may have missed this entry.
        if self.generation() != generation {
            self.entries.remove_if(&path, |_, current| *current == content);
            return false;
        }
        true
    }

    /// Drop every entry a write to `path` may have made stale.
    ///
    /// That is the path itself, anything below it, and every directory above
    /// it (their cached archives embed the old contents). Returns how many
    /// entries were removed.
    pub fn invalidate(&self, path: &Path) -> usize {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let before = self.entries.len();
        self.entries
            .retain(|key, _| !(key.starts_with(path) || path.starts_with(key)));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
