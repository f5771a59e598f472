use std::path::{Component, Path, PathBuf};

use tracing::warn;

use crate::error::FileServerError;

/// Join a client-supplied path onto `root`, keeping the result inside it.
///
/// `root` must already be canonical. `.` segments are dropped and `..` pops
/// the previous segment; popping past the root is rejected. The deepest
/// existing ancestor of the joined path is then canonicalized so a symlink
/// inside the tree cannot lead the request outside of it. The returned path
/// is not canonicalized itself, so it may name something that does not exist
/// yet (upload destinations).
pub fn resolve(root: &Path, request_path: &str) -> Result<PathBuf, FileServerError> {
    let relative = request_path.trim_start_matches('/');
    if relative.contains('\0') {
        warn!(path = %request_path, "Path contains null byte");
        return Err(FileServerError::PathTraversal(request_path.to_string()));
    }

    let mut segments: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(name) => segments.push(name),
            Component::CurDir => continue,
            Component::ParentDir => {
                if segments.pop().is_none() {
                    warn!(path = %request_path, "Path traversal attempt above root");
                    return Err(FileServerError::PathTraversal(request_path.to_string()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                warn!(path = %request_path, "Absolute path component in relative path");
                return Err(FileServerError::PathTraversal(request_path.to_string()));
            }
        }
    }

    let mut resolved = root.to_path_buf();
    resolved.extend(segments);

    verify_contained(root, &resolved).map_err(|escaped| {
        warn!(
            path = %request_path,
            resolved = %resolved.display(),
            escaped = %escaped.display(),
            "Symlink escape attempt"
        );
        FileServerError::PathTraversal(request_path.to_string())
    })?;

    Ok(resolved)
}

/// Check the deepest existing ancestor of `path` against `root`.
///
/// `root` must be canonical. Returns the offending canonical path on escape.
pub(crate) fn verify_contained(root: &Path, path: &Path) -> Result<(), PathBuf> {
    let existing = path.ancestors().find(|p| p.symlink_metadata().is_ok());
    let Some(existing) = existing else {
        return Ok(());
    };

    match existing.canonicalize() {
        Ok(canonical) if canonical.starts_with(root) => Ok(()),
        Ok(canonical) => Err(canonical),
        // Dangling symlink: nothing to serve through it, and writing through
        // it could land anywhere.
        Err(_) => Err(existing.to_path_buf()),
    }
}
