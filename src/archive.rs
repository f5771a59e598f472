//! Zip packing of directory trees and extraction of uploaded archives.

use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::paths::verify_contained;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("failed to read '{}': {source}", path.display())]
    ReadSource {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to build zip: {0}")]
    Build(ZipError),

    #[error("Failed to read zip data: {0}")]
    ReadArchive(ZipError),

    #[error("Failed to unzip file '{name}': {source}")]
    ReadEntry { name: String, source: ZipError },

    #[error("Failed to read file data for file '{name}': {source}")]
    ReadEntryData {
        name: String,
        source: std::io::Error,
    },

    #[error("zip entry '{0}' would be written outside the destination")]
    UnsafeEntry(String),

    #[error("failed to make dirs '{}': {source}", path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to open or create file '{}': {source}", path.display())]
    OpenFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write data to file '{}': {source}", path.display())]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Turns directories into zip bytes and zip bytes back into directories.
///
/// Implementations are called from blocking worker threads.
pub trait ArchiveCodec: Send + Sync {
    /// Pack the tree below `dir`; entry names are relative to `dir`.
    fn zip_dir(&self, dir: &Path) -> Result<Vec<u8>, ArchiveError>;

    /// Unpack `archive` below `dest`, creating directories as needed.
    fn extract(&self, archive: &[u8], dest: &Path) -> Result<(), ArchiveError>;
}

/// An archive entry held in memory between reading and writing it out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Path relative to the extraction destination
    pub name: PathBuf,
    pub data: Vec<u8>,
    pub is_dir: bool,
}

/// Deflate-compressed zip archives.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipCodec;

impl ArchiveCodec for ZipCodec {
    fn zip_dir(&self, dir: &Path) -> Result<Vec<u8>, ArchiveError> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .unix_permissions(0o644);

        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry?;
            let entry_path = entry.path();
            let Some(name) = entry_name(dir, entry_path) else {
                continue;
            };

            if entry.file_type().is_file() {
                let data = std::fs::read(entry_path).map_err(|source| ArchiveError::ReadSource {
                    path: entry_path.to_path_buf(),
                    source,
                })?;
                zip.start_file(name, options).map_err(ArchiveError::Build)?;
                zip.write_all(&data).map_err(|err| ArchiveError::Build(err.into()))?;
            } else if entry.file_type().is_dir() {
                zip.add_directory(format!("{}/", name), options)
                    .map_err(ArchiveError::Build)?;
            }
        }

        let cursor = zip.finish().map_err(ArchiveError::Build)?;
        Ok(cursor.into_inner())
    }

    fn extract(&self, archive: &[u8], dest: &Path) -> Result<(), ArchiveError> {
        let files = read_entries(archive)?;
        write_entries(dest, &files)
    }
}

/// `/`-joined path of `path` relative to `root`; `None` for the root itself.
fn entry_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Decode every entry up front so a corrupt archive leaves the disk untouched.
pub fn read_entries(archive: &[u8]) -> Result<Vec<UploadedFile>, ArchiveError> {
    let mut zip = ZipArchive::new(Cursor::new(archive)).map_err(ArchiveError::ReadArchive)?;
    let mut files = Vec::with_capacity(zip.len());

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(|source| ArchiveError::ReadEntry {
            name: format!("#{index}"),
            source,
        })?;
        let raw_name = entry.name().to_string();
        let name = entry
            .enclosed_name()
            .ok_or_else(|| ArchiveError::UnsafeEntry(raw_name.clone()))?;

        let is_dir = entry.is_dir();
        let mut data = Vec::new();
        if !is_dir {
            entry
                .read_to_end(&mut data)
                .map_err(|source| ArchiveError::ReadEntryData {
                    name: raw_name,
                    source,
                })?;
        }

        files.push(UploadedFile { name, data, is_dir });
    }

    Ok(files)
}

/// Write entries below `dest` in order, stopping at the first failure.
///
/// Entries written before a failure are left in place.
/// Entries that would reach outside `dest` through a symlink already on disk
/// are rejected before anything is created for them.
pub fn write_entries(dest: &Path, files: &[UploadedFile]) -> Result<(), ArchiveError> {
    for file in files {
        create_dirs(dest)?;
        let root = dest.canonicalize().map_err(|source| ArchiveError::CreateDir {
            path: dest.to_path_buf(),
            source,
        })?;

        let path = dest.join(&file.name);
        if verify_contained(&root, &path).is_err() {
            return Err(ArchiveError::UnsafeEntry(file.name.display().to_string()));
        }

        if file.is_dir {
            create_dirs(&path)?;
            continue;
        }

        if let Some(parent) = path.parent() {
            create_dirs(parent)?;
        }

        let mut out = std::fs::File::create(&path).map_err(|source| ArchiveError::OpenFile {
            path: path.clone(),
            source,
        })?;
        out.write_all(&file.data)
            .map_err(|source| ArchiveError::WriteFile {
                path: path.clone(),
                source,
            })?;
    }

    Ok(())
}

fn create_dirs(path: &Path) -> Result<(), ArchiveError> {
    std::fs::create_dir_all(path).map_err(|source| ArchiveError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn test_zip_dir_uses_relative_names() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("root.txt"), "root").unwrap();
        fs::create_dir_all(root.join("nested")).unwrap();
        fs::write(root.join("nested").join("child.txt"), "child").unwrap();

        let data = ZipCodec.zip_dir(root).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(data)).unwrap();

        let mut content = String::new();
        archive
            .by_name("nested/child.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "child");
        assert!(archive.by_name("nested/").unwrap().is_dir());
        assert!(archive.by_name("root.txt").is_ok());
    }

    #[test]
    fn test_zip_dir_is_deterministic() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("b.txt"), "b").unwrap();
        fs::write(temp_dir.path().join("a.txt"), "a").unwrap();

        let first = ZipCodec.zip_dir(temp_dir.path()).unwrap();
        let second = ZipCodec.zip_dir(temp_dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_zip_dir_missing_dir_fails() {
        let temp_dir = TempDir::new().unwrap();
        let result = ZipCodec.zip_dir(&temp_dir.path().join("nope"));
        assert!(matches!(result, Err(ArchiveError::Walk(_))));
    }

    #[test]
    fn test_extract_creates_intermediate_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("d");
        let archive = build_zip(&[("a.txt", "hello"), ("sub/b.txt", "world")]);

        ZipCodec.extract(&archive, &dest).unwrap();

        assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "hello");
        assert_eq!(fs::read_to_string(dest.join("sub/b.txt")).unwrap(), "world");
    }

    #[test]
    fn test_extract_truncates_existing_files() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), "a much longer previous body").unwrap();

        ZipCodec
            .extract(&build_zip(&[("a.txt", "short")]), temp_dir.path())
            .unwrap();

        assert_eq!(fs::read_to_string(temp_dir.path().join("a.txt")).unwrap(), "short");
    }

    #[test]
    fn test_extract_rejects_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("d");

        let result = ZipCodec.extract(b"definitely not a zip", &dest);
        assert!(matches!(result, Err(ArchiveError::ReadArchive(_))));
        assert!(!dest.exists());
    }

    #[test]
    fn test_extract_rejects_zip_slip() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("d");
        let archive = build_zip(&[("ok.txt", "fine"), ("../escape.txt", "evil")]);

        let result = ZipCodec.extract(&archive, &dest);
        assert!(matches!(result, Err(ArchiveError::UnsafeEntry(_))));
        assert!(!temp_dir.path().join("escape.txt").exists());
        // Entries are decoded before anything is written.
        assert!(!dest.join("ok.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_rejects_symlink_escape() {
        let temp_dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let dest = temp_dir.path().join("d");
        fs::create_dir_all(&dest).unwrap();
        std::os::unix::fs::symlink(outside.path(), dest.join("link")).unwrap();

        let archive = build_zip(&[("ok.txt", "fine"), ("link/evil.txt", "pwned")]);
        let result = ZipCodec.extract(&archive, &dest);

        assert!(matches!(result, Err(ArchiveError::UnsafeEntry(_))));
        assert!(!outside.path().join("evil.txt").exists());
        assert_eq!(fs::read_to_string(dest.join("ok.txt")).unwrap(), "fine");
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_rejects_new_dirs_through_symlink() {
        let temp_dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), temp_dir.path().join("link")).unwrap();

        let archive = build_zip(&[("link/made/here.txt", "pwned")]);
        let result = ZipCodec.extract(&archive, temp_dir.path());

        assert!(matches!(result, Err(ArchiveError::UnsafeEntry(_))));
        assert!(!outside.path().join("made").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_refuses_to_overwrite_through_file_symlink() {
        let temp_dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("target.txt");
        fs::write(&target, "original").unwrap();
        std::os::unix::fs::symlink(&target, temp_dir.path().join("alias.txt")).unwrap();

        let archive = build_zip(&[("alias.txt", "pwned")]);
        let result = ZipCodec.extract(&archive, temp_dir.path());

        assert!(matches!(result, Err(ArchiveError::UnsafeEntry(_))));
        assert_eq!(fs::read_to_string(&target).unwrap(), "original");
    }

    #[test]
    fn test_write_entries_keeps_earlier_entries_on_failure() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path();
        // A regular file where a directory is needed makes the second entry fail.
        fs::write(dest.join("blocker"), "file").unwrap();

        let files = vec![
            UploadedFile {
                name: PathBuf::from("first.txt"),
                data: b"first".to_vec(),
                is_dir: false,
            },
            UploadedFile {
                name: PathBuf::from("blocker/second.txt"),
                data: b"second".to_vec(),
                is_dir: false,
            },
            UploadedFile {
                name: PathBuf::from("third.txt"),
                data: b"third".to_vec(),
                is_dir: false,
            },
        ];

        let result = write_entries(dest, &files);
        assert!(matches!(result, Err(ArchiveError::CreateDir { .. })));
        assert_eq!(fs::read_to_string(dest.join("first.txt")).unwrap(), "first");
        assert!(!dest.join("third.txt").exists());
    }

    #[test]
    fn test_round_trip_reproduces_tree() {
        let source = TempDir::new().unwrap();
        fs::write(source.path().join("top.txt"), "top").unwrap();
        fs::create_dir_all(source.path().join("x/y")).unwrap();
        fs::write(source.path().join("x/y/deep.bin"), [0u8, 1, 2, 255]).unwrap();
        fs::create_dir_all(source.path().join("empty")).unwrap();

        let archive = ZipCodec.zip_dir(source.path()).unwrap();
        let target = TempDir::new().unwrap();
        ZipCodec.extract(&archive, target.path()).unwrap();

        let collect = |root: &Path| -> Vec<(String, Option<Vec<u8>>)> {
            WalkDir::new(root)
                .sort_by_file_name()
                .into_iter()
                .map(|e| e.unwrap())
                .filter_map(|e| {
                    let name = entry_name(root, e.path())?;
                    let data = e.file_type().is_file().then(|| fs::read(e.path()).unwrap());
                    Some((name, data))
                })
                .collect()
        };

        assert_eq!(collect(source.path()), collect(target.path()));
    }
}
