//! Removable-storage collaborator: a flat directory of image files.
//!
//! Identifiers are path-like strings rooted at the storage root
//! (`/holiday.jpg`). Only top-level entries exist; nested paths are rejected.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::StorageError;

/// One top-level storage entry as reported by enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

impl StorageEntry {
    /// Identifier used by the catalog for this entry.
    #[must_use]
    pub fn identifier(&self) -> String {
        format!("/{}", self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Capacity {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

/// Enumerate/read/write surface the core needs from storage.
pub trait Storage: Send + Sync {
    /// Top-level entries in enumeration order.
    fn entries(&self) -> Result<Vec<StorageEntry>, StorageError>;

    fn open_read(&self, identifier: &str) -> Result<Box<dyn Read + Send>, StorageError>;

    /// Create or truncate.
    fn open_write(&self, identifier: &str) -> Result<Box<dyn Write + Send>, StorageError>;

    /// Removing an identifier that no longer exists succeeds.
    fn remove(&self, identifier: &str) -> Result<(), StorageError>;

    fn capacity(&self) -> Result<Capacity, StorageError>;
}

/// Storage backed by a mounted directory.
#[derive(Debug, Clone)]
pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    /// # Errors
    /// Returns [`StorageError::Mount`] when `root` is missing or not a directory.
    pub fn mount(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(StorageError::Mount(root));
        }
        info!(root = %root.display(), "storage mounted");
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, identifier: &str) -> Result<PathBuf, StorageError> {
        let name = identifier.strip_prefix('/').unwrap_or(identifier);
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(StorageError::BadIdentifier(identifier.to_string()));
        }
        Ok(self.root.join(name))
    }
}

impl Storage for DirStorage {
    fn entries(&self) -> Result<Vec<StorageEntry>, StorageError> {
        let mut out = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|err| {
                StorageError::Io(
                    err.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("storage walk loop")),
                )
            })?;
            let Some(name) = entry.file_name().to_str() else {
                debug!(path = %entry.path().display(), "skipping non utf-8 name");
                continue;
            };
            let metadata = entry.metadata().map_err(|err| {
                StorageError::Io(
                    err.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("metadata unavailable")),
                )
            })?;
            out.push(StorageEntry {
                name: name.to_string(),
                is_dir: metadata.is_dir(),
                size: if metadata.is_dir() { 0 } else { metadata.len() },
            });
        }
        Ok(out)
    }

    fn open_read(&self, identifier: &str) -> Result<Box<dyn Read + Send>, StorageError> {
        let path = self.resolve(identifier)?;
        Ok(Box::new(File::open(path)?))
    }

    fn open_write(&self, identifier: &str) -> Result<Box<dyn Write + Send>, StorageError> {
        let path = self.resolve(identifier)?;
        Ok(Box::new(File::create(path)?))
    }

    fn remove(&self, identifier: &str) -> Result<(), StorageError> {
        let path = self.resolve(identifier)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "storage: removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "storage: already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn capacity(&self) -> Result<Capacity, StorageError> {
        let stat = nix::sys::statvfs::statvfs(&self.root).map_err(std::io::Error::from)?;
        let fragment = stat.fragment_size() as u64;
        let total_bytes = stat.blocks() as u64 * fragment;
        let free_bytes = stat.blocks_free() as u64 * fragment;
        Ok(Capacity {
            used_bytes: total_bytes.saturating_sub(free_bytes),
            total_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_rejects_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        let err = DirStorage::mount(tmp.path().join("absent")).unwrap_err();
        assert!(matches!(err, StorageError::Mount(_)));
    }

    #[test]
    fn write_read_and_remove_round_through_identifiers() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = DirStorage::mount(tmp.path()).unwrap();

        storage
            .open_write("/note.jpg")
            .unwrap()
            .write_all(b"abc")
            .unwrap();
        let mut body = String::new();
        storage
            .open_read("/note.jpg")
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "abc");

        storage.remove("/note.jpg").unwrap();
        storage.remove("/note.jpg").unwrap();
        assert!(!tmp.path().join("note.jpg").exists());
    }

    #[test]
    fn nested_identifiers_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = DirStorage::mount(tmp.path()).unwrap();
        assert!(matches!(
            storage.open_read("/a/../b.jpg"),
            Err(StorageError::BadIdentifier(_))
        ));
        assert!(matches!(
            storage.open_read("/.."),
            Err(StorageError::BadIdentifier(_))
        ));
    }

    #[test]
    fn entries_are_top_level_only() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.jpg"), b"xx").unwrap();
        fs::create_dir(tmp.path().join("nested")).unwrap();
        fs::write(tmp.path().join("nested").join("b.jpg"), b"x").unwrap();

        let storage = DirStorage::mount(tmp.path()).unwrap();
        let mut entries = storage.entries().unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(
            entries,
            vec![
                StorageEntry {
                    name: "a.jpg".into(),
                    is_dir: false,
                    size: 2
                },
                StorageEntry {
                    name: "nested".into(),
                    is_dir: true,
                    size: 0
                },
            ]
        );
    }
}
