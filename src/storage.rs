//! Storage boundary for metadata documents and the sidecar files merged into them.
//!
//! The core only needs `exists/read/write/list`; `LocalStorage` backs these with the
//! local filesystem. Writes go to a temp file first and are renamed into place so a
//! reader never observes a half-written document.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub trait Storage: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Overwrites `path`, creating parent directories as needed.
    fn write(&self, path: &Path, bytes: &[u8]) -> Result<()>;

    /// All regular files below `dir`, sorted.
    fn list(&self, dir: &Path) -> Result<Vec<PathBuf>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStorage;

impl Storage for LocalStorage {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).with_context(|| format!("Failed to read: {:?}", path))
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let tmp_path = temp_path(path);
        fs::write(&tmp_path, bytes)
            .with_context(|| format!("Failed to write temp file: {:?}", tmp_path))?;
        fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to rename temp file to: {:?}", path))?;
        Ok(())
    }

    fn list(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to list: {:?}", dir))?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Writes `value` as 2-space indented JSON.
pub fn write_json<T: Serialize + ?Sized>(storage: &dyn Storage, path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .with_context(|| format!("Failed to serialize document: {:?}", path))?;
    storage.write(path, &bytes)
}

pub fn read_json(storage: &dyn Storage, path: &Path) -> Result<serde_json::Value> {
    let bytes = storage.read(path)?;
    serde_json::from_slice(&bytes).with_context(|| format!("Invalid JSON document: {:?}", path))
}
