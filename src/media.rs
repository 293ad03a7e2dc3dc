use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::models::slash_path;

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// File-level entry of a record's `associatedMedia`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaObject {
    #[serde(rename = "@type")]
    pub kind: String,
    pub name: String,
    pub content_url: String,
    pub content_size: String,
    pub sha256: String,
    pub encoding_format: String,
}

/// Checksum, size and MIME type of one content file. `contentUrl` is root-relative;
/// the linker later joins it with the public input base URL.
pub fn file_info(root: &Path, relative: &Path) -> Result<MediaObject> {
    let path = root.join(relative);
    let file = File::open(&path).with_context(|| format!("Failed to open: {:?}", path))?;
    let size = file
        .metadata()
        .with_context(|| format!("Failed to stat: {:?}", path))?
        .len();

    let mut reader = BufReader::with_capacity(HASH_BUFFER_SIZE, file);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let n = reader
            .read(&mut buf)
            .with_context(|| format!("Failed to read: {:?}", path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let name = relative
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(MediaObject {
        kind: "DataDownload".to_string(),
        name,
        content_url: slash_path(relative),
        content_size: format_size(size),
        sha256: format!("{:x}", hasher.finalize()),
        encoding_format: encoding_format(relative),
    })
}

/// Hashes every content file of an aggregation in parallel, keeping input order.
pub fn content_media<P: AsRef<Path> + Sync>(root: &Path, files: &[P]) -> Result<Vec<MediaObject>> {
    files
        .par_iter()
        .map(|f| file_info(root, f.as_ref()))
        .collect()
}

/// Size in kilobytes (1 KB = 1000 bytes), always with a fractional part.
pub fn format_size(bytes: u64) -> String {
    let kb = bytes as f64 / 1000.0;
    if kb.fract() == 0.0 {
        format!("{:.1} KB", kb)
    } else {
        format!("{} KB", kb)
    }
}

/// Guessed MIME type, or the extension (with dot) when the type is unknown.
pub fn encoding_format(path: &Path) -> String {
    if let Some(mime) = mime_guess::from_path(path).first() {
        return mime.essence_str().to_string();
    }
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}
