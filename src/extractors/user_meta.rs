//! Resource-level metadata supplied by the user.
//!
//! The user metadata file marks its directory as a dataset. Its JSON object becomes
//! the base of the dataset document and every file below the directory is content.

use std::fs;
use std::path::PathBuf;
use walkdir::WalkDir;

use super::{Extractor, SourceFile};
use crate::config::HIDDEN_PREFIX;
use crate::error::{ExtractResult, ExtractionError};
use crate::models::{RawMetadata, UserMetaRaw};

pub struct UserMetaExtractor;

impl Extractor for UserMetaExtractor {
    fn extract(&self, source: &SourceFile<'_>) -> ExtractResult<RawMetadata> {
        let text = fs::read_to_string(source.absolute())?;
        let fields = match serde_json::from_str(&text)? {
            serde_json::Value::Object(map) => map,
            _ => {
                return Err(ExtractionError::InvalidFormat(format!(
                    "user metadata must be a JSON object: {}",
                    source.relative.display()
                )))
            }
        };

        Ok(RawMetadata::UserMeta(UserMetaRaw {
            fields,
            content_files: subtree_files(source)?,
        }))
    }
}

/// Non-hidden files below the metadata file's directory, root-relative and sorted.
fn subtree_files(source: &SourceFile<'_>) -> ExtractResult<Vec<PathBuf>> {
    let dir = source.root.join(source.relative_dir());
    let mut files = Vec::new();
    let walker = WalkDir::new(&dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0 || !e.file_name().to_string_lossy().starts_with(HIDDEN_PREFIX)
        });
    for entry in walker {
        let entry = entry.map_err(|e| ExtractionError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(source.root) {
            files.push(relative.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    #[test]
    fn collects_object_and_subtree() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("a/sub")).unwrap();
        fs::create_dir_all(root.join("a/.git")).unwrap();
        fs::write(root.join("a/hs_user_meta.json"), r#"{"name": "Logan", "keywords": ["x"]}"#).unwrap();
        fs::write(root.join("a/data.csv"), "").unwrap();
        fs::write(root.join("a/sub/more.txt"), "").unwrap();
        fs::write(root.join("a/.hidden"), "").unwrap();
        fs::write(root.join("a/.git/config"), "").unwrap();
        fs::write(root.join("outside.txt"), "").unwrap();

        let source = SourceFile::new(root, Path::new("a/hs_user_meta.json"));
        let RawMetadata::UserMeta(raw) = UserMetaExtractor.extract(&source).unwrap() else {
            panic!("expected user metadata");
        };

        assert_eq!(raw.fields["name"], "Logan");
        assert_eq!(
            raw.content_files,
            vec![
                PathBuf::from("a/data.csv"),
                PathBuf::from("a/hs_user_meta.json"),
                PathBuf::from("a/sub/more.txt"),
            ]
        );
    }

    #[test]
    fn rejects_non_object_and_bad_json() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("hs_user_meta.json"), "[1, 2]").unwrap();
        let source = SourceFile::new(dir.path(), Path::new("hs_user_meta.json"));
        assert!(matches!(
            UserMetaExtractor.extract(&source),
            Err(ExtractionError::InvalidFormat(_))
        ));

        fs::write(dir.path().join("hs_user_meta.json"), "{").unwrap();
        assert!(matches!(
            UserMetaExtractor.extract(&source),
            Err(ExtractionError::Json(_))
        ));
    }
}
