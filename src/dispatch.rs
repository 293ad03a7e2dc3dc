//! Per-file extraction: extractor, then content description, adaptation and write.
//!
//! Extraction (`extract_record`) and persistence (`persist`) are separate steps so a
//! caller that gives up on a slow extraction can drop its result without anything
//! reaching the output tree.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::adapter::{adapt, CatalogRecord};
use crate::config::{PipelineConfig, DATASET_METADATA_FILENAME};
use crate::error::{ExtractResult, ExtractionError};
use crate::extractors::{Extractors, SourceFile};
use crate::link::document_url;
use crate::media;
use crate::models::{Category, DispatchOutcome, DispatchStatus, FileEntry};
use crate::stats::PipelineStats;
use crate::storage::{write_json, Storage};

/// How an extraction attempt ended, before anything is written.
pub enum Extraction {
    Record(Box<CatalogRecord>),
    Failed(String),
    TimedOut,
}

impl From<ExtractResult<CatalogRecord>> for Extraction {
    fn from(result: ExtractResult<CatalogRecord>) -> Self {
        match result {
            Ok(record) => Extraction::Record(Box::new(record)),
            Err(e) => Extraction::Failed(e.to_string()),
        }
    }
}

pub struct Dispatcher {
    config: PipelineConfig,
    extractors: Extractors,
    storage: Arc<dyn Storage>,
    stats: Arc<PipelineStats>,
}

impl Dispatcher {
    pub fn new(
        config: PipelineConfig,
        extractors: Extractors,
        storage: Arc<dyn Storage>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            config,
            extractors,
            storage,
            stats,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    /// `<out>/<path>.json`, or `<out>/<dir>/dataset_metadata.json` for user metadata.
    pub fn output_path(&self, entry: &FileEntry) -> PathBuf {
        output_path(&self.config.output_root, entry)
    }

    /// Runs the extractor for `entry` and adapts its output. Nothing is written.
    pub fn extract_record(&self, entry: &FileEntry) -> ExtractResult<CatalogRecord> {
        let extractor = self
            .extractors
            .get(entry.category)
            .ok_or_else(|| ExtractionError::Unsupported(entry.category.to_string()))?;

        let root = self.config.input_root.as_path();
        let source = SourceFile::new(root, &entry.path);
        let raw = extractor.extract(&source)?;
        let associated_media =
            media::content_media(root, raw.content_files()).map_err(ExtractionError::Media)?;

        let mut record = adapt(raw);
        record.associated_media = associated_media;
        record.url = Some(document_url(
            &self.config.output_base_url,
            &self.config.output_root,
            &self.output_path(entry),
        ));
        Ok(record)
    }

    /// Merges the per-file sidecar (if any) over `record` and writes the document.
    pub fn persist(&self, entry: &FileEntry, record: &CatalogRecord) -> Result<PathBuf> {
        let output_path = self.output_path(entry);
        let mut document = serde_json::to_value(record)
            .with_context(|| format!("Failed to serialize record: {:?}", entry.path))?;

        if entry.category != Category::UserMeta {
            if let Some(sidecar) = self.read_sidecar(&entry.path)? {
                if let Value::Object(target) = &mut document {
                    debug!(path = %entry.path.display(), keys = sidecar.len(), "Merging sidecar metadata");
                    target.extend(sidecar);
                }
            }
        }

        write_json(self.storage.as_ref(), &output_path, &document)?;
        self.stats.inc_written();
        Ok(output_path)
    }

    /// `<file>.<user_metadata_filename>` next to an ordinary aggregation file.
    fn read_sidecar(&self, relative: &Path) -> Result<Option<serde_json::Map<String, Value>>> {
        let mut name = relative.as_os_str().to_os_string();
        name.push(".");
        name.push(&self.config.user_metadata_filename);
        let path = self.config.input_root.join(name);
        if !self.storage.exists(&path) {
            return Ok(None);
        }

        let bytes = self
            .storage
            .read(&path)
            .with_context(|| format!("Failed to read sidecar metadata: {:?}", path))?;
        match serde_json::from_slice(&bytes)
            .with_context(|| format!("Invalid sidecar metadata: {:?}", path))?
        {
            Value::Object(map) => Ok(Some(map)),
            _ => anyhow::bail!("Sidecar metadata is not a JSON object: {:?}", path),
        }
    }

    /// Extracts and persists one file in the calling thread.
    pub fn dispatch(&self, entry: FileEntry) -> DispatchOutcome {
        self.stats.inc_dispatched();
        let extraction = Extraction::from(self.extract_record(&entry));
        self.settle(entry, extraction)
    }

    /// Writes a successful extraction and turns the attempt into the file's outcome.
    /// Failures are logged with category and path.
    pub fn settle(&self, entry: FileEntry, extraction: Extraction) -> DispatchOutcome {
        let status = match extraction {
            Extraction::Record(record) => self.complete(&entry, &record),
            Extraction::Failed(reason) => {
                warn!(category = %entry.category, path = %entry.path.display(), error = %reason, "Extraction failed");
                self.stats.inc_failed();
                DispatchStatus::Failed
            }
            Extraction::TimedOut => {
                warn!(category = %entry.category, path = %entry.path.display(), "Extraction timed out");
                self.stats.inc_timed_out();
                DispatchStatus::TimedOut
            }
        };
        self.outcome(entry, status)
    }

    fn complete(&self, entry: &FileEntry, record: &CatalogRecord) -> DispatchStatus {
        match self.persist(entry, record) {
            Ok(_) => {
                self.stats.inc_extracted();
                DispatchStatus::Extracted
            }
            Err(e) => {
                warn!(category = %entry.category, path = %entry.path.display(), error = %format!("{e:#}"), "Write failed");
                self.stats.inc_failed();
                DispatchStatus::Failed
            }
        }
    }

    pub fn outcome(&self, entry: FileEntry, status: DispatchStatus) -> DispatchOutcome {
        DispatchOutcome {
            output_path: self.output_path(&entry),
            entry,
            status,
        }
    }
}

pub fn output_path(output_root: &Path, entry: &FileEntry) -> PathBuf {
    if entry.category == Category::UserMeta {
        let dir = entry.path.parent().unwrap_or_else(|| Path::new(""));
        return output_root.join(dir).join(DATASET_METADATA_FILENAME);
    }
    let mut name = entry.path.as_os_str().to_os_string();
    name.push(".json");
    output_root.join(name)
}
