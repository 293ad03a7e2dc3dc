//! Relational linking of written documents.
//!
//! Runs once every extraction has finished. A dataset document (one per directory
//! holding user metadata) claims every ordinary document below its directory: the
//! dataset gets `hasPart`, each child gets `isPartOf`. All documents then have their
//! `url` and `associatedMedia[].contentUrl` turned into public URLs.

use anyhow::Result;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::adapter::PartRelation;
use crate::config::{PipelineConfig, MISSING_NAME};
use crate::models::{slash_path, Category, DispatchOutcome, ManifestEntry};
use crate::storage::{read_json, write_json, LocalStorage, Storage};

const CREATIVE_WORK_TYPE: &str = "CreativeWork";

#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub output_root: PathBuf,
    pub input_base_url: String,
    pub output_base_url: String,
}

impl LinkConfig {
    pub fn from_pipeline(config: &PipelineConfig) -> Self {
        Self {
            output_root: config.output_root.clone(),
            input_base_url: config.input_base_url.clone(),
            output_base_url: config.output_base_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkReport {
    pub datasets_linked: usize,
    pub children_linked: usize,
    /// Child documents claimed by more than one dataset.
    pub overlapping_claims: Vec<PathBuf>,
    /// Datasets left untouched because a member document could not be read.
    pub failed_datasets: Vec<PathBuf>,
}

/// `base/relative` with exactly one slash between them.
pub fn join_url(base: &str, relative: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}

fn is_under(base: &str, value: &str) -> bool {
    let base = base.trim_end_matches('/');
    value == base
        || value
            .strip_prefix(base)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Joins `value` onto `base` unless it is already there. Applying it twice is a no-op.
pub fn rewrite_url(base: &str, value: &str) -> String {
    if is_under(base, value) {
        value.to_string()
    } else {
        join_url(base, value)
    }
}

/// Public URL of a document under `output_root`.
pub fn document_url(output_base_url: &str, output_root: &Path, document: &Path) -> String {
    let relative = document.strip_prefix(output_root).unwrap_or(document);
    join_url(output_base_url, &slash_path(relative))
}

/// Links the documents behind `outcomes` on the local filesystem.
pub fn link(outcomes: &[DispatchOutcome], config: &LinkConfig) -> Result<LinkReport> {
    link_with(outcomes, config, &LocalStorage)
}

pub fn link_with(
    outcomes: &[DispatchOutcome],
    config: &LinkConfig,
    storage: &dyn Storage,
) -> Result<LinkReport> {
    let (datasets, manifest) = partition(outcomes);
    let mut report = LinkReport::default();

    // Every document is read before anything is written. A dataset whose own document
    // or any member fails to read drops out here and claims nothing.
    let mut loaded: FxHashMap<&Path, Value> = FxHashMap::default();
    let mut held: FxHashSet<&Path> = FxHashSet::default();
    let mut linked: Vec<(&Path, Value, Vec<&ManifestEntry>)> = Vec::new();
    for dataset in &datasets {
        let dir = dataset.parent().unwrap_or_else(|| Path::new(""));
        let children: Vec<&ManifestEntry> = manifest
            .iter()
            .filter(|m| m.document.starts_with(dir))
            .collect();
        match load_dataset(dataset, &children, &mut loaded, storage) {
            Some(doc) => linked.push((dataset.as_path(), doc, children)),
            None => {
                held.extend(children.iter().copied().map(|c| c.document.as_path()));
                report.failed_datasets.push(dataset.clone());
            }
        }
    }

    // Child document -> every linked dataset whose directory contains it, sorted.
    let mut claims: BTreeMap<&Path, Vec<&Path>> = BTreeMap::new();
    for (dataset, _, children) in &linked {
        for child in children.iter().copied() {
            claims.entry(child.document.as_path()).or_default().push(*dataset);
        }
    }

    for (child, claimants) in &claims {
        if claimants.len() > 1 {
            warn!(
                document = %child.display(),
                datasets = claimants.len(),
                "Document is claimed by nested datasets"
            );
            report.overlapping_claims.push(child.to_path_buf());
        }
    }

    for (dataset, dataset_doc, children) in &mut linked {
        let parts: Vec<PartRelation> = children
            .iter()
            .filter_map(|child| {
                let doc = loaded.get(child.document.as_path())?;
                Some(part_relation(doc, &child.document, config))
            })
            .collect();
        set_field(dataset_doc, "hasPart", serde_json::to_value(&parts)?);
        rewrite_urls(dataset_doc, *dataset, config);
    }

    for (child, claimants) in &claims {
        let Some(mut doc) = loaded.remove(child) else {
            continue;
        };
        let mut is_part_of: Vec<String> = claimants
            .iter()
            .map(|d| document_url(&config.output_base_url, &config.output_root, d))
            .collect();
        is_part_of.sort();
        set_field(&mut doc, "isPartOf", Value::from(is_part_of));
        rewrite_urls(&mut doc, child, config);
        write_json(storage, child, &doc)?;
    }

    for (dataset, dataset_doc, children) in &linked {
        write_json(storage, dataset, dataset_doc)?;
        info!(dataset = %dataset.display(), children = children.len(), "Linked dataset");
        report.datasets_linked += 1;
        report.children_linked += children.len();
    }

    let standalone = manifest.iter().filter(|m| {
        let document = m.document.as_path();
        !claims.contains_key(document) && !held.contains(document)
    });
    for entry in standalone {
        let mut doc = match read_json(storage, &entry.document) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(document = %entry.document.display(), error = %format!("{e:#}"), "Skipping unreadable document");
                continue;
            }
        };
        rewrite_urls(&mut doc, &entry.document, config);
        write_json(storage, &entry.document, &doc)?;
    }

    info!(
        datasets = report.datasets_linked,
        children = report.children_linked,
        overlaps = report.overlapping_claims.len(),
        failed = report.failed_datasets.len(),
        "Linking complete"
    );
    Ok(report)
}

/// Successful dataset documents and manifest entries, each sorted by document path.
fn partition(outcomes: &[DispatchOutcome]) -> (Vec<PathBuf>, Vec<ManifestEntry>) {
    let mut datasets = Vec::new();
    let mut manifest = Vec::new();
    for outcome in outcomes.iter().filter(|o| o.succeeded()) {
        if outcome.entry.category == Category::UserMeta {
            datasets.push(outcome.output_path.clone());
        } else {
            manifest.push(ManifestEntry {
                source: outcome.entry.path.clone(),
                document: outcome.output_path.clone(),
            });
        }
    }
    datasets.sort();
    datasets.dedup();
    manifest.sort_by(|a, b| a.document.cmp(&b.document));
    manifest.dedup_by(|a, b| a.document == b.document);
    (datasets, manifest)
}

/// Reads a dataset document and caches its members. Returns `None` if any of them
/// cannot be read.
fn load_dataset<'a>(
    dataset: &Path,
    children: &[&'a ManifestEntry],
    loaded: &mut FxHashMap<&'a Path, Value>,
    storage: &dyn Storage,
) -> Option<Value> {
    let dataset_doc = match read_json(storage, dataset) {
        Ok(doc) => doc,
        Err(e) => {
            error!(dataset = %dataset.display(), error = %format!("{e:#}"), "Dataset document unreadable, skipping");
            return None;
        }
    };

    for child in children {
        let document = child.document.as_path();
        if loaded.contains_key(document) {
            continue;
        }
        match read_json(storage, document) {
            Ok(doc) => {
                loaded.insert(document, doc);
            }
            Err(e) => {
                error!(
                    dataset = %dataset.display(),
                    document = %document.display(),
                    error = %format!("{e:#}"),
                    "Member document unreadable, skipping dataset"
                );
                return None;
            }
        }
    }
    Some(dataset_doc)
}

fn part_relation(doc: &Value, document: &Path, config: &LinkConfig) -> PartRelation {
    let name = doc
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.trim().is_empty())
        .unwrap_or(MISSING_NAME);
    PartRelation {
        kind: CREATIVE_WORK_TYPE.to_string(),
        name: name.to_string(),
        description: doc
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        url: document_url(&config.output_base_url, &config.output_root, document),
    }
}

fn set_field(doc: &mut Value, key: &str, value: Value) {
    if let Value::Object(map) = doc {
        map.insert(key.to_string(), value);
    }
}

/// Document `url` to its output-side URL, content URLs onto the input-side base.
fn rewrite_urls(doc: &mut Value, document: &Path, config: &LinkConfig) {
    let url = document_url(&config.output_base_url, &config.output_root, document);
    set_field(doc, "url", Value::from(url));

    let Some(media) = doc.get_mut("associatedMedia").and_then(Value::as_array_mut) else {
        return;
    };
    for item in media {
        if let Some(Value::String(content_url)) = item.get_mut("contentUrl") {
            *content_url = rewrite_url(&config.input_base_url, content_url);
        }
    }
}
