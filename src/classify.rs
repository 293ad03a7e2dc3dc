//! File classification.
//!
//! Walks the input tree once and sorts every visible regular file into exactly one
//! [`Category`] bucket. Tiles referenced by a `.vrt` are folded into that manifest
//! and do not get documents of their own.

use anyhow::{bail, Context, Result};
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::HIDDEN_PREFIX;
use crate::extractors::lower_extension;
use crate::extractors::raster::{list_vrt_tiles, resolve_tile};
use crate::models::{slash_path, Category, FileEntry};

const REFTS_SUFFIX: &str = ".refts.json";

const ALL_CATEGORIES: [Category; 7] = [
    Category::Raster,
    Category::Netcdf,
    Category::Feature,
    Category::Timeseries,
    Category::Reftimeseries,
    Category::UserMeta,
    Category::Unclassified,
];

#[derive(Debug, Clone, Default, Serialize)]
pub struct Classification {
    /// Every visible regular file, root-relative, in total order.
    pub files: Vec<PathBuf>,
    pub buckets: BTreeMap<Category, Vec<PathBuf>>,
}

impl Classification {
    pub fn bucket(&self, category: Category) -> &[PathBuf] {
        self.buckets
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Files that produce a document, bucket by bucket.
    pub fn entries(&self) -> Vec<FileEntry> {
        self.buckets
            .iter()
            .filter(|(category, _)| category.is_dispatchable())
            .flat_map(|(category, paths)| {
                paths.iter().map(|p| FileEntry::new(p.clone(), *category))
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Suffix-level kind; tiles are only raster once no `.vrt` claims them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Tile,
    Category(Category),
}

fn kind_of(path: &Path, user_metadata_filename: &str) -> Kind {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if name == user_metadata_filename {
        return Kind::Category(Category::UserMeta);
    }
    if name.to_lowercase().ends_with(REFTS_SUFFIX) {
        return Kind::Category(Category::Reftimeseries);
    }
    match lower_extension(path).as_deref() {
        Some("vrt") => Kind::Category(Category::Raster),
        Some("tif") | Some("tiff") => Kind::Tile,
        Some("nc") => Kind::Category(Category::Netcdf),
        Some("shp") => Kind::Category(Category::Feature),
        Some("csv") | Some("sqlite") => Kind::Category(Category::Timeseries),
        _ => Kind::Category(Category::Unclassified),
    }
}

/// Root-relative visible files, sorted by path then depth.
fn walk_files(root: &Path) -> Result<Vec<PathBuf>> {
    let walker = WalkDir::new(root).into_iter().filter_entry(|e| {
        e.depth() == 0 || !e.file_name().to_string_lossy().starts_with(HIDDEN_PREFIX)
    });

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk input tree: {:?}", root))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("Path outside input root: {:?}", entry.path()))?
            .to_path_buf();
        files.push(relative);
    }

    files.sort_by_cached_key(|p| (slash_path(p), p.components().count()));
    Ok(files)
}

/// Tiles claimed by any `.vrt` in `vrts` that are present among `tiles`.
fn consumed_tiles(root: &Path, vrts: &[&PathBuf], tiles: &FxHashSet<&PathBuf>) -> FxHashSet<PathBuf> {
    let mut consumed = FxHashSet::default();
    for vrt in vrts {
        let referenced = match list_vrt_tiles(&root.join(vrt)) {
            Ok(referenced) => referenced,
            Err(e) => {
                warn!(vrt = %vrt.display(), error = %e, "Unreadable VRT, leaving its tiles alone");
                continue;
            }
        };
        let vrt_dir = vrt.parent().unwrap_or_else(|| Path::new(""));
        for tile in &referenced {
            match resolve_tile(root, vrt_dir, tile) {
                Some(path) if tiles.contains(&path) => {
                    consumed.insert(path);
                }
                _ => {
                    debug!(vrt = %vrt.display(), tile = %tile.filename, "VRT tile not present");
                }
            }
        }
    }
    consumed
}

/// Classifies every visible file below `root`.
pub fn classify_tree(root: &Path, user_metadata_filename: &str) -> Result<Classification> {
    if !root.exists() {
        bail!("Input root does not exist: {:?}", root);
    }
    if !root.is_dir() {
        bail!("Input root is not a directory: {:?}", root);
    }

    let files = walk_files(root)?;
    let kinds: Vec<Kind> = files
        .iter()
        .map(|f| kind_of(f, user_metadata_filename))
        .collect();

    let vrts: Vec<&PathBuf> = files
        .iter()
        .zip(&kinds)
        .filter(|(f, k)| {
            **k == Kind::Category(Category::Raster) && lower_extension(f).as_deref() == Some("vrt")
        })
        .map(|(f, _)| f)
        .collect();
    let tiles: FxHashSet<&PathBuf> = files
        .iter()
        .zip(&kinds)
        .filter(|(_, k)| **k == Kind::Tile)
        .map(|(f, _)| f)
        .collect();
    let consumed = consumed_tiles(root, &vrts, &tiles);

    let mut buckets: BTreeMap<Category, Vec<PathBuf>> =
        ALL_CATEGORIES.iter().map(|c| (*c, Vec::new())).collect();
    for (file, kind) in files.iter().zip(&kinds) {
        let category = match kind {
            Kind::Tile if consumed.contains(file) => Category::Unclassified,
            Kind::Tile => Category::Raster,
            Kind::Category(category) => *category,
        };
        buckets.entry(category).or_default().push(file.clone());
    }

    info!(
        files = files.len(),
        vrt_tiles = consumed.len(),
        "Classification complete"
    );
    Ok(Classification { files, buckets })
}
