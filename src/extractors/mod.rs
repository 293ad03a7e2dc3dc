//! Per-format metadata extractors.
//!
//! Every extractor is a pure function of one source file: it reads the file (and its
//! sidecars) and returns typed [`RawMetadata`] or an [`ExtractionError`]. The
//! dispatcher never looks inside an extractor; it only picks one by [`Category`].

pub mod feature;
pub mod netcdf;
pub mod raster;
pub mod reftimeseries;
pub mod timeseries;
pub mod user_meta;
mod wkt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::ExtractResult;
use crate::models::{Category, RawMetadata};

/// A file addressed by the input root plus its root-relative path.
#[derive(Debug, Clone, Copy)]
pub struct SourceFile<'a> {
    pub root: &'a Path,
    pub relative: &'a Path,
}

impl<'a> SourceFile<'a> {
    pub fn new(root: &'a Path, relative: &'a Path) -> Self {
        Self { root, relative }
    }

    pub fn absolute(&self) -> PathBuf {
        self.root.join(self.relative)
    }

    /// Directory of the file, relative to the root ("" at top level).
    pub fn relative_dir(&self) -> &'a Path {
        self.relative.parent().unwrap_or_else(|| Path::new(""))
    }

    pub fn file_name(&self) -> String {
        self.relative
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

pub trait Extractor: Send + Sync {
    fn extract(&self, source: &SourceFile<'_>) -> ExtractResult<RawMetadata>;
}

impl<F> Extractor for F
where
    F: Fn(&SourceFile<'_>) -> ExtractResult<RawMetadata> + Send + Sync,
{
    fn extract(&self, source: &SourceFile<'_>) -> ExtractResult<RawMetadata> {
        self(source)
    }
}

/// Registry of extractors keyed by category.
#[derive(Clone, Default)]
pub struct Extractors {
    by_category: HashMap<Category, Arc<dyn Extractor>>,
}

impl Extractors {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The native extractors for every dispatchable category.
    pub fn builtin() -> Self {
        Self::empty()
            .with(Category::Raster, raster::RasterExtractor)
            .with(Category::Feature, feature::FeatureExtractor)
            .with(Category::Netcdf, netcdf::NetCdfExtractor::default())
            .with(Category::Timeseries, timeseries::TimeseriesExtractor)
            .with(Category::Reftimeseries, reftimeseries::RefTimeseriesExtractor)
            .with(Category::UserMeta, user_meta::UserMetaExtractor)
    }

    /// Registers (or replaces) the extractor for `category`.
    pub fn with(mut self, category: Category, extractor: impl Extractor + 'static) -> Self {
        self.by_category.insert(category, Arc::new(extractor));
        self
    }

    pub fn get(&self, category: Category) -> Option<Arc<dyn Extractor>> {
        self.by_category.get(&category).cloned()
    }
}

/// Lowercased extension without the dot.
pub(crate) fn lower_extension(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

/// File stem used as a fallback title.
pub(crate) fn stem_title(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

/// Lenient date/time parsing. Offsets are normalized to UTC and dropped. Bare
/// numbers are never dates.
pub(crate) fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() || value.parse::<f64>().is_ok() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(value, f).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(value, f).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractionError;

    #[test]
    fn source_file_paths() {
        let source = SourceFile::new(Path::new("/data"), Path::new("a/b/c.shp"));
        assert_eq!(source.absolute(), PathBuf::from("/data/a/b/c.shp"));
        assert_eq!(source.relative_dir(), Path::new("a/b"));
        assert_eq!(source.file_name(), "c.shp");

        let top = SourceFile::new(Path::new("/data"), Path::new("c.shp"));
        assert_eq!(top.relative_dir(), Path::new(""));
    }

    #[test]
    fn builtin_covers_dispatchable_categories() {
        let extractors = Extractors::builtin();
        for category in [
            Category::Raster,
            Category::Netcdf,
            Category::Feature,
            Category::Timeseries,
            Category::Reftimeseries,
            Category::UserMeta,
        ] {
            assert!(extractors.get(category).is_some(), "{category}");
        }
        assert!(extractors.get(Category::Unclassified).is_none());
    }

    #[test]
    fn closures_are_extractors() {
        let extractors = Extractors::empty().with(
            Category::Raster,
            |_: &SourceFile<'_>| -> ExtractResult<RawMetadata> {
                Err(ExtractionError::InvalidFormat("nope".into()))
            },
        );
        let source = SourceFile::new(Path::new("/"), Path::new("x.tif"));
        let result = extractors.get(Category::Raster).unwrap().extract(&source);
        assert!(matches!(result, Err(ExtractionError::InvalidFormat(_))));
    }

    #[test]
    fn parses_common_datetime_shapes() {
        let expected = NaiveDate::from_ymd_opt(2015, 3, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        assert_eq!(parse_datetime("2015-03-01T12:30:00"), Some(expected));
        assert_eq!(parse_datetime("2015-03-01 12:30:00"), Some(expected));
        assert_eq!(parse_datetime("2015-03-01T19:30:00+07:00"), Some(expected));
        assert_eq!(parse_datetime("03/01/2015 12:30"), Some(expected));
        assert_eq!(
            parse_datetime("2015-03-01"),
            NaiveDate::from_ymd_opt(2015, 3, 1).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(parse_datetime("20080101"), None);
        assert_eq!(parse_datetime("1.6026"), None);
        assert_eq!(parse_datetime("soon"), None);
    }

    #[test]
    fn stem_and_extension_helpers() {
        assert_eq!(lower_extension(Path::new("a/B.TIF")).as_deref(), Some("tif"));
        assert_eq!(stem_title(Path::new("a/logan.vrt")), "logan");
    }
}
