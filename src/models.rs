use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Aggregation category inferred from a file's suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Raster,
    Netcdf,
    Feature,
    Timeseries,
    Reftimeseries,
    UserMeta,
    Unclassified,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Raster => "raster",
            Category::Netcdf => "netcdf",
            Category::Feature => "feature",
            Category::Timeseries => "timeseries",
            Category::Reftimeseries => "reftimeseries",
            Category::UserMeta => "user_meta",
            Category::Unclassified => "unclassified",
        }
    }

    /// Categories that have an extractor and produce a document.
    pub fn is_dispatchable(&self) -> bool {
        !matches!(self, Category::Unclassified)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified source file. `path` is relative to the input root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub path: PathBuf,
    pub category: Category,
}

impl FileEntry {
    pub fn new(path: impl Into<PathBuf>, category: Category) -> Self {
        Self {
            path: path.into(),
            category,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    Extracted,
    Failed,
    TimedOut,
}

/// Exactly one per dispatched file, win or fail.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub entry: FileEntry,
    pub output_path: PathBuf,
    pub status: DispatchStatus,
}

impl DispatchOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == DispatchStatus::Extracted
    }
}

/// Source file to generated document, for ordinary (non-dataset) aggregations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub source: PathBuf,
    pub document: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxCoverage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub northlimit: f64,
    pub eastlimit: f64,
    pub southlimit: f64,
    pub westlimit: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointCoverage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub north: f64,
    pub east: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpatialCoverage {
    Box(BoxCoverage),
    Point(PointCoverage),
}

impl SpatialCoverage {
    /// Degenerate extents collapse to a point.
    pub fn from_extent(extent: &Extent, projection: Option<String>, units: Option<String>) -> Self {
        if extent.west == extent.east && extent.north == extent.south {
            SpatialCoverage::Point(PointCoverage {
                name: None,
                north: extent.north,
                east: extent.east,
                projection,
                units,
            })
        } else {
            SpatialCoverage::Box(BoxCoverage {
                name: None,
                northlimit: extent.north,
                eastlimit: extent.east,
                southlimit: extent.south,
                westlimit: extent.west,
                projection,
                units,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodCoverage {
    pub start: String,
    pub end: String,
}

/// Bounding box in the dataset's native coordinate system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl Extent {
    /// Accumulator start that any real coordinate will tighten.
    pub fn empty_geographic() -> Self {
        Self {
            north: -90.0,
            south: 90.0,
            east: -180.0,
            west: 180.0,
        }
    }

    pub fn include(&mut self, lat: f64, lon: f64) {
        self.north = self.north.max(lat);
        self.south = self.south.min(lat);
        self.east = self.east.max(lon);
        self.west = self.west.min(lon);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpatialReference {
    pub extent: Extent,
    pub projection_string: Option<String>,
    pub projection_name: Option<String>,
    pub datum: Option<String>,
    pub units: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CellInfo {
    pub rows: u64,
    pub columns: u64,
    pub cell_size_x: Option<f64>,
    pub cell_size_y: Option<f64>,
    pub cell_data_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BandInfo {
    pub name: String,
    pub data_type: Option<String>,
    pub no_data_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RasterRaw {
    pub title: String,
    pub cell: CellInfo,
    pub bands: Vec<BandInfo>,
    pub spatial_reference: Option<SpatialReference>,
    pub spatial_coverage: Option<SpatialCoverage>,
    pub content_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub field_type: String,
    pub length: u8,
    pub decimals: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRaw {
    pub title: String,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub geometry_type: String,
    pub feature_count: u64,
    pub fields: Vec<FieldInfo>,
    pub spatial_reference: SpatialReference,
    pub spatial_coverage: Option<SpatialCoverage>,
    pub content_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NcVariable {
    pub name: String,
    pub descriptive_name: Option<String>,
    pub unit: Option<String>,
    pub data_type: String,
    pub shape: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetCdfRaw {
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub rights: Option<String>,
    pub creator_name: Option<String>,
    pub variables: Vec<NcVariable>,
    pub spatial_coverage: Option<SpatialCoverage>,
    pub period_coverage: Option<PeriodCoverage>,
    pub content_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeseriesRaw {
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    /// Series name to number of data points
    pub value_counts: BTreeMap<String, u64>,
    pub spatial_coverage: Option<SpatialCoverage>,
    pub period_coverage: Option<PeriodCoverage>,
    pub content_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefTimeseriesRaw {
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub spatial_coverage: Option<SpatialCoverage>,
    pub period_coverage: PeriodCoverage,
    pub content_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserMetaRaw {
    pub fields: serde_json::Map<String, serde_json::Value>,
    pub content_files: Vec<PathBuf>,
}

/// Raw extractor output, one variant per category.
#[derive(Debug, Clone, PartialEq)]
pub enum RawMetadata {
    Raster(RasterRaw),
    Feature(FeatureRaw),
    NetCdf(NetCdfRaw),
    Timeseries(TimeseriesRaw),
    RefTimeseries(RefTimeseriesRaw),
    UserMeta(UserMetaRaw),
}

impl RawMetadata {
    pub fn content_files(&self) -> &[PathBuf] {
        match self {
            RawMetadata::Raster(r) => &r.content_files,
            RawMetadata::Feature(r) => &r.content_files,
            RawMetadata::NetCdf(r) => &r.content_files,
            RawMetadata::Timeseries(r) => &r.content_files,
            RawMetadata::RefTimeseries(r) => &r.content_files,
            RawMetadata::UserMeta(r) => &r.content_files,
        }
    }
}

/// Root-relative path rendered with forward slashes, as used in URLs.
pub fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
