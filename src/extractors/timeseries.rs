//! Timeseries aggregations: plain CSV tables and ODM2 SQLite databases.

use rusqlite::{Connection, OpenFlags, OptionalExtension};
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;

use super::{lower_extension, parse_datetime, stem_title, wkt, Extractor, SourceFile};
use crate::error::{ExtractResult, ExtractionError};
use crate::models::{
    BoxCoverage, Extent, PeriodCoverage, PointCoverage, RawMetadata, SpatialCoverage,
    TimeseriesRaw,
};

/// Tables an ODM2 database must have for extraction to make sense.
const ODM2_REQUIRED_TABLES: &[&str] = &[
    "Datasets",
    "Variables",
    "Sites",
    "SamplingFeatures",
    "Results",
    "TimeSeriesResultValues",
];

pub struct TimeseriesExtractor;

impl Extractor for TimeseriesExtractor {
    fn extract(&self, source: &SourceFile<'_>) -> ExtractResult<RawMetadata> {
        let raw = match lower_extension(source.relative).as_deref() {
            Some("csv") => extract_csv(source)?,
            Some("sqlite") => extract_sqlite(source)?,
            _ => {
                return Err(ExtractionError::InvalidFormat(format!(
                    "not a timeseries file: {}",
                    source.relative.display()
                )))
            }
        };
        Ok(RawMetadata::Timeseries(raw))
    }
}

fn csv_error(reason: &str) -> ExtractionError {
    ExtractionError::Validation(format!("not a valid timeseries csv file. {reason}"))
}

/// Header check, then one pass over the rows keeping only the first and last date.
fn extract_csv(source: &SourceFile<'_>) -> ExtractResult<TimeseriesRaw> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(source.absolute())?;

    let header: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    validate_csv_header(&header)?;

    let mut first_date: Option<String> = None;
    let mut last_date: Option<String> = None;
    let mut row_count: u64 = 0;

    for record in reader.records() {
        let record = record?;
        if record.len() != header.len() {
            return Err(csv_error(
                "Number of columns in the header is not same as the data columns.",
            ));
        }
        let date = record.get(0).unwrap_or_default().trim();
        if parse_datetime(date).is_none() {
            return Err(csv_error("Data for the first column must be a date value."));
        }
        if record.iter().skip(1).any(|v| v.trim().parse::<f64>().is_err()) {
            return Err(csv_error("Data values must be numeric."));
        }
        if first_date.is_none() {
            first_date = Some(date.to_string());
        }
        last_date = Some(date.to_string());
        row_count += 1;
    }

    let (Some(start), Some(end)) = (first_date, last_date) else {
        return Err(csv_error("There needs to be at least two rows of data."));
    };
    if row_count < 2 {
        return Err(csv_error("There needs to be at least two rows of data."));
    }

    let value_counts = header
        .iter()
        .skip(1)
        .map(|name| (name.clone(), row_count))
        .collect();

    Ok(TimeseriesRaw {
        title: Some(stem_title(source.relative)),
        description: None,
        keywords: Vec::new(),
        value_counts,
        spatial_coverage: None,
        period_coverage: Some(PeriodCoverage { start, end }),
        content_files: vec![source.relative.to_path_buf()],
    })
}

fn validate_csv_header(header: &[String]) -> ExtractResult<()> {
    if header.iter().any(String::is_empty) {
        return Err(csv_error("Column heading is missing."));
    }
    if header.len() < 2 {
        return Err(csv_error("There needs to be at least 2 columns of data."));
    }
    if header.iter().any(|h| h.parse::<f64>().is_ok()) {
        return Err(csv_error("Column heading must be a string."));
    }
    let unique: FxHashSet<&str> = header.iter().map(String::as_str).collect();
    if unique.len() != header.len() {
        return Err(csv_error("There are duplicate column headings."));
    }
    Ok(())
}

fn extract_sqlite(source: &SourceFile<'_>) -> ExtractResult<TimeseriesRaw> {
    let conn = Connection::open_with_flags(
        source.absolute(),
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    validate_odm2(&conn)?;

    let dataset: Option<(Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT DataSetTitle, DataSetAbstract FROM DataSets LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let (title, description) = dataset.unwrap_or_default();

    let mut keywords: Vec<String> = Vec::new();
    let mut stmt = conn.prepare("SELECT VariableNameCV FROM Variables ORDER BY VariableID")?;
    for name in stmt.query_map([], |row| row.get::<_, Option<String>>(0))? {
        for keyword in name?.unwrap_or_default().split(',') {
            let keyword = keyword.trim();
            if !keyword.is_empty() && !keywords.iter().any(|k| k == keyword) {
                keywords.push(keyword.to_string());
            }
        }
    }

    let mut value_counts = BTreeMap::new();
    let mut stmt = conn.prepare(
        "SELECT v.VariableCode, r.ValueCount FROM Results r \
         JOIN Variables v ON r.VariableID = v.VariableID ORDER BY r.ResultID",
    )?;
    for row in stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Option<i64>>(1)?))
    })? {
        let (code, count) = row?;
        *value_counts.entry(code).or_insert(0) += count.unwrap_or(0).max(0) as u64;
    }

    let period_coverage = conn
        .query_row(
            "SELECT MIN(ValueDateTime), MAX(ValueDateTime) FROM TimeSeriesResultValues",
            [],
            |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?)),
        )
        .map(|(start, end)| Some(PeriodCoverage { start: start?, end: end? }))?;

    Ok(TimeseriesRaw {
        title: title.filter(|t| !t.trim().is_empty()),
        description: description.filter(|d| !d.trim().is_empty()),
        keywords,
        value_counts,
        spatial_coverage: site_coverage(&conn)?,
        period_coverage,
        content_files: vec![source.relative.to_path_buf()],
    })
}

fn validate_odm2(conn: &Connection) -> ExtractResult<()> {
    for table in ODM2_REQUIRED_TABLES {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
            [table],
            |row| row.get(0),
        )?;
        if count == 0 {
            return Err(ExtractionError::Validation(format!(
                "not a valid ODM2 SQLite file. Table '{table}' is missing."
            )));
        }
    }
    Ok(())
}

struct Site {
    latitude: Option<f64>,
    longitude: Option<f64>,
    srs_name: Option<String>,
}

/// Point for a single site, bounding box for several.
fn site_coverage(conn: &Connection) -> ExtractResult<Option<SpatialCoverage>> {
    let mut stmt = conn.prepare(
        "SELECT s.Latitude, s.Longitude, sr.SRSName FROM Sites s \
         LEFT JOIN SpatialReferences sr ON s.SpatialReferenceID = sr.SpatialReferenceID \
         ORDER BY s.SamplingFeatureID",
    );
    // Older files have no SpatialReferences table
    if stmt.is_err() {
        stmt = conn.prepare(
            "SELECT Latitude, Longitude, NULL FROM Sites ORDER BY SamplingFeatureID",
        );
    }
    let mut stmt = stmt?;
    let sites = stmt
        .query_map([], |row| {
            Ok(Site {
                latitude: row.get(0)?,
                longitude: row.get(1)?,
                srs_name: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(coverage_from_sites(&sites))
}

fn coverage_from_sites(sites: &[Site]) -> Option<SpatialCoverage> {
    let units = Some(wkt::DECIMAL_DEGREES.to_string());
    if let [site] = sites {
        return Some(SpatialCoverage::Point(PointCoverage {
            name: None,
            north: site.latitude?,
            east: site.longitude?,
            projection: site.srs_name.clone(),
            units,
        }));
    }

    let mut extent = Extent::empty_geographic();
    let mut any = false;
    for site in sites {
        if let (Some(lat), Some(lon)) = (site.latitude, site.longitude) {
            extent.include(lat, lon);
            any = true;
        }
    }
    if !any {
        return None;
    }
    let projection = sites
        .iter()
        .find_map(|s| s.srs_name.clone())
        .unwrap_or_else(|| wkt::WGS84_PROJECTION.to_string());
    Some(SpatialCoverage::Box(BoxCoverage {
        name: None,
        northlimit: extent.north,
        eastlimit: extent.east,
        southlimit: extent.south,
        westlimit: extent.west,
        projection: Some(projection),
        units,
    }))
}
