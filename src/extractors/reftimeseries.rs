//! Reference timeseries (`.refts.json`): a JSON catalog of remote series.
//!
//! The document is parsed into typed structs; unknown fields and wrong types are
//! rejected by serde, the remaining rules are checked by hand. Referenced URLs are
//! never contacted.

use serde::Deserialize;
use std::fs;

use super::{parse_datetime, wkt, Extractor, SourceFile};
use crate::error::{ExtractResult, ExtractionError};
use crate::models::{
    BoxCoverage, Extent, PeriodCoverage, PointCoverage, RawMetadata, RefTimeseriesRaw,
    SpatialCoverage,
};

const UNKNOWN_PROJECTION: &str = "Unknown";
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RefTsDocument {
    #[serde(rename = "timeSeriesReferenceFile")]
    file: RefTsFile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RefTsFile {
    title: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    file_version: Option<String>,
    key_words: Option<Vec<String>>,
    symbol: Option<String>,
    referenced_time_series: Vec<ReferencedSeries>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ReferencedSeries {
    begin_date: String,
    end_date: String,
    request_info: RequestInfo,
    site: Site,
    sample_medium: Option<String>,
    value_count: Option<f64>,
    variable: Variable,
    method: Method,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct Site {
    site_code: String,
    site_name: Option<String>,
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct Variable {
    variable_code: String,
    variable_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct Method {
    method_description: Option<String>,
    method_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RequestInfo {
    network_name: String,
    // Only validated by deserialization
    #[serde(rename = "refType")]
    _ref_type: RefType,
    #[serde(rename = "returnType")]
    _return_type: ReturnType,
    #[serde(rename = "serviceType")]
    _service_type: ServiceType,
    url: String,
}

#[derive(Debug, Deserialize)]
enum RefType {
    #[serde(rename = "WOF")]
    Wof,
    #[serde(rename = "WPS")]
    Wps,
    DirectFile,
}

#[derive(Debug, Deserialize)]
enum ReturnType {
    #[serde(rename = "WaterML 1.1")]
    WaterMl11,
    #[serde(rename = "WaterML 2.0")]
    WaterMl20,
    #[serde(rename = "TimeseriesML")]
    TimeseriesMl,
}

#[derive(Debug, Deserialize)]
enum ServiceType {
    #[serde(rename = "SOAP")]
    Soap,
    #[serde(rename = "REST")]
    Rest,
}

pub struct RefTimeseriesExtractor;

impl Extractor for RefTimeseriesExtractor {
    fn extract(&self, source: &SourceFile<'_>) -> ExtractResult<RawMetadata> {
        let text = fs::read_to_string(source.absolute())?;
        let doc: RefTsDocument = serde_json::from_str(&text).map_err(|e| {
            ExtractionError::Validation(format!("Not a valid reference time series json file. {e}"))
        })?;
        let file = doc.file;
        validate(&file)?;

        Ok(RawMetadata::RefTimeseries(RefTimeseriesRaw {
            title: file.title.clone(),
            description: file.abstract_text.clone(),
            keywords: file.key_words.clone().unwrap_or_default(),
            spatial_coverage: Some(spatial_coverage(&file.referenced_time_series)),
            period_coverage: period_coverage(&file.referenced_time_series)?,
            content_files: vec![source.relative.to_path_buf()],
        }))
    }
}

fn check_not_blank(value: &Option<String>, name: &str) -> ExtractResult<()> {
    match value {
        Some(v) if v.trim().is_empty() => Err(ExtractionError::Validation(format!(
            "{name} has a value of empty string"
        ))),
        _ => Ok(()),
    }
}

fn validate(file: &RefTsFile) -> ExtractResult<()> {
    check_not_blank(&file.title, "title")?;
    check_not_blank(&file.abstract_text, "abstract")?;
    check_not_blank(&file.file_version, "fileVersion")?;
    check_not_blank(&file.symbol, "symbol")?;

    if let Some(keywords) = &file.key_words {
        let mut seen = rustc_hash::FxHashSet::default();
        if !keywords.iter().all(|k| seen.insert(k.as_str())) {
            return Err(ExtractionError::Validation(
                "keyWords must be unique".to_string(),
            ));
        }
    }

    if file.referenced_time_series.is_empty() {
        return Err(ExtractionError::Validation(
            "referencedTimeSeries is empty".to_string(),
        ));
    }

    for series in &file.referenced_time_series {
        let (begin, end) = series_dates(series)?;
        if begin > end {
            return Err(ExtractionError::Validation(
                "Invalid json file. Invalid date values".to_string(),
            ));
        }
        if series.value_count.is_some_and(|c| c < 0.0) {
            return Err(ExtractionError::Validation(
                "valueCount can't be a negative number".to_string(),
            ));
        }
        if !(-90.0..=90.0).contains(&series.site.latitude)
            || !(-180.0..=180.0).contains(&series.site.longitude)
        {
            return Err(ExtractionError::Validation(format!(
                "site {} has coordinates out of range",
                series.site.site_code
            )));
        }
        for (value, name) in [
            (&series.site.site_code, "siteCode"),
            (&series.variable.variable_code, "variableCode"),
            (&series.request_info.network_name, "networkName"),
            (&series.request_info.url, "url"),
        ] {
            if value.trim().is_empty() {
                return Err(ExtractionError::Validation(format!(
                    "{name} has a value of empty string"
                )));
            }
        }
        check_not_blank(&series.sample_medium, "sampleMedium")?;
        check_not_blank(&series.site.site_name, "siteName")?;
        check_not_blank(&series.variable.variable_name, "variableName")?;
        check_not_blank(&series.method.method_description, "methodDescription")?;
        check_not_blank(&series.method.method_link, "methodLink")?;
    }
    Ok(())
}

fn series_dates(series: &ReferencedSeries) -> ExtractResult<(chrono::NaiveDateTime, chrono::NaiveDateTime)> {
    let invalid = || ExtractionError::Validation("Invalid json file. Invalid date values".to_string());
    let begin = parse_datetime(&series.begin_date).ok_or_else(invalid)?;
    let end = parse_datetime(&series.end_date).ok_or_else(invalid)?;
    Ok((begin, end))
}

fn period_coverage(series: &[ReferencedSeries]) -> ExtractResult<PeriodCoverage> {
    let mut start = None;
    let mut end = None;
    for s in series {
        let (b, e) = series_dates(s)?;
        start = Some(start.map_or(b, |cur: chrono::NaiveDateTime| cur.min(b)));
        end = Some(end.map_or(e, |cur: chrono::NaiveDateTime| cur.max(e)));
    }
    match (start, end) {
        (Some(start), Some(end)) => Ok(PeriodCoverage {
            start: start.format(DATETIME_FORMAT).to_string(),
            end: end.format(DATETIME_FORMAT).to_string(),
        }),
        _ => Err(ExtractionError::MissingMetadata(
            "referencedTimeSeries".to_string(),
        )),
    }
}

/// A point when every series shares one site code, otherwise the sites' bounding box.
fn spatial_coverage(series: &[ReferencedSeries]) -> SpatialCoverage {
    let units = Some(wkt::DECIMAL_DEGREES.to_string());
    let projection = Some(UNKNOWN_PROJECTION.to_string());
    let first = &series[0].site;
    if series.iter().all(|s| s.site.site_code == first.site_code) {
        return SpatialCoverage::Point(PointCoverage {
            name: None,
            north: first.latitude,
            east: first.longitude,
            projection,
            units,
        });
    }

    let mut extent = Extent::empty_geographic();
    for s in series {
        extent.include(s.site.latitude, s.site.longitude);
    }
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

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn series(code: &str, lat: f64, lon: f64, begin: &str, end: &str) -> Value {
        json!({
            "beginDate": begin,
            "endDate": end,
            "requestInfo": {
                "networkName": "iutah",
                "refType": "WOF",
                "returnType": "WaterML 1.1",
                "serviceType": "SOAP",
                "url": "http://data.iutahepscor.org/LoganRiverWOF/cuahsi_1_1.asmx?WSDL"
            },
            "site": {"siteCode": code, "siteName": "Logan River", "latitude": lat, "longitude": lon},
            "sampleMedium": "Surface water",
            "valueCount": 100,
            "variable": {"variableCode": "WaterTemp_EXO", "variableName": "Temperature"},
            "method": {"methodDescription": "Sonde", "methodLink": null}
        })
    }

    pub(crate) fn refts_document(series: Vec<Value>) -> Value {
        json!({
            "timeSeriesReferenceFile": {
                "title": "Logan River temperature",
                "abstract": "Temperature at two sites",
                "fileVersion": "1.0.0",
                "keyWords": ["Temperature", "Logan"],
                "symbol": "http://www.cuahsi.org/waterml/WaterML_logo.png",
                "referencedTimeSeries": series
            }
        })
    }

    fn extract(doc: &Value) -> ExtractResult<RefTimeseriesRaw> {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("t.refts.json"), doc.to_string()).unwrap();
        let source = SourceFile::new(dir.path(), Path::new("t.refts.json"));
        match RefTimeseriesExtractor.extract(&source)? {
            RawMetadata::RefTimeseries(raw) => Ok(raw),
            other => panic!("unexpected metadata {:?}", other),
        }
    }

    #[test]
    fn single_site_is_point_with_period() {
        let doc = refts_document(vec![
            series("LR_WaterLab_AA", 41.739, -111.795, "2016-04-06T00:00:00", "2016-05-01T00:00:00"),
            series("LR_WaterLab_AA", 41.739, -111.795, "2016-03-01T00:00:00", "2016-04-01T12:00:00"),
        ]);
        let raw = extract(&doc).unwrap();

        assert_eq!(raw.title.as_deref(), Some("Logan River temperature"));
        assert_eq!(raw.keywords, vec!["Temperature", "Logan"]);
        assert_eq!(raw.period_coverage.start, "2016-03-01T00:00:00");
        assert_eq!(raw.period_coverage.end, "2016-05-01T00:00:00");
        assert_eq!(raw.content_files, vec![PathBuf::from("t.refts.json")]);
        match raw.spatial_coverage {
            Some(SpatialCoverage::Point(p)) => {
                assert_eq!(p.north, 41.739);
                assert_eq!(p.projection.as_deref(), Some("Unknown"));
            }
            other => panic!("expected point, got {:?}", other),
        }
    }

    #[test]
    fn several_sites_make_a_box() {
        let doc = refts_document(vec![
            series("A", 41.7, -111.8, "2016-01-01", "2016-02-01"),
            series("B", 41.9, -111.6, "2016-01-01", "2016-02-01"),
        ]);
        match extract(&doc).unwrap().spatial_coverage {
            Some(SpatialCoverage::Box(b)) => {
                assert_eq!(b.northlimit, 41.9);
                assert_eq!(b.westlimit, -111.8);
            }
            other => panic!("expected box, got {:?}", other),
        }
    }

    #[test]
    fn rejects_invalid_documents() {
        let reversed = refts_document(vec![series("A", 41.7, -111.8, "2016-02-01", "2016-01-01")]);
        assert!(extract(&reversed).is_err());

        let mut bad_enum = refts_document(vec![series("A", 41.7, -111.8, "2016-01-01", "2016-02-01")]);
        bad_enum["timeSeriesReferenceFile"]["referencedTimeSeries"][0]["requestInfo"]["refType"] =
            json!("FTP");
        assert!(extract(&bad_enum).is_err());

        let mut blank_title = refts_document(vec![series("A", 41.7, -111.8, "2016-01-01", "2016-02-01")]);
        blank_title["timeSeriesReferenceFile"]["title"] = json!("  ");
        assert!(extract(&blank_title).is_err());

        let mut negative = refts_document(vec![series("A", 41.7, -111.8, "2016-01-01", "2016-02-01")]);
        negative["timeSeriesReferenceFile"]["referencedTimeSeries"][0]["valueCount"] = json!(-1);
        assert!(extract(&negative).is_err());

        let out_of_range = refts_document(vec![series("A", 141.7, -111.8, "2016-01-01", "2016-02-01")]);
        assert!(extract(&out_of_range).is_err());

        let mut unknown_field = refts_document(vec![series("A", 41.7, -111.8, "2016-01-01", "2016-02-01")]);
        unknown_field["timeSeriesReferenceFile"]["extra"] = json!(1);
        assert!(extract(&unknown_field).is_err());

        assert!(extract(&json!({"something": "else"})).is_err());
    }
}
