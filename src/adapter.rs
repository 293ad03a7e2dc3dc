//! Normalizes typed extractor output into schema.org-style catalog records.
//!
//! `adapt` is total: every `RawMetadata` variant maps to a record. The dispatcher
//! fills in `url` and `associatedMedia`; only the linker fills `hasPart`/`isPartOf`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::media::MediaObject;
use crate::models::{
    FeatureRaw, NetCdfRaw, PeriodCoverage, RasterRaw, RawMetadata, RefTimeseriesRaw,
    SpatialCoverage, SpatialReference, TimeseriesRaw, UserMetaRaw,
};

pub const SCHEMA_CONTEXT: &str = "https://schema.org";
pub const DATASET_TYPE: &str = "Dataset";

/// Keys the pipeline owns; user metadata never supplies them.
const RESERVED_KEYS: &[&str] = &["url", "associatedMedia", "hasPart", "isPartOf"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogRecord {
    #[serde(rename = "@context")]
    pub context: String,
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub creator: Vec<Creator>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spatial_coverage: Option<Place>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporal_coverage: Option<TemporalCoverage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variable_measured: Vec<PropertyValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_property: Vec<PropertyValue>,
    #[serde(default)]
    pub associated_media: Vec<MediaObject>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub has_part: Vec<PartRelation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub is_part_of: Vec<String>,
    /// Pass-through fields from user metadata.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CatalogRecord {
    pub fn new(name: Option<String>) -> Self {
        Self {
            context: SCHEMA_CONTEXT.to_string(),
            kind: DATASET_TYPE.to_string(),
            name,
            description: None,
            url: None,
            keywords: Vec::new(),
            creator: Vec::new(),
            license: None,
            spatial_coverage: None,
            temporal_coverage: None,
            variable_measured: Vec::new(),
            additional_property: Vec::new(),
            associated_media: Vec::new(),
            has_part: Vec::new(),
            is_part_of: Vec::new(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Creator {
    #[serde(rename = "@type")]
    pub kind: String,
    pub name: String,
}

/// `hasPart` entry pointing at a child document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartRelation {
    #[serde(rename = "@type")]
    pub kind: String,
    pub name: String,
    pub description: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Place {
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub geo: Geo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Geo {
    Shape {
        #[serde(rename = "@type")]
        kind: String,
        #[serde(rename = "box")]
        bbox: String,
    },
    Coordinates {
        #[serde(rename = "@type")]
        kind: String,
        latitude: f64,
        longitude: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporalCoverage {
    pub start_date: String,
    pub end_date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyValue {
    #[serde(rename = "@type")]
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_code: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
}

impl PropertyValue {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            kind: "PropertyValue".to_string(),
            name: name.into(),
            description: None,
            unit_code: None,
            value: value.into(),
        }
    }

    fn with_unit(mut self, unit: Option<String>) -> Self {
        self.unit_code = unit;
        self
    }

    fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl From<&SpatialCoverage> for Place {
    fn from(coverage: &SpatialCoverage) -> Self {
        match coverage {
            SpatialCoverage::Box(b) => Place {
                kind: "Place".to_string(),
                name: b.name.clone(),
                geo: Geo::Shape {
                    kind: "GeoShape".to_string(),
                    bbox: format!(
                        "{} {} {} {}",
                        b.northlimit, b.eastlimit, b.southlimit, b.westlimit
                    ),
                },
            },
            SpatialCoverage::Point(p) => Place {
                kind: "Place".to_string(),
                name: p.name.clone(),
                geo: Geo::Coordinates {
                    kind: "GeoCoordinates".to_string(),
                    latitude: p.north,
                    longitude: p.east,
                },
            },
        }
    }
}

impl From<&PeriodCoverage> for TemporalCoverage {
    fn from(period: &PeriodCoverage) -> Self {
        TemporalCoverage {
            start_date: period.start.clone(),
            end_date: period.end.clone(),
        }
    }
}

pub fn adapt(raw: RawMetadata) -> CatalogRecord {
    match raw {
        RawMetadata::Raster(r) => adapt_raster(r),
        RawMetadata::Feature(r) => adapt_feature(r),
        RawMetadata::NetCdf(r) => adapt_netcdf(r),
        RawMetadata::Timeseries(r) => adapt_timeseries(r),
        RawMetadata::RefTimeseries(r) => adapt_reftimeseries(r),
        RawMetadata::UserMeta(r) => adapt_user_meta(r),
    }
}

fn spatial_reference_property(reference: &SpatialReference) -> PropertyValue {
    let mut parts = Vec::new();
    let mut push = |name: &str, value: Value| {
        if !value.is_null() {
            parts.push(PropertyValue::new(name, value).to_value());
        }
    };
    push("projection_string", json!(reference.projection_string));
    push("projection", json!(reference.projection_name));
    push("datum", json!(reference.datum));
    push("units", json!(reference.units));
    push("northlimit", json!(reference.extent.north));
    push("eastlimit", json!(reference.extent.east));
    push("southlimit", json!(reference.extent.south));
    push("westlimit", json!(reference.extent.west));
    PropertyValue::new("spatial_reference", Value::Array(parts))
}

fn adapt_raster(r: RasterRaw) -> CatalogRecord {
    let mut record = CatalogRecord::new(Some(r.title));
    record.spatial_coverage = r.spatial_coverage.as_ref().map(Place::from);

    let cell = &r.cell;
    record.additional_property.push(PropertyValue::new("rows", cell.rows));
    record.additional_property.push(PropertyValue::new("columns", cell.columns));
    if let Some(x) = cell.cell_size_x {
        record.additional_property.push(PropertyValue::new("cellSizeXValue", x));
    }
    if let Some(y) = cell.cell_size_y {
        record.additional_property.push(PropertyValue::new("cellSizeYValue", y));
    }
    if let Some(t) = &cell.cell_data_type {
        record.additional_property.push(PropertyValue::new("cellDataType", t.as_str()));
    }
    for band in &r.bands {
        let no_data = PropertyValue::new("no_data_value", json!(band.no_data_value));
        record.additional_property.push(
            PropertyValue::new(band.name.as_str(), no_data.to_value())
                .with_unit(band.data_type.clone()),
        );
    }
    if let Some(reference) = &r.spatial_reference {
        record.additional_property.push(spatial_reference_property(reference));
    }
    record
}

fn adapt_feature(r: FeatureRaw) -> CatalogRecord {
    let mut record = CatalogRecord::new(Some(r.title));
    record.description = r.description;
    record.keywords = r.keywords;
    record.spatial_coverage = r.spatial_coverage.as_ref().map(Place::from);

    record
        .additional_property
        .push(PropertyValue::new("geometry_type", r.geometry_type.as_str()));
    record
        .additional_property
        .push(PropertyValue::new("feature_count", r.feature_count));
    let fields: Vec<Value> = r
        .fields
        .iter()
        .map(|f| {
            PropertyValue::new(f.name.as_str(), f.field_type.as_str())
                .with_description(Some(format!("width {}, precision {}", f.length, f.decimals)))
                .to_value()
        })
        .collect();
    if !fields.is_empty() {
        record
            .additional_property
            .push(PropertyValue::new("field_information", Value::Array(fields)));
    }
    record
        .additional_property
        .push(spatial_reference_property(&r.spatial_reference));
    record
}

fn adapt_netcdf(r: NetCdfRaw) -> CatalogRecord {
    let mut record = CatalogRecord::new(r.title);
    record.description = r.description;
    record.keywords = r.keywords;
    record.license = r.rights;
    record.creator = r
        .creator_name
        .into_iter()
        .map(|name| Creator {
            kind: "Person".to_string(),
            name,
        })
        .collect();
    record.spatial_coverage = r.spatial_coverage.as_ref().map(Place::from);
    record.temporal_coverage = r.period_coverage.as_ref().map(TemporalCoverage::from);
    record.variable_measured = r
        .variables
        .into_iter()
        .map(|v| {
            let shape = PropertyValue::new("shape", v.shape).with_unit(Some(v.data_type));
            PropertyValue::new(v.name, shape.to_value())
                .with_unit(v.unit)
                .with_description(v.descriptive_name)
        })
        .collect();
    record
}

fn adapt_timeseries(r: TimeseriesRaw) -> CatalogRecord {
    let mut record = CatalogRecord::new(r.title);
    record.description = r.description;
    record.keywords = r.keywords;
    record.spatial_coverage = r.spatial_coverage.as_ref().map(Place::from);
    record.temporal_coverage = r.period_coverage.as_ref().map(TemporalCoverage::from);
    record.variable_measured = r
        .value_counts
        .into_iter()
        .map(|(series, count)| {
            PropertyValue::new(series, PropertyValue::new("value_count", count).to_value())
        })
        .collect();
    record
}

fn adapt_reftimeseries(r: RefTimeseriesRaw) -> CatalogRecord {
    let mut record = CatalogRecord::new(r.title);
    record.description = r.description;
    record.keywords = r.keywords;
    record.spatial_coverage = r.spatial_coverage.as_ref().map(Place::from);
    record.temporal_coverage = Some(TemporalCoverage::from(&r.period_coverage));
    record
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key) {
        Some(Value::String(_)) => map.remove(key).and_then(|v| v.as_str().map(str::to_string)),
        _ => None,
    }
}

fn adapt_user_meta(r: UserMetaRaw) -> CatalogRecord {
    let mut fields = r.fields;
    for key in RESERVED_KEYS {
        fields.remove(*key);
    }

    let mut record = CatalogRecord::new(take_string(&mut fields, "name"));
    if let Some(kind) = take_string(&mut fields, "@type") {
        record.kind = kind;
    }
    if let Some(context) = take_string(&mut fields, "@context") {
        record.context = context;
    }
    fields.remove("@type");
    fields.remove("@context");
    record.description = take_string(&mut fields, "description");

    if let Some(Value::Array(items)) = fields.get("keywords") {
        if items.iter().all(Value::is_string) {
            record.keywords = items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            fields.remove("keywords");
        }
    }

    record.extra = fields;
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        BandInfo, BoxCoverage, CellInfo, Extent, NcVariable, PointCoverage,
    };
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn extent() -> Extent {
        Extent {
            north: 42.0,
            south: 41.0,
            east: -110.0,
            west: -112.0,
        }
    }

    #[test]
    fn box_coverage_becomes_geo_shape() {
        let coverage = SpatialCoverage::Box(BoxCoverage {
            name: None,
            northlimit: 42.0,
            eastlimit: -110.0,
            southlimit: 41.0,
            westlimit: -112.0,
            projection: None,
            units: None,
        });
        let place = serde_json::to_value(Place::from(&coverage)).unwrap();
        assert_eq!(place["@type"], "Place");
        assert_eq!(place["geo"]["@type"], "GeoShape");
        assert_eq!(place["geo"]["box"], "42 -110 41 -112");
    }

    #[test]
    fn point_coverage_becomes_coordinates() {
        let coverage = SpatialCoverage::Point(PointCoverage {
            name: Some("Logan".to_string()),
            north: 41.7,
            east: -111.8,
            projection: None,
            units: None,
        });
        let place = serde_json::to_value(Place::from(&coverage)).unwrap();
        assert_eq!(place["name"], "Logan");
        assert_eq!(place["geo"]["latitude"], 41.7);
        assert_eq!(place["geo"]["longitude"], -111.8);
    }

    #[test]
    fn raster_record_carries_cell_and_band_properties() {
        let record = adapt(RawMetadata::Raster(RasterRaw {
            title: "logan".to_string(),
            cell: CellInfo {
                rows: 2,
                columns: 4,
                cell_size_x: Some(0.5),
                cell_size_y: Some(0.5),
                cell_data_type: Some("Float32".to_string()),
            },
            bands: vec![BandInfo {
                name: "Band_1".to_string(),
                data_type: Some("Float32".to_string()),
                no_data_value: Some(-9999.0),
            }],
            spatial_reference: Some(SpatialReference {
                extent: extent(),
                projection_string: None,
                projection_name: Some("WGS 84".to_string()),
                datum: None,
                units: None,
            }),
            spatial_coverage: None,
            content_files: vec![PathBuf::from("logan.vrt")],
        }));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["@context"], SCHEMA_CONTEXT);
        assert_eq!(json["@type"], "Dataset");
        assert_eq!(json["name"], "logan");
        let props = json["additionalProperty"].as_array().unwrap();
        let names: Vec<_> = props.iter().map(|p| p["name"].as_str().unwrap()).collect();
        assert_eq!(
            names,
            vec![
                "rows",
                "columns",
                "cellSizeXValue",
                "cellSizeYValue",
                "cellDataType",
                "Band_1",
                "spatial_reference"
            ]
        );
        assert_eq!(props[5]["value"]["value"], -9999.0);
        assert!(json.get("hasPart").is_none());
        assert!(json.get("isPartOf").is_none());
        assert_eq!(json["associatedMedia"], json!([]));
    }

    #[test]
    fn netcdf_variables_are_measured() {
        let record = adapt(RawMetadata::NetCdf(NetCdfRaw {
            title: Some("Snow".to_string()),
            description: None,
            keywords: vec!["snow".to_string()],
            rights: Some("CC BY".to_string()),
            creator_name: Some("UWRL".to_string()),
            variables: vec![NcVariable {
                name: "SWE".to_string(),
                descriptive_name: Some("Snow water equivalent".to_string()),
                unit: Some("m".to_string()),
                data_type: "float".to_string(),
                shape: "time,y,x".to_string(),
            }],
            spatial_coverage: None,
            period_coverage: Some(PeriodCoverage {
                start: "2009-10-01".to_string(),
                end: "2010-06-30".to_string(),
            }),
            content_files: vec![],
        }));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["license"], "CC BY");
        assert_eq!(json["creator"][0]["name"], "UWRL");
        assert_eq!(json["temporalCoverage"]["startDate"], "2009-10-01");
        let var = &json["variableMeasured"][0];
        assert_eq!(var["name"], "SWE");
        assert_eq!(var["unitCode"], "m");
        assert_eq!(var["description"], "Snow water equivalent");
        assert_eq!(var["value"]["name"], "shape");
        assert_eq!(var["value"]["unitCode"], "float");
        assert_eq!(var["value"]["value"], "time,y,x");
    }

    #[test]
    fn timeseries_value_counts_become_variables() {
        let mut counts = BTreeMap::new();
        counts.insert("Flow".to_string(), 3);
        let record = adapt(RawMetadata::Timeseries(TimeseriesRaw {
            title: Some("flow".to_string()),
            description: None,
            keywords: vec![],
            value_counts: counts,
            spatial_coverage: None,
            period_coverage: None,
            content_files: vec![],
        }));
        assert_eq!(record.variable_measured.len(), 1);
        assert_eq!(record.variable_measured[0].name, "Flow");
        assert_eq!(record.variable_measured[0].value["value"], 3);
    }

    #[test]
    fn user_meta_fields_pass_through() {
        let fields = json!({
            "name": "Logan River dataset",
            "description": "All the data",
            "keywords": ["water", "Utah"],
            "creator": [{"name": "Someone"}],
            "url": "https://elsewhere.example/x",
            "hasPart": [{"name": "stale"}],
            "@type": "Dataset"
        });
        let Value::Object(fields) = fields else { unreachable!() };
        let record = adapt(RawMetadata::UserMeta(UserMetaRaw {
            fields,
            content_files: vec![],
        }));

        assert_eq!(record.name.as_deref(), Some("Logan River dataset"));
        assert_eq!(record.description.as_deref(), Some("All the data"));
        assert_eq!(record.keywords, vec!["water", "Utah"]);
        assert!(record.url.is_none());
        assert!(record.has_part.is_empty());
        assert_eq!(record.extra["creator"][0]["name"], "Someone");

        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json.matches("\"name\":\"Logan River dataset\"").count(), 1);
    }
}
