//! NetCDF aggregations, read through the `ncdump -h` header listing.
//!
//! Only the CDL header is parsed: global ACDD/CF attributes, dimensions and variable
//! declarations. No data values are read.

use std::collections::BTreeMap;
use std::process::Command;

use super::{stem_title, wkt, Extractor, SourceFile};
use crate::error::{ExtractResult, ExtractionError};
use crate::models::{Extent, NcVariable, NetCdfRaw, PeriodCoverage, RawMetadata, SpatialCoverage};

const DEFAULT_NCDUMP: &str = "ncdump";

pub struct NetCdfExtractor {
    command: String,
}

impl Default for NetCdfExtractor {
    fn default() -> Self {
        Self::with_command(DEFAULT_NCDUMP)
    }
}

impl NetCdfExtractor {
    pub fn with_command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn dump_header(&self, source: &SourceFile<'_>) -> ExtractResult<String> {
        let output = Command::new(&self.command)
            .arg("-h")
            .arg(source.absolute())
            .output()
            .map_err(|e| ExtractionError::Command(format!("Failed to run {}: {}", self.command, e)))?;

        if !output.status.success() {
            return Err(ExtractionError::Command(format!(
                "{} failed: {}",
                self.command,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Extractor for NetCdfExtractor {
    fn extract(&self, source: &SourceFile<'_>) -> ExtractResult<RawMetadata> {
        let header = parse_cdl_header(&self.dump_header(source)?)?;
        Ok(RawMetadata::NetCdf(header.into_raw(source)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Numbers(Vec<f64>),
}

impl AttrValue {
    fn as_text(&self) -> Option<String> {
        match self {
            AttrValue::Text(s) => Some(normalize_text(s)).filter(|s| !s.is_empty()),
            AttrValue::Numbers(_) => None,
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            AttrValue::Numbers(values) => values.first().copied(),
            AttrValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CdlVariable {
    pub name: String,
    pub data_type: String,
    pub dimensions: Vec<String>,
    pub attributes: BTreeMap<String, AttrValue>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CdlHeader {
    pub dimensions: Vec<String>,
    pub variables: Vec<CdlVariable>,
    pub global_attributes: BTreeMap<String, AttrValue>,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Preamble,
    Dimensions,
    Variables,
}

/// Parses `ncdump -h` output. Statements may span several lines and end with `;`.
pub fn parse_cdl_header(text: &str) -> ExtractResult<CdlHeader> {
    let mut lines = text.lines();
    let first = lines
        .by_ref()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default();
    if !(first.starts_with("netcdf ") && first.ends_with('{')) {
        return Err(ExtractionError::InvalidFormat(
            "not an ncdump header listing".to_string(),
        ));
    }

    let mut header = CdlHeader::default();
    let mut section = Section::Preamble;
    let mut statement = String::new();

    for line in lines {
        let line = strip_comment(line).trim();
        if line.is_empty() {
            continue;
        }
        match line {
            "dimensions:" => {
                section = Section::Dimensions;
                continue;
            }
            "variables:" => {
                section = Section::Variables;
                continue;
            }
            "}" => break,
            _ => {}
        }
        if line.starts_with("data:") {
            break;
        }

        if !statement.is_empty() {
            statement.push(' ');
        }
        statement.push_str(line);
        if !line.ends_with(';') {
            continue;
        }
        let stmt = statement.trim_end_matches(';').trim().to_string();
        statement.clear();

        match section {
            Section::Dimensions => {
                if let Some((name, _)) = stmt.split_once('=') {
                    header.dimensions.push(name.trim().to_string());
                }
            }
            Section::Variables => parse_variable_statement(&stmt, &mut header)?,
            Section::Preamble => {}
        }
    }

    Ok(header)
}

fn parse_variable_statement(stmt: &str, header: &mut CdlHeader) -> ExtractResult<()> {
    if let Some((target, value)) = split_attribute(stmt) {
        let value = parse_attr_value(value);
        match target.split_once(':') {
            Some(("", attr)) => {
                header.global_attributes.insert(attr.to_string(), value);
            }
            Some((var, attr)) => {
                if let Some(variable) = header.variables.iter_mut().rev().find(|v| v.name == var) {
                    variable.attributes.insert(attr.to_string(), value);
                }
            }
            None => {}
        }
        return Ok(());
    }

    let (data_type, rest) = stmt.split_once(char::is_whitespace).ok_or_else(|| {
        ExtractionError::InvalidFormat(format!("bad variable declaration: {stmt}"))
    })?;
    let rest = rest.trim();
    let (name, dimensions) = match rest.split_once('(') {
        Some((name, dims)) => (
            name.trim(),
            dims.trim_end_matches(')')
                .split(',')
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .collect(),
        ),
        None => (rest, Vec::new()),
    };
    header.variables.push(CdlVariable {
        name: name.to_string(),
        data_type: data_type.to_string(),
        dimensions,
        attributes: BTreeMap::new(),
    });
    Ok(())
}

/// `var:attr = value` or `:attr = value`, ignoring `=` inside quoted strings.
fn split_attribute(stmt: &str) -> Option<(&str, &str)> {
    let eq = stmt.find('=')?;
    let target = stmt[..eq].trim();
    if target.contains('"') || !target.contains(':') {
        return None;
    }
    Some((target, stmt[eq + 1..].trim()))
}

fn parse_attr_value(value: &str) -> AttrValue {
    if value.starts_with('"') {
        let mut text = String::new();
        let mut chars = value.chars();
        let mut in_quote = false;
        while let Some(c) = chars.next() {
            match (in_quote, c) {
                (false, '"') => in_quote = true,
                (true, '"') => in_quote = false,
                (true, '\\') => match chars.next() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some(other) => text.push(other),
                    None => {}
                },
                (true, c) => text.push(c),
                (false, _) => {}
            }
        }
        return AttrValue::Text(text);
    }

    let numbers: Vec<f64> = value
        .split(',')
        .filter_map(|v| {
            v.trim()
                .trim_end_matches(|c: char| matches!(c, 'f' | 'F' | 'L' | 'l' | 's' | 'S' | 'b' | 'B' | 'U' | 'u'))
                .parse()
                .ok()
        })
        .collect();
    if numbers.is_empty() {
        AttrValue::Text(value.to_string())
    } else {
        AttrValue::Numbers(numbers)
    }
}

fn strip_comment(line: &str) -> &str {
    let mut in_quote = false;
    let bytes = line.as_bytes();
    for i in 0..bytes.len() {
        match bytes[i] {
            b'"' if i == 0 || bytes[i - 1] != b'\\' => in_quote = !in_quote,
            b'/' if !in_quote && bytes.get(i + 1) == Some(&b'/') => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Collapses whitespace runs and literal `\n` markers.
fn normalize_text(s: &str) -> String {
    s.replace("\\n", "").split_whitespace().collect::<Vec<_>>().join(" ")
}

impl CdlHeader {
    fn global_text(&self, names: &[&str]) -> Option<String> {
        names
            .iter()
            .find_map(|n| self.global_attributes.get(*n).and_then(AttrValue::as_text))
    }

    fn global_number(&self, name: &str) -> Option<f64> {
        self.global_attributes.get(name).and_then(AttrValue::as_number)
    }

    /// Variables that are not coordinate variables.
    fn data_variables(&self) -> impl Iterator<Item = &CdlVariable> {
        self.variables
            .iter()
            .filter(|v| !self.dimensions.contains(&v.name))
    }

    fn spatial_coverage(&self) -> Option<SpatialCoverage> {
        let north = self.global_number("geospatial_lat_max")?;
        let south = self.global_number("geospatial_lat_min")?;
        let east = self.global_number("geospatial_lon_max")?;
        let west = self.global_number("geospatial_lon_min")?;
        let extent = Extent {
            north,
            south,
            east: wrap_longitude(east),
            west: wrap_longitude(west),
        };
        Some(SpatialCoverage::from_extent(
            &extent,
            Some(wkt::WGS84_PROJECTION.to_string()),
            Some(wkt::DECIMAL_DEGREES.to_string()),
        ))
    }

    fn period_coverage(&self) -> Option<PeriodCoverage> {
        Some(PeriodCoverage {
            start: self.global_text(&["time_coverage_start"])?,
            end: self.global_text(&["time_coverage_end"])?,
        })
    }

    pub fn into_raw(self, source: &SourceFile<'_>) -> NetCdfRaw {
        let variables = self
            .data_variables()
            .map(|v| NcVariable {
                name: v.name.clone(),
                descriptive_name: v.attributes.get("long_name").and_then(AttrValue::as_text),
                unit: v.attributes.get("units").and_then(AttrValue::as_text),
                data_type: v.data_type.clone(),
                shape: v.dimensions.join(","),
            })
            .collect();

        let keywords = self
            .global_text(&["keywords"])
            .map(|k| {
                k.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        NetCdfRaw {
            title: self
                .global_text(&["title"])
                .or_else(|| Some(stem_title(source.relative))),
            description: self.global_text(&["summary", "comment"]),
            keywords,
            rights: self.global_text(&["license"]),
            creator_name: self.global_text(&["creator_name"]),
            variables,
            spatial_coverage: self.spatial_coverage(),
            period_coverage: self.period_coverage(),
            content_files: vec![source.relative.to_path_buf()],
        }
    }
}

/// Maps 0..360 longitudes onto -180..180.
fn wrap_longitude(lon: f64) -> f64 {
    if lon > 180.0 {
        lon - 360.0
    } else {
        lon
    }
}
