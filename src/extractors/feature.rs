//! ESRI shapefile aggregations.
//!
//! Reads the fixed `.shp` header, the `.dbf` table header and the `.prj` WKT. The
//! optional ArcGIS `.shp.xml` supplies title, abstract and keywords.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use super::{stem_title, wkt, Extractor, SourceFile};
use crate::error::{ExtractResult, ExtractionError};
use crate::models::{Extent, FeatureRaw, FieldInfo, RawMetadata, SpatialCoverage, SpatialReference};

const SHP_FILE_CODE: i32 = 9994;
const SHP_HEADER_LEN: usize = 100;
const DBF_HEADER_LEN: usize = 32;
const DBF_FIELD_LEN: usize = 32;
const DBF_FIELD_TERMINATOR: u8 = 0x0D;
const TITLE_MAX_LENGTH: usize = 300;

/// Extensions that belong to a shapefile aggregation when they share its stem.
const SIDECAR_EXTENSIONS: &[&str] = &[
    "shp", "shx", "dbf", "prj", "sbx", "sbn", "cpg", "fbn", "fbx", "ain", "aih", "atx", "ixs",
    "mxs",
];

pub struct FeatureExtractor;

impl Extractor for FeatureExtractor {
    fn extract(&self, source: &SourceFile<'_>) -> ExtractResult<RawMetadata> {
        let shp_path = source.absolute();
        let header = read_shp_header(&shp_path)?;

        let dbf_path = shp_path.with_extension("dbf");
        let (feature_count, fields) = if dbf_path.is_file() {
            read_dbf_header(&dbf_path)?
        } else {
            (0, Vec::new())
        };

        let prj_path = shp_path.with_extension("prj");
        let prj = if prj_path.is_file() {
            Some(fs::read_to_string(&prj_path)?.trim().to_string())
        } else {
            None
        };

        let spatial_coverage = prj
            .as_deref()
            .filter(|wkt| wkt::is_wgs84_geographic(wkt))
            .map(|_| {
                SpatialCoverage::from_extent(
                    &header.extent,
                    Some(wkt::WGS84_PROJECTION.to_string()),
                    Some(wkt::DECIMAL_DEGREES.to_string()),
                )
            });

        let spatial_reference = SpatialReference {
            extent: header.extent,
            projection_name: prj.as_deref().and_then(wkt::crs_name),
            datum: prj.as_deref().and_then(wkt::datum),
            units: prj.as_deref().and_then(wkt::units),
            projection_string: prj,
        };

        let content_files = shapefile_members(source)?;

        let mut title = stem_title(source.relative);
        let mut description = None;
        let mut keywords = Vec::new();
        let xml_path = source.root.join(shp_xml_path(source.relative));
        if xml_path.is_file() {
            let xml = parse_shp_xml(&fs::read_to_string(&xml_path)?)?;
            if let Some(t) = xml.title {
                title = t;
            }
            description = xml.abstract_text;
            keywords = xml.keywords;
        }

        Ok(RawMetadata::Feature(FeatureRaw {
            title,
            description,
            keywords,
            geometry_type: geometry_name(header.shape_type).to_string(),
            feature_count,
            fields,
            spatial_reference,
            spatial_coverage,
            content_files,
        }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShpHeader {
    pub shape_type: i32,
    pub extent: Extent,
}

pub fn read_shp_header(path: &Path) -> ExtractResult<ShpHeader> {
    let mut buf = [0u8; SHP_HEADER_LEN];
    File::open(path)?.read_exact(&mut buf).map_err(|_| {
        ExtractionError::InvalidFormat(format!("truncated shapefile header: {}", path.display()))
    })?;

    let file_code = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if file_code != SHP_FILE_CODE {
        return Err(ExtractionError::InvalidFormat(format!(
            "bad shapefile code {file_code}: {}",
            path.display()
        )));
    }

    let shape_type = i32::from_le_bytes([buf[32], buf[33], buf[34], buf[35]]);
    let double = |at: usize| {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&buf[at..at + 8]);
        f64::from_le_bytes(bytes)
    };

    Ok(ShpHeader {
        shape_type,
        extent: Extent {
            west: double(36),
            south: double(44),
            east: double(52),
            north: double(60),
        },
    })
}

/// Record count and field descriptors from a dBASE table header.
pub fn read_dbf_header(path: &Path) -> ExtractResult<(u64, Vec<FieldInfo>)> {
    let bytes = fs::read(path)?;
    if bytes.len() < DBF_HEADER_LEN {
        return Err(ExtractionError::InvalidFormat(format!(
            "truncated dbf header: {}",
            path.display()
        )));
    }

    let record_count = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as u64;
    let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    let fields_end = header_len.min(bytes.len());

    let mut fields = Vec::new();
    let mut at = DBF_HEADER_LEN;
    while at + DBF_FIELD_LEN <= fields_end && bytes[at] != DBF_FIELD_TERMINATOR {
        let descriptor = &bytes[at..at + DBF_FIELD_LEN];
        let name_len = descriptor[..11].iter().position(|b| *b == 0).unwrap_or(11);
        fields.push(FieldInfo {
            name: String::from_utf8_lossy(&descriptor[..name_len]).to_string(),
            field_type: dbf_type_name(descriptor[11]).to_string(),
            length: descriptor[16],
            decimals: descriptor[17],
        });
        at += DBF_FIELD_LEN;
    }

    Ok((record_count, fields))
}

fn dbf_type_name(code: u8) -> &'static str {
    match code {
        b'C' => "String",
        b'N' | b'F' => "Real",
        b'D' => "Date",
        b'L' => "Logical",
        b'M' => "Memo",
        b'I' => "Integer",
        _ => "Unknown",
    }
}

fn geometry_name(shape_type: i32) -> &'static str {
    match shape_type {
        0 => "NULL",
        1 | 11 | 21 => "POINT",
        3 | 13 | 23 => "LINESTRING",
        5 | 15 | 25 => "POLYGON",
        8 | 18 | 28 => "MULTIPOINT",
        31 => "MULTIPATCH",
        _ => "UNKNOWN",
    }
}

fn shp_xml_path(shp: &Path) -> PathBuf {
    let mut name = shp.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".xml");
    shp.with_file_name(name)
}

/// Root-relative paths of every file that belongs to this shapefile, sorted.
fn shapefile_members(source: &SourceFile<'_>) -> ExtractResult<Vec<PathBuf>> {
    let stem = source
        .relative
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let dir = source.relative_dir();
    let xml_name = format!("{stem}.shp.xml");

    let mut members = Vec::new();
    for entry in fs::read_dir(source.root.join(dir))? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let path = Path::new(&name);
        let same_stem = path.file_stem().map(|s| s.to_string_lossy() == stem.as_str());
        let known_ext = path
            .extension()
            .map(|e| SIDECAR_EXTENSIONS.contains(&e.to_string_lossy().to_lowercase().as_str()));
        if (same_stem == Some(true) && known_ext == Some(true))
            || name.eq_ignore_ascii_case(&xml_name)
        {
            members.push(dir.join(&name));
        }
    }
    members.sort();
    Ok(members)
}

#[derive(Debug, Default, PartialEq)]
pub struct ShpXmlMetadata {
    pub title: Option<String>,
    pub abstract_text: Option<String>,
    pub keywords: Vec<String>,
}

/// Title, abstract and keywords from ArcGIS `dataIdInfo` metadata.
pub fn parse_shp_xml(xml: &str) -> ExtractResult<ShpXmlMetadata> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut metadata = ShpXmlMetadata::default();
    let mut stack: Vec<Vec<u8>> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => stack.push(e.name().as_ref().to_vec()),
            Event::End(_) => {
                stack.pop();
            }
            Event::Text(t) => {
                let text = t.unescape()?.trim().to_string();
                if text.is_empty() || !stack.iter().any(|n| n == b"dataIdInfo") {
                    continue;
                }
                let parent = stack.len().checked_sub(2).map(|i| stack[i].as_slice());
                match (parent, stack.last().map(Vec::as_slice)) {
                    (Some(b"idCitation"), Some(b"resTitle")) => {
                        metadata.title = Some(text.chars().take(TITLE_MAX_LENGTH - 1).collect())
                    }
                    (_, Some(b"idAbs")) => metadata.abstract_text = Some(strip_tags(&text)),
                    (Some(b"searchKeys"), Some(b"keyword")) => metadata.keywords.push(text),
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(metadata)
}

fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}
