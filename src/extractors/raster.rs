//! Raster aggregations: GDAL `.vrt` manifests and standalone GeoTIFF files.
//!
//! A `.vrt` is an XML document describing a virtual raster assembled from one or more
//! tiles. Standalone `.tif`/`.tiff` files are inspected through their first image file
//! directory (IFD) and GeoTIFF tags; pixel data is never read.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use super::{lower_extension, stem_title, wkt, Extractor, SourceFile};
use crate::error::{ExtractResult, ExtractionError};
use crate::models::{
    BandInfo, BoxCoverage, CellInfo, Extent, RawMetadata, RasterRaw, SpatialCoverage,
    SpatialReference,
};

pub struct RasterExtractor;

impl Extractor for RasterExtractor {
    fn extract(&self, source: &SourceFile<'_>) -> ExtractResult<RawMetadata> {
        let raw = match lower_extension(source.relative).as_deref() {
            Some("vrt") => extract_vrt(source)?,
            Some("tif") | Some("tiff") => extract_tiff(source)?,
            _ => {
                return Err(ExtractionError::InvalidFormat(format!(
                    "not a raster file: {}",
                    source.relative.display()
                )))
            }
        };
        Ok(RawMetadata::Raster(raw))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VrtSource {
    pub filename: String,
    pub relative_to_vrt: bool,
}

#[derive(Debug, Clone, Default)]
pub struct VrtDocument {
    pub raster_x_size: u64,
    pub raster_y_size: u64,
    pub srs: Option<String>,
    pub geo_transform: Option<[f64; 6]>,
    pub bands: Vec<BandInfo>,
    pub sources: Vec<VrtSource>,
}

#[derive(Clone, Copy, PartialEq)]
enum VrtText {
    None,
    Srs,
    GeoTransform,
    NoData,
    SourceFilename,
}

pub fn parse_vrt(xml: &str) -> ExtractResult<VrtDocument> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut doc = VrtDocument::default();
    let mut seen_root = false;
    let mut text_target = VrtText::None;
    let mut relative_to_vrt = true;

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => {
                let name = e.name();
                match name.as_ref() {
                    b"VRTDataset" => {
                        seen_root = true;
                        for attr in e.attributes().flatten() {
                            let value = attr.unescape_value()?;
                            match attr.key.as_ref() {
                                b"rasterXSize" => doc.raster_x_size = parse_u64(&value)?,
                                b"rasterYSize" => doc.raster_y_size = parse_u64(&value)?,
                                _ => {}
                            }
                        }
                    }
                    b"SRS" => text_target = VrtText::Srs,
                    b"GeoTransform" => text_target = VrtText::GeoTransform,
                    b"VRTRasterBand" => {
                        let mut band = BandInfo {
                            name: format!("Band_{}", doc.bands.len() + 1),
                            data_type: None,
                            no_data_value: None,
                        };
                        for attr in e.attributes().flatten() {
                            let value = attr.unescape_value()?;
                            match attr.key.as_ref() {
                                b"dataType" => band.data_type = Some(value.to_string()),
                                b"band" => band.name = format!("Band_{}", value),
                                _ => {}
                            }
                        }
                        doc.bands.push(band);
                    }
                    b"NoDataValue" => text_target = VrtText::NoData,
                    b"SourceFilename" => {
                        text_target = VrtText::SourceFilename;
                        relative_to_vrt = true;
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"relativeToVRT" {
                                relative_to_vrt = attr.unescape_value()?.as_ref() != "0";
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(t) => {
                let text = t.unescape()?;
                let text = text.trim();
                match text_target {
                    VrtText::Srs => doc.srs = Some(text.to_string()),
                    VrtText::GeoTransform => doc.geo_transform = Some(parse_geo_transform(text)?),
                    VrtText::NoData => {
                        if let Some(band) = doc.bands.last_mut() {
                            band.no_data_value = text.parse().ok();
                        }
                    }
                    VrtText::SourceFilename => doc.sources.push(VrtSource {
                        filename: text.to_string(),
                        relative_to_vrt,
                    }),
                    VrtText::None => {}
                }
            }
            Event::End(_) => text_target = VrtText::None,
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err(ExtractionError::Xml("missing VRTDataset element".to_string()));
    }
    Ok(doc)
}

/// Tiles referenced by a `.vrt`, in document order without duplicates.
pub fn list_vrt_tiles(vrt_path: &Path) -> ExtractResult<Vec<VrtSource>> {
    let xml = fs::read_to_string(vrt_path)?;
    let doc = parse_vrt(&xml)?;
    let mut tiles: Vec<VrtSource> = Vec::new();
    for source in doc.sources {
        if !tiles.iter().any(|t| t.filename == source.filename) {
            tiles.push(source);
        }
    }
    Ok(tiles)
}

fn extract_vrt(source: &SourceFile<'_>) -> ExtractResult<RasterRaw> {
    let xml = fs::read_to_string(source.absolute())?;
    let doc = parse_vrt(&xml)?;

    let vrt_dir = source.relative_dir();
    let mut content_files: Vec<PathBuf> = Vec::new();
    for tile in &doc.sources {
        let Some(relative) = resolve_tile(source.root, vrt_dir, tile) else {
            debug!(vrt = %source.relative.display(), tile = %tile.filename, "Tile outside input root");
            continue;
        };
        if !source.root.join(&relative).is_file() {
            debug!(vrt = %source.relative.display(), tile = %tile.filename, "Referenced tile not found");
            continue;
        }
        if !content_files.contains(&relative) {
            content_files.push(relative);
        }
    }
    content_files.push(source.relative.to_path_buf());

    let cell_size = doc.geo_transform.map(|gt| (gt[1].abs(), gt[5].abs()));
    let extent = doc.geo_transform.map(|gt| Extent {
        west: gt[0],
        north: gt[3],
        east: gt[0] + doc.raster_x_size as f64 * gt[1],
        south: gt[3] + doc.raster_y_size as f64 * gt[5],
    });

    let spatial_reference = extent.map(|extent| spatial_reference(extent, doc.srs.as_deref()));
    let spatial_coverage = match (&extent, doc.srs.as_deref()) {
        (Some(extent), Some(srs)) if wkt::is_wgs84_geographic(srs) => Some(wgs84_box(extent)),
        _ => None,
    };

    Ok(RasterRaw {
        title: stem_title(source.relative),
        cell: CellInfo {
            rows: doc.raster_y_size,
            columns: doc.raster_x_size,
            cell_size_x: cell_size.map(|c| c.0),
            cell_size_y: cell_size.map(|c| c.1),
            cell_data_type: doc.bands.first().and_then(|b| b.data_type.clone()),
        },
        bands: doc.bands,
        spatial_reference,
        spatial_coverage,
        content_files,
    })
}

/// Root-relative path of a tile referenced from a `.vrt` in `vrt_dir`. `None` when the
/// tile lies outside the root.
pub fn resolve_tile(root: &Path, vrt_dir: &Path, tile: &VrtSource) -> Option<PathBuf> {
    let path = Path::new(&tile.filename);
    let joined = if path.is_absolute() {
        path.strip_prefix(root).ok()?.to_path_buf()
    } else {
        vrt_dir.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(normalized)
}

fn spatial_reference(extent: Extent, srs: Option<&str>) -> SpatialReference {
    SpatialReference {
        extent,
        projection_string: srs.map(str::to_string),
        projection_name: srs.and_then(wkt::crs_name),
        datum: srs.and_then(wkt::datum),
        units: srs.and_then(wkt::units),
    }
}

fn wgs84_box(extent: &Extent) -> SpatialCoverage {
    SpatialCoverage::Box(BoxCoverage {
        name: None,
        northlimit: extent.north,
        eastlimit: extent.east,
        southlimit: extent.south,
        westlimit: extent.west,
        projection: Some(wkt::WGS84_PROJECTION.to_string()),
        units: Some(wkt::DECIMAL_DEGREES.to_string()),
    })
}

fn parse_u64(value: &str) -> ExtractResult<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| ExtractionError::InvalidFormat(format!("invalid raster size: {value}")))
}

fn parse_geo_transform(text: &str) -> ExtractResult<[f64; 6]> {
    let values: Vec<f64> = text
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| ExtractionError::InvalidFormat(format!("invalid GeoTransform: {text}")))?;
    values
        .try_into()
        .map_err(|_| ExtractionError::InvalidFormat(format!("GeoTransform needs 6 values: {text}")))
}

const TAG_IMAGE_WIDTH: u16 = 256;
const TAG_IMAGE_LENGTH: u16 = 257;
const TAG_BITS_PER_SAMPLE: u16 = 258;
const TAG_SAMPLES_PER_PIXEL: u16 = 277;
const TAG_SAMPLE_FORMAT: u16 = 339;
const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_NODATA: u16 = 42113;

const GEOKEY_MODEL_TYPE: u16 = 1024;
const GEOKEY_GEOGRAPHIC_TYPE: u16 = 2048;
const GEOKEY_PROJECTED_TYPE: u16 = 3072;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const EPSG_WGS84: u16 = 4326;

/// First-IFD summary of a GeoTIFF.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TiffInfo {
    pub width: u64,
    pub height: u64,
    pub samples_per_pixel: u16,
    pub bits_per_sample: u16,
    pub sample_format: u16,
    pub pixel_scale: Option<(f64, f64)>,
    pub tiepoint: Option<[f64; 6]>,
    pub model_type: Option<u16>,
    pub geographic_type: Option<u16>,
    pub projected_type: Option<u16>,
    pub no_data: Option<f64>,
}

impl TiffInfo {
    /// GDAL-style name of the pixel type.
    pub fn data_type(&self) -> String {
        match (self.sample_format, self.bits_per_sample) {
            (3, 32) => "Float32",
            (3, 64) => "Float64",
            (2, 8) => "Int8",
            (2, 16) => "Int16",
            (2, 32) => "Int32",
            (_, 8) => "Byte",
            (_, 16) => "UInt16",
            (_, 32) => "UInt32",
            _ => "Unknown",
        }
        .to_string()
    }

    pub fn extent(&self) -> Option<Extent> {
        let (sx, sy) = self.pixel_scale?;
        let tp = self.tiepoint?;
        let west = tp[3] - tp[0] * sx;
        let north = tp[4] + tp[1] * sy;
        Some(Extent {
            west,
            north,
            east: west + self.width as f64 * sx,
            south: north - self.height as f64 * sy,
        })
    }

    pub fn is_wgs84_geographic(&self) -> bool {
        self.model_type == Some(MODEL_TYPE_GEOGRAPHIC) && self.geographic_type == Some(EPSG_WGS84)
    }
}

struct TiffReader {
    file: File,
    file_len: u64,
    little_endian: bool,
}

impl TiffReader {
    fn open(path: &Path) -> ExtractResult<Self> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut header = [0u8; 8];
        file.read_exact(&mut header)?;
        let little_endian = match &header[0..2] {
            b"II" => true,
            b"MM" => false,
            _ => return Err(ExtractionError::InvalidFormat("not a TIFF file".to_string())),
        };
        let reader = Self {
            file,
            file_len,
            little_endian,
        };
        match reader.u16_at(&header, 2) {
            42 => Ok(reader),
            43 => Err(ExtractionError::InvalidFormat("BigTIFF is not supported".to_string())),
            magic => Err(ExtractionError::InvalidFormat(format!("bad TIFF magic {magic}"))),
        }
    }

    fn u16_at(&self, buf: &[u8], at: usize) -> u16 {
        let bytes = [buf[at], buf[at + 1]];
        if self.little_endian {
            u16::from_le_bytes(bytes)
        } else {
            u16::from_be_bytes(bytes)
        }
    }

    fn u32_at(&self, buf: &[u8], at: usize) -> u32 {
        let bytes = [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]];
        if self.little_endian {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        }
    }

    fn f64_at(&self, buf: &[u8], at: usize) -> f64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&buf[at..at + 8]);
        if self.little_endian {
            f64::from_le_bytes(bytes)
        } else {
            f64::from_be_bytes(bytes)
        }
    }

    /// Reads `len` bytes at `offset`; ranges past the end of the file are rejected before allocating.
    fn read_at(&mut self, offset: u64, len: usize) -> ExtractResult<Vec<u8>> {
        let end = offset.checked_add(len as u64);
        if end.map_or(true, |end| end > self.file_len) {
            return Err(ExtractionError::InvalidFormat(format!(
                "TIFF range {offset}+{len} exceeds file size {}",
                self.file_len
            )));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Raw bytes of an IFD entry's value, following the offset when it doesn't fit inline.
    fn entry_value(&mut self, entry: &[u8]) -> ExtractResult<(u16, Vec<u8>)> {
        let field_type = self.u16_at(entry, 2);
        let count = self.u32_at(entry, 4) as usize;
        let size: usize = match field_type {
            1 | 2 | 6 | 7 => 1,
            3 | 8 => 2,
            4 | 9 | 11 => 4,
            5 | 10 | 12 => 8,
            other => {
                return Err(ExtractionError::InvalidFormat(format!(
                    "unsupported TIFF field type {other}"
                )))
            }
        };
        let len = size.checked_mul(count).ok_or_else(|| {
            ExtractionError::InvalidFormat(format!("TIFF value count {count} is too large"))
        })?;
        if len <= 4 {
            Ok((field_type, entry[8..8 + len].to_vec()))
        } else {
            let offset = self.u32_at(entry, 8) as u64;
            Ok((field_type, self.read_at(offset, len)?))
        }
    }

    fn integers(&self, field_type: u16, bytes: &[u8]) -> Vec<u64> {
        match field_type {
            3 => bytes
                .chunks_exact(2)
                .map(|c| self.u16_at(c, 0) as u64)
                .collect(),
            4 => bytes
                .chunks_exact(4)
                .map(|c| self.u32_at(c, 0) as u64)
                .collect(),
            1 => bytes.iter().map(|b| *b as u64).collect(),
            _ => Vec::new(),
        }
    }

    fn doubles(&self, bytes: &[u8]) -> Vec<f64> {
        bytes.chunks_exact(8).map(|c| self.f64_at(c, 0)).collect()
    }
}

pub fn read_tiff_info(path: &Path) -> ExtractResult<TiffInfo> {
    let mut reader = TiffReader::open(path)?;
    let header = reader.read_at(0, 8)?;
    let ifd_offset = reader.u32_at(&header, 4) as u64;
    let count_bytes = reader.read_at(ifd_offset, 2)?;
    let entry_count = reader.u16_at(&count_bytes, 0) as usize;
    let entries = reader.read_at(ifd_offset + 2, entry_count * 12)?;

    let mut info = TiffInfo {
        samples_per_pixel: 1,
        bits_per_sample: 8,
        sample_format: 1,
        ..Default::default()
    };

    for entry in entries.chunks_exact(12) {
        let tag = reader.u16_at(entry, 0);
        let (field_type, value) = reader.entry_value(entry)?;
        match tag {
            TAG_IMAGE_WIDTH => info.width = first(&reader.integers(field_type, &value)),
            TAG_IMAGE_LENGTH => info.height = first(&reader.integers(field_type, &value)),
            TAG_BITS_PER_SAMPLE => {
                info.bits_per_sample = first(&reader.integers(field_type, &value)) as u16
            }
            TAG_SAMPLES_PER_PIXEL => {
                info.samples_per_pixel = first(&reader.integers(field_type, &value)) as u16
            }
            TAG_SAMPLE_FORMAT => {
                info.sample_format = first(&reader.integers(field_type, &value)) as u16
            }
            TAG_MODEL_PIXEL_SCALE => {
                let v = reader.doubles(&value);
                if v.len() >= 2 {
                    info.pixel_scale = Some((v[0], v[1]));
                }
            }
            TAG_MODEL_TIEPOINT => {
                let v = reader.doubles(&value);
                if v.len() >= 6 {
                    info.tiepoint = Some([v[0], v[1], v[2], v[3], v[4], v[5]]);
                }
            }
            TAG_GEO_KEY_DIRECTORY => {
                let keys = reader.integers(field_type, &value);
                for key in keys.chunks_exact(4).skip(1) {
                    // Only inline SHORT values (location 0) are needed here
                    if key[1] != 0 {
                        continue;
                    }
                    let key_value = Some(key[3] as u16);
                    match key[0] as u16 {
                        GEOKEY_MODEL_TYPE => info.model_type = key_value,
                        GEOKEY_GEOGRAPHIC_TYPE => info.geographic_type = key_value,
                        GEOKEY_PROJECTED_TYPE => info.projected_type = key_value,
                        _ => {}
                    }
                }
            }
            TAG_GDAL_NODATA => {
                let text = String::from_utf8_lossy(&value);
                info.no_data = text.trim_end_matches('\0').trim().parse().ok();
            }
            _ => {}
        }
    }

    if info.width == 0 || info.height == 0 {
        return Err(ExtractionError::InvalidFormat(
            "TIFF has no image dimensions".to_string(),
        ));
    }
    Ok(info)
}

fn first(values: &[u64]) -> u64 {
    values.first().copied().unwrap_or(0)
}

fn extract_tiff(source: &SourceFile<'_>) -> ExtractResult<RasterRaw> {
    let info = read_tiff_info(&source.absolute())?;
    let data_type = info.data_type();

    let bands = (1..=info.samples_per_pixel)
        .map(|n| BandInfo {
            name: format!("Band_{n}"),
            data_type: Some(data_type.clone()),
            no_data_value: info.no_data,
        })
        .collect();

    let extent = info.extent();
    let projection = match (info.projected_type, info.geographic_type) {
        (Some(code), _) => Some(format!("EPSG:{code}")),
        (None, Some(code)) => Some(format!("EPSG:{code}")),
        _ => None,
    };
    let spatial_reference = extent.map(|extent| SpatialReference {
        extent,
        projection_string: projection.clone(),
        projection_name: projection.clone(),
        datum: None,
        units: None,
    });
    let spatial_coverage = match &extent {
        Some(extent) if info.is_wgs84_geographic() => Some(wgs84_box(extent)),
        _ => None,
    };

    Ok(RasterRaw {
        title: stem_title(source.relative),
        cell: CellInfo {
            rows: info.height,
            columns: info.width,
            cell_size_x: info.pixel_scale.map(|s| s.0),
            cell_size_y: info.pixel_scale.map(|s| s.1),
            cell_data_type: Some(data_type),
        },
        bands,
        spatial_reference,
        spatial_coverage,
        content_files: vec![source.relative.to_path_buf()],
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) const LOGAN_VRT: &str = r#"<VRTDataset rasterXSize="4" rasterYSize="2">
  <SRS>GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563]],PRIMEM["Greenwich",0],UNIT["degree",0.0174532925199433],AUTHORITY["EPSG","4326"]]</SRS>
  <GeoTransform> -112.0, 0.5, 0.0, 42.0, 0.0, -0.5</GeoTransform>
  <VRTRasterBand dataType="Float32" band="1">
    <NoDataValue>-3.4e+38</NoDataValue>
    <SimpleSource>
      <SourceFilename relativeToVRT="1">tiles/a.tif</SourceFilename>
    </SimpleSource>
    <SimpleSource>
      <SourceFilename relativeToVRT="1">tiles/b.tif</SourceFilename>
    </SimpleSource>
  </VRTRasterBand>
</VRTDataset>"#;

    /// Little-endian single-strip TIFF header with GeoTIFF tags, no pixel data.
    pub(crate) fn tiny_geotiff(width: u32, height: u32) -> Vec<u8> {
        let entries: u16 = 6;
        let ifd_offset: u32 = 8;
        let data_offset = ifd_offset + 2 + entries as u32 * 12 + 4;
        let scale_offset = data_offset;
        let tiepoint_offset = scale_offset + 24;
        let geokeys_offset = tiepoint_offset + 48;

        let mut buf = Vec::new();
        buf.extend_from_slice(b"II");
        buf.extend_from_slice(&42u16.to_le_bytes());
        buf.extend_from_slice(&ifd_offset.to_le_bytes());
        buf.extend_from_slice(&entries.to_le_bytes());

        let mut entry = |tag: u16, ty: u16, count: u32, value: u32| {
            buf.extend_from_slice(&tag.to_le_bytes());
            buf.extend_from_slice(&ty.to_le_bytes());
            buf.extend_from_slice(&count.to_le_bytes());
            buf.extend_from_slice(&value.to_le_bytes());
        };
        entry(TAG_IMAGE_WIDTH, 4, 1, width);
        entry(TAG_IMAGE_LENGTH, 4, 1, height);
        entry(TAG_BITS_PER_SAMPLE, 3, 1, 16);
        entry(TAG_MODEL_PIXEL_SCALE, 12, 3, scale_offset);
        entry(TAG_MODEL_TIEPOINT, 12, 6, tiepoint_offset);
        entry(TAG_GEO_KEY_DIRECTORY, 3, 12, geokeys_offset);
        buf.extend_from_slice(&0u32.to_le_bytes());

        for v in [0.25f64, 0.25, 0.0] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        for v in [0.0f64, 0.0, 0.0, -111.0, 41.0, 0.0] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        for v in [1u16, 1, 0, 2, 1024, 0, 1, 2, 2048, 0, 1, 4326] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf
    }

    #[test]
    fn parse_vrt_reads_geometry_and_sources() {
        let doc = parse_vrt(LOGAN_VRT).unwrap();
        assert_eq!(doc.raster_x_size, 4);
        assert_eq!(doc.raster_y_size, 2);
        assert_eq!(doc.geo_transform.unwrap()[1], 0.5);
        assert_eq!(doc.bands.len(), 1);
        assert_eq!(doc.bands[0].name, "Band_1");
        assert_eq!(doc.bands[0].data_type.as_deref(), Some("Float32"));
        assert_eq!(doc.bands[0].no_data_value, Some(-3.4e38));
        assert_eq!(doc.sources.len(), 2);
        assert!(doc.sources[0].relative_to_vrt);
    }

    #[test]
    fn parse_vrt_rejects_other_xml() {
        assert!(parse_vrt("<Other/>").is_err());
        assert!(parse_vrt("<VRTDataset><GeoTransform>1,2</GeoTransform></VRTDataset>").is_err());
    }

    #[test]
    fn vrt_extraction_collects_existing_tiles() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("r/tiles")).unwrap();
        fs::write(dir.path().join("r/logan.vrt"), LOGAN_VRT).unwrap();
        fs::write(dir.path().join("r/tiles/a.tif"), b"").unwrap();

        let source = SourceFile::new(dir.path(), Path::new("r/logan.vrt"));
        let RawMetadata::Raster(raw) = RasterExtractor.extract(&source).unwrap() else {
            panic!("expected raster metadata");
        };

        assert_eq!(raw.title, "logan");
        assert_eq!(
            raw.content_files,
            vec![PathBuf::from("r/tiles/a.tif"), PathBuf::from("r/logan.vrt")]
        );
        assert_eq!(raw.cell.rows, 2);
        assert_eq!(raw.cell.columns, 4);
        let reference = raw.spatial_reference.unwrap();
        assert_eq!(reference.extent.east, -110.0);
        assert_eq!(reference.extent.south, 41.0);
        assert_eq!(reference.projection_name.as_deref(), Some("WGS 84"));
        assert!(matches!(raw.spatial_coverage, Some(SpatialCoverage::Box(_))));
    }

    #[test]
    fn list_vrt_tiles_dedups() {
        let dir = TempDir::new().unwrap();
        let vrt = dir.path().join("x.vrt");
        let xml = LOGAN_VRT.replace("tiles/b.tif", "tiles/a.tif");
        fs::write(&vrt, xml).unwrap();
        let tiles = list_vrt_tiles(&vrt).unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].filename, "tiles/a.tif");
    }

    #[test]
    fn resolve_tile_normalizes_and_contains() {
        let root = Path::new("/data");
        let tile = |name: &str| VrtSource {
            filename: name.to_string(),
            relative_to_vrt: true,
        };
        assert_eq!(
            resolve_tile(root, Path::new("r/v"), &tile("../tiles/./a.tif")),
            Some(PathBuf::from("r/tiles/a.tif"))
        );
        assert_eq!(resolve_tile(root, Path::new("r"), &tile("../../a.tif")), None);
        assert_eq!(
            resolve_tile(root, Path::new("r"), &tile("/data/x/b.tif")),
            Some(PathBuf::from("x/b.tif"))
        );
        assert_eq!(resolve_tile(root, Path::new("r"), &tile("/elsewhere/b.tif")), None);
    }

    #[test]
    fn tiff_header_is_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dem.tif");
        fs::write(&path, tiny_geotiff(8, 4)).unwrap();

        let info = read_tiff_info(&path).unwrap();
        assert_eq!(info.width, 8);
        assert_eq!(info.height, 4);
        assert_eq!(info.data_type(), "UInt16");
        assert!(info.is_wgs84_geographic());
        let extent = info.extent().unwrap();
        assert_eq!(extent.west, -111.0);
        assert_eq!(extent.east, -109.0);
        assert_eq!(extent.south, 40.0);
    }

    #[test]
    fn tiff_extraction_produces_single_content_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("dem.tif"), tiny_geotiff(8, 4)).unwrap();

        let source = SourceFile::new(dir.path(), Path::new("dem.tif"));
        let RawMetadata::Raster(raw) = RasterExtractor.extract(&source).unwrap() else {
            panic!("expected raster metadata");
        };
        assert_eq!(raw.content_files, vec![PathBuf::from("dem.tif")]);
        assert_eq!(raw.bands.len(), 1);
        assert!(raw.spatial_coverage.is_some());
    }

    #[test]
    fn corrupt_tiff_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bad.tif"), b"definitely not a tiff").unwrap();
        let source = SourceFile::new(dir.path(), Path::new("bad.tif"));
        assert!(RasterExtractor.extract(&source).is_err());
    }

    #[test]
    fn tiff_value_past_end_of_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("huge.tif");
        let mut buf = Vec::new();
        buf.extend_from_slice(b"II");
        buf.extend_from_slice(&42u16.to_le_bytes());
        buf.extend_from_slice(&8u32.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&TAG_MODEL_PIXEL_SCALE.to_le_bytes());
        buf.extend_from_slice(&12u16.to_le_bytes());
        buf.extend_from_slice(&u32::MAX.to_le_bytes());
        buf.extend_from_slice(&26u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(buf.len(), 26);
        fs::write(&path, &buf).unwrap();

        let err = read_tiff_info(&path).unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidFormat(_)), "{err}");
    }

    #[test]
    fn tiff_entry_count_past_end_of_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.tif");
        let mut buf = Vec::new();
        buf.extend_from_slice(b"II");
        buf.extend_from_slice(&42u16.to_le_bytes());
        buf.extend_from_slice(&8u32.to_le_bytes());
        buf.extend_from_slice(&u16::MAX.to_le_bytes());
        fs::write(&path, &buf).unwrap();

        let err = read_tiff_info(&path).unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidFormat(_)), "{err}");
    }
}
