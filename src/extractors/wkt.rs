//! Just enough WKT inspection to name a coordinate system.

use once_cell::sync::Lazy;
use regex::Regex;

static ROOT_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*(PROJCS|GEOGCS|PROJCRS|GEOGCRS|GEODCRS)\s*\[\s*"([^"]*)""#).unwrap());

static DATUM_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?:DATUM|GEODETICDATUM)\s*\[\s*"([^"]*)""#).unwrap());

static EPSG_4326_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)EPSG"?\s*[,:]\s*"?4326"#).unwrap());

pub const WGS84_PROJECTION: &str = "WGS 84 EPSG:4326";
pub const DECIMAL_DEGREES: &str = "Decimal degrees";

/// Name of the outermost coordinate system, e.g. "NAD83 / UTM zone 12N".
pub fn crs_name(wkt: &str) -> Option<String> {
    ROOT_NAME_REGEX
        .captures(wkt)
        .map(|c| c[2].to_string())
        .filter(|s| !s.is_empty())
}

pub fn datum(wkt: &str) -> Option<String> {
    DATUM_REGEX
        .captures(wkt)
        .map(|c| c[1].to_string())
        .filter(|s| !s.is_empty())
}

/// Linear or angular unit of the outermost coordinate system.
pub fn units(wkt: &str) -> Option<String> {
    let bytes = wkt.as_bytes();
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut found = None;

    for i in 0..bytes.len() {
        let b = bytes[i];
        if in_quote {
            if b == b'"' {
                in_quote = false;
            }
            continue;
        }
        match b {
            b'"' => in_quote = true,
            b'[' | b'(' => depth += 1,
            b']' | b')' => depth = depth.saturating_sub(1),
            _ if depth == 1 && (i == 0 || !bytes[i - 1].is_ascii_alphabetic()) => {
                for keyword in ["UNIT[", "LENGTHUNIT[", "ANGLEUNIT["] {
                    if bytes[i..].starts_with(keyword.as_bytes()) {
                        if let Some(name) = leading_quoted(&bytes[i + keyword.len()..]) {
                            found = Some(name);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    found
}

fn leading_quoted(bytes: &[u8]) -> Option<String> {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace())?;
    if bytes[start] != b'"' {
        return None;
    }
    let len = bytes[start + 1..].iter().position(|b| *b == b'"')?;
    Some(String::from_utf8_lossy(&bytes[start + 1..start + 1 + len]).to_string())
}

/// True when coordinates are plain WGS84 longitude/latitude.
pub fn is_wgs84_geographic(wkt: &str) -> bool {
    let root = ROOT_NAME_REGEX.captures(wkt);
    let geographic = root
        .as_ref()
        .map(|c| c[1].starts_with("GEOG"))
        .unwrap_or(false);
    if !geographic {
        return false;
    }
    EPSG_4326_REGEX.is_match(wkt)
        || datum(wkt)
            .map(|d| {
                // ESRI writes datums with a "D_" prefix
                let d = d.strip_prefix("D_").unwrap_or(&d);
                d.eq_ignore_ascii_case("WGS_1984") || d.eq_ignore_ascii_case("World Geodetic System 1984")
            })
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WGS84: &str = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0],UNIT["degree",0.0174532925199433],AUTHORITY["EPSG","4326"]]"#;

    const UTM: &str = r#"PROJCS["NAD83 / UTM zone 12N",GEOGCS["NAD83",DATUM["North_American_Datum_1983",SPHEROID["GRS 1980",6378137,298.257222101]],PRIMEM["Greenwich",0],UNIT["degree",0.0174532925199433]],PROJECTION["Transverse_Mercator"],PARAMETER["central_meridian",-111],UNIT["metre",1,AUTHORITY["EPSG","9001"]],AXIS["Easting",EAST],AXIS["Northing",NORTH]]"#;

    #[test]
    fn names_and_datums() {
        assert_eq!(crs_name(WGS84).as_deref(), Some("WGS 84"));
        assert_eq!(datum(WGS84).as_deref(), Some("WGS_1984"));
        assert_eq!(crs_name(UTM).as_deref(), Some("NAD83 / UTM zone 12N"));
        assert_eq!(datum(UTM).as_deref(), Some("North_American_Datum_1983"));
    }

    #[test]
    fn geographic_detection() {
        assert!(is_wgs84_geographic(WGS84));
        assert!(!is_wgs84_geographic(UTM));
        assert!(!is_wgs84_geographic("garbage"));

        let esri = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;
        assert!(is_wgs84_geographic(esri));
    }

    #[test]
    fn outer_units() {
        assert_eq!(units(UTM).as_deref(), Some("metre"));
        assert_eq!(units(WGS84).as_deref(), Some("degree"));
    }
}
