//! `header`/`header2`/`xheader` section readers and writers.
//!
//! `header` is DEFLATE-compressed text in the configured single-byte
//! codepage; `header2` is the same shape over UTF-16LE; `xheader` is
//! DEFLATE-compressed UTF-8 XML. All three ultimately describe the same
//! key/value metadata and are merged by the caller, later sections
//! overwriting earlier ones (`header2` supersedes `header`, `xheader`
//! takes precedence over both).

use std::collections::HashMap;
use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{Error, ErrorKind, Result};
use crate::format::DateFormat;

/// Canonical metadata keys.
pub const KEY_CASE_NUMBER: &str = "case_number";
pub const KEY_DESCRIPTION: &str = "description";
pub const KEY_EXAMINER_NAME: &str = "examiner_name";
pub const KEY_EVIDENCE_NUMBER: &str = "evidence_number";
pub const KEY_NOTES: &str = "notes";
pub const KEY_ACQUIRY_DATE: &str = "acquiry_date";
pub const KEY_SYSTEM_DATE: &str = "system_date";
pub const KEY_ACQUIRY_OPERATING_SYSTEM: &str = "acquiry_operating_system";
pub const KEY_ACQUIRY_SOFTWARE: &str = "acquiry_software";
pub const KEY_ACQUIRY_SOFTWARE_VERSION: &str = "acquiry_software_version";
pub const KEY_PASSWORD: &str = "password";
pub const KEY_PROCESS_IDENTIFIER: &str = "process_identifier";
pub const KEY_UNKNOWN_DC: &str = "unknown_dc";
pub const KEY_EXTENTS: &str = "extents";
pub const KEY_COMPRESSION_LEVEL: &str = "compression_level";
pub const KEY_MODEL: &str = "model";
pub const KEY_SERIAL_NUMBER: &str = "serial_number";

/// Single-letter identifiers used on the wire (the historical `libewf`
/// tab-table abbreviations), mapped to the documented long-form keys above.
const WIRE_KEYS: &[(&str, &str)] = &[
    ("c", KEY_CASE_NUMBER),
    ("n", KEY_DESCRIPTION),
    ("ex", KEY_EXAMINER_NAME),
    ("ev", KEY_EVIDENCE_NUMBER),
    ("t", KEY_NOTES),
    ("av", KEY_ACQUIRY_SOFTWARE_VERSION),
    ("ov", KEY_ACQUIRY_OPERATING_SYSTEM),
    ("m", KEY_ACQUIRY_DATE),
    ("u", KEY_SYSTEM_DATE),
    ("p", KEY_PASSWORD),
    ("pid", KEY_PROCESS_IDENTIFIER),
    ("dc", KEY_UNKNOWN_DC),
    ("e", KEY_EXTENTS),
    ("r", KEY_COMPRESSION_LEVEL),
    ("model", KEY_MODEL),
    ("sn", KEY_SERIAL_NUMBER),
];

fn wire_to_long(wire: &str) -> String {
    WIRE_KEYS
        .iter()
        .find(|(w, _)| *w == wire)
        .map(|(_, long)| long.to_string())
        .unwrap_or_else(|| wire.to_string())
}

fn long_to_wire(long: &str) -> &str {
    WIRE_KEYS
        .iter()
        .find(|(_, l)| *l == long)
        .map(|(w, _)| *w)
        .unwrap_or(long)
}

/// Parsed `header`/`header2`/`xheader` metadata.
#[derive(Debug, Clone, Default)]
pub struct HeaderValues(HashMap<String, String>);

impl HeaderValues {
    pub fn new() -> Self {
        HeaderValues(HashMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|s| s.as_str())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Later values win: `header2` takes precedence over `header`, and any
    /// subsequently merged source (an `xheader`, in particular) overrides
    /// what came before it.
    pub fn merge(&mut self, other: HeaderValues) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Builds a key-row/value-row pair from the tab-table wire format used by
/// `header`/`header2`, e.g.:
/// ```text
/// c\tn\tex\t...
/// case-1\tA disk\tJ Doe\t...
/// ```
fn parse_tab_table(text: &str) -> HeaderValues {
    let lines: Vec<&str> = text
        .split(['\n', '\r'])
        .map(|l| l.trim_start_matches('\u{feff}'))
        .filter(|l| !l.is_empty())
        .collect();

    let mut values = HeaderValues::new();
    for i in 0..lines.len().saturating_sub(1) {
        if lines[i].contains('\t') && lines[i + 1].contains('\t') {
            let keys: Vec<&str> = lines[i].split('\t').collect();
            let vals: Vec<&str> = lines[i + 1].split('\t').collect();
            for (k, v) in keys.iter().zip(vals.iter()) {
                let k = k.trim_matches('\0');
                let v = v.trim_matches('\0');
                values.set(wire_to_long(k), v.to_string());
            }
            return values;
        }
    }
    values
}

fn render_tab_table(values: &HeaderValues, order: &[&str]) -> String {
    let present: Vec<&&str> = order.iter().filter(|k| values.get(k).is_some()).collect();
    let key_row = present
        .iter()
        .map(|k| long_to_wire(k))
        .collect::<Vec<_>>()
        .join("\t");
    let val_row = present
        .iter()
        .map(|k| values.get(k).unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\t");
    format!("1\n{}\n{}\n", key_row, val_row)
}

/// Default column order used when none is supplied, matching the
/// historical `c n ex ev t av ov m u p pid dc e r model sn` layout.
const DEFAULT_ORDER: &[&str] = &[
    KEY_CASE_NUMBER,
    KEY_DESCRIPTION,
    KEY_EXAMINER_NAME,
    KEY_EVIDENCE_NUMBER,
    KEY_NOTES,
    KEY_ACQUIRY_SOFTWARE_VERSION,
    KEY_ACQUIRY_OPERATING_SYSTEM,
    KEY_ACQUIRY_DATE,
    KEY_SYSTEM_DATE,
    KEY_PASSWORD,
    KEY_PROCESS_IDENTIFIER,
    KEY_UNKNOWN_DC,
    KEY_EXTENTS,
    KEY_COMPRESSION_LEVEL,
    KEY_MODEL,
    KEY_SERIAL_NUMBER,
];

fn inflate(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut data = Vec::new();
    decoder.read_to_end(&mut data).map_err(|e| {
        log::error!("header section did not inflate: {}", e);
        Error::with_source(ErrorKind::CorruptData, "header section did not inflate", e)
    })?;
    Ok(data)
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("writing to a Vec cannot fail");
    encoder.finish().expect("writing to a Vec cannot fail")
}

/// Decodes a `header` section's (compressed) payload using `codepage`.
pub fn read_header(compressed: &[u8], codepage: &'static encoding_rs::Encoding) -> Result<HeaderValues> {
    let raw = inflate(compressed)?;
    let (text, _, had_errors) = codepage.decode(&raw);
    if had_errors {
        log::warn!("header section contained bytes invalid in {}", codepage.name());
    }
    Ok(parse_tab_table(&text))
}

/// Encodes `values` as a `header` section payload (still DEFLATE-compressed).
pub fn write_header(values: &HeaderValues, codepage: &'static encoding_rs::Encoding) -> Vec<u8> {
    let text = render_tab_table(values, DEFAULT_ORDER);
    let (encoded, _, _) = codepage.encode(&text);
    deflate(&encoded)
}

/// Decodes a `header2` section's payload, always UTF-16LE.
pub fn read_header2(compressed: &[u8]) -> Result<HeaderValues> {
    let raw = inflate(compressed)?;
    if raw.len() % 2 != 0 {
        log::error!("header2 payload has an odd byte length for UTF-16LE");
        return Err(Error::new(
            ErrorKind::CorruptData,
            "header2 payload has an odd byte length for UTF-16LE",
        ));
    }
    let utf16: Vec<u16> = raw
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    let text = String::from_utf16(&utf16).map_err(|e| {
        log::error!("header2 is not valid UTF-16LE: {}", e);
        Error::with_source(ErrorKind::CorruptData, "header2 is not valid UTF-16LE", e)
    })?;
    Ok(parse_tab_table(&text))
}

pub fn write_header2(values: &HeaderValues) -> Vec<u8> {
    let text = render_tab_table(values, DEFAULT_ORDER);
    let raw: Vec<u8> = text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
    deflate(&raw)
}

/// Decodes an `xheader` section: DEFLATE-compressed UTF-8 XML. Values are
/// extracted from `<key>value</key>` elements inside a single `<xheader>`
/// document; no full XML parser is pulled in for this leaf shape.
pub fn read_xheader(compressed: &[u8]) -> Result<HeaderValues> {
    let raw = inflate(compressed)?;
    let text = String::from_utf8(raw).map_err(|e| {
        log::error!("xheader is not valid UTF-8: {}", e);
        Error::with_source(ErrorKind::CorruptData, "xheader is not valid UTF-8", e)
    })?;
    Ok(parse_xml_entries(&text))
}

fn parse_xml_entries(text: &str) -> HeaderValues {
    let mut values = HeaderValues::new();
    let mut rest = text;
    while let Some(open_start) = rest.find('<') {
        let after_open = &rest[open_start + 1..];
        let Some(open_end) = after_open.find('>') else { break };
        let tag = &after_open[..open_end];
        if tag.is_empty() || tag.starts_with('/') || tag.starts_with('?') || tag == "xheader" {
            rest = &after_open[open_end + 1..];
            continue;
        }
        let close_tag = format!("</{}>", tag);
        let body_start = open_end + 1;
        if let Some(close_rel) = after_open[body_start..].find(&close_tag) {
            let value = &after_open[body_start..body_start + close_rel];
            values.set(tag.to_string(), xml_unescape(value));
            rest = &after_open[body_start + close_rel + close_tag.len()..];
        } else {
            rest = &after_open[body_start..];
        }
    }
    values
}

fn xml_unescape(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn write_xheader(values: &HeaderValues) -> Vec<u8> {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?><xheader>");
    for key in DEFAULT_ORDER {
        if let Some(v) = values.get(key) {
            xml.push_str(&format!("<{}>{}</{}>", key, xml_escape(v), key));
        }
    }
    xml.push_str("</xheader>");
    deflate(xml.as_bytes())
}

/// Formats a Unix timestamp the way `acquiry_date`/`system_date` expect it
/// under `date_format`.
pub fn format_timestamp(unix_secs: i64, format: DateFormat) -> String {
    let days = unix_secs.div_euclid(86_400);
    let secs_of_day = unix_secs.rem_euclid(86_400);
    let (y, m, d) = civil_from_days(days);
    let (hh, mm, ss) = (secs_of_day / 3600, (secs_of_day / 60) % 60, secs_of_day % 60);
    match format {
        DateFormat::Ctime => format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}", y, m, d, hh, mm, ss),
        DateFormat::Iso8601 => format!("{:04}-{:02}-{:02}T{:02}:{:02}:{:02}", y, m, d, hh, mm, ss),
        DateFormat::DayMonth => format!("{:02}/{:02}/{:04} {:02}:{:02}:{:02}", d, m, y, hh, mm, ss),
        DateFormat::MonthDay => format!("{:02}/{:02}/{:04} {:02}:{:02}:{:02}", m, d, y, hh, mm, ss),
    }
}

/// Days since the Unix epoch to a proleptic-Gregorian (year, month, day),
/// Howard Hinnant's well-known civil-from-days algorithm.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_through_codepage() {
        let mut values = HeaderValues::new();
        values.set(KEY_CASE_NUMBER, "case-42");
        values.set(KEY_EXAMINER_NAME, "J. Doe");

        let compressed = write_header(&values, encoding_rs::WINDOWS_1252);
        let decoded = read_header(&compressed, encoding_rs::WINDOWS_1252).unwrap();
        assert_eq!(decoded.get(KEY_CASE_NUMBER), Some("case-42"));
        assert_eq!(decoded.get(KEY_EXAMINER_NAME), Some("J. Doe"));
    }

    #[test]
    fn header2_round_trips_utf16() {
        let mut values = HeaderValues::new();
        values.set(KEY_DESCRIPTION, "a disk image");

        let compressed = write_header2(&values);
        let decoded = read_header2(&compressed).unwrap();
        assert_eq!(decoded.get(KEY_DESCRIPTION), Some("a disk image"));
    }

    #[test]
    fn xheader_round_trips_xml() {
        let mut values = HeaderValues::new();
        values.set(KEY_NOTES, "contains <brackets> & ampersands");

        let compressed = write_xheader(&values);
        let decoded = read_xheader(&compressed).unwrap();
        assert_eq!(decoded.get(KEY_NOTES), Some("contains <brackets> & ampersands"));
    }

    #[test]
    fn merge_prefers_later_values() {
        let mut a = HeaderValues::new();
        a.set(KEY_CASE_NUMBER, "from-header");
        let mut b = HeaderValues::new();
        b.set(KEY_CASE_NUMBER, "from-header2");
        a.merge(b);
        assert_eq!(a.get(KEY_CASE_NUMBER), Some("from-header2"));
    }

    #[test]
    fn iso8601_formatting() {
        // 2024-01-02T03:04:05Z
        let t = format_timestamp(1_704_164_645, DateFormat::Iso8601);
        assert_eq!(t, "2024-01-02T03:04:05");
    }
}
