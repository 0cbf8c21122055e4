//! File utilities shared by the processors: ZIP extraction, legacy-encoding
//! text decoding, shapefile reading, and region-scoped archive discovery.

use std::fs::File;
use std::path::{Path, PathBuf};

use encoding_rs::EUC_KR;
use parcelpipe_geometry::SourceCrs;
use parcelpipe_shared::{PipelineError, Result, regions};
use tempfile::TempDir;

use crate::RawRecord;

// ---------------------------------------------------------------------------
// Archives
// ---------------------------------------------------------------------------

/// Extract a ZIP archive into a fresh temp directory. The directory is
/// removed when the returned guard drops.
pub fn extract_zip(zip_path: &Path) -> Result<TempDir> {
    let file = File::open(zip_path).map_err(|e| PipelineError::io(zip_path, e))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| PipelineError::source_read(zip_path, format!("unreadable archive: {e}")))?;

    let tmp_dir = tempfile::Builder::new()
        .prefix("parcelpipe_")
        .tempdir()
        .map_err(|e| PipelineError::io(zip_path, e))?;

    archive
        .extract(tmp_dir.path())
        .map_err(|e| PipelineError::source_read(zip_path, format!("extraction failed: {e}")))?;
    Ok(tmp_dir)
}

/// Find the first file with the given extension under a directory (recursive).
pub fn find_by_extension(dir: &Path, extension: &str) -> Option<PathBuf> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    for path in &entries {
        if path.extension().and_then(|e| e.to_str()) == Some(extension) {
            return Some(path.clone());
        }
    }
    for path in entries {
        if path.is_dir() {
            if let Some(found) = find_by_extension(&path, extension) {
                return Some(found);
            }
        }
    }
    None
}

/// List a source directory's files matching a `*.<ext>` pattern, sorted.
pub fn list_source_files(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let extension = pattern.trim_start_matches("*.");
    if !dir.exists() {
        return Err(PipelineError::source_read(
            dir,
            "source directory does not exist",
        ));
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| PipelineError::io(dir, e))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(extension))
        .collect();
    files.sort();
    Ok(files)
}

/// Keep only archives whose file name matches one of the region prefixes.
/// Archive names embed either the numeric code (`AL_D003_11_20260212.zip`,
/// `AL_D194_11110_...zip`) or a province short name
/// (`LSMD_CONT_LDREG_서울.zip`). An empty prefix list keeps everything.
pub fn filter_files_by_region(files: Vec<PathBuf>, prefixes: &[String]) -> Vec<PathBuf> {
    if prefixes.is_empty() {
        return files;
    }

    let province_codes: Vec<&str> = prefixes.iter().map(|p| &p[..2.min(p.len())]).collect();

    files
        .into_iter()
        .filter(|path| {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();

            // Numeric code segments in the file name.
            for part in stem.split('_') {
                if part.len() == 2 && province_codes.contains(&part) {
                    return true;
                }
                if part.len() == 5
                    && part.bytes().all(|b| b.is_ascii_digit())
                    && prefixes.iter().any(|p| part.starts_with(p.as_str()))
                {
                    return true;
                }
            }

            // Province short names.
            regions::PROVINCE_SHORT_NAMES
                .iter()
                .any(|(name, code)| province_codes.contains(code) && stem.contains(name))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Text decoding
// ---------------------------------------------------------------------------

/// Read a text file that is either UTF-8 or CP949/EUC-KR encoded.
///
/// Strict in both directions: a byte stream that decodes cleanly under
/// neither encoding is a `SourceRead` error — mis-decoded bytes must surface,
/// never mojibake into stored text.
pub fn decode_text(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| PipelineError::io(path, e))?;

    // UTF-8 first (exact validation), with BOM tolerance.
    let without_bom = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF][..]).unwrap_or(&bytes);
    if let Ok(text) = std::str::from_utf8(without_bom) {
        return Ok(text.to_string());
    }

    let (decoded, _, had_errors) = EUC_KR.decode(&bytes);
    if had_errors {
        return Err(PipelineError::source_read(
            path,
            "file decodes under neither UTF-8 nor CP949",
        ));
    }
    Ok(decoded.into_owned())
}

/// Owning line iterator over a decoded buffer (streams without re-allocating
/// the whole file as a `Vec<String>`).
pub struct OwnedLines {
    buf: String,
    pos: usize,
}

impl OwnedLines {
    pub fn new(buf: String) -> Self {
        Self { buf, pos: 0 }
    }
}

impl Iterator for OwnedLines {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.pos >= self.buf.len() {
            return None;
        }
        let rest = &self.buf[self.pos..];
        let (line, advance) = match rest.find('\n') {
            Some(idx) => (&rest[..idx], idx + 1),
            None => (rest, rest.len()),
        };
        self.pos += advance;
        Some(line.trim_end_matches('\r').to_string())
    }
}

// ---------------------------------------------------------------------------
// Shapefiles
// ---------------------------------------------------------------------------

/// Read all features of a shapefile into raw records: attribute table fields
/// plus a GeoJSON-shaped geometry, tagged with the CRS sniffed from the
/// `.prj` sidecar.
pub fn read_shp_records(shp_path: &Path) -> Result<Vec<RawRecord>> {
    let crs = read_prj_crs(shp_path);

    let features = shapefile::read(shp_path)
        .map_err(|e| PipelineError::source_read(shp_path, format!("shapefile read: {e}")))?;

    let mut records = Vec::with_capacity(features.len());
    for (shape, attributes) in features {
        let geometry = shape_to_geojson(shape);

        let mut fields = serde_json::Map::new();
        for (name, value) in attributes {
            fields.insert(name, dbase_to_json(value));
        }

        records.push(RawRecord {
            fields,
            geometry,
            crs,
        });
    }
    Ok(records)
}

fn read_prj_crs(shp_path: &Path) -> SourceCrs {
    let prj_path = shp_path.with_extension("prj");
    match std::fs::read_to_string(&prj_path) {
        Ok(text) => SourceCrs::from_prj(&text),
        Err(_) => {
            tracing::debug!(?prj_path, "no .prj sidecar, assuming WGS84");
            SourceCrs::Wgs84
        }
    }
}

fn shape_to_geojson(shape: shapefile::Shape) -> Option<geojson::Geometry> {
    if matches!(shape, shapefile::Shape::NullShape) {
        return None;
    }
    let geom: geo_types::Geometry<f64> = shape.try_into().ok()?;
    Some(geojson::Geometry::new(geojson::Value::from(&geom)))
}

fn dbase_to_json(value: shapefile::dbase::FieldValue) -> serde_json::Value {
    use serde_json::Value;
    use shapefile::dbase::FieldValue;

    match value {
        FieldValue::Character(v) => v.map(Value::String).unwrap_or(Value::Null),
        FieldValue::Numeric(v) => v
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        FieldValue::Float(v) => v
            .and_then(|f| serde_json::Number::from_f64(f64::from(f)))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        FieldValue::Integer(v) => Value::from(v),
        FieldValue::Logical(v) => v.map(Value::Bool).unwrap_or(Value::Null),
        FieldValue::Date(v) => v
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn decode_utf8_text() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all("고유번호,지목명\n".as_bytes()).unwrap();
        let text = decode_text(f.path()).expect("decode");
        assert!(text.starts_with("고유번호"));
    }

    #[test]
    fn decode_cp949_text() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        let (encoded, _, _) = EUC_KR.encode("고유번호,지목명\n1111010100101230045,대\n");
        f.write_all(&encoded).unwrap();

        let text = decode_text(f.path()).expect("decode");
        assert!(text.contains("지목명"));
        assert!(text.contains("대"));
        assert!(!text.contains('\u{FFFD}'));
    }

    #[test]
    fn decode_rejects_garbage() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        // 0xFF 0xFF is invalid in UTF-8 and unmapped in CP949.
        f.write_all(&[0x41, 0xFF, 0xFF, 0x42]).unwrap();
        let err = decode_text(f.path()).unwrap_err();
        assert!(matches!(err, PipelineError::SourceRead { .. }));
    }

    #[test]
    fn owned_lines_handles_crlf_and_final_line() {
        let lines: Vec<String> =
            OwnedLines::new("a|b\r\nc|d\ne|f".to_string()).collect();
        assert_eq!(lines, vec!["a|b", "c|d", "e|f"]);
    }

    #[test]
    fn zip_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("sample.zip");
        {
            let file = File::create(&zip_path).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            writer
                .start_file("nested/data.csv", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"col\nvalue\n").unwrap();
            writer.finish().unwrap();
        }

        let extracted = extract_zip(&zip_path).expect("extract");
        let csv = find_by_extension(extracted.path(), "csv").expect("find csv");
        assert!(csv.ends_with("nested/data.csv") || csv.ends_with("data.csv"));
    }

    #[test]
    fn extract_rejects_non_archive() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"not a zip").unwrap();
        assert!(matches!(
            extract_zip(f.path()),
            Err(PipelineError::SourceRead { .. })
        ));
    }

    #[test]
    fn region_filtering_matches_codes_and_names() {
        let files = vec![
            PathBuf::from("AL_D003_11_20260212.zip"),
            PathBuf::from("AL_D003_41_20260212.zip"),
            PathBuf::from("AL_D194_11110_20250814.zip"),
            PathBuf::from("LSMD_CONT_LDREG_서울.zip"),
            PathBuf::from("LSMD_CONT_LDREG_부산.zip"),
        ];

        let kept = filter_files_by_region(files.clone(), &["11".to_string()]);
        let names: Vec<&str> = kept
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                "AL_D003_11_20260212.zip",
                "AL_D194_11110_20250814.zip",
                "LSMD_CONT_LDREG_서울.zip"
            ]
        );

        // No prefixes: everything passes.
        assert_eq!(filter_files_by_region(files, &[]).len(), 5);
    }
}
