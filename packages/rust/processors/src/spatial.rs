//! Spatial layer processors: road centerlines and use-region districts.
//!
//! Both are shapefile layers without a usable natural key, loaded with
//! content-hash dedup so re-runs do not duplicate rows. Road centerlines
//! carry no administrative code at all, so they are exempt from the region
//! filter; use-region districts filter on their `admin_code` attribute.

use std::path::Path;

use parcelpipe_geometry::to_storage;
use parcelpipe_shared::{ConflictPolicy, NormalizedRow, Result, SqlValue, TableSpec};

use crate::file_utils::{extract_zip, find_by_extension, read_shp_records};
use crate::{RawRecord, RecordStream, SourceProcessor};

fn collect_shp_zip(path: &Path) -> Result<RecordStream> {
    let tmp_dir = extract_zip(path)?;
    let shp_path = find_by_extension(tmp_dir.path(), "shp").ok_or_else(|| {
        parcelpipe_shared::PipelineError::source_read(path, "archive contains no .shp member")
    })?;
    let records = read_shp_records(&shp_path)?;
    Ok(Box::new(records.into_iter().map(Ok)))
}

// ---------------------------------------------------------------------------
// Road centerlines
// ---------------------------------------------------------------------------

pub struct RoadCenterLineProcessor;

impl SourceProcessor for RoadCenterLineProcessor {
    fn name(&self) -> &'static str {
        "road-centerline"
    }

    fn description(&self) -> &'static str {
        "Road centerlines (topographic map, SHP)"
    }

    fn table(&self) -> TableSpec {
        TableSpec {
            table: "road_center_lines",
            conflict: ConflictPolicy::Dedup("row_hash"),
            jsonb_column: None,
            batch_size: 2000,
        }
    }

    fn data_dir(&self) -> &'static str {
        "road_centerline"
    }

    fn file_pattern(&self) -> &'static str {
        "*.zip"
    }

    fn collect(&self, path: &Path) -> Result<RecordStream> {
        collect_shp_zip(path)
    }

    fn transform(&self, raw: &RawRecord) -> Result<Option<NormalizedRow>> {
        let Some(source_id) = raw.first_of(&["UFID", "A0", "ID"]) else {
            return Ok(None);
        };
        let road_name = raw.first_of(&["NAME", "RDNM", "RN", "A1"]);

        let geometry = to_storage(raw.geometry.as_ref(), raw.crs, self.simplify_tolerance())?;

        let mut row = NormalizedRow::new();
        row.push("source_id", SqlValue::text(truncate(&source_id, 200)));
        row.push(
            "road_name",
            SqlValue::Text(road_name.map(|n| truncate(&n, 200))),
        );
        row.push("geometry", SqlValue::Geometry(geometry));
        Ok(Some(row))
    }
}

// ---------------------------------------------------------------------------
// Use-region districts
// ---------------------------------------------------------------------------

pub struct UseRegionDistrictProcessor;

impl SourceProcessor for UseRegionDistrictProcessor {
    fn name(&self) -> &'static str {
        "use-region"
    }

    fn description(&self) -> &'static str {
        "Use-region districts (AL_D131/AL_D067, SHP)"
    }

    fn table(&self) -> TableSpec {
        TableSpec {
            table: "use_region_districts",
            conflict: ConflictPolicy::Dedup("row_hash"),
            jsonb_column: None,
            batch_size: 2000,
        }
    }

    fn data_dir(&self) -> &'static str {
        "use_region"
    }

    fn file_pattern(&self) -> &'static str {
        "*.zip"
    }

    fn collect(&self, path: &Path) -> Result<RecordStream> {
        collect_shp_zip(path)
    }

    fn transform(&self, raw: &RawRecord) -> Result<Option<NormalizedRow>> {
        let Some(source_id) = raw.first_of(&["A1", "관리번호"]) else {
            return Ok(None);
        };
        let district_name = raw.first_of(&["A2", "용도지역지구명"]);
        let admin_code = raw.first_of(&["A4", "행정구역코드"]);
        let district_code = raw.first_of(&["A5", "용도코드"]);

        let geometry = to_storage(raw.geometry.as_ref(), raw.crs, self.simplify_tolerance())?;
        let raw_data: serde_json::Map<String, serde_json::Value> = raw
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut row = NormalizedRow::new();
        row.push("source_id", SqlValue::text(truncate(&source_id, 200)));
        row.push(
            "district_name",
            SqlValue::Text(district_name.map(|n| truncate(&n, 200))),
        );
        row.push(
            "district_code",
            SqlValue::Text(district_code.map(|c| truncate(&c, 50))),
        );
        row.push(
            "admin_code",
            SqlValue::Text(admin_code.clone().map(|c| truncate(&c, 10))),
        );
        row.push("geometry", SqlValue::Geometry(geometry));
        row.push(
            "raw_data",
            SqlValue::Json(Some(serde_json::Value::Object(raw_data))),
        );
        row.region_code = admin_code;
        Ok(Some(row))
    }
}

/// Truncate at a character boundary (source fields are occasionally padded
/// far beyond their nominal widths).
fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(fields: &[(&str, &str)]) -> RawRecord {
        let mut record = RawRecord::default();
        for (k, v) in fields {
            record
                .fields
                .insert((*k).into(), serde_json::Value::String((*v).into()));
        }
        record
    }

    #[test]
    fn road_resolves_id_and_name_fallbacks() {
        let row = RoadCenterLineProcessor
            .transform(&raw(&[("UFID", "RD00012345"), ("RDNM", "세종대로")]))
            .unwrap()
            .expect("row");
        assert_eq!(row.get("source_id"), Some(&SqlValue::text("RD00012345")));
        assert_eq!(row.get("road_name"), Some(&SqlValue::text("세종대로")));
        // No admin code in the source: exempt from region filtering.
        assert!(row.region_code.is_none());
    }

    #[test]
    fn road_without_any_id_is_skipped() {
        assert!(
            RoadCenterLineProcessor
                .transform(&raw(&[("RDNM", "이름만")]))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn use_region_maps_codes_and_filters_by_admin_code() {
        let row = UseRegionDistrictProcessor
            .transform(&raw(&[
                ("A1", "UQ-001"),
                ("A2", "제1종일반주거지역"),
                ("A4", "11110"),
                ("A5", "UQA100"),
            ]))
            .unwrap()
            .expect("row");
        assert_eq!(row.get("district_name"), Some(&SqlValue::text("제1종일반주거지역")));
        assert_eq!(row.get("admin_code"), Some(&SqlValue::text("11110")));
        assert_eq!(row.region_code.as_deref(), Some("11110"));
    }

    #[test]
    fn use_region_korean_fallback_names() {
        let row = UseRegionDistrictProcessor
            .transform(&raw(&[("관리번호", "UQ-002"), ("용도지역지구명", "녹지지역")]))
            .unwrap()
            .expect("row");
        assert_eq!(row.get("source_id"), Some(&SqlValue::text("UQ-002")));
        assert_eq!(row.get("district_name"), Some(&SqlValue::text("녹지지역")));
    }

    #[test]
    fn oversize_fields_truncate() {
        let long_id = "x".repeat(300);
        let row = RoadCenterLineProcessor
            .transform(&raw(&[("UFID", long_id.as_str())]))
            .unwrap()
            .expect("row");
        let Some(SqlValue::Text(Some(id))) = row.get("source_id") else {
            panic!("expected id");
        };
        assert_eq!(id.chars().count(), 200);
    }
}
