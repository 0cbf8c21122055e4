//! Administrative boundary processors: province → district → sub-district.
//!
//! One shapefile layer per level. Attribute names vary between vintages of
//! the layer, so codes and names are resolved through fallback lists. Parent
//! codes are prefixes of the child code. Boundary polygons are dense, so all
//! three levels simplify at a fixed tolerance.

use std::path::Path;

use parcelpipe_geometry::to_storage;
use parcelpipe_shared::{ConflictPolicy, NormalizedRow, Result, SqlValue, TableSpec};

use crate::file_utils::{extract_zip, find_by_extension, read_shp_records};
use crate::{RawRecord, RecordStream, SourceProcessor};

const BOUNDARY_SIMPLIFY_TOLERANCE: f64 = 0.001;

/// Administrative codes are numeric; anything else is a mis-mapped field.
fn numeric_code(code: &str) -> Option<&str> {
    (!code.is_empty() && code.bytes().all(|b| b.is_ascii_digit())).then_some(code)
}

fn collect_boundary(path: &Path) -> Result<RecordStream> {
    let tmp_dir = extract_zip(path)?;
    let shp_path = find_by_extension(tmp_dir.path(), "shp").ok_or_else(|| {
        parcelpipe_shared::PipelineError::source_read(path, "archive contains no .shp member")
    })?;
    let records = read_shp_records(&shp_path)?;
    Ok(Box::new(records.into_iter().map(Ok)))
}

// ---------------------------------------------------------------------------
// Province level
// ---------------------------------------------------------------------------

pub struct ProvinceBoundaryProcessor;

impl SourceProcessor for ProvinceBoundaryProcessor {
    fn name(&self) -> &'static str {
        "admin-province"
    }

    fn description(&self) -> &'static str {
        "Administrative boundaries: province level (SHP)"
    }

    fn table(&self) -> TableSpec {
        TableSpec {
            table: "administrative_provinces",
            conflict: ConflictPolicy::Upsert(&["code"]),
            jsonb_column: None,
            batch_size: 500,
        }
    }

    fn data_dir(&self) -> &'static str {
        "admin_boundary_province"
    }

    fn file_pattern(&self) -> &'static str {
        "*.zip"
    }

    fn simplify_tolerance(&self) -> Option<f64> {
        Some(BOUNDARY_SIMPLIFY_TOLERANCE)
    }

    fn collect(&self, path: &Path) -> Result<RecordStream> {
        collect_boundary(path)
    }

    fn transform(&self, raw: &RawRecord) -> Result<Option<NormalizedRow>> {
        let code = raw.first_of(&["BJCD", "ADM_CD", "CTPRVN_CD"]);
        let name = raw.first_of(&["NAME", "CTP_KOR_NM", "CTPRVN_NM"]);
        let (Some(code), Some(name)) = (code, name) else {
            return Ok(None);
        };
        let Some(code) = numeric_code(&code)
            .and_then(|c| c.get(..2))
            .map(str::to_string)
        else {
            return Ok(None);
        };

        let geometry = to_storage(raw.geometry.as_ref(), raw.crs, self.simplify_tolerance())?;

        let mut row = NormalizedRow::new();
        row.push("code", SqlValue::text(code.clone()));
        row.push("name", SqlValue::text(name));
        row.push("geometry", SqlValue::Geometry(geometry));
        row.region_code = Some(code);
        Ok(Some(row))
    }
}

// ---------------------------------------------------------------------------
// District level
// ---------------------------------------------------------------------------

pub struct DistrictBoundaryProcessor;

impl SourceProcessor for DistrictBoundaryProcessor {
    fn name(&self) -> &'static str {
        "admin-district"
    }

    fn description(&self) -> &'static str {
        "Administrative boundaries: district level (SHP)"
    }

    fn table(&self) -> TableSpec {
        TableSpec {
            table: "administrative_districts",
            conflict: ConflictPolicy::Upsert(&["code"]),
            jsonb_column: None,
            batch_size: 500,
        }
    }

    fn data_dir(&self) -> &'static str {
        "admin_boundary_district"
    }

    fn file_pattern(&self) -> &'static str {
        "*.zip"
    }

    fn simplify_tolerance(&self) -> Option<f64> {
        Some(BOUNDARY_SIMPLIFY_TOLERANCE)
    }

    fn collect(&self, path: &Path) -> Result<RecordStream> {
        collect_boundary(path)
    }

    fn transform(&self, raw: &RawRecord) -> Result<Option<NormalizedRow>> {
        let code = raw.first_of(&["BJCD", "ADM_CD", "SIG_CD"]);
        let name = raw.first_of(&["NAME", "SIG_KOR_NM", "SIGUNGU_NM"]);
        let (Some(code), Some(name)) = (code, name) else {
            return Ok(None);
        };
        let Some(code) = numeric_code(&code)
            .and_then(|c| c.get(..5))
            .map(str::to_string)
        else {
            return Ok(None);
        };

        let geometry = to_storage(raw.geometry.as_ref(), raw.crs, self.simplify_tolerance())?;

        let mut row = NormalizedRow::new();
        row.push("code", SqlValue::text(code.clone()));
        row.push("name", SqlValue::text(name));
        row.push("province_code", SqlValue::text(&code[..2]));
        row.push("geometry", SqlValue::Geometry(geometry));
        row.region_code = Some(code);
        Ok(Some(row))
    }
}

// ---------------------------------------------------------------------------
// Sub-district level
// ---------------------------------------------------------------------------

pub struct SubDistrictBoundaryProcessor;

impl SourceProcessor for SubDistrictBoundaryProcessor {
    fn name(&self) -> &'static str {
        "admin-subdistrict"
    }

    fn description(&self) -> &'static str {
        "Administrative boundaries: sub-district level (SHP)"
    }

    fn table(&self) -> TableSpec {
        TableSpec {
            table: "administrative_subdistricts",
            conflict: ConflictPolicy::Upsert(&["code"]),
            jsonb_column: None,
            batch_size: 500,
        }
    }

    fn data_dir(&self) -> &'static str {
        "admin_boundary_subdistrict"
    }

    fn file_pattern(&self) -> &'static str {
        "*.zip"
    }

    fn simplify_tolerance(&self) -> Option<f64> {
        Some(BOUNDARY_SIMPLIFY_TOLERANCE)
    }

    fn collect(&self, path: &Path) -> Result<RecordStream> {
        collect_boundary(path)
    }

    fn transform(&self, raw: &RawRecord) -> Result<Option<NormalizedRow>> {
        let code = raw.first_of(&["BJCD", "ADM_CD", "EMD_CD"]);
        let name = raw.first_of(&["NAME", "EMD_KOR_NM", "EMD_NM"]);
        let (Some(code), Some(name)) = (code, name) else {
            return Ok(None);
        };
        let Some(district_code) = numeric_code(&code)
            .and_then(|c| c.get(..5))
            .map(str::to_string)
        else {
            return Ok(None);
        };

        let geometry = to_storage(raw.geometry.as_ref(), raw.crs, self.simplify_tolerance())?;

        let mut row = NormalizedRow::new();
        row.push("code", SqlValue::text(code.clone()));
        row.push("name", SqlValue::text(name));
        row.push("district_code", SqlValue::text(district_code));
        row.push("geometry", SqlValue::Geometry(geometry));
        row.region_code = Some(code);
        Ok(Some(row))
    }
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
    fn province_prefers_bjcd_and_truncates() {
        let row = ProvinceBoundaryProcessor
            .transform(&raw(&[("BJCD", "1100000000"), ("NAME", "서울특별시")]))
            .unwrap()
            .expect("row");
        assert_eq!(row.get("code"), Some(&SqlValue::text("11")));
        assert_eq!(row.get("name"), Some(&SqlValue::text("서울특별시")));
    }

    #[test]
    fn district_falls_back_to_sig_fields() {
        let row = DistrictBoundaryProcessor
            .transform(&raw(&[("SIG_CD", "11110"), ("SIG_KOR_NM", "종로구")]))
            .unwrap()
            .expect("row");
        assert_eq!(row.get("code"), Some(&SqlValue::text("11110")));
        assert_eq!(row.get("province_code"), Some(&SqlValue::text("11")));
        assert_eq!(row.region_code.as_deref(), Some("11110"));
    }

    #[test]
    fn subdistrict_links_parent_district() {
        let row = SubDistrictBoundaryProcessor
            .transform(&raw(&[("EMD_CD", "11110101"), ("EMD_KOR_NM", "청운동")]))
            .unwrap()
            .expect("row");
        assert_eq!(row.get("code"), Some(&SqlValue::text("11110101")));
        assert_eq!(row.get("district_code"), Some(&SqlValue::text("11110")));
    }

    #[test]
    fn rows_without_code_or_name_are_skipped() {
        assert!(
            DistrictBoundaryProcessor
                .transform(&raw(&[("SIG_CD", "11110")]))
                .unwrap()
                .is_none()
        );
        assert!(
            DistrictBoundaryProcessor
                .transform(&raw(&[("SIG_CD", "111"), ("NAME", "짧은코드")]))
                .unwrap()
                .is_none()
        );
    }
}
