//! GIS building-integrated layer processor (AL_D010).
//!
//! One shapefile carrying both building footprints and register attributes.
//! Field names are `A0..A28` in most vintages with Korean names as the
//! fallback. Original attributes are preserved as `raw_data`.

use std::path::Path;

use parcelpipe_geometry::to_storage;
use parcelpipe_shared::types::{safe_float, safe_int};
use parcelpipe_shared::{ConflictPolicy, NormalizedRow, Pnu, Result, SqlValue, TableSpec};

use crate::file_utils::{extract_zip, find_by_extension, read_shp_records};
use crate::{RawRecord, RecordStream, SourceProcessor};

/// `A`-coded attribute name and its Korean fallback, per target column.
const FIELD_MAP: &[(&str, &str, &str)] = &[
    ("A2", "고유번호", "pnu"),
    ("A9", "건축물용도명", "use_name"),
    ("A12", "건축물면적", "building_area"),
    ("A13", "사용승인일자", "approval_date"),
    ("A14", "연면적", "total_floor_area"),
    ("A15", "대지면적", "site_area"),
    ("A16", "높이", "height"),
    ("A19", "건축물ID", "building_id"),
    ("A24", "건물명", "building_name"),
    ("A26", "지상층수", "above_ground_floors"),
    ("A27", "지하층수", "underground_floors"),
];

pub struct GisBuildingProcessor;

impl GisBuildingProcessor {
    fn mapped(raw: &RawRecord, column: &str) -> Option<String> {
        let &(a_field, kr_field, _) = FIELD_MAP.iter().find(|(_, _, c)| *c == column)?;
        raw.first_of(&[a_field, kr_field])
    }
}

impl SourceProcessor for GisBuildingProcessor {
    fn name(&self) -> &'static str {
        "gis-building"
    }

    fn description(&self) -> &'static str {
        "GIS building-integrated layer (AL_D010, SHP)"
    }

    fn table(&self) -> TableSpec {
        TableSpec {
            table: "gis_buildings",
            conflict: ConflictPolicy::Upsert(&["pnu", "building_id"]),
            jsonb_column: None,
            batch_size: 1000,
        }
    }

    fn data_dir(&self) -> &'static str {
        "gis_building"
    }

    fn file_pattern(&self) -> &'static str {
        "*.zip"
    }

    fn collect(&self, path: &Path) -> Result<RecordStream> {
        let tmp_dir = extract_zip(path)?;
        let shp_path = find_by_extension(tmp_dir.path(), "shp").ok_or_else(|| {
            parcelpipe_shared::PipelineError::source_read(path, "archive contains no .shp member")
        })?;
        let records = read_shp_records(&shp_path)?;
        Ok(Box::new(records.into_iter().map(Ok)))
    }

    fn transform(&self, raw: &RawRecord) -> Result<Option<NormalizedRow>> {
        let Some(code) = Self::mapped(raw, "pnu") else {
            return Ok(None);
        };
        let Some(head) = code.get(..19) else {
            return Ok(None);
        };
        let pnu = Pnu::parse(head)?;

        // The conflict key needs both halves; footprints without a building
        // id cannot be upserted idempotently and are skipped.
        let Some(building_id) = Self::mapped(raw, "building_id") else {
            return Ok(None);
        };

        let geometry = to_storage(raw.geometry.as_ref(), raw.crs, self.simplify_tolerance())?;
        let raw_data: serde_json::Map<String, serde_json::Value> = raw
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let float_of = |col: &str| {
            SqlValue::Float(Self::mapped(raw, col).as_deref().and_then(safe_float))
        };
        let int_of = |col: &str| SqlValue::Int(Self::mapped(raw, col).as_deref().and_then(safe_int));

        let mut row = NormalizedRow::new();
        row.push("pnu", SqlValue::text(pnu.as_str()));
        row.push("building_id", SqlValue::text(building_id));
        row.push("use_name", SqlValue::Text(Self::mapped(raw, "use_name")));
        row.push("building_area", float_of("building_area"));
        row.push(
            "approval_date",
            SqlValue::Text(Self::mapped(raw, "approval_date")),
        );
        row.push("total_floor_area", float_of("total_floor_area"));
        row.push("site_area", float_of("site_area"));
        row.push("height", float_of("height"));
        row.push(
            "building_name",
            SqlValue::Text(Self::mapped(raw, "building_name")),
        );
        row.push("above_ground_floors", int_of("above_ground_floors"));
        row.push("underground_floors", int_of("underground_floors"));
        row.push("geometry", SqlValue::Geometry(geometry));
        row.push(
            "raw_data",
            SqlValue::Json(Some(serde_json::Value::Object(raw_data))),
        );
        row.region_code = Some(pnu.as_str().to_string());
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
    fn a_coded_fields_map_to_columns() {
        let row = GisBuildingProcessor
            .transform(&raw(&[
                ("A2", "1111010100101230045"),
                ("A9", "공동주택"),
                ("A12", "198.2"),
                ("A19", "B-1000123"),
                ("A26", "12"),
            ]))
            .unwrap()
            .expect("row");

        assert_eq!(row.get("pnu"), Some(&SqlValue::text("1111010100101230045")));
        assert_eq!(row.get("building_id"), Some(&SqlValue::text("B-1000123")));
        assert_eq!(row.get("building_area"), Some(&SqlValue::Float(Some(198.2))));
        assert_eq!(row.get("above_ground_floors"), Some(&SqlValue::Int(Some(12))));
        let Some(SqlValue::Json(Some(raw_data))) = row.get("raw_data") else {
            panic!("expected raw_data");
        };
        assert_eq!(raw_data["A9"], serde_json::json!("공동주택"));
    }

    #[test]
    fn korean_field_names_are_the_fallback() {
        let row = GisBuildingProcessor
            .transform(&raw(&[
                ("고유번호", "1111010100101230045"),
                ("건축물ID", "B-2"),
                ("건물명", "한글레이어"),
            ]))
            .unwrap()
            .expect("row");
        assert_eq!(row.get("building_name"), Some(&SqlValue::text("한글레이어")));
    }

    #[test]
    fn rows_without_key_halves_are_skipped() {
        // Missing building id
        assert!(
            GisBuildingProcessor
                .transform(&raw(&[("A2", "1111010100101230045")]))
                .unwrap()
                .is_none()
        );
        // Missing pnu
        assert!(
            GisBuildingProcessor
                .transform(&raw(&[("A19", "B-3")]))
                .unwrap()
                .is_none()
        );
    }
}
