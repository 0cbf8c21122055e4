//! Continuous cadastral map processor: parcel polygons → `lots`.
//!
//! Source archives are `LSMD_CONT_LDREG_{province}.zip`, one shapefile per
//! province, attribute `PNU` carrying the 19-digit parcel key. This is the
//! root source: it must complete before any parcel-keyed processor runs.

use std::path::Path;

use parcelpipe_geometry::to_storage;
use parcelpipe_shared::{ConflictPolicy, NormalizedRow, Pnu, Result, SqlValue, TableSpec};

use crate::file_utils::{extract_zip, find_by_extension, read_shp_records};
use crate::{RawRecord, RecordStream, SourceProcessor};

pub struct CadastralProcessor;

impl SourceProcessor for CadastralProcessor {
    fn name(&self) -> &'static str {
        "cadastral"
    }

    fn description(&self) -> &'static str {
        "Continuous cadastral map (LSMD_CONT_LDREG, SHP)"
    }

    fn table(&self) -> TableSpec {
        TableSpec {
            table: "lots",
            conflict: ConflictPolicy::Upsert(&["pnu"]),
            jsonb_column: None,
            batch_size: 2000,
        }
    }

    fn data_dir(&self) -> &'static str {
        "cadastral"
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
        tracing::debug!(file = %path.display(), count = records.len(), "cadastral features read");
        // tmp_dir drops here; features are already materialized.
        Ok(Box::new(records.into_iter().map(Ok)))
    }

    fn transform(&self, raw: &RawRecord) -> Result<Option<NormalizedRow>> {
        let Some(code) = raw.field_string("PNU") else {
            return Ok(None);
        };
        let Some(head) = code.get(..19) else {
            return Ok(None);
        };
        let pnu = Pnu::parse(head)?;

        let geometry = to_storage(raw.geometry.as_ref(), raw.crs, self.simplify_tolerance())?;

        let mut row = NormalizedRow::new();
        row.push("pnu", SqlValue::text(pnu.as_str()));
        row.push("province_code", SqlValue::text(pnu.province_code()));
        row.push("district_code", SqlValue::text(pnu.district_code()));
        row.push("geometry", SqlValue::Geometry(geometry));
        row.region_code = Some(pnu.as_str().to_string());
        Ok(Some(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parcelpipe_shared::GeomValue;

    fn raw_with_pnu(pnu: &str) -> RawRecord {
        let mut raw = RawRecord::default();
        raw.fields
            .insert("PNU".into(), serde_json::Value::String(pnu.into()));
        raw.geometry = Some(geojson::Geometry::new(geojson::Value::Polygon(vec![vec![
            vec![127.0, 37.5],
            vec![127.001, 37.5],
            vec![127.001, 37.501],
            vec![127.0, 37.5],
        ]])));
        raw
    }

    #[test]
    fn transforms_parcel_with_geometry() {
        let row = CadastralProcessor
            .transform(&raw_with_pnu("1111010100101230045"))
            .unwrap()
            .expect("row");

        assert_eq!(row.get("pnu"), Some(&SqlValue::text("1111010100101230045")));
        assert_eq!(row.get("district_code"), Some(&SqlValue::text("11110")));
        let Some(SqlValue::Geometry(GeomValue::Wkt(wkt))) = row.get("geometry") else {
            panic!("expected WKT geometry");
        };
        assert!(wkt.starts_with("POLYGON"));
        assert_eq!(row.region_code.as_deref(), Some("1111010100101230045"));
    }

    #[test]
    fn truncates_long_codes_to_pnu_width() {
        // Some layers append suffixes to the parcel key; only the first 19
        // digits identify the parcel.
        let row = CadastralProcessor
            .transform(&raw_with_pnu("11110101001012300451234"))
            .unwrap()
            .expect("row");
        assert_eq!(row.get("pnu"), Some(&SqlValue::text("1111010100101230045")));
    }

    #[test]
    fn skips_rows_without_key() {
        let raw = RawRecord::default();
        assert!(CadastralProcessor.transform(&raw).unwrap().is_none());

        let short = raw_with_pnu("12345");
        assert!(CadastralProcessor.transform(&short).unwrap().is_none());
    }
}
