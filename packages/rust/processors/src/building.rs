//! Building-register processors for the national bulk text dumps.
//!
//! Five sub-variants share one base format: pipe-delimited rows with no
//! header, columns addressed by index, CP949 encoded. The parcel key is not
//! precomposed — it is built from the sigungu/legal-dong/flag/main/sub fields
//! at per-variant positions. All five files live in one directory and are
//! told apart by the `mart_djy_NN` marker in the file name.

use std::path::Path;

use parcelpipe_shared::types::{safe_float, safe_int};
use parcelpipe_shared::{ConflictPolicy, NormalizedRow, Pnu, Result, SqlValue, TableSpec};

use crate::file_utils::{OwnedLines, decode_text};
use crate::{RawRecord, RecordStream, SourceProcessor};

const BUILDING_DATA_DIR: &str = "building_register";

/// Field positions composing the PNU: (sigungu, bjdong, flag, main, sub).
type PnuIndices = (usize, usize, usize, usize, usize);

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn collect_txt(path: &Path) -> Result<RecordStream> {
    let content = decode_text(path)?;

    let stream = OwnedLines::new(content)
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let fields: Vec<serde_json::Value> = line
                .split('|')
                .map(|f| serde_json::Value::String(f.trim().to_string()))
                .collect();
            let mut raw = RawRecord::default();
            raw.fields
                .insert("fields".into(), serde_json::Value::Array(fields));
            Ok(raw)
        });
    Ok(Box::new(stream))
}

fn field_at(raw: &RawRecord, index: usize) -> Option<String> {
    let fields = raw.positional()?;
    match fields.get(index)? {
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        _ => None,
    }
}

fn compose_pnu(raw: &RawRecord, indices: PnuIndices) -> Option<Pnu> {
    let (si, bj, flag, main, sub) = indices;
    Pnu::compose(
        &field_at(raw, si)?,
        &field_at(raw, bj)?,
        &field_at(raw, flag).unwrap_or_else(|| "0".into()),
        &field_at(raw, main).unwrap_or_else(|| "0".into()),
        &field_at(raw, sub).unwrap_or_else(|| "0".into()),
    )
    .ok()
}

fn text_at(raw: &RawRecord, index: usize) -> SqlValue {
    SqlValue::Text(field_at(raw, index))
}

fn int_at(raw: &RawRecord, index: usize) -> SqlValue {
    SqlValue::Int(field_at(raw, index).as_deref().and_then(safe_int))
}

fn float_at(raw: &RawRecord, index: usize) -> SqlValue {
    SqlValue::Float(field_at(raw, index).as_deref().and_then(safe_float))
}

fn accepts_marker(path: &Path, marker: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.contains(marker))
}

// ---------------------------------------------------------------------------
// Header ledger (mart_djy_03)
// ---------------------------------------------------------------------------

pub struct BuildingHeaderProcessor;

impl BuildingHeaderProcessor {
    const PNU_INDICES: PnuIndices = (8, 9, 10, 11, 12);
}

impl SourceProcessor for BuildingHeaderProcessor {
    fn name(&self) -> &'static str {
        "building-header"
    }

    fn description(&self) -> &'static str {
        "Building register: header ledger (mart_djy_03, TXT)"
    }

    fn table(&self) -> TableSpec {
        TableSpec {
            table: "building_register_headers",
            conflict: ConflictPolicy::Upsert(&["mgm_bldrgst_pk"]),
            jsonb_column: None,
            batch_size: 2000,
        }
    }

    fn data_dir(&self) -> &'static str {
        BUILDING_DATA_DIR
    }

    fn file_pattern(&self) -> &'static str {
        "*.txt"
    }

    fn accepts_file(&self, path: &Path) -> bool {
        accepts_marker(path, "mart_djy_03")
    }

    fn collect(&self, path: &Path) -> Result<RecordStream> {
        collect_txt(path)
    }

    fn transform(&self, raw: &RawRecord) -> Result<Option<NormalizedRow>> {
        let (Some(pk), Some(pnu)) = (field_at(raw, 0), compose_pnu(raw, Self::PNU_INDICES)) else {
            return Ok(None);
        };

        let mut row = NormalizedRow::new();
        row.push("mgm_bldrgst_pk", SqlValue::text(pk));
        row.push("pnu", SqlValue::text(pnu.as_str()));
        row.push("building_name", text_at(raw, 7));
        row.push("site_area", float_at(raw, 25));
        row.push("building_area", float_at(raw, 26));
        row.push("bcr", float_at(raw, 27));
        row.push("total_floor_area", float_at(raw, 28));
        row.push("far", float_at(raw, 30));
        row.push("structure_name", text_at(raw, 32));
        row.push("main_use_name", text_at(raw, 35));
        row.push("household_count", int_at(raw, 40));
        row.push("height", float_at(raw, 42));
        row.push("above_ground_floors", int_at(raw, 43));
        row.push("underground_floors", int_at(raw, 44));
        row.push("approval_date", text_at(raw, 60));
        row.region_code = Some(pnu.as_str().to_string());
        Ok(Some(row))
    }
}

// ---------------------------------------------------------------------------
// General (summary) ledger (mart_djy_02)
// ---------------------------------------------------------------------------

pub struct BuildingGeneralProcessor;

impl BuildingGeneralProcessor {
    const PNU_INDICES: PnuIndices = (10, 11, 12, 13, 14);
}

impl SourceProcessor for BuildingGeneralProcessor {
    fn name(&self) -> &'static str {
        "building-general"
    }

    fn description(&self) -> &'static str {
        "Building register: general ledger (mart_djy_02, TXT)"
    }

    fn table(&self) -> TableSpec {
        TableSpec {
            table: "building_register_generals",
            conflict: ConflictPolicy::Upsert(&["mgm_bldrgst_pk"]),
            jsonb_column: None,
            batch_size: 2000,
        }
    }

    fn data_dir(&self) -> &'static str {
        BUILDING_DATA_DIR
    }

    fn file_pattern(&self) -> &'static str {
        "*.txt"
    }

    fn accepts_file(&self, path: &Path) -> bool {
        accepts_marker(path, "mart_djy_02")
    }

    fn collect(&self, path: &Path) -> Result<RecordStream> {
        collect_txt(path)
    }

    fn transform(&self, raw: &RawRecord) -> Result<Option<NormalizedRow>> {
        let (Some(pk), Some(pnu)) = (field_at(raw, 0), compose_pnu(raw, Self::PNU_INDICES)) else {
            return Ok(None);
        };

        let mut row = NormalizedRow::new();
        row.push("mgm_bldrgst_pk", SqlValue::text(pk));
        row.push("pnu", SqlValue::text(pnu.as_str()));
        row.push("building_name", text_at(raw, 9));
        row.push("site_area", float_at(raw, 24));
        row.push("building_area", float_at(raw, 25));
        row.push("bcr", float_at(raw, 26));
        row.push("total_floor_area", float_at(raw, 27));
        row.push("far", float_at(raw, 29));
        row.push("main_use_name", text_at(raw, 31));
        row.push("household_count", int_at(raw, 33));
        row.push("total_parking", int_at(raw, 38));
        row.push("approval_date", text_at(raw, 49));
        row.region_code = Some(pnu.as_str().to_string());
        Ok(Some(row))
    }
}

// ---------------------------------------------------------------------------
// Per-floor detail (mart_djy_04)
// ---------------------------------------------------------------------------

pub struct BuildingFloorProcessor;

impl BuildingFloorProcessor {
    const PNU_INDICES: PnuIndices = (4, 5, 6, 7, 8);
}

impl SourceProcessor for BuildingFloorProcessor {
    fn name(&self) -> &'static str {
        "building-floor"
    }

    fn description(&self) -> &'static str {
        "Building register: per-floor detail (mart_djy_04, TXT)"
    }

    fn table(&self) -> TableSpec {
        TableSpec {
            table: "building_register_floors",
            conflict: ConflictPolicy::Dedup("row_hash"),
            jsonb_column: None,
            batch_size: 2000,
        }
    }

    fn data_dir(&self) -> &'static str {
        BUILDING_DATA_DIR
    }

    fn file_pattern(&self) -> &'static str {
        "*.txt"
    }

    fn accepts_file(&self, path: &Path) -> bool {
        accepts_marker(path, "mart_djy_04")
    }

    fn collect(&self, path: &Path) -> Result<RecordStream> {
        collect_txt(path)
    }

    fn transform(&self, raw: &RawRecord) -> Result<Option<NormalizedRow>> {
        let (Some(pk), Some(pnu)) = (field_at(raw, 0), compose_pnu(raw, Self::PNU_INDICES)) else {
            return Ok(None);
        };

        let mut row = NormalizedRow::new();
        row.push("mgm_bldrgst_pk", SqlValue::text(pk));
        row.push("pnu", SqlValue::text(pnu.as_str()));
        row.push("floor_type_name", text_at(raw, 19));
        row.push("floor_no", int_at(raw, 20));
        row.push("main_use_name", text_at(raw, 26));
        row.push("area", float_at(raw, 28));
        row.region_code = Some(pnu.as_str().to_string());
        Ok(Some(row))
    }
}

// ---------------------------------------------------------------------------
// Exclusive/common area (mart_djy_06)
// ---------------------------------------------------------------------------

pub struct BuildingAreaProcessor;

impl BuildingAreaProcessor {
    const PNU_INDICES: PnuIndices = (8, 9, 10, 11, 12);
}

impl SourceProcessor for BuildingAreaProcessor {
    fn name(&self) -> &'static str {
        "building-area"
    }

    fn description(&self) -> &'static str {
        "Building register: exclusive/common area (mart_djy_06, TXT)"
    }

    fn table(&self) -> TableSpec {
        TableSpec {
            table: "building_register_areas",
            conflict: ConflictPolicy::Dedup("row_hash"),
            jsonb_column: None,
            batch_size: 2000,
        }
    }

    fn data_dir(&self) -> &'static str {
        BUILDING_DATA_DIR
    }

    fn file_pattern(&self) -> &'static str {
        "*.txt"
    }

    fn accepts_file(&self, path: &Path) -> bool {
        accepts_marker(path, "mart_djy_06")
    }

    fn collect(&self, path: &Path) -> Result<RecordStream> {
        collect_txt(path)
    }

    fn transform(&self, raw: &RawRecord) -> Result<Option<NormalizedRow>> {
        let (Some(pk), Some(pnu)) = (field_at(raw, 0), compose_pnu(raw, Self::PNU_INDICES)) else {
            return Ok(None);
        };

        let mut row = NormalizedRow::new();
        row.push("mgm_bldrgst_pk", SqlValue::text(pk));
        row.push("pnu", SqlValue::text(pnu.as_str()));
        row.push("dong_name", text_at(raw, 21));
        row.push("ho_name", text_at(raw, 22));
        row.push("floor_no", int_at(raw, 25));
        row.push("exclu_common_type", text_at(raw, 26));
        row.push("area", float_at(raw, 37));
        row.region_code = Some(pnu.as_str().to_string());
        Ok(Some(row))
    }
}

// ---------------------------------------------------------------------------
// Ancillary lot links (mart_djy_05) — aggregated on lots.ancillary_lots
// ---------------------------------------------------------------------------

pub struct BuildingAncillaryLotProcessor;

impl BuildingAncillaryLotProcessor {
    const PNU_INDICES: PnuIndices = (8, 9, 10, 11, 12);
    /// The linked ancillary parcel's own decomposed key.
    const ATCH_PNU_INDICES: PnuIndices = (23, 24, 25, 26, 27);
}

impl SourceProcessor for BuildingAncillaryLotProcessor {
    fn name(&self) -> &'static str {
        "building-ancillary-lot"
    }

    fn description(&self) -> &'static str {
        "Building register: ancillary lot links (mart_djy_05, TXT)"
    }

    fn table(&self) -> TableSpec {
        TableSpec {
            table: "lots",
            conflict: ConflictPolicy::Upsert(&["pnu"]),
            jsonb_column: Some("ancillary_lots"),
            batch_size: 2000,
        }
    }

    fn data_dir(&self) -> &'static str {
        BUILDING_DATA_DIR
    }

    fn file_pattern(&self) -> &'static str {
        "*.txt"
    }

    fn accepts_file(&self, path: &Path) -> bool {
        accepts_marker(path, "mart_djy_05")
    }

    fn collect(&self, path: &Path) -> Result<RecordStream> {
        collect_txt(path)
    }

    fn transform(&self, raw: &RawRecord) -> Result<Option<NormalizedRow>> {
        let Some(pnu) = compose_pnu(raw, Self::PNU_INDICES) else {
            return Ok(None);
        };
        let atch_pnu = compose_pnu(raw, Self::ATCH_PNU_INDICES);

        let mut row = NormalizedRow::new();
        row.push("pnu", SqlValue::text(pnu.as_str()));
        row.push("mgm_bldrgst_pk", text_at(raw, 0));
        row.push(
            "atch_pnu",
            SqlValue::Text(atch_pnu.map(|p| p.as_str().to_string())),
        );
        row.push("created_date", text_at(raw, 32));
        row.region_code = Some(pnu.as_str().to_string());
        Ok(Some(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// A header-ledger row with the fields this processor reads populated.
    fn header_line() -> String {
        let mut fields = vec![String::new(); 61];
        fields[0] = "11110-100001".into();
        fields[7] = "테스트빌딩".into();
        fields[8] = "11110".into();
        fields[9] = "10100".into();
        fields[10] = "1".into();
        fields[11] = "123".into();
        fields[12] = "45".into();
        fields[25] = "330.5".into();
        fields[26] = "198.2".into();
        fields[27] = "59.97".into();
        fields[28] = "1200".into();
        fields[30] = "363.1".into();
        fields[32] = "철근콘크리트구조".into();
        fields[35] = "공동주택".into();
        fields[40] = "24".into();
        fields[42] = "38.5".into();
        fields[43] = "12".into();
        fields[44] = "2".into();
        fields[60] = "20150630".into();
        fields.join("|")
    }

    #[test]
    fn header_row_composes_pnu_and_coerces_numbers() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "{}", header_line()).unwrap();
        writeln!(f).unwrap(); // blank line is ignored
        writeln!(f, "no-pnu-row").unwrap();

        let processor = BuildingHeaderProcessor;
        let records: Vec<RawRecord> = processor
            .collect(f.path())
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(records.len(), 2);

        let row = processor.transform(&records[0]).unwrap().expect("row");
        assert_eq!(row.get("pnu"), Some(&SqlValue::text("1111010100101230045")));
        assert_eq!(row.get("mgm_bldrgst_pk"), Some(&SqlValue::text("11110-100001")));
        assert_eq!(row.get("building_name"), Some(&SqlValue::text("테스트빌딩")));
        assert_eq!(row.get("site_area"), Some(&SqlValue::Float(Some(330.5))));
        assert_eq!(row.get("above_ground_floors"), Some(&SqlValue::Int(Some(12))));
        assert_eq!(row.get("approval_date"), Some(&SqlValue::text("20150630")));

        // The malformed row has no composable key.
        assert!(processor.transform(&records[1]).unwrap().is_none());
    }

    #[test]
    fn ancillary_lot_composes_both_keys() {
        let mut fields = vec![String::new(); 33];
        fields[0] = "11110-200002".into();
        fields[8] = "11110".into();
        fields[9] = "10100".into();
        fields[10] = "1".into();
        fields[11] = "123".into();
        fields[12] = "45".into();
        fields[23] = "11110".into();
        fields[24] = "10100".into();
        fields[25] = "1".into();
        fields[26] = "123".into();
        fields[27] = "46".into();
        fields[32] = "20200101".into();

        let mut raw = RawRecord::default();
        raw.fields.insert(
            "fields".into(),
            serde_json::Value::Array(
                fields
                    .into_iter()
                    .map(serde_json::Value::String)
                    .collect(),
            ),
        );

        let row = BuildingAncillaryLotProcessor
            .transform(&raw)
            .unwrap()
            .expect("row");
        assert_eq!(row.get("pnu"), Some(&SqlValue::text("1111010100101230045")));
        assert_eq!(row.get("atch_pnu"), Some(&SqlValue::text("1111010100101230046")));
    }

    #[test]
    fn file_markers_route_variants() {
        assert!(BuildingHeaderProcessor.accepts_file(Path::new("/data/mart_djy_03.txt")));
        assert!(!BuildingHeaderProcessor.accepts_file(Path::new("/data/mart_djy_02.txt")));
        assert!(BuildingAreaProcessor.accepts_file(Path::new("/data/mart_djy_06_seoul.txt")));
    }
}
