//! Per-attribute CSV processors for the national land-data extracts.
//!
//! All of these share the same shape: a CP949-encoded CSV (optionally inside
//! a ZIP) with Korean column headers, keyed by the 19-digit parcel number in
//! the `고유번호` column. Flat variants land in their own per-year tables;
//! one-to-many variants aggregate into JSONB arrays on `lots`.

use std::io::Cursor;
use std::path::Path;

use parcelpipe_shared::types::{safe_float, safe_int};
use parcelpipe_shared::{
    ConflictPolicy, NormalizedRow, PipelineError, Pnu, Result, SqlValue, TableSpec,
};

use crate::file_utils::{decode_text, extract_zip, find_by_extension};
use crate::{RawRecord, RecordStream, SourceProcessor};

/// Source column carrying the reference date, e.g. `2026-02-12`.
const DATA_DATE_COLUMN: &str = "데이터기준일자";

// ---------------------------------------------------------------------------
// Shared collect/keying helpers
// ---------------------------------------------------------------------------

/// Read a CSV source (bare `.csv` or ZIP-wrapped) into a record stream.
/// Decoding is strict CP949/UTF-8; the archive temp dir is released once the
/// text is in memory, records parse lazily.
pub(crate) fn collect_csv(path: &Path) -> Result<RecordStream> {
    let content = match path.extension().and_then(|e| e.to_str()) {
        Some("zip") => {
            let tmp_dir = extract_zip(path)?;
            let csv_path = find_by_extension(tmp_dir.path(), "csv").ok_or_else(|| {
                PipelineError::source_read(path, "archive contains no .csv member")
            })?;
            decode_text(&csv_path)?
        }
        _ => decode_text(path)?,
    };

    let mut reader = csv::Reader::from_reader(Cursor::new(content));
    let headers = reader
        .headers()
        .map_err(|e| PipelineError::source_read(path, format!("bad CSV header: {e}")))?
        .clone();

    let stream = reader.into_records().map(move |record| {
        let record =
            record.map_err(|e| PipelineError::invalid_format(format!("bad CSV row: {e}")))?;
        let mut raw = RawRecord::default();
        for (header, value) in headers.iter().zip(record.iter()) {
            raw.fields.insert(
                header.trim().to_string(),
                serde_json::Value::String(value.to_string()),
            );
        }
        Ok(raw)
    });
    Ok(Box::new(stream))
}

/// Extract the parcel key from the columns the extracts use for it.
fn extract_pnu(raw: &RawRecord) -> Option<Pnu> {
    let code = raw.first_of(&["고유번호", "필지고유번호", "pnu"])?;
    Pnu::parse(code.get(..19)?).ok()
}

/// Reporting year from the reference-date column, `0` when absent.
fn data_year(raw: &RawRecord) -> i64 {
    raw.field_string(DATA_DATE_COLUMN)
        .and_then(|d| d.get(..4).and_then(|y| y.parse().ok()))
        .unwrap_or(0)
}

fn text_field(raw: &RawRecord, column: &str) -> SqlValue {
    SqlValue::Text(raw.field_string(column))
}

fn int_field(raw: &RawRecord, column: &str) -> SqlValue {
    SqlValue::Int(raw.field_string(column).as_deref().and_then(safe_int))
}

fn float_field(raw: &RawRecord, column: &str) -> SqlValue {
    SqlValue::Float(raw.field_string(column).as_deref().and_then(safe_float))
}

// ---------------------------------------------------------------------------
// Land characteristics (AL_D195)
// ---------------------------------------------------------------------------

pub struct LandCharacteristicProcessor;

impl SourceProcessor for LandCharacteristicProcessor {
    fn name(&self) -> &'static str {
        "land-characteristic"
    }

    fn description(&self) -> &'static str {
        "Land characteristics (AL_D195, CSV)"
    }

    fn table(&self) -> TableSpec {
        TableSpec {
            table: "land_characteristics",
            conflict: ConflictPolicy::Upsert(&["pnu", "data_year"]),
            jsonb_column: None,
            batch_size: 500,
        }
    }

    fn data_dir(&self) -> &'static str {
        "land_characteristic"
    }

    fn file_pattern(&self) -> &'static str {
        "*.zip"
    }

    fn collect(&self, path: &Path) -> Result<RecordStream> {
        collect_csv(path)
    }

    fn transform(&self, raw: &RawRecord) -> Result<Option<NormalizedRow>> {
        let Some(pnu) = extract_pnu(raw) else {
            return Ok(None);
        };

        let mut row = NormalizedRow::new();
        row.push("pnu", SqlValue::text(pnu.as_str()));
        row.push("data_year", SqlValue::Int(Some(data_year(raw))));
        row.push("jimok", text_field(raw, "지목명"));
        row.push("land_area", float_field(raw, "토지면적"));
        row.push("use_zone", text_field(raw, "용도지역명1"));
        row.push("land_use", text_field(raw, "토지이용상황"));
        row.push("official_price", int_field(raw, "공시지가"));
        row.region_code = Some(pnu.as_str().to_string());
        Ok(Some(row))
    }
}

// ---------------------------------------------------------------------------
// Land & forest info (AL_D003)
// ---------------------------------------------------------------------------

pub struct LandForestProcessor;

impl SourceProcessor for LandForestProcessor {
    fn name(&self) -> &'static str {
        "land-forest"
    }

    fn description(&self) -> &'static str {
        "Land & forest ledger (AL_D003, CSV)"
    }

    fn table(&self) -> TableSpec {
        TableSpec {
            table: "land_forest_infos",
            conflict: ConflictPolicy::Upsert(&["pnu", "data_year"]),
            jsonb_column: None,
            batch_size: 500,
        }
    }

    fn data_dir(&self) -> &'static str {
        "land_forest"
    }

    fn file_pattern(&self) -> &'static str {
        "*.zip"
    }

    fn collect(&self, path: &Path) -> Result<RecordStream> {
        collect_csv(path)
    }

    fn transform(&self, raw: &RawRecord) -> Result<Option<NormalizedRow>> {
        let Some(pnu) = extract_pnu(raw) else {
            return Ok(None);
        };

        let mut row = NormalizedRow::new();
        row.push("pnu", SqlValue::text(pnu.as_str()));
        row.push("data_year", SqlValue::Int(Some(data_year(raw))));
        row.push("jimok", text_field(raw, "지목명"));
        row.push("jimok_code", text_field(raw, "지목코드"));
        row.push("area", float_field(raw, "면적"));
        row.push("ownership", text_field(raw, "소유구분명"));
        row.push("ownership_code", text_field(raw, "소유구분코드"));
        row.push("owner_count", int_field(raw, "소유(공유)인수"));
        row.region_code = Some(pnu.as_str().to_string());
        Ok(Some(row))
    }
}

// ---------------------------------------------------------------------------
// Land-use plans (AL_D155) — one-to-many, aggregated on lots.use_plans
// ---------------------------------------------------------------------------

pub struct LandUsePlanProcessor;

impl SourceProcessor for LandUsePlanProcessor {
    fn name(&self) -> &'static str {
        "land-use-plan"
    }

    fn description(&self) -> &'static str {
        "Land-use plan designations (AL_D155, CSV)"
    }

    fn table(&self) -> TableSpec {
        TableSpec {
            table: "lots",
            conflict: ConflictPolicy::Upsert(&["pnu"]),
            jsonb_column: Some("use_plans"),
            batch_size: 500,
        }
    }

    fn data_dir(&self) -> &'static str {
        "land_use_plan"
    }

    fn file_pattern(&self) -> &'static str {
        "*.zip"
    }

    fn collect(&self, path: &Path) -> Result<RecordStream> {
        collect_csv(path)
    }

    fn transform(&self, raw: &RawRecord) -> Result<Option<NormalizedRow>> {
        let Some(pnu) = extract_pnu(raw) else {
            return Ok(None);
        };

        let mut row = NormalizedRow::new();
        row.push("pnu", SqlValue::text(pnu.as_str()));
        row.push("use_district_name", text_field(raw, "용도지역지구명"));
        row.region_code = Some(pnu.as_str().to_string());
        Ok(Some(row))
    }
}

// ---------------------------------------------------------------------------
// Land ownership (AL_D401) — one-to-many, aggregated on lots.ownerships
// ---------------------------------------------------------------------------

pub struct LandOwnershipProcessor;

impl SourceProcessor for LandOwnershipProcessor {
    fn name(&self) -> &'static str {
        "land-ownership"
    }

    fn description(&self) -> &'static str {
        "Land ownership records (AL_D401, CSV)"
    }

    fn table(&self) -> TableSpec {
        TableSpec {
            table: "lots",
            conflict: ConflictPolicy::Upsert(&["pnu"]),
            jsonb_column: Some("ownerships"),
            batch_size: 500,
        }
    }

    fn data_dir(&self) -> &'static str {
        "land_ownership"
    }

    fn file_pattern(&self) -> &'static str {
        "*.zip"
    }

    fn collect(&self, path: &Path) -> Result<RecordStream> {
        collect_csv(path)
    }

    fn transform(&self, raw: &RawRecord) -> Result<Option<NormalizedRow>> {
        let Some(pnu) = extract_pnu(raw) else {
            return Ok(None);
        };

        // Single-owner rows come with an empty sequence number.
        let co_owner_seq = raw
            .field_string("공유인일련번호")
            .unwrap_or_else(|| "000001".to_string());

        let mut row = NormalizedRow::new();
        row.push("pnu", SqlValue::text(pnu.as_str()));
        row.push("base_year_month", text_field(raw, "기준연월"));
        row.push("co_owner_seq", SqlValue::text(co_owner_seq));
        row.push("ownership_type", text_field(raw, "소유구분"));
        row.push("ownership_change_reason", text_field(raw, "소유권변동원인"));
        row.push("ownership_change_date", text_field(raw, "소유권변동일자"));
        row.push("owner_count", int_field(raw, "공유인수"));
        row.region_code = Some(pnu.as_str().to_string());
        Ok(Some(row))
    }
}

// ---------------------------------------------------------------------------
// Official land prices (AL_D151) — one-to-many per year, lots.official_prices
// ---------------------------------------------------------------------------

pub struct OfficialLandPriceProcessor;

impl SourceProcessor for OfficialLandPriceProcessor {
    fn name(&self) -> &'static str {
        "official-land-price"
    }

    fn description(&self) -> &'static str {
        "Official assessed land prices (AL_D151, CSV)"
    }

    fn table(&self) -> TableSpec {
        TableSpec {
            table: "lots",
            conflict: ConflictPolicy::Upsert(&["pnu"]),
            jsonb_column: Some("official_prices"),
            batch_size: 500,
        }
    }

    fn data_dir(&self) -> &'static str {
        "official_land_price"
    }

    fn file_pattern(&self) -> &'static str {
        "*.zip"
    }

    fn collect(&self, path: &Path) -> Result<RecordStream> {
        collect_csv(path)
    }

    fn transform(&self, raw: &RawRecord) -> Result<Option<NormalizedRow>> {
        let Some(pnu) = extract_pnu(raw) else {
            return Ok(None);
        };

        let base_year = raw
            .field_string("기준연도")
            .as_deref()
            .and_then(safe_int)
            .unwrap_or(0);

        let mut row = NormalizedRow::new();
        row.push("pnu", SqlValue::text(pnu.as_str()));
        row.push("base_year", SqlValue::Int(Some(base_year)));
        row.push("price_per_sqm", int_field(raw, "공시지가"));
        row.region_code = Some(pnu.as_str().to_string());
        Ok(Some(row))
    }
}
