//! Real-estate transaction processors for the portal spreadsheet exports.
//!
//! The crawler writes one file per (property type, transaction kind, month)
//! as `{property}_{kind}_{yyyymm}.xlsx`. Sheets carry twelve banner rows
//! before the column header; values are strings with `-` standing in for
//! empty. Transactions have no natural key and are only weakly linked to
//! parcels through the district address string, so rows are deduplicated by
//! content hash and exempt from the region prefix filter.

use std::path::Path;

use calamine::{Data, Reader, Xlsx, open_workbook};
use chrono::NaiveDate;
use parcelpipe_shared::types::{safe_float, safe_int};
use parcelpipe_shared::{ConflictPolicy, NormalizedRow, PipelineError, Result, SqlValue, TableSpec};

use crate::{RawRecord, RecordStream, SourceProcessor};

/// 0-based sheet row holding the column header (portal banner above it).
const HEADER_ROW: usize = 12;

/// File-name property markers, as written by the crawler.
const PROPERTY_MARKERS: &[&str] = &[
    "apartment",
    "row_house",
    "detached_house",
    "officetel",
    "land",
];

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Parse `{property}_{kind}_{yyyymm}.xlsx` into its property marker.
pub(crate) fn property_from_filename(path: &Path) -> Option<&'static str> {
    let stem = path.file_stem()?.to_str()?;
    PROPERTY_MARKERS
        .iter()
        .find(|marker| stem.starts_with(&format!("{marker}_")))
        .copied()
}

fn collect_xlsx(path: &Path) -> Result<RecordStream> {
    let Some(property_type) = property_from_filename(path) else {
        return Err(PipelineError::source_read(
            path,
            "file name does not follow {property}_{kind}_{yyyymm}.xlsx",
        ));
    };

    let mut workbook: Xlsx<_> = open_workbook(path)
        .map_err(|e| PipelineError::source_read(path, format!("spreadsheet open: {e}")))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| PipelineError::source_read(path, "spreadsheet has no sheets"))?
        .map_err(|e| PipelineError::source_read(path, format!("sheet read: {e}")))?;

    let mut rows = range.rows().skip(HEADER_ROW);
    let headers: Vec<String> = rows
        .next()
        .ok_or_else(|| PipelineError::source_read(path, "sheet shorter than the header row"))?
        .iter()
        .map(cell_to_string)
        .map(|h| h.unwrap_or_default())
        .collect();

    let records: Vec<Result<RawRecord>> = rows
        .map(|cells| {
            let mut raw = RawRecord::default();
            raw.fields.insert(
                "property_type".into(),
                serde_json::Value::String(property_type.to_string()),
            );
            for (header, cell) in headers.iter().zip(cells.iter()) {
                if header.is_empty() {
                    continue;
                }
                if let Some(value) = cell_to_string(cell) {
                    raw.fields
                        .insert(header.clone(), serde_json::Value::String(value));
                }
            }
            Ok(raw)
        })
        .collect();

    Ok(Box::new(records.into_iter()))
}

fn cell_to_string(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::Empty => return None,
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTimeIso(s) => s.clone(),
        other => other.to_string().trim().to_string(),
    };
    (!text.is_empty()).then_some(text)
}

/// Portal cells use `-` for "not applicable".
fn clean(raw: &RawRecord, column: &str) -> Option<String> {
    let value = raw.field_string(column)?;
    (value != "-" && value.to_lowercase() != "nan").then_some(value)
}

fn first_clean(raw: &RawRecord, columns: &[&str]) -> Option<String> {
    columns.iter().find_map(|c| clean(raw, c))
}

fn amount(raw: &RawRecord, column: &str) -> SqlValue {
    SqlValue::Int(clean(raw, column).as_deref().and_then(safe_int))
}

fn float(raw: &RawRecord, columns: &[&str]) -> SqlValue {
    SqlValue::Float(first_clean(raw, columns).as_deref().and_then(safe_float))
}

/// Contract date from `계약년월` (YYYYMM) + `계약일` (DD).
fn contract_date(raw: &RawRecord) -> Option<NaiveDate> {
    let ym = clean(raw, "계약년월")?;
    let day = clean(raw, "계약일").as_deref().and_then(safe_int)?;
    let year: i32 = ym.get(..4)?.parse().ok()?;
    let month: u32 = ym.get(4..6)?.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day as u32)
}

fn raw_data_json(raw: &RawRecord) -> serde_json::Value {
    serde_json::Value::Object(raw.fields.clone())
}

// ---------------------------------------------------------------------------
// Sales
// ---------------------------------------------------------------------------

pub struct TransactionSaleProcessor;

impl SourceProcessor for TransactionSaleProcessor {
    fn name(&self) -> &'static str {
        "transaction-sale"
    }

    fn description(&self) -> &'static str {
        "Real-estate sale transactions (portal XLSX)"
    }

    fn table(&self) -> TableSpec {
        TableSpec {
            table: "real_estate_sales",
            conflict: ConflictPolicy::Dedup("row_hash"),
            jsonb_column: None,
            batch_size: 1000,
        }
    }

    fn data_dir(&self) -> &'static str {
        "transactions"
    }

    fn file_pattern(&self) -> &'static str {
        "*.xlsx"
    }

    fn accepts_file(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.contains("_sale_"))
    }

    fn collect(&self, path: &Path) -> Result<RecordStream> {
        collect_xlsx(path)
    }

    fn transform(&self, raw: &RawRecord) -> Result<Option<NormalizedRow>> {
        let Some(district) = clean(raw, "시군구") else {
            return Ok(None);
        };

        let mut row = NormalizedRow::new();
        row.push(
            "property_type",
            SqlValue::Text(raw.field_string("property_type")),
        );
        row.push("district", SqlValue::text(district));
        row.push(
            "building_name",
            SqlValue::Text(first_clean(raw, &["단지명", "건물명"])),
        );
        row.push("exclusive_area", float(raw, &["전용면적(㎡)"]));
        row.push("land_area", float(raw, &["대지면적(㎡)", "대지권면적(㎡)"]));
        row.push("floor_area", float(raw, &["연면적(㎡)"]));
        row.push("contract_area", float(raw, &["계약면적(㎡)"]));
        row.push("floor", SqlValue::Text(clean(raw, "층")));
        row.push(
            "build_year",
            SqlValue::Int(clean(raw, "건축년도").as_deref().and_then(safe_int)),
        );
        row.push("transaction_amount", amount(raw, "거래금액(만원)"));
        row.push("deal_type", SqlValue::Text(clean(raw, "거래유형")));
        row.push("land_category", SqlValue::Text(clean(raw, "지목")));
        row.push("use_area", SqlValue::Text(clean(raw, "용도지역")));
        row.push("transaction_date", SqlValue::Date(contract_date(raw)));
        row.push("raw_data", SqlValue::Json(Some(raw_data_json(raw))));
        Ok(Some(row))
    }
}

// ---------------------------------------------------------------------------
// Rentals
// ---------------------------------------------------------------------------

pub struct TransactionRentalProcessor;

impl SourceProcessor for TransactionRentalProcessor {
    fn name(&self) -> &'static str {
        "transaction-rental"
    }

    fn description(&self) -> &'static str {
        "Real-estate rental transactions (portal XLSX)"
    }

    fn table(&self) -> TableSpec {
        TableSpec {
            table: "real_estate_rentals",
            conflict: ConflictPolicy::Dedup("row_hash"),
            jsonb_column: None,
            batch_size: 1000,
        }
    }

    fn data_dir(&self) -> &'static str {
        "transactions"
    }

    fn file_pattern(&self) -> &'static str {
        "*.xlsx"
    }

    fn accepts_file(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.contains("_rental_"))
    }

    fn collect(&self, path: &Path) -> Result<RecordStream> {
        collect_xlsx(path)
    }

    fn transform(&self, raw: &RawRecord) -> Result<Option<NormalizedRow>> {
        let Some(district) = clean(raw, "시군구") else {
            return Ok(None);
        };

        // Jeonse (deposit-only) unless the source marks a monthly rent.
        let transaction_type = match clean(raw, "전월세구분").as_deref() {
            Some("월세") => "monthly_rent",
            _ => "jeonse",
        };

        let mut row = NormalizedRow::new();
        row.push(
            "property_type",
            SqlValue::Text(raw.field_string("property_type")),
        );
        row.push("transaction_type", SqlValue::text(transaction_type));
        row.push("district", SqlValue::text(district));
        row.push(
            "building_name",
            SqlValue::Text(first_clean(raw, &["단지명", "건물명"])),
        );
        row.push("exclusive_area", float(raw, &["전용면적(㎡)"]));
        row.push("land_area", float(raw, &["대지면적(㎡)", "대지권면적(㎡)"]));
        row.push("floor_area", float(raw, &["연면적(㎡)"]));
        row.push("floor", SqlValue::Text(clean(raw, "층")));
        row.push(
            "build_year",
            SqlValue::Int(clean(raw, "건축년도").as_deref().and_then(safe_int)),
        );
        row.push("deposit", amount(raw, "보증금(만원)"));
        row.push("monthly_rent_amount", amount(raw, "월세금(만원)"));
        row.push("contract_period", SqlValue::Text(clean(raw, "계약기간")));
        row.push("contract_type", SqlValue::Text(clean(raw, "계약구분")));
        row.push("deal_type", SqlValue::Text(clean(raw, "거래유형")));
        row.push("transaction_date", SqlValue::Date(contract_date(raw)));
        row.push("raw_data", SqlValue::Json(Some(raw_data_json(raw))));
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
    fn filename_routing() {
        assert_eq!(
            property_from_filename(Path::new("/d/apartment_sale_202401.xlsx")),
            Some("apartment")
        );
        assert_eq!(
            property_from_filename(Path::new("/d/detached_house_rental_202512.xlsx")),
            Some("detached_house")
        );
        assert_eq!(property_from_filename(Path::new("/d/unrelated.xlsx")), None);

        assert!(TransactionSaleProcessor.accepts_file(Path::new("apartment_sale_202401.xlsx")));
        assert!(!TransactionSaleProcessor.accepts_file(Path::new("apartment_rental_202401.xlsx")));
        assert!(
            TransactionRentalProcessor.accepts_file(Path::new("officetel_rental_202401.xlsx"))
        );
    }

    #[test]
    fn sale_row_parses_amounts_and_date() {
        let row = TransactionSaleProcessor
            .transform(&raw(&[
                ("property_type", "apartment"),
                ("시군구", "서울특별시 종로구 청운동"),
                ("단지명", "청운아파트"),
                ("전용면적(㎡)", "84.97"),
                ("층", "7"),
                ("건축년도", "2004"),
                ("거래금액(만원)", "152,000"),
                ("계약년월", "202503"),
                ("계약일", "15"),
                ("거래유형", "중개거래"),
            ]))
            .unwrap()
            .expect("row");

        assert_eq!(row.get("transaction_amount"), Some(&SqlValue::Int(Some(152000))));
        assert_eq!(row.get("exclusive_area"), Some(&SqlValue::Float(Some(84.97))));
        assert_eq!(row.get("floor"), Some(&SqlValue::text("7")));
        assert_eq!(
            row.get("transaction_date"),
            Some(&SqlValue::Date(NaiveDate::from_ymd_opt(2025, 3, 15)))
        );
        // Land-only columns exist with NULL values so every row binds the
        // same column set.
        assert_eq!(row.get("land_category"), Some(&SqlValue::Text(None)));
        assert!(row.region_code.is_none());
    }

    #[test]
    fn dash_cells_become_null() {
        let row = TransactionSaleProcessor
            .transform(&raw(&[
                ("property_type", "land"),
                ("시군구", "경기도 가평군"),
                ("거래금액(만원)", "-"),
                ("지목", "전"),
            ]))
            .unwrap()
            .expect("row");
        assert_eq!(row.get("transaction_amount"), Some(&SqlValue::Int(None)));
        assert_eq!(row.get("land_category"), Some(&SqlValue::text("전")));
    }

    #[test]
    fn rental_classifies_jeonse_vs_monthly() {
        let base = [
            ("property_type", "apartment"),
            ("시군구", "서울특별시 마포구"),
            ("보증금(만원)", "30,000"),
            ("계약년월", "202411"),
            ("계약일", "1"),
        ];

        let jeonse = TransactionRentalProcessor
            .transform(&raw(&base))
            .unwrap()
            .expect("row");
        assert_eq!(jeonse.get("transaction_type"), Some(&SqlValue::text("jeonse")));
        assert_eq!(jeonse.get("deposit"), Some(&SqlValue::Int(Some(30000))));

        let mut monthly_fields = base.to_vec();
        monthly_fields.push(("전월세구분", "월세"));
        monthly_fields.push(("월세금(만원)", "120"));
        let monthly = TransactionRentalProcessor
            .transform(&raw(&monthly_fields))
            .unwrap()
            .expect("row");
        assert_eq!(
            monthly.get("transaction_type"),
            Some(&SqlValue::text("monthly_rent"))
        );
        assert_eq!(monthly.get("monthly_rent_amount"), Some(&SqlValue::Int(Some(120))));
    }

    #[test]
    fn rows_without_district_are_skipped() {
        assert!(
            TransactionSaleProcessor
                .transform(&raw(&[("property_type", "apartment")]))
                .unwrap()
                .is_none()
        );
    }
}
