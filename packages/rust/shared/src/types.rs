//! Core domain types: the PNU parcel key and the normalized row model.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Length of a parcel number: 19 ASCII digits.
pub const PNU_LEN: usize = 19;

// ---------------------------------------------------------------------------
// Pnu
// ---------------------------------------------------------------------------

/// A 19-digit parcel number (PNU), the canonical cross-table join key.
///
/// Field widths: province(2) + district(3) + sub-district(3) + village(2) +
/// mountain-flag(1) + main-number(4) + sub-number(4).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pnu(String);

impl Pnu {
    /// Parse and validate a PNU. The input must be exactly 19 ASCII digits.
    pub fn parse(code: &str) -> Result<Self> {
        if code.len() != PNU_LEN {
            return Err(PipelineError::invalid_format(format!(
                "PNU must be {PNU_LEN} digits, got {} chars: {code:?}",
                code.len()
            )));
        }
        if !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PipelineError::invalid_format(format!(
                "PNU must be digits only: {code:?}"
            )));
        }
        Ok(Self(code.to_string()))
    }

    /// Compose a PNU from decomposed administrative fields, as carried by the
    /// building-register files: district code (sigungu, 5 digits) + legal-dong
    /// code (5 digits) + land flag (1) + main number + sub number.
    /// Numeric parts are zero-filled to their fixed widths.
    pub fn compose(sigungu: &str, bjdong: &str, flag: &str, main: &str, sub: &str) -> Result<Self> {
        let sigungu = sigungu.trim();
        let bjdong = bjdong.trim();
        if sigungu.is_empty() || bjdong.is_empty() {
            return Err(PipelineError::invalid_format(
                "missing district/legal-dong code for PNU composition",
            ));
        }
        let code = format!(
            "{:0>5}{:0>5}{:0>1}{:0>4}{:0>4}",
            sigungu,
            bjdong,
            flag.trim(),
            main.trim(),
            sub.trim()
        );
        Self::parse(&code)
    }

    /// The full 19-digit code.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Province code (2 digits).
    pub fn province_code(&self) -> &str {
        &self.0[..2]
    }

    /// District code: province + district (5 digits), the "sgg" prefix used
    /// by region filters and source-file discovery.
    pub fn district_code(&self) -> &str {
        &self.0[..5]
    }

    /// Sub-district (legal-dong) code prefix (8 digits).
    pub fn sub_district_code(&self) -> &str {
        &self.0[..8]
    }

    /// Full village-level administrative code (10 digits).
    pub fn village_code(&self) -> &str {
        &self.0[..10]
    }

    /// Whether the parcel is mountain land (flag digit `2`).
    pub fn is_mountain(&self) -> bool {
        &self.0[10..11] == "2"
    }

    /// Zero-padded main lot number (4 digits).
    pub fn main_number(&self) -> &str {
        &self.0[11..15]
    }

    /// Zero-padded sub lot number (4 digits).
    pub fn sub_number(&self) -> &str {
        &self.0[15..19]
    }
}

impl std::fmt::Display for Pnu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Pnu {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Geometry value
// ---------------------------------------------------------------------------

/// Geometry at a storage boundary. WKT text during writes, raw (E)WKB bytes
/// when read back from the store, never an untyped field.
#[derive(Debug, Clone, PartialEq)]
pub enum GeomValue {
    /// No geometry for this row.
    None,
    /// Well-Known Text, fed to `ST_GeomFromText(.., 4326)` at insert time.
    Wkt(String),
    /// Binary geometry as returned by the store.
    Binary(Vec<u8>),
}

impl GeomValue {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// The WKT payload, if this value is textual.
    pub fn as_wkt(&self) -> Option<&str> {
        match self {
            Self::Wkt(s) => Some(s),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Normalized rows
// ---------------------------------------------------------------------------

/// A typed, nullable SQL parameter. Each variant carries its column type so
/// NULLs bind with a concrete Postgres type instead of an inferred one.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(Option<String>),
    Int(Option<i64>),
    Float(Option<f64>),
    Date(Option<chrono::NaiveDate>),
    Json(Option<serde_json::Value>),
    Geometry(GeomValue),
}

impl SqlValue {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(Some(s.into()))
    }

    /// A JSON rendering of the value, used for JSONB aggregation elements and
    /// content hashing. Geometry renders as its WKT text.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Self::Text(v) => v.clone().map(Value::String).unwrap_or(Value::Null),
            Self::Int(v) => v.map(Value::from).unwrap_or(Value::Null),
            Self::Float(v) => v
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Date(v) => v
                .map(|d| Value::String(d.to_string()))
                .unwrap_or(Value::Null),
            Self::Json(v) => v.clone().unwrap_or(Value::Null),
            Self::Geometry(g) => g
                .as_wkt()
                .map(|w| Value::String(w.to_string()))
                .unwrap_or(Value::Null),
        }
    }
}

/// One transformed source row, ready for the bulk loader. Column order is
/// stable (insertion order) and identical for every row of a given source.
#[derive(Debug, Clone, Default)]
pub struct NormalizedRow {
    pub columns: Vec<(&'static str, SqlValue)>,
    /// Administrative code used by the region prefix filter; `None` when the
    /// source has no derivable code (e.g. transactions).
    pub region_code: Option<String>,
}

impl NormalizedRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, column: &'static str, value: SqlValue) {
        self.columns.push((column, value));
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(c, _)| *c == column)
            .map(|(_, v)| v)
    }
}

// ---------------------------------------------------------------------------
// Table specs
// ---------------------------------------------------------------------------

/// How a target table resolves key collisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// `ON CONFLICT (keys) DO UPDATE` — incoming values overwrite existing
    /// columns wholesale (last successful write wins).
    Upsert(&'static [&'static str]),
    /// No natural key: a content hash column is appended and enforced unique,
    /// `ON CONFLICT (hash) DO NOTHING` makes re-runs no-ops.
    Dedup(&'static str),
}

/// Load target description declared by each source processor.
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub table: &'static str,
    pub conflict: ConflictPolicy,
    /// When set, rows are one-to-many against the parent key and are grouped
    /// into a JSON array stored in this column instead of separate rows.
    pub jsonb_column: Option<&'static str>,
    /// Rows per database round trip.
    pub batch_size: usize,
}

/// Load mode selected by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Merge into existing rows; JSONB arrays append.
    Upsert,
    /// Destructive full reload: truncate flat targets before inserting;
    /// JSONB arrays are replaced rather than appended.
    Truncate,
}

// ---------------------------------------------------------------------------
// Collection log
// ---------------------------------------------------------------------------

/// Lifecycle status of one collection-log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl CollectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Numeric coercion
// ---------------------------------------------------------------------------

/// Lenient integer parse: comma-grouped and decimal forms accepted, empty or
/// junk input becomes `None` rather than an error.
pub fn safe_int(value: &str) -> Option<i64> {
    let cleaned = value.trim().replace(',', "");
    if cleaned.is_empty() {
        return None;
    }
    cleaned
        .parse::<i64>()
        .ok()
        .or_else(|| cleaned.parse::<f64>().ok().map(|f| f as i64))
}

/// Lenient float parse with the same tolerance as [`safe_int`].
pub fn safe_float(value: &str) -> Option<f64> {
    let cleaned = value.trim().replace(',', "");
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pnu_roundtrip_fields() {
        let pnu = Pnu::parse("1111010100101230045").expect("parse");
        assert_eq!(pnu.province_code(), "11");
        assert_eq!(pnu.district_code(), "11110");
        assert_eq!(pnu.sub_district_code(), "11110101");
        assert_eq!(pnu.village_code(), "1111010100");
        assert!(!pnu.is_mountain());
        assert_eq!(pnu.main_number(), "0123");
        assert_eq!(pnu.sub_number(), "0045");
        assert_eq!(pnu.to_string(), "1111010100101230045");
    }

    #[test]
    fn pnu_mountain_flag() {
        let pnu = Pnu::parse("4182025021200350000").expect("parse");
        assert!(pnu.is_mountain());
    }

    #[test]
    fn pnu_rejects_bad_length() {
        assert!(Pnu::parse("12345").is_err());
        assert!(Pnu::parse("11110101001012300451").is_err());
        assert!(Pnu::parse("").is_err());
    }

    #[test]
    fn pnu_rejects_non_digits() {
        let err = Pnu::parse("11110101001012300-5").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidFormat { .. }));
        assert!(Pnu::parse("ab11010100101230045").is_err());
    }

    #[test]
    fn pnu_compose_zero_fills() {
        let pnu = Pnu::compose("11110", "10100", "1", "123", "45").expect("compose");
        assert_eq!(pnu.as_str(), "1111010100101230045");
    }

    #[test]
    fn pnu_compose_rejects_missing_codes() {
        assert!(Pnu::compose("", "10100", "1", "1", "0").is_err());
        // Oversized main number cannot fit the fixed width.
        assert!(Pnu::compose("11110", "10100", "1", "12345", "0").is_err());
    }

    #[test]
    fn pnu_parse_from_str() {
        let pnu: Pnu = "1111010100101230045".parse().expect("FromStr");
        assert_eq!(pnu.as_str(), "1111010100101230045");
    }

    #[test]
    fn safe_numeric_coercion() {
        assert_eq!(safe_int("15,500"), Some(15500));
        assert_eq!(safe_int("123.0"), Some(123));
        assert_eq!(safe_int(""), None);
        assert_eq!(safe_int("-"), None);
        assert_eq!(safe_float("84.97"), Some(84.97));
        assert_eq!(safe_float("1,234.5"), Some(1234.5));
        assert_eq!(safe_float("n/a"), None);
    }

    #[test]
    fn sql_value_json_rendering() {
        assert_eq!(SqlValue::text("x").to_json(), serde_json::json!("x"));
        assert_eq!(SqlValue::Int(None).to_json(), serde_json::Value::Null);
        assert_eq!(SqlValue::Float(Some(1.5)).to_json(), serde_json::json!(1.5));
        assert_eq!(
            SqlValue::Geometry(GeomValue::Wkt("POINT(1 2)".into())).to_json(),
            serde_json::json!("POINT(1 2)")
        );
    }

    #[test]
    fn normalized_row_lookup() {
        let mut row = NormalizedRow::new();
        row.push("pnu", SqlValue::text("1111010100101230045"));
        row.push("area", SqlValue::Float(Some(42.0)));
        assert_eq!(row.get("pnu"), Some(&SqlValue::text("1111010100101230045")));
        assert!(row.get("missing").is_none());
    }
}
