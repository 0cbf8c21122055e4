//! Crawl planning: the chunk iteration space and date-range splitting.

use chrono::{Datelike, NaiveDate};

// ---------------------------------------------------------------------------
// Property / transaction types
// ---------------------------------------------------------------------------

/// Portal property-type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    Apartment,
    RowHouse,
    DetachedHouse,
    Officetel,
    Land,
}

impl PropertyType {
    pub const ALL: [PropertyType; 5] = [
        Self::Apartment,
        Self::RowHouse,
        Self::DetachedHouse,
        Self::Officetel,
        Self::Land,
    ];

    /// The portal's single-letter request code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Apartment => "A",
            Self::RowHouse => "B",
            Self::DetachedHouse => "C",
            Self::Officetel => "D",
            Self::Land => "G",
        }
    }

    /// File-name label (also parsed by the transaction processors).
    pub fn label(&self) -> &'static str {
        match self {
            Self::Apartment => "apartment",
            Self::RowHouse => "row_house",
            Self::DetachedHouse => "detached_house",
            Self::Officetel => "officetel",
            Self::Land => "land",
        }
    }

    /// Whether the portal publishes rental data for this type.
    pub fn has_rent(&self) -> bool {
        !matches!(self, Self::Land)
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.code() == code)
    }
}

/// Sale vs. rental request kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Sale,
    Rent,
}

impl TransactionKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Sale => "1",
            Self::Rent => "2",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Sale => "sale",
            Self::Rent => "rental",
        }
    }

    /// Rental requests are restricted to new contracts.
    pub fn new_contract_flag(&self) -> &'static str {
        match self {
            Self::Sale => "",
            Self::Rent => "1",
        }
    }
}

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

/// One download unit: a (property, kind, month-bounded date range) cell of
/// the iteration space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub property: PropertyType,
    pub kind: TransactionKind,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl Chunk {
    /// Deterministic destination file name, so presence-checking is a plain
    /// existence test.
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}{:02}.xlsx",
            self.property.label(),
            self.kind.label(),
            self.from.year(),
            self.from.month()
        )
    }
}

/// Terminal state of one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    Completed,
    SkippedExisting,
    /// The portal returned an empty result for this month.
    NoData,
    /// Abandoned because the daily quota was exhausted earlier in the run.
    Aborted,
    Failed(String),
}

/// Split a date range into consecutive, non-overlapping, month-aligned
/// sub-ranges (each ≤31 days, the portal's nationwide span limit). The union
/// of the returned ranges exactly covers `start..=end`.
pub fn month_ranges(start: NaiveDate, end: NaiveDate) -> Vec<(NaiveDate, NaiveDate)> {
    let mut ranges = Vec::new();
    let mut current = start;

    while current <= end {
        let next_month_start = if current.month() == 12 {
            NaiveDate::from_ymd_opt(current.year() + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(current.year(), current.month() + 1, 1)
        }
        .expect("first of month is always valid");

        let month_end = next_month_start.pred_opt().expect("not MIN date");
        ranges.push((current, month_end.min(end)));
        current = next_month_start;
    }

    ranges
}

/// Expand the iteration space into concrete chunks. Rental chunks are
/// emitted only for property types the portal publishes rents for.
pub fn build_plan(
    types: &[PropertyType],
    sale_only: bool,
    ranges: &[(NaiveDate, NaiveDate)],
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for &property in types {
        for &(from, to) in ranges {
            chunks.push(Chunk {
                property,
                kind: TransactionKind::Sale,
                from,
                to,
            });
        }
        if !sale_only && property.has_rent() {
            for &(from, to) in ranges {
                chunks.push(Chunk {
                    property,
                    kind: TransactionKind::Rent,
                    from,
                    to,
                });
            }
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn full_year_splits_into_twelve_months() {
        let ranges = month_ranges(date(2024, 1, 1), date(2024, 12, 31));
        assert_eq!(ranges.len(), 12);
        assert_eq!(ranges[0], (date(2024, 1, 1), date(2024, 1, 31)));
        assert_eq!(ranges[1], (date(2024, 2, 1), date(2024, 2, 29)));
        assert_eq!(ranges[11], (date(2024, 12, 1), date(2024, 12, 31)));

        // No gaps, no overlaps: each range starts the day after the previous
        // one ends.
        for window in ranges.windows(2) {
            assert_eq!(window[0].1.succ_opt().unwrap(), window[1].0);
        }
        // Every range respects the 31-day request limit.
        for (from, to) in &ranges {
            assert!((*to - *from).num_days() < 31);
        }
    }

    #[test]
    fn mid_month_boundaries_are_respected() {
        let ranges = month_ranges(date(2025, 2, 16), date(2026, 2, 15));
        assert_eq!(ranges.first().unwrap(), &(date(2025, 2, 16), date(2025, 2, 28)));
        assert_eq!(ranges.last().unwrap(), &(date(2026, 2, 1), date(2026, 2, 15)));
        assert_eq!(ranges.len(), 13);
    }

    #[test]
    fn single_day_range() {
        let ranges = month_ranges(date(2024, 6, 15), date(2024, 6, 15));
        assert_eq!(ranges, vec![(date(2024, 6, 15), date(2024, 6, 15))]);
    }

    #[test]
    fn year_rollover() {
        let ranges = month_ranges(date(2024, 12, 1), date(2025, 1, 31));
        assert_eq!(
            ranges,
            vec![
                (date(2024, 12, 1), date(2024, 12, 31)),
                (date(2025, 1, 1), date(2025, 1, 31)),
            ]
        );
    }

    #[test]
    fn file_names_are_deterministic() {
        let chunk = Chunk {
            property: PropertyType::Apartment,
            kind: TransactionKind::Sale,
            from: date(2024, 3, 1),
            to: date(2024, 3, 31),
        };
        assert_eq!(chunk.file_name(), "apartment_sale_202403.xlsx");

        let rental = Chunk {
            property: PropertyType::DetachedHouse,
            kind: TransactionKind::Rent,
            from: date(2025, 11, 16),
            to: date(2025, 11, 30),
        };
        assert_eq!(rental.file_name(), "detached_house_rental_202511.xlsx");
    }

    #[test]
    fn land_has_no_rental_chunks() {
        let ranges = month_ranges(date(2024, 1, 1), date(2024, 2, 29));
        let chunks = build_plan(&[PropertyType::Land, PropertyType::Apartment], false, &ranges);

        let land_rentals = chunks
            .iter()
            .filter(|c| c.property == PropertyType::Land && c.kind == TransactionKind::Rent)
            .count();
        assert_eq!(land_rentals, 0);

        // land: 2 sale chunks; apartment: 2 sale + 2 rent.
        assert_eq!(chunks.len(), 6);
    }

    #[test]
    fn sale_only_drops_all_rentals() {
        let ranges = month_ranges(date(2024, 1, 1), date(2024, 1, 31));
        let chunks = build_plan(&PropertyType::ALL, true, &ranges);
        assert!(chunks.iter().all(|c| c.kind == TransactionKind::Sale));
        assert_eq!(chunks.len(), 5);
    }

    #[test]
    fn property_codes_roundtrip() {
        for t in PropertyType::ALL {
            assert_eq!(PropertyType::from_code(t.code()), Some(t));
        }
        assert_eq!(PropertyType::from_code("Z"), None);
    }
}
