//! Source processors: one per public-data source type.
//!
//! Each processor implements the collect → transform contract over one file
//! format (shapefile, CP949 CSV, pipe-delimited text, spreadsheet) and
//! declares its load target ([`TableSpec`]); the pipeline streams records
//! through `collect`/`transform` and hands normalized rows to the bulk
//! loader. Processors are registered in an explicit compiled-in table
//! ([`registry`]) ordered so parcel records load before anything that
//! references a parcel key.

mod attr_csv;
mod boundary;
mod building;
mod cadastral;
pub mod file_utils;
mod gis_building;
pub mod registry;
mod spatial;
mod transaction;

use std::path::Path;

use parcelpipe_geometry::SourceCrs;
use parcelpipe_shared::{NormalizedRow, Result, TableSpec};

pub use attr_csv::{
    LandCharacteristicProcessor, LandForestProcessor, LandOwnershipProcessor,
    LandUsePlanProcessor, OfficialLandPriceProcessor,
};
pub use boundary::{DistrictBoundaryProcessor, ProvinceBoundaryProcessor, SubDistrictBoundaryProcessor};
pub use building::{
    BuildingAncillaryLotProcessor, BuildingAreaProcessor, BuildingFloorProcessor,
    BuildingGeneralProcessor, BuildingHeaderProcessor,
};
pub use cadastral::CadastralProcessor;
pub use gis_building::GisBuildingProcessor;
pub use registry::{registry, resolve};
pub use spatial::{RoadCenterLineProcessor, UseRegionDistrictProcessor};
pub use transaction::{TransactionRentalProcessor, TransactionSaleProcessor};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One raw record as read from a source file, before normalization.
#[derive(Debug, Clone, Default)]
pub struct RawRecord {
    /// Source attribute/column values keyed by source field name. Delimited
    /// text sources store their positional fields under `"fields"`.
    pub fields: serde_json::Map<String, serde_json::Value>,
    /// Geometry as produced by the shapefile reader, when the source has one.
    pub geometry: Option<geojson::Geometry>,
    /// Declared CRS of the geometry coordinates.
    pub crs: SourceCrs,
}

impl RawRecord {
    /// A field rendered as a trimmed, non-empty string (numbers included).
    pub fn field_string(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            serde_json::Value::String(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// First present field among several candidate source names.
    pub fn first_of(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|k| self.field_string(k))
    }

    /// Positional fields of a delimited-text record.
    pub fn positional(&self) -> Option<&Vec<serde_json::Value>> {
        match self.fields.get("fields")? {
            serde_json::Value::Array(items) => Some(items),
            _ => None,
        }
    }
}

/// Lazy, finite stream of raw records. Not restartable mid-stream, but safe
/// to re-create from the start by calling `collect` again.
pub type RecordStream = Box<dyn Iterator<Item = Result<RawRecord>> + Send>;

// ---------------------------------------------------------------------------
// Processor trait
// ---------------------------------------------------------------------------

/// A source processor: identifies one public-data source and implements the
/// collect/transform stages for its file format.
pub trait SourceProcessor: Send + Sync {
    /// Stable source identifier used by the CLI and the registry.
    fn name(&self) -> &'static str;

    /// Human-readable description for listings.
    fn description(&self) -> &'static str;

    /// Load target: table, conflict policy, optional JSONB aggregation
    /// column, batch size.
    fn table(&self) -> TableSpec;

    /// Subdirectory under the data root holding this source's files.
    fn data_dir(&self) -> &'static str;

    /// File pattern for discovery (`*.zip`, `*.csv`, `*.txt`, `*.xlsx`).
    fn file_pattern(&self) -> &'static str;

    /// Geometry simplification tolerance in degrees, for dense layers.
    fn simplify_tolerance(&self) -> Option<f64> {
        None
    }

    /// Whether a discovered file belongs to this processor (sources sharing
    /// a directory distinguish files by name).
    fn accepts_file(&self, _path: &Path) -> bool {
        true
    }

    /// Read raw records from a source file, one at a time.
    fn collect(&self, path: &Path) -> Result<RecordStream>;

    /// Map one raw record to a normalized row. `Ok(None)` skips the record
    /// (no resolvable key); errors are counted per row by the pipeline.
    fn transform(&self, raw: &RawRecord) -> Result<Option<NormalizedRow>>;
}
