//! Geometry conversion between source encodings and the storage format.
//!
//! Sources deliver GeoJSON-shaped geometries (as produced by the shapefile
//! reader) in one of a few Korean TM grids or WGS84. Storage accepts WKT fed
//! through `ST_GeomFromText(.., 4326)` and hands back (E)WKB. Both directions
//! go through the tagged [`GeomValue`] — never an untyped field.

mod convert;
mod wkb;

pub use convert::{SourceCrs, to_geojson, to_storage};
pub use parcelpipe_shared::GeomValue;
