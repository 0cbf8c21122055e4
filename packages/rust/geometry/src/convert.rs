//! GeoJSON ↔ storage conversion with reprojection and simplification.

use geo::{MapCoords, Simplify};
use geo_types::{Coord, Geometry};
use parcelpipe_shared::{GeomValue, PipelineError, Result};
use proj4rs::Proj;
use wkt::{ToWkt, TryFromWkt};

use crate::wkb;

/// Storage spatial reference — everything is normalized to WGS84.
pub const STORAGE_SRID: u32 = 4326;

const WGS84_PROJ: &str = "+proj=longlat +datum=WGS84 +no_defs";

/// EPSG:5174 — Korean 1985 modified central belt (Bessel), the CRS most
/// cadastral shapefiles ship in.
const EPSG_5174: &str = "+proj=tmerc +lat_0=38 +lon_0=127.0028902777778 +k=1 \
     +x_0=200000 +y_0=500000 +ellps=bessel +units=m \
     +towgs84=-115.8,474.99,674.11,1.16,-2.31,-1.63,6.43 +no_defs";

/// EPSG:5179 — Korea 2000 / unified CS (road-name address layers).
const EPSG_5179: &str = "+proj=tmerc +lat_0=38 +lon_0=127.5 +k=0.9996 \
     +x_0=1000000 +y_0=2000000 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs";

/// EPSG:5186 — Korea 2000 central belt with the 600km false northing.
const EPSG_5186: &str = "+proj=tmerc +lat_0=38 +lon_0=127 +k=1 \
     +x_0=200000 +y_0=600000 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs";

// ---------------------------------------------------------------------------
// Source CRS
// ---------------------------------------------------------------------------

/// Coordinate reference systems the pipeline accepts from source layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceCrs {
    #[default]
    Wgs84,
    Epsg5174,
    Epsg5179,
    Epsg5186,
}

impl SourceCrs {
    fn proj_string(self) -> Option<&'static str> {
        match self {
            Self::Wgs84 => None,
            Self::Epsg5174 => Some(EPSG_5174),
            Self::Epsg5179 => Some(EPSG_5179),
            Self::Epsg5186 => Some(EPSG_5186),
        }
    }

    /// Sniff the CRS from a `.prj` sidecar's WKT text. Unknown content falls
    /// back to WGS84 (coordinates pass through untransformed).
    pub fn from_prj(prj: &str) -> Self {
        if prj.contains("Bessel") || prj.contains("Tokyo") {
            Self::Epsg5174
        } else if prj.contains("1000000") {
            Self::Epsg5179
        } else if prj.contains("600000") {
            Self::Epsg5186
        } else {
            if !prj.contains("WGS") && !prj.contains("GEOGCS") && !prj.is_empty() {
                tracing::warn!("unrecognized .prj content, assuming WGS84");
            }
            Self::Wgs84
        }
    }
}

// ---------------------------------------------------------------------------
// Source → storage
// ---------------------------------------------------------------------------

/// Convert a source geometry to the storage representation.
///
/// Reprojects to WGS84 when the declared CRS differs, optionally simplifies
/// (Douglas–Peucker, tolerance in degrees) to bound storage size for dense
/// polygon layers, and serializes to WKT. `None` input yields
/// [`GeomValue::None`].
pub fn to_storage(
    geometry: Option<&geojson::Geometry>,
    crs: SourceCrs,
    simplify_tolerance: Option<f64>,
) -> Result<GeomValue> {
    let Some(geometry) = geometry else {
        return Ok(GeomValue::None);
    };

    let geom: Geometry<f64> = geometry.value.clone().try_into().map_err(|e| {
        PipelineError::UnsupportedGeometry(format!("geojson conversion failed: {e}"))
    })?;

    let geom = reproject(geom, crs)?;
    let geom = match simplify_tolerance {
        Some(tolerance) => simplify(geom, tolerance),
        None => geom,
    };

    Ok(GeomValue::Wkt(geom.wkt_string()))
}

fn reproject(geom: Geometry<f64>, crs: SourceCrs) -> Result<Geometry<f64>> {
    let Some(proj_string) = crs.proj_string() else {
        return Ok(geom);
    };

    let source = Proj::from_proj_string(proj_string)
        .map_err(|e| PipelineError::UnsupportedGeometry(format!("source CRS: {e}")))?;
    let target = Proj::from_proj_string(WGS84_PROJ)
        .map_err(|e| PipelineError::UnsupportedGeometry(format!("target CRS: {e}")))?;

    geom.try_map_coords(|Coord { x, y }| {
        let mut point = (x, y, 0.0);
        proj4rs::transform::transform(&source, &target, &mut point).map_err(|e| {
            PipelineError::UnsupportedGeometry(format!("reprojection failed at ({x}, {y}): {e}"))
        })?;
        // Geographic output is in radians.
        Ok(Coord {
            x: point.0.to_degrees(),
            y: point.1.to_degrees(),
        })
    })
}

fn simplify(geom: Geometry<f64>, tolerance: f64) -> Geometry<f64> {
    match geom {
        Geometry::LineString(g) => Geometry::LineString(g.simplify(&tolerance)),
        Geometry::MultiLineString(g) => Geometry::MultiLineString(g.simplify(&tolerance)),
        Geometry::Polygon(g) => Geometry::Polygon(g.simplify(&tolerance)),
        Geometry::MultiPolygon(g) => Geometry::MultiPolygon(g.simplify(&tolerance)),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Storage → GeoJSON (boundary contract for consumers outside the pipeline)
// ---------------------------------------------------------------------------

/// Convert a stored geometry back into a GeoJSON structure.
///
/// `GeomValue::None` yields `None`; WKT and (E)WKB payloads are decoded;
/// any other binary encoding fails with `UnsupportedGeometry`.
pub fn to_geojson(value: &GeomValue) -> Result<Option<geojson::Geometry>> {
    let geom: Geometry<f64> = match value {
        GeomValue::None => return Ok(None),
        GeomValue::Wkt(text) => Geometry::try_from_wkt_str(text)
            .map_err(|e| PipelineError::UnsupportedGeometry(format!("bad WKT: {e}")))?,
        GeomValue::Binary(bytes) => wkb::decode(bytes)?,
    };

    Ok(Some(geojson::Geometry::new(geojson::Value::from(&geom))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geojson::Value as GjValue;

    fn square(x0: f64, y0: f64, side: f64) -> geojson::Geometry {
        geojson::Geometry::new(GjValue::Polygon(vec![vec![
            vec![x0, y0],
            vec![x0 + side, y0],
            vec![x0 + side, y0 + side],
            vec![x0, y0 + side],
            vec![x0, y0],
        ]]))
    }

    #[test]
    fn null_geometry_passes_through() {
        assert_eq!(
            to_storage(None, SourceCrs::Wgs84, None).unwrap(),
            GeomValue::None
        );
        assert_eq!(to_geojson(&GeomValue::None).unwrap(), None);
    }

    #[test]
    fn wgs84_polygon_to_wkt() {
        let wkt = to_storage(Some(&square(127.0, 37.5, 0.001)), SourceCrs::Wgs84, None)
            .unwrap()
            .as_wkt()
            .expect("wkt")
            .to_string();
        assert!(wkt.starts_with("POLYGON"));
        assert!(wkt.contains("127"));
    }

    #[test]
    fn epsg5174_point_reprojects_into_korea() {
        // The projection origin (false easting/northing) must land near
        // lon_0/lat_0 after the datum shift.
        let point = geojson::Geometry::new(GjValue::Point(vec![200000.0, 500000.0]));
        let wkt = to_storage(Some(&point), SourceCrs::Epsg5174, None)
            .unwrap()
            .as_wkt()
            .unwrap()
            .to_string();

        let geom: Geometry<f64> = Geometry::try_from_wkt_str(&wkt).expect("parse wkt");
        let Geometry::Point(p) = geom else {
            panic!("expected point, got {wkt}");
        };
        assert!((p.x() - 127.0028).abs() < 0.05, "lon {} off", p.x());
        assert!((p.y() - 38.0).abs() < 0.05, "lat {} off", p.y());
    }

    #[test]
    fn wkt_geojson_roundtrip_preserves_precision() {
        let coords = (126.978652, 37.566826);
        let point = geojson::Geometry::new(GjValue::Point(vec![coords.0, coords.1]));
        let stored = to_storage(Some(&point), SourceCrs::Wgs84, None).unwrap();

        let back = to_geojson(&stored).unwrap().expect("geometry");
        let GjValue::Point(p) = back.value else {
            panic!("expected point");
        };
        assert!((p[0] - coords.0).abs() < 1e-6);
        assert!((p[1] - coords.1).abs() < 1e-6);
    }

    #[test]
    fn simplification_drops_redundant_vertices() {
        // A line with a vertex well inside the tolerance band.
        let line = geojson::Geometry::new(GjValue::LineString(vec![
            vec![0.0, 0.0],
            vec![0.5, 0.0001],
            vec![1.0, 0.0],
        ]));
        let wkt = to_storage(Some(&line), SourceCrs::Wgs84, Some(0.01))
            .unwrap()
            .as_wkt()
            .unwrap()
            .to_string();
        let geom: Geometry<f64> = Geometry::try_from_wkt_str(&wkt).unwrap();
        let Geometry::LineString(ls) = geom else {
            panic!("expected linestring");
        };
        assert_eq!(ls.0.len(), 2);
    }

    #[test]
    fn prj_sniffing() {
        assert_eq!(
            SourceCrs::from_prj(r#"PROJCS["Korea...",GEOGCS[...],SPHEROID["Bessel 1841"...]"#),
            SourceCrs::Epsg5174
        );
        assert_eq!(
            SourceCrs::from_prj(r#"PROJCS[...PARAMETER["False_Easting",1000000.0]...]"#),
            SourceCrs::Epsg5179
        );
        assert_eq!(
            SourceCrs::from_prj(r#"GEOGCS["GCS_WGS_1984",...]"#),
            SourceCrs::Wgs84
        );
        assert_eq!(SourceCrs::from_prj(""), SourceCrs::Wgs84);
    }
}
