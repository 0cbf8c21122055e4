//! Minimal (E)WKB decoder for the storage → GeoJSON boundary.
//!
//! Handles the subset PostGIS emits for this schema: 2-D geometries of the
//! seven standard types, either byte order, with or without the EWKB SRID
//! flag. Z/M coordinates and exotic types are rejected with
//! `UnsupportedGeometry` rather than guessed at.

use geo_types::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon,
};
use parcelpipe_shared::{PipelineError, Result};

const EWKB_SRID_FLAG: u32 = 0x2000_0000;
const WKB_ZM_MASK: u32 = 0xC000_0000;

/// Decode a WKB or EWKB byte payload into a geometry.
pub fn decode(bytes: &[u8]) -> Result<Geometry<f64>> {
    let mut cursor = Cursor::new(bytes);
    let geom = read_geometry(&mut cursor)?;
    Ok(geom)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    little_endian: bool,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            little_endian: true,
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        if end > self.bytes.len() {
            return Err(PipelineError::UnsupportedGeometry(format!(
                "truncated WKB: wanted {n} bytes at offset {}",
                self.pos
            )));
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_byte_order(&mut self) -> Result<()> {
        let b = self.take(1)?[0];
        self.little_endian = match b {
            0 => false,
            1 => true,
            other => {
                return Err(PipelineError::UnsupportedGeometry(format!(
                    "invalid WKB byte-order marker {other:#x}"
                )));
            }
        };
        Ok(())
    }

    fn read_u32(&mut self) -> Result<u32> {
        let raw: [u8; 4] = self.take(4)?.try_into().expect("4-byte slice");
        Ok(if self.little_endian {
            u32::from_le_bytes(raw)
        } else {
            u32::from_be_bytes(raw)
        })
    }

    fn read_f64(&mut self) -> Result<f64> {
        let raw: [u8; 8] = self.take(8)?.try_into().expect("8-byte slice");
        Ok(if self.little_endian {
            f64::from_le_bytes(raw)
        } else {
            f64::from_be_bytes(raw)
        })
    }

    fn read_coord(&mut self) -> Result<Coord<f64>> {
        let x = self.read_f64()?;
        let y = self.read_f64()?;
        Ok(Coord { x, y })
    }

    fn read_ring(&mut self) -> Result<LineString<f64>> {
        let n = self.read_u32()? as usize;
        let mut coords = Vec::with_capacity(n);
        for _ in 0..n {
            coords.push(self.read_coord()?);
        }
        Ok(LineString::from(coords))
    }
}

fn read_geometry(cursor: &mut Cursor<'_>) -> Result<Geometry<f64>> {
    cursor.read_byte_order()?;
    let raw_type = cursor.read_u32()?;

    if raw_type & WKB_ZM_MASK != 0 {
        return Err(PipelineError::UnsupportedGeometry(
            "Z/M coordinates are not supported".into(),
        ));
    }
    if raw_type & EWKB_SRID_FLAG != 0 {
        // EWKB carries the SRID inline; storage is always 4326, so it is
        // read and discarded.
        let _srid = cursor.read_u32()?;
    }

    match raw_type & 0xFF {
        1 => Ok(Geometry::Point(Point::from(cursor.read_coord()?))),
        2 => Ok(Geometry::LineString(cursor.read_ring()?)),
        3 => {
            let rings = cursor.read_u32()? as usize;
            if rings == 0 {
                return Ok(Geometry::Polygon(Polygon::new(LineString::new(vec![]), vec![])));
            }
            let exterior = cursor.read_ring()?;
            let mut interiors = Vec::with_capacity(rings - 1);
            for _ in 1..rings {
                interiors.push(cursor.read_ring()?);
            }
            Ok(Geometry::Polygon(Polygon::new(exterior, interiors)))
        }
        4 => {
            let n = cursor.read_u32()? as usize;
            let mut points = Vec::with_capacity(n);
            for _ in 0..n {
                match read_geometry(cursor)? {
                    Geometry::Point(p) => points.push(p),
                    other => return Err(unexpected_member("MultiPoint", &other)),
                }
            }
            Ok(Geometry::MultiPoint(MultiPoint::new(points)))
        }
        5 => {
            let n = cursor.read_u32()? as usize;
            let mut lines = Vec::with_capacity(n);
            for _ in 0..n {
                match read_geometry(cursor)? {
                    Geometry::LineString(l) => lines.push(l),
                    other => return Err(unexpected_member("MultiLineString", &other)),
                }
            }
            Ok(Geometry::MultiLineString(MultiLineString::new(lines)))
        }
        6 => {
            let n = cursor.read_u32()? as usize;
            let mut polygons = Vec::with_capacity(n);
            for _ in 0..n {
                match read_geometry(cursor)? {
                    Geometry::Polygon(p) => polygons.push(p),
                    other => return Err(unexpected_member("MultiPolygon", &other)),
                }
            }
            Ok(Geometry::MultiPolygon(MultiPolygon::new(polygons)))
        }
        7 => {
            let n = cursor.read_u32()? as usize;
            let mut members = Vec::with_capacity(n);
            for _ in 0..n {
                members.push(read_geometry(cursor)?);
            }
            Ok(Geometry::GeometryCollection(GeometryCollection::from(
                members,
            )))
        }
        other => Err(PipelineError::UnsupportedGeometry(format!(
            "unknown WKB geometry type {other}"
        ))),
    }
}

fn unexpected_member(container: &str, got: &Geometry<f64>) -> PipelineError {
    PipelineError::UnsupportedGeometry(format!(
        "{container} member has unexpected type {got:?}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le_point(x: f64, y: f64) -> Vec<u8> {
        let mut buf = vec![1u8];
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&x.to_le_bytes());
        buf.extend_from_slice(&y.to_le_bytes());
        buf
    }

    #[test]
    fn decodes_little_endian_point() {
        let geom = decode(&le_point(126.978, 37.566)).expect("decode");
        let Geometry::Point(p) = geom else {
            panic!("expected point");
        };
        assert_eq!(p.x(), 126.978);
        assert_eq!(p.y(), 37.566);
    }

    #[test]
    fn decodes_big_endian_point() {
        let mut buf = vec![0u8];
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.extend_from_slice(&10.5f64.to_be_bytes());
        buf.extend_from_slice(&(-3.25f64).to_be_bytes());

        let Geometry::Point(p) = decode(&buf).expect("decode") else {
            panic!("expected point");
        };
        assert_eq!(p.x(), 10.5);
        assert_eq!(p.y(), -3.25);
    }

    #[test]
    fn decodes_ewkb_with_srid() {
        let mut buf = vec![1u8];
        buf.extend_from_slice(&(1u32 | EWKB_SRID_FLAG).to_le_bytes());
        buf.extend_from_slice(&4326u32.to_le_bytes());
        buf.extend_from_slice(&127.0f64.to_le_bytes());
        buf.extend_from_slice(&37.0f64.to_le_bytes());

        let Geometry::Point(p) = decode(&buf).expect("decode") else {
            panic!("expected point");
        };
        assert_eq!(p.x(), 127.0);
    }

    #[test]
    fn decodes_polygon_with_hole() {
        let mut buf = vec![1u8];
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(&2u32.to_le_bytes()); // two rings
        for ring in [
            [(0.0f64, 0.0f64), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0), (0.0, 0.0)],
            [(1.0, 1.0), (2.0, 1.0), (2.0, 2.0), (1.0, 2.0), (1.0, 1.0)],
        ] {
            buf.extend_from_slice(&(ring.len() as u32).to_le_bytes());
            for (x, y) in ring {
                buf.extend_from_slice(&x.to_le_bytes());
                buf.extend_from_slice(&y.to_le_bytes());
            }
        }

        let Geometry::Polygon(p) = decode(&buf).expect("decode") else {
            panic!("expected polygon");
        };
        assert_eq!(p.exterior().0.len(), 5);
        assert_eq!(p.interiors().len(), 1);
    }

    #[test]
    fn rejects_unknown_type_and_truncation() {
        let mut buf = vec![1u8];
        buf.extend_from_slice(&99u32.to_le_bytes());
        assert!(matches!(
            decode(&buf),
            Err(PipelineError::UnsupportedGeometry(_))
        ));

        let point = le_point(1.0, 2.0);
        assert!(decode(&point[..10]).is_err());

        assert!(decode(&[7u8]).is_err());
    }
}
