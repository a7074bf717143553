//! ESRI shapefile reading.

use std::path::Path;

use anyhow::{Context, Result, bail};
use geo::{Coord, Geometry, LineString, MultiLineString, MultiPolygon, Point, Polygon};
use shapefile::{PolygonRing, Reader, Shape, dbase::{FieldValue, Record}};

/// Reads all shapes + attribute records from a given `.shp` file path.
pub(crate) fn read_shapefile(path: &Path) -> Result<Vec<(Shape, Record)>> {
    let mut reader = Reader::from_path(path)
        .with_context(|| format!("[io::shp] Failed to open shapefile: {}", path.display()))?;

    let mut items = Vec::with_capacity(reader.shape_count()?);
    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result.context("[io::shp] Error reading shape+record")?;
        items.push((shape, record));
    }
    Ok(items)
}

/// Reads the `.prj` sidecar next to a `.shp` file, if there is one.
pub(crate) fn read_prj(path: &Path) -> Option<String> {
    std::fs::read_to_string(path.with_extension("prj")).ok()
}

/// Convert a 2D shapefile shape to a geo geometry.
pub(crate) fn shape_to_geometry(shape: Shape) -> Result<Geometry<f64>> {
    #[inline] fn coord(point: &shapefile::Point) -> Coord<f64> { Coord { x: point.x, y: point.y } }

    Ok(match shape {
        Shape::Point(point) => Geometry::Point(Point(coord(&point))),
        Shape::Polyline(polyline) => {
            let mut lines = polyline.parts().iter()
                .map(|part| LineString(part.iter().map(coord).collect()))
                .collect::<Vec<_>>();
            if lines.len() == 1 { Geometry::LineString(lines.remove(0)) }
            else { Geometry::MultiLineString(MultiLineString(lines)) }
        }
        Shape::Polygon(polygon) => Geometry::MultiPolygon(polygon_to_geo(&polygon)),
        other => bail!("[io::shp] unsupported shape type: {:?}", other.shapetype()),
    })
}

/// Convert shapefile::Polygon to geo::MultiPolygon<f64>.
/// Shapefile stores each outer ring followed by its holes.
fn polygon_to_geo(polygon: &shapefile::Polygon) -> MultiPolygon<f64> {
    /// Ensure first and last are the same for geo::LineString coords
    fn closed(points: &[shapefile::Point]) -> LineString<f64> {
        let mut coords = points.iter().map(|pt| Coord { x: pt.x, y: pt.y }).collect::<Vec<_>>();
        if let (Some(&first), Some(&last)) = (coords.first(), coords.last()) {
            if first != last { coords.push(first) }
        }
        LineString(coords)
    }

    let mut polys = Vec::new();
    let mut exterior: Option<LineString<f64>> = None;
    let mut holes = Vec::new();

    for ring in polygon.rings() {
        match ring {
            PolygonRing::Outer(points) => {
                // flush previous polygon
                if let Some(ext) = exterior.take() {
                    polys.push(Polygon::new(ext, std::mem::take(&mut holes)));
                }
                exterior = Some(closed(points));
            }
            PolygonRing::Inner(points) => holes.push(closed(points)),
        }
    }
    if let Some(ext) = exterior {
        polys.push(Polygon::new(ext, holes));
    }

    MultiPolygon(polys)
}

/// Get a numeric attribute from a record. Null values are None; an absent field is an error.
pub(crate) fn record_number(record: &Record, field: &str) -> Result<Option<f64>> {
    Ok(match record.get(field) {
        None => bail!("[io::shp] missing field: {field}"),
        Some(FieldValue::Numeric(value)) => *value,
        Some(FieldValue::Float(value)) => value.map(f64::from),
        Some(FieldValue::Integer(value)) => Some(f64::from(*value)),
        Some(FieldValue::Double(value)) => Some(*value),
        Some(FieldValue::Currency(value)) => Some(*value),
        Some(FieldValue::Character(Some(s))) => {
            let s = s.trim();
            if s.is_empty() { None } else {
                Some(s.parse().with_context(|| format!("[io::shp] field {field} is not numeric: {s:?}"))?)
            }
        }
        Some(FieldValue::Character(None)) => None,
        Some(other) => bail!("[io::shp] field {field} is not numeric: {other:?}"),
    })
}

/// Get a text attribute from a record. Numbers are rendered without a trailing `.0`.
pub(crate) fn record_text(record: &Record, field: &str) -> Result<Option<String>> {
    Ok(match record.get(field) {
        None => bail!("[io::shp] missing field: {field}"),
        Some(FieldValue::Character(value)) => value.as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        Some(FieldValue::Memo(s)) => Some(s.trim().to_string()),
        Some(FieldValue::Integer(value)) => Some(value.to_string()),
        Some(FieldValue::Numeric(value)) => value.map(|n| {
            if n.fract() == 0.0 { format!("{}", n as i64) } else { n.to_string() }
        }),
        Some(other) => bail!("[io::shp] field {field} is not text: {other:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;

    #[test]
    fn polygon_rings_group_holes_with_their_outer_ring() {
        let square = |x0: f64, size: f64| vec![
            shapefile::Point { x: x0, y: 0.0 },
            shapefile::Point { x: x0, y: size },
            shapefile::Point { x: x0 + size, y: size },
            shapefile::Point { x: x0 + size, y: 0.0 },
        ];
        let polygon = shapefile::Polygon::with_rings(vec![
            PolygonRing::Outer(square(0.0, 10.0)),
            PolygonRing::Inner(vec![
                shapefile::Point { x: 2.0, y: 2.0 },
                shapefile::Point { x: 4.0, y: 2.0 },
                shapefile::Point { x: 4.0, y: 4.0 },
                shapefile::Point { x: 2.0, y: 4.0 },
            ]),
            PolygonRing::Outer(square(20.0, 5.0)),
        ]);

        let geometry = polygon_to_geo(&polygon);
        assert_eq!(geometry.0.len(), 2);
        assert_eq!(geometry.0[0].interiors().len(), 1);
        assert!((geometry.unsigned_area() - (100.0 - 4.0 + 25.0)).abs() < 1e-9);
    }

    #[test]
    fn polylines_become_line_strings() {
        let line = shapefile::Polyline::new(vec![
            shapefile::Point { x: 0.0, y: 0.0 },
            shapefile::Point { x: 5.0, y: 0.0 },
        ]);
        match shape_to_geometry(Shape::Polyline(line)).unwrap() {
            Geometry::LineString(ls) => assert_eq!(ls.0.len(), 2),
            other => panic!("unexpected geometry {other:?}"),
        }
    }

    #[test]
    fn record_attributes_are_read_by_kind() {
        let mut record = Record::default();
        record.insert("JOBS".to_string(), FieldValue::Character(Some(" 1500 ".to_string())));
        record.insert("BLANK".to_string(), FieldValue::Character(Some("  ".to_string())));
        record.insert("TRACT".to_string(), FieldValue::Numeric(Some(42.0)));
        record.insert("HEIGHT".to_string(), FieldValue::Numeric(Some(12.5)));
        record.insert("OPEN".to_string(), FieldValue::Logical(Some(true)));

        assert_eq!(record_number(&record, "JOBS").unwrap(), Some(1500.0));
        assert_eq!(record_number(&record, "BLANK").unwrap(), None);
        assert_eq!(record_number(&record, "HEIGHT").unwrap(), Some(12.5));
        assert!(record_number(&record, "OPEN").is_err());
        assert!(record_number(&record, "POP").is_err());

        assert_eq!(record_text(&record, "TRACT").unwrap().as_deref(), Some("42"));
        assert_eq!(record_text(&record, "HEIGHT").unwrap().as_deref(), Some("12.5"));
        assert_eq!(record_text(&record, "JOBS").unwrap().as_deref(), Some("1500"));
        assert_eq!(record_text(&record, "BLANK").unwrap(), None);
        assert!(record_text(&record, "OPEN").is_err());
    }

    #[test]
    fn unparsable_text_is_not_a_number() {
        let mut record = Record::default();
        record.insert("JOBS".to_string(), FieldValue::Character(Some("many".to_string())));
        assert!(record_number(&record, "JOBS").is_err());
    }
}
