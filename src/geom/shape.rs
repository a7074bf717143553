use geo::{Centroid, Coord, CoordsIter, Geometry, LineString, Point};

/// Distinct vertices of a street geometry: every vertex of a line, or the
/// exterior ring of a polygonal footprint (without its closing repeat).
pub(crate) fn vertices(geometry: &Geometry<f64>) -> Vec<Point<f64>> {
    let mut coords: Vec<Coord<f64>> = Vec::with_capacity(geometry.coords_count());
    for coord in geometry.exterior_coords_iter() {
        if !coords.contains(&coord) {
            coords.push(coord);
        }
    }
    coords.into_iter().map(Point::from).collect()
}

/// Point halfway along a line, by length. Multi-part lines use their longest part;
/// anything else falls back to its centroid.
pub(crate) fn midpoint(geometry: &Geometry<f64>) -> Option<Point<f64>> {
    match geometry {
        Geometry::Line(line) => Some(Point::from((line.start + line.end) / 2.0)),
        Geometry::LineString(line) => halfway(line),
        Geometry::MultiLineString(lines) => lines.0.iter()
            .max_by(|a, b| length(a).total_cmp(&length(b)))
            .and_then(halfway),
        other => other.centroid(),
    }
}

fn length(line: &LineString<f64>) -> f64 {
    line.lines().map(|segment| segment.dx().hypot(segment.dy())).sum()
}

fn halfway(line: &LineString<f64>) -> Option<Point<f64>> {
    let mut remaining = length(line) / 2.0;
    for segment in line.lines() {
        let len = segment.dx().hypot(segment.dy());
        if len > 0.0 && remaining <= len {
            let t = remaining / len;
            return Some(Point::new(
                segment.start.x + t * segment.dx(),
                segment.start.y + t * segment.dy(),
            ));
        }
        remaining -= len;
    }
    line.0.first().copied().map(Point::from)
}
