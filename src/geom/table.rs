use anyhow::Result;
use geo::{BoundingRect, Distance, Euclidean, Geometry, MapCoords, Point};
use rstar::{Envelope, RTree, RTreeObject, AABB};

use crate::geom::{BoundingBox, Crs};

/// GeometryTable holds a layer's features in one CRS, with an R-tree over their envelopes.
#[derive(Debug, Clone)]
pub struct GeometryTable {
    shapes: Vec<Geometry<f64>>,
    rtree: RTree<BoundingBox>,
    crs: Crs,
}

impl GeometryTable {
    /// Construct a table from features that are already expressed in `crs`.
    /// Empty geometries stay in the table but are never returned by spatial queries.
    pub fn new(shapes: Vec<Geometry<f64>>, crs: Crs) -> Self {
        Self {
            rtree: RTree::bulk_load(
                shapes.iter().enumerate()
                    .filter_map(|(i, shape)| shape.bounding_rect().map(|rect| BoundingBox::new(i, rect)))
                    .collect()
            ),
            shapes,
            crs,
        }
    }

    /// Get the number of features.
    #[inline] pub fn len(&self) -> usize { self.shapes.len() }

    /// Check if there are no features.
    #[inline] pub fn is_empty(&self) -> bool { self.shapes.is_empty() }

    /// Get a reference to the list of features.
    #[inline] pub fn shapes(&self) -> &[Geometry<f64>] { &self.shapes }

    /// Get the CRS shared by every feature.
    #[inline] pub fn crs(&self) -> Crs { self.crs }

    /// Query the R-tree for features whose envelopes intersect the given envelope.
    #[inline]
    pub(crate) fn query(&self, envelope: &AABB<[f64; 2]>) -> impl Iterator<Item = usize> + '_ {
        self.rtree.locate_in_envelope_intersecting(envelope).map(|bbox| bbox.idx())
    }

    /// Indices of features lying within `distance` of `geometry`, in ascending order.
    /// A distance of zero is a plain intersection test; boundary contact counts.
    pub(crate) fn within_distance(&self, geometry: &Geometry<f64>, distance: f64) -> Vec<usize> {
        let Some(rect) = geometry.bounding_rect() else { return Vec::new() };
        let search = AABB::from_corners(
            [rect.min().x - distance, rect.min().y - distance],
            [rect.max().x + distance, rect.max().y + distance],
        );

        let mut hits = self.query(&search)
            .filter(|&i| Euclidean.distance(geometry, &self.shapes[i]) <= distance)
            .collect::<Vec<_>>();
        hits.sort_unstable();
        hits
    }

    /// Nearest feature to `point` by exact Euclidean distance, with that distance.
    /// Exact ties go to the lowest feature index.
    pub(crate) fn nearest(&self, point: Point<f64>) -> Option<(usize, f64)> {
        let query = [point.x(), point.y()];
        let target = Geometry::Point(point);
        let mut best: Option<(usize, f64)> = None;

        // Candidates arrive ordered by envelope distance, a lower bound on the true distance.
        for bbox in self.rtree.nearest_neighbor_iter(&query) {
            let bound = bbox.envelope().distance_2(&query).sqrt();
            if best.is_some_and(|(_, d)| bound > d) { break }

            let idx = bbox.idx();
            let dist = Euclidean.distance(&target, &self.shapes[idx]);
            best = match best {
                Some((i, d)) if d < dist || (d == dist && i < idx) => Some((i, d)),
                _ => Some((idx, dist)),
            };
        }
        best
    }

    /// Reproject every feature into `target`. Reprojecting into the table's own CRS returns it unchanged.
    pub fn reproject(&self, target: &Crs) -> Result<Self> {
        let Some(transformer) = self.crs.transformer(target)? else { return Ok(self.clone()) };

        let shapes = self.shapes.iter()
            .map(|shape| shape.try_map_coords(|coord| transformer.apply(coord)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(shapes, *target))
    }

    /// Keep the features whose mask entry is true, preserving order.
    pub(crate) fn filter(&self, keep: &[bool]) -> Self {
        let shapes = self.shapes.iter().zip(keep)
            .filter_map(|(shape, &keep)| keep.then(|| shape.clone()))
            .collect();
        Self::new(shapes, self.crs)
    }

    /// Reorder features by the given permutation of indices.
    pub(crate) fn permute(&self, order: &[usize]) -> Self {
        Self::new(order.iter().map(|&i| self.shapes[i].clone()).collect(), self.crs)
    }
}
