use anyhow::{Result, ensure};
use geo::{BooleanOps, Geometry, Intersects, MultiPolygon};
use polars::{frame::DataFrame, prelude::{IdxCa, IdxSize}};

use crate::{common, geom::{Crs, GeometryTable}};

/// A named vector layer: features plus one attribute row per feature.
#[derive(Debug, Clone)]
pub struct Layer {
    name: String,
    geoms: GeometryTable,
    data: DataFrame,
}

impl Layer {
    /// Pair features with their attribute rows.
    pub fn new(name: impl Into<String>, geoms: GeometryTable, data: DataFrame) -> Result<Self> {
        let name = name.into();
        ensure!(geoms.len() == data.height(),
            "[geom::layer] layer {name:?} has {} features but {} attribute rows", geoms.len(), data.height());
        Ok(Self { name, geoms, data })
    }

    /// Get the layer name.
    #[inline] pub fn name(&self) -> &str { &self.name }

    /// Get the number of features.
    #[inline] pub fn len(&self) -> usize { self.geoms.len() }

    /// Check if the layer has no features.
    #[inline] pub fn is_empty(&self) -> bool { self.geoms.is_empty() }

    /// Get the feature geometries.
    #[inline] pub fn geoms(&self) -> &GeometryTable { &self.geoms }

    /// Get the attribute table.
    #[inline] pub fn data(&self) -> &DataFrame { &self.data }

    /// Get the CRS of the layer.
    #[inline] pub fn crs(&self) -> Crs { self.geoms.crs() }

    /// Read an attribute as nullable numbers.
    pub fn f64_values(&self, field: &str) -> Result<Vec<Option<f64>>> { common::f64_values(&self.data, field) }

    /// Read an attribute as nullable strings.
    pub fn str_values(&self, field: &str) -> Result<Vec<Option<String>>> { common::str_values(&self.data, field) }

    /// Reproject the layer's features into `target`, keeping attributes as they are.
    pub fn reproject(&self, target: &Crs) -> Result<Self> {
        Ok(Self { name: self.name.clone(), geoms: self.geoms.reproject(target)?, data: self.data.clone() })
    }

    /// Union of every polygonal feature, used when the layer is a boundary.
    pub fn union(&self) -> MultiPolygon<f64> {
        self.geoms.shapes().iter()
            .filter_map(|shape| match shape {
                Geometry::Polygon(polygon) => Some(MultiPolygon(vec![polygon.clone()])),
                Geometry::MultiPolygon(polygons) => Some(polygons.clone()),
                Geometry::Rect(rect) => Some(MultiPolygon(vec![rect.to_polygon()])),
                _ => None,
            })
            .reduce(|a, b| a.union(&b))
            .unwrap_or_else(|| MultiPolygon(Vec::new()))
    }

    /// Keep only the features that intersect (or lie inside) `boundary`.
    /// Both layers must share a CRS.
    pub fn clip(&self, boundary: &Layer) -> Result<Self> {
        ensure!(self.crs() == boundary.crs(),
            "[geom::layer] cannot clip {:?} ({}) by {:?} ({})", self.name, self.crs(), boundary.name, boundary.crs());

        let region = Geometry::MultiPolygon(boundary.union());
        let keep = self.geoms.shapes().iter()
            .map(|shape| region.intersects(shape))
            .collect::<Vec<_>>();

        Ok(Self {
            name: self.name.clone(),
            geoms: self.geoms.filter(&keep),
            data: common::filter_rows(&self.data, &keep)?,
        })
    }

    /// Reorder features (and their attribute rows) by a permutation of indices.
    pub(crate) fn permute(&self, order: &[usize]) -> Result<Self> {
        let idx = order.iter().map(|&i| i as IdxSize).collect::<Vec<_>>();
        let idx = IdxCa::from_vec("idx".into(), idx);
        Ok(Self {
            name: self.name.clone(),
            geoms: self.geoms.permute(order),
            data: self.data.take(&idx)?,
        })
    }
}
