use anyhow::{Result, ensure};
use rayon::prelude::*;

use crate::{
    error::PipelineError,
    features::StreetLayer,
    geom::{GeometryTable, Layer, Length},
};

/// Radius of the street buffer that collects parcel floor area.
pub const RETAIL_BUFFER: Length = Length::Feet(60.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetailCategory {
    Retail,
    FoodBeverage,
}

/// Parcels of one category with their leasable floor area.
#[derive(Debug, Clone)]
pub struct ParcelLayer {
    category: RetailCategory,
    areas: Vec<f64>,
    geoms: GeometryTable,
}

impl ParcelLayer {
    pub fn new(category: RetailCategory, areas: Vec<f64>, geoms: GeometryTable) -> Result<Self> {
        ensure!(areas.len() == geoms.len(),
            "[features::retail] {} areas but {} geometries", areas.len(), geoms.len());
        Ok(Self { category, areas, geoms })
    }

    /// Read parcels from a loaded layer. A parcel with no recorded area contributes nothing.
    pub fn from_layer(layer: &Layer, area_field: &str, category: RetailCategory) -> Result<Self> {
        let values = layer.f64_values(area_field)?;
        let unrecorded = values.iter().filter(|area| area.is_none()).count();
        if unrecorded > 0 {
            log::debug!("[features::retail] {unrecorded} parcels in {} have no {area_field}", layer.name());
        }

        let areas = values.into_iter().enumerate()
            .map(|(i, area)| match area {
                Some(area) if area < 0.0 => Err(PipelineError::layer_load(layer.name(), format!("parcel {i} has negative {area_field}"))),
                area => Ok(area.unwrap_or(0.0)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(category, areas, layer.geoms().clone())
    }

    #[inline] pub fn category(&self) -> RetailCategory { self.category }

    #[inline] pub fn areas(&self) -> &[f64] { &self.areas }

    #[inline] pub fn geoms(&self) -> &GeometryTable { &self.geoms }

    #[inline] pub fn len(&self) -> usize { self.areas.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.areas.is_empty() }

    /// Total leasable area of the parcels within `radius` of a street.
    fn area_near(&self, shape: &geo::Geometry<f64>, radius: f64) -> f64 {
        self.geoms.within_distance(shape, radius).into_iter()
            .map(|i| self.areas[i])
            .sum()
    }
}

/// Leasable floor area near one street. Zero when no parcel is in range.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RetailFeatures {
    pub retail_area: f64,
    pub fb_area: f64,
}

impl RetailFeatures {
    #[inline] pub fn total_area(&self) -> f64 { self.retail_area + self.fb_area }
}

/// Sum retail and food-and-beverage floor area within `RETAIL_BUFFER` of every street.
pub fn aggregate_retail(streets: &StreetLayer, retail: &ParcelLayer, food_beverage: &ParcelLayer) -> Result<Vec<RetailFeatures>> {
    ensure!(retail.category() == RetailCategory::Retail && food_beverage.category() == RetailCategory::FoodBeverage,
        "[features::retail] parcel layers passed in the wrong order");
    let crs = streets.geoms().crs();
    ensure!(retail.geoms().crs() == crs && food_beverage.geoms().crs() == crs,
        "[features::retail] parcels must be in the street CRS {crs}");
    let radius = RETAIL_BUFFER.to_crs_units(&crs)?;

    Ok(streets.geoms().shapes().par_iter()
        .map(|shape| RetailFeatures {
            retail_area: retail.area_near(shape, radius),
            fb_area: food_beverage.area_near(shape, radius),
        })
        .collect())
}
