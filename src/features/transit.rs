use anyhow::{Result, ensure};
use geo::{BoundingRect, Distance, Euclidean, Geometry, Point};
use rayon::prelude::*;
use rstar::{AABB, RTree, primitives::GeomWithData};
use serde::{Deserialize, Serialize};

use crate::{
    error::PipelineError,
    features::StreetLayer,
    geom::{self, Crs, GeometryTable, Layer, Length},
};

/// Buffer radii for ridership sums, smallest first.
pub const RIDERSHIP_RADII: [Length; 3] = [Length::Meters(250.0), Length::Meters(400.0), Length::Meters(500.0)];

/// Radius of the buffer around a street midpoint used for transit distance.
pub const TRANSIT_BUFFER: Length = Length::Feet(5.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransitMode {
    Bus,
    Trolley,
    ElevatedRail,
    Subway,
    RegionalRail,
}

impl TransitMode {
    /// Whether the mode runs in mixed street traffic.
    #[inline]
    pub fn is_surface(&self) -> bool { matches!(self, Self::Bus | Self::Trolley) }
}

impl std::fmt::Display for TransitMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Bus => "bus",
            Self::Trolley => "trolley",
            Self::ElevatedRail => "elevated-rail",
            Self::Subway => "subway",
            Self::RegionalRail => "regional-rail",
        })
    }
}

/// A boarding location with its weekly ridership.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitStop {
    pub location: Point<f64>,
    pub mode: TransitMode,
    pub weekly_riders: f64,
}

impl TransitStop {
    /// Weekly riders from average-weekday, Saturday and Sunday boardings.
    /// Missing counts are zero.
    pub fn from_counts(location: Point<f64>, mode: TransitMode, weekday: Option<f64>, saturday: Option<f64>, sunday: Option<f64>) -> Self {
        let weekly_riders = 5.0 * weekday.unwrap_or(0.0) + saturday.unwrap_or(0.0) + sunday.unwrap_or(0.0);
        Self { location, mode, weekly_riders }
    }
}

/// Transit stops of every mode, in one CRS.
#[derive(Debug, Clone)]
pub struct TransitStops {
    stops: Vec<TransitStop>,
    crs: Crs,
}

impl TransitStops {
    pub fn new(stops: Vec<TransitStop>, crs: Crs) -> Self { Self { stops, crs } }

    /// Append the stops of one ridership layer.
    pub fn push_layer(&mut self, layer: &Layer, mode: TransitMode, weekday: &str, saturday: &str, sunday: &str) -> Result<()> {
        ensure!(layer.crs() == self.crs,
            "[features::transit] ridership layer {} is in {}, expected {}", layer.name(), layer.crs(), self.crs);

        let points = points_of(layer)?;
        let counts = [layer.f64_values(weekday)?, layer.f64_values(saturday)?, layer.f64_values(sunday)?];
        for (i, location) in points.into_iter().enumerate() {
            let (wd, sat, sun) = (counts[0][i], counts[1][i], counts[2][i]);
            if [wd, sat, sun].iter().flatten().any(|count| *count < 0.0) {
                return Err(PipelineError::layer_load(layer.name(), format!("stop {i} has negative boardings")).into());
            }
            self.stops.push(TransitStop::from_counts(location, mode, wd, sat, sun));
        }
        log::debug!("[features::transit] loaded {} {mode} stops from {}", layer.len(), layer.name());
        Ok(())
    }

    #[inline] pub fn stops(&self) -> &[TransitStop] { &self.stops }

    #[inline] pub fn crs(&self) -> Crs { self.crs }

    #[inline] pub fn len(&self) -> usize { self.stops.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.stops.is_empty() }
}

/// Point locations of a layer; any non-point feature is a load error.
pub(crate) fn points_of(layer: &Layer) -> Result<Vec<Point<f64>>> {
    layer.geoms().shapes().iter().enumerate()
        .map(|(i, shape)| match shape {
            Geometry::Point(point) => Ok(*point),
            _ => Err(PipelineError::layer_load(layer.name(), format!("feature {i} is not a point"))),
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(Into::into)
}

/// Ridership sums per radius of `RIDERSHIP_RADII`, for all stops and by mode class.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RidershipFeatures {
    pub all: [f64; 3],
    pub surface: [f64; 3],
    pub grade_separated: [f64; 3],
}

impl RidershipFeatures {
    #[inline] pub fn riders_400(&self) -> f64 { self.all[1] }
}

/// Distance from each street's midpoint buffer to the closest transit hub.
///
/// A street without a midpoint (empty geometry) gets None. Having no hubs at all
/// is an error rather than a column of missing values.
pub fn transit_distance(streets: &StreetLayer, hubs: &GeometryTable) -> Result<Vec<Option<f64>>> {
    ensure!(streets.geoms().crs() == hubs.crs(),
        "[features::transit] streets ({}) and hubs ({}) must share a CRS", streets.geoms().crs(), hubs.crs());
    if hubs.is_empty() {
        return Err(PipelineError::ambiguity("transit distance", "transit hubs (empty layer)").into());
    }
    let buffer = TRANSIT_BUFFER.to_crs_units(&hubs.crs())?;

    Ok(streets.midpoints().into_par_iter()
        .map(|midpoint| midpoint
            .and_then(|point| hubs.nearest(point))
            .map(|(_, distance)| (distance - buffer).max(0.0)))
        .collect())
}

/// Sum weekly riders of the stops within each radius of every street geometry.
/// Streets with no stops in range get zero.
pub fn aggregate_ridership(streets: &StreetLayer, stops: &TransitStops) -> Result<Vec<RidershipFeatures>> {
    let crs = streets.geoms().crs();
    ensure!(crs == stops.crs(),
        "[features::transit] streets ({crs}) and stops ({}) must share a CRS", stops.crs());
    let radii = RIDERSHIP_RADII.iter()
        .map(|radius| radius.to_crs_units(&crs))
        .collect::<Result<Vec<_>>>()?;
    let widest = radii.iter().copied().fold(0.0, f64::max);

    let tree = RTree::bulk_load(stops.stops().iter().enumerate()
        .map(|(i, stop)| GeomWithData::new([stop.location.x(), stop.location.y()], i))
        .collect());

    let features = streets.geoms().shapes().par_iter()
        .map(|shape| {
            let mut features = RidershipFeatures::default();
            let Some(rect) = shape.bounding_rect() else { return features };
            let search = AABB::from_corners(
                [rect.min().x - widest, rect.min().y - widest],
                [rect.max().x + widest, rect.max().y + widest],
            );

            for candidate in tree.locate_in_envelope(&search) {
                let stop = &stops.stops()[candidate.data];
                let distance = Euclidean.distance(shape, &Geometry::Point(stop.location));
                for (k, &radius) in radii.iter().enumerate() {
                    if distance > radius { continue }
                    features.all[k] += stop.weekly_riders;
                    if stop.mode.is_surface() {
                        features.surface[k] += stop.weekly_riders;
                    } else {
                        features.grade_separated[k] += stop.weekly_riders;
                    }
                }
            }
            features
        })
        .collect::<Vec<_>>();

    log::info!("[features::transit] summed ridership of {} stops onto {} streets", stops.len(), streets.len());
    Ok(features)
}
