use anyhow::{Result, ensure};
use geo::Point;
use rayon::prelude::*;

use crate::{
    error::PipelineError,
    features::{StreetId, StreetLayer, points_of},
    geom::{Crs, Layer},
};

/// One pedestrian counter and its weekly total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub location: Point<f64>,
    pub weekly_sum: Option<f64>,
}

/// Sensor readings in one CRS.
#[derive(Debug, Clone)]
pub struct SensorLayer {
    readings: Vec<SensorReading>,
    crs: Crs,
}

impl SensorLayer {
    pub fn new(readings: Vec<SensorReading>, crs: Crs) -> Self { Self { readings, crs } }

    pub fn from_layer(layer: &Layer, weekly_sum_column: &str) -> Result<Self> {
        let sums = layer.f64_values(weekly_sum_column)?;
        if let Some(i) = sums.iter().position(|sum| sum.is_some_and(|s| s < 0.0)) {
            return Err(PipelineError::layer_load(layer.name(), format!("sensor {i} has a negative {weekly_sum_column}")).into());
        }

        let readings = points_of(layer)?.into_iter().zip(sums)
            .map(|(location, weekly_sum)| SensorReading { location, weekly_sum })
            .collect();
        Ok(Self::new(readings, layer.crs()))
    }

    #[inline] pub fn readings(&self) -> &[SensorReading] { &self.readings }

    #[inline] pub fn crs(&self) -> Crs { self.crs }

    #[inline] pub fn len(&self) -> usize { self.readings.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.readings.is_empty() }
}

/// Sensor coverage of one street.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorSummary {
    pub n_sensors: usize,
    /// Mean weekly count over the sensors with a recorded sum.
    pub mean_ped: Option<f64>,
}

/// Snap every sensor to its nearest street. Exact ties go to the lowest street id.
/// Returns None only when the layer has no streets.
pub fn assign_sensors(streets: &StreetLayer, sensors: &SensorLayer) -> Result<Vec<Option<StreetId>>> {
    ensure!(streets.geoms().crs() == sensors.crs(),
        "[features::sensor] streets ({}) and sensors ({}) must share a CRS", streets.geoms().crs(), sensors.crs());

    Ok(sensors.readings().par_iter()
        .map(|reading| streets.geoms().nearest(reading.location).map(|(i, _)| streets.streets()[i].id))
        .collect())
}

/// Mean weekly count per street over its assigned sensors, in street order.
pub fn aggregate_sensors(streets: &StreetLayer, sensors: &SensorLayer, assignment: &[Option<StreetId>]) -> Vec<SensorSummary> {
    let mut totals = vec![(0usize, 0.0, 0usize); streets.len()];
    for (reading, street) in sensors.readings().iter().zip(assignment) {
        let Some(i) = street.and_then(|id| streets.position(id)) else { continue };
        let (count, sum, recorded) = &mut totals[i];
        *count += 1;
        if let Some(weekly) = reading.weekly_sum {
            *sum += weekly;
            *recorded += 1;
        }
    }

    let summaries = totals.into_iter()
        .map(|(n_sensors, sum, recorded)| SensorSummary {
            n_sensors,
            mean_ped: (recorded > 0).then(|| sum / recorded as f64),
        })
        .collect::<Vec<SensorSummary>>();

    let equipped = summaries.iter().filter(|s| s.n_sensors > 0).count();
    log::info!("[features::sensor] {} sensors assigned to {equipped} streets", sensors.len());
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{features::Street, geom::GeometryTable};
    use geo::{Geometry, line_string};

    fn streets() -> StreetLayer {
        // Two parallel streets 10 ft apart, listed with the higher id first.
        StreetLayer::new(
            vec![
                Street { id: StreetId(20), corridor_type: None, local_integ: None },
                Street { id: StreetId(10), corridor_type: None, local_integ: None },
                Street { id: StreetId(30), corridor_type: None, local_integ: None },
            ],
            GeometryTable::new(vec![
                Geometry::LineString(line_string![(x: 0.0, y: 10.0), (x: 100.0, y: 10.0)]),
                Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 100.0, y: 0.0)]),
                Geometry::LineString(line_string![(x: 0.0, y: 500.0), (x: 100.0, y: 500.0)]),
            ], crate::geom::Crs::PA_SOUTH_FT),
        ).unwrap()
    }

    fn reading(x: f64, y: f64, weekly_sum: Option<f64>) -> SensorReading {
        SensorReading { location: Point::new(x, y), weekly_sum }
    }

    #[test]
    fn ties_go_to_the_lowest_street_id() {
        let sensors = SensorLayer::new(vec![reading(50.0, 5.0, Some(1.0))], Crs::PA_SOUTH_FT);
        assert_eq!(assign_sensors(&streets(), &sensors).unwrap(), vec![Some(StreetId(10))]);
    }

    #[test]
    fn mean_skips_missing_sums() {
        let layer = streets();
        let sensors = SensorLayer::new(vec![
            reading(10.0, 9.0, Some(1_000.0)),
            reading(20.0, 11.0, Some(3_000.0)),
            reading(30.0, 12.0, None),
            reading(40.0, 1.0, None),
        ], Crs::PA_SOUTH_FT);

        let assignment = assign_sensors(&layer, &sensors).unwrap();
        let summaries = aggregate_sensors(&layer, &sensors, &assignment);

        // Street order is 10, 20, 30.
        assert_eq!(summaries[0], SensorSummary { n_sensors: 1, mean_ped: None });
        assert_eq!(summaries[1], SensorSummary { n_sensors: 3, mean_ped: Some(2_000.0) });
        assert_eq!(summaries[2], SensorSummary::default());
    }
}
