use anyhow::{Result, ensure};
use geo::Point;
use polars::prelude::*;

use crate::{
    common,
    features::{
        BlockFeatures, Corrections, RetailFeatures, RidershipFeatures, SensorSummary, StreetId, StreetLayer,
    },
};

/// Per-street outputs of the aggregators, each in street order.
#[derive(Debug, Clone, Default)]
pub struct StreetAggregates {
    pub sensors: Vec<SensorSummary>,
    pub blocks: Vec<BlockFeatures>,
    pub transit_distance: Vec<Option<f64>>,
    pub retail: Vec<RetailFeatures>,
    pub ridership: Vec<RidershipFeatures>,
}

/// One street's joined features and its observed (or later predicted) volume.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelingRow {
    pub street_id: StreetId,
    /// Street midpoint, used for spatial weights.
    pub location: Option<Point<f64>>,
    pub local_integ: Option<f64>,
    pub high_ped_type: bool,
    pub n_res: Option<f64>,
    pub n_jobs: Option<f64>,
    pub res_dens: Option<f64>,
    pub job_dens: Option<f64>,
    pub building_height: Option<f64>,
    pub transit_distance: Option<f64>,
    pub retail_area: f64,
    pub fb_area: f64,
    pub riders: [f64; 3],
    pub surface_riders: [f64; 3],
    pub grade_sep_riders: [f64; 3],
    pub mean_ped: Option<f64>,
}

/// The joined per-street feature table, sorted by `street_id`.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    frame: DataFrame,
}

const RADII: [&str; 3] = ["250", "400", "500"];

impl FeatureTable {
    #[inline] pub fn frame(&self) -> &DataFrame { &self.frame }

    #[inline] pub fn into_frame(self) -> DataFrame { self.frame }

    #[inline] pub fn len(&self) -> usize { self.frame.height() }

    #[inline] pub fn is_empty(&self) -> bool { self.frame.height() == 0 }

    /// Typed rows in street order.
    pub fn rows(&self) -> Result<Vec<ModelingRow>> {
        let df = &self.frame;
        let ids = common::i64_values(df, "street_id")?;
        let f64s = |name: &str| common::f64_values(df, name);
        let (x, y) = (f64s("x")?, f64s("y")?);
        let local_integ = f64s("local_integ")?;
        let high_ped = common::i64_values(df, "high_ped_type")?;
        let blocks = ["n_res", "n_jobs", "res_dens", "job_dens", "building_height"]
            .map(f64s).into_iter().collect::<Result<Vec<_>>>()?;
        let transit = f64s("transit_distance")?;
        let (retail, fb) = (f64s("retail_area")?, f64s("fb_area")?);
        let riders = |prefix: &str| RADII.iter()
            .map(|radius| f64s(&format!("{prefix}{radius}")))
            .collect::<Result<Vec<_>>>();
        let (all, surface, grade_sep) = (riders("riders_")?, riders("surface_riders_")?, riders("grade_sep_riders_")?);
        let mean_ped = f64s("mean_ped")?;

        let zero = |column: &[Option<f64>], i: usize| column[i].unwrap_or(0.0);
        let by_radius = |columns: &[Vec<Option<f64>>], i: usize| [zero(&columns[0], i), zero(&columns[1], i), zero(&columns[2], i)];

        (0..df.height())
            .map(|i| {
                let Some(id) = ids[i] else { anyhow::bail!("[features::assemble] row {i} has no street_id") };
                Ok(ModelingRow {
                    street_id: StreetId(id),
                    location: x[i].zip(y[i]).map(|(x, y)| Point::new(x, y)),
                    local_integ: local_integ[i],
                    high_ped_type: high_ped[i] == Some(1),
                    n_res: blocks[0][i],
                    n_jobs: blocks[1][i],
                    res_dens: blocks[2][i],
                    job_dens: blocks[3][i],
                    building_height: blocks[4][i],
                    transit_distance: transit[i],
                    retail_area: zero(&retail, i),
                    fb_area: zero(&fb, i),
                    riders: by_radius(&all, i),
                    surface_riders: by_radius(&surface, i),
                    grade_sep_riders: by_radius(&grade_sep, i),
                    mean_ped: mean_ped[i],
                })
            })
            .collect()
    }

    /// Split rows into the modeling set (observed volume) and the prediction set (the rest).
    pub fn partition(&self) -> Result<(Vec<ModelingRow>, Vec<ModelingRow>)> {
        Ok(self.rows()?.into_iter().partition(|row| row.mean_ped.is_some()))
    }

    /// Fill `mean_ped` for predicted streets and record where each value came from.
    /// Observed values are never overwritten.
    pub fn fill_predictions(&mut self, predicted: &[(StreetId, f64)]) -> Result<()> {
        let ids = common::i64_values(&self.frame, "street_id")?;
        let mut mean_ped = common::f64_values(&self.frame, "mean_ped")?;
        let mut source = mean_ped.iter()
            .map(|value| value.map(|_| "observed"))
            .collect::<Vec<_>>();

        for &(id, value) in predicted {
            ensure!(value.is_finite() && value >= 0.0,
                "[features::assemble] prediction {value} for street {id} is not a valid volume");
            let Ok(i) = ids.binary_search(&Some(id.0)) else {
                anyhow::bail!("[features::assemble] prediction for unknown street {id}")
            };
            if mean_ped[i].is_none() {
                mean_ped[i] = Some(value);
                source[i] = Some("predicted");
            }
        }

        self.frame.with_column(Column::new("mean_ped".into(), mean_ped))?;
        self.frame.with_column(Column::new("mean_ped_source".into(), source))?;
        Ok(())
    }
}

fn keyed(ids: &[i64], columns: Vec<Column>) -> Result<DataFrame> {
    let mut columns = columns;
    columns.insert(0, Column::new("street_id".into(), ids));
    Ok(DataFrame::new(columns)?)
}

fn ridership_columns(prefix: &str, sums: impl Fn(usize) -> Vec<f64>) -> Vec<Column> {
    RADII.iter().enumerate()
        .map(|(k, radius)| Column::new(format!("{prefix}{radius}").into(), sums(k)))
        .collect()
}

/// Left-join every aggregator's output onto the streets and apply the table-level corrections.
pub fn assemble(streets: &StreetLayer, aggregates: &StreetAggregates, corrections: &Corrections) -> Result<FeatureTable> {
    let n = streets.len();
    ensure!(
        [aggregates.sensors.len(), aggregates.blocks.len(), aggregates.transit_distance.len(),
            aggregates.retail.len(), aggregates.ridership.len()].iter().all(|&len| len == n),
        "[features::assemble] every aggregate must cover all {n} streets"
    );

    let ids = streets.streets().iter().map(|street| street.id.0).collect::<Vec<_>>();
    let midpoints = streets.midpoints();
    let base = keyed(&ids, vec![
        Column::new("corridor_type".into(), streets.streets().iter().map(|s| s.corridor_type.clone()).collect::<Vec<_>>()),
        Column::new("local_integ".into(), streets.streets().iter().map(|s| s.local_integ).collect::<Vec<_>>()),
        Column::new("high_ped_type".into(), streets.streets().iter()
            .map(|s| corrections.is_high_ped(s.corridor_type.as_deref()) as i32)
            .collect::<Vec<_>>()),
        Column::new("n_sensors".into(), aggregates.sensors.iter().map(|s| s.n_sensors as u32).collect::<Vec<_>>()),
        Column::new("x".into(), midpoints.iter().map(|p| p.map(|p| p.x())).collect::<Vec<_>>()),
        Column::new("y".into(), midpoints.iter().map(|p| p.map(|p| p.y())).collect::<Vec<_>>()),
    ])?;

    // Only equipped streets carry a response; the join leaves the rest null.
    let equipped = aggregates.sensors.iter().map(|s| s.n_sensors > 0).collect::<Vec<_>>();
    let sensors = common::filter_rows(&keyed(&ids, vec![
        Column::new("mean_ped".into(), aggregates.sensors.iter().map(|s| s.mean_ped).collect::<Vec<_>>()),
    ])?, &equipped)?;

    let block = |field: fn(&BlockFeatures) -> Option<f64>| aggregates.blocks.iter().map(field).collect::<Vec<_>>();
    let blocks = keyed(&ids, vec![
        Column::new("n_res".into(), block(|b| b.n_res)),
        Column::new("n_jobs".into(), block(|b| b.n_jobs)),
        Column::new("res_dens".into(), block(|b| b.res_dens)),
        Column::new("job_dens".into(), block(|b| b.job_dens)),
        Column::new("building_height".into(), block(|b| b.building_height)),
    ])?;

    let transit = keyed(&ids, vec![
        Column::new("transit_distance".into(), aggregates.transit_distance.clone()),
    ])?;

    let retail = keyed(&ids, vec![
        Column::new("retail_area".into(), aggregates.retail.iter().map(|r| r.retail_area).collect::<Vec<_>>()),
        Column::new("fb_area".into(), aggregates.retail.iter().map(|r| r.fb_area).collect::<Vec<_>>()),
        Column::new("total_retail_area".into(), aggregates.retail.iter().map(RetailFeatures::total_area).collect::<Vec<_>>()),
    ])?;

    let ridership = &aggregates.ridership;
    let ridership = keyed(&ids, [
        ridership_columns("riders_", |k| ridership.iter().map(|r| r.all[k]).collect()),
        ridership_columns("surface_riders_", |k| ridership.iter().map(|r| r.surface[k]).collect()),
        ridership_columns("grade_sep_riders_", |k| ridership.iter().map(|r| r.grade_separated[k]).collect()),
    ].concat())?;

    let mut frame = base;
    for table in [&sensors, &blocks, &transit, &retail, &ridership] {
        frame = frame.left_join(table, ["street_id"], ["street_id"])?;
    }
    let mut frame = frame.sort(["street_id"], SortMultipleOptions::default())?;
    ensure!(frame.height() == n, "[features::assemble] joins changed the street count");

    let mut heights = common::f64_values(&frame, "building_height")?;
    let mut corrected = 0;
    for &(id, height) in &corrections.building_heights {
        match ids.binary_search(&id.0) {
            Ok(i) => { heights[i] = Some(height); corrected += 1 }
            Err(_) => log::debug!("[features::assemble] height correction for street {id} skipped: street not in table"),
        }
    }
    frame.with_column(Column::new("building_height".into(), heights))?;

    let modeled = equipped.iter().filter(|&&e| e).count();
    log::info!("[features::assemble] {n} streets ({modeled} with sensors, {corrected} height corrections)");
    Ok(FeatureTable { frame })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{features::Street, geom::{Crs, GeometryTable}};
    use geo::{Geometry, line_string};

    fn streets() -> StreetLayer {
        let street = |id, corridor: Option<&str>| Street {
            id: StreetId(id), corridor_type: corridor.map(String::from), local_integ: Some(id as f64 / 1000.0),
        };
        let line = |y: f64| Geometry::LineString(line_string![(x: 0.0, y: y), (x: 100.0, y: y)]);
        StreetLayer::new(
            vec![street(3120, None), street(5, Some("Civic/Ceremonial Street")), street(42, Some("Local"))],
            GeometryTable::new(vec![line(0.0), line(100.0), line(200.0)], Crs::PA_SOUTH_FT),
        ).unwrap()
    }

    /// Aggregates in street order 5, 42, 3120.
    fn aggregates() -> StreetAggregates {
        let touched = BlockFeatures {
            n_res: Some(10.0), n_jobs: Some(20.0), res_dens: Some(0.1), job_dens: Some(0.2), building_height: Some(30.0),
        };
        StreetAggregates {
            sensors: vec![
                SensorSummary { n_sensors: 2, mean_ped: Some(12_000.0) },
                SensorSummary::default(),
                SensorSummary { n_sensors: 1, mean_ped: Some(8_000.0) },
            ],
            blocks: vec![touched, BlockFeatures::default(), touched],
            transit_distance: vec![Some(100.0), Some(250.0), Some(40.0)],
            retail: vec![RetailFeatures { retail_area: 5.0, fb_area: 1.0 }, RetailFeatures::default(), RetailFeatures::default()],
            ridership: vec![
                RidershipFeatures { all: [1.0, 2.0, 3.0], surface: [1.0, 1.0, 2.0], grade_separated: [0.0, 1.0, 1.0] },
                RidershipFeatures::default(),
                RidershipFeatures::default(),
            ],
        }
    }

    #[test]
    fn partitions_on_observed_volume() {
        let table = assemble(&streets(), &aggregates(), &Corrections::default()).unwrap();
        assert_eq!(table.len(), 3);

        let (modeling, prediction) = table.partition().unwrap();
        assert_eq!(modeling.iter().map(|r| r.street_id.0).collect::<Vec<_>>(), vec![5, 3120]);
        assert_eq!(prediction.len(), 1);
        assert!(prediction[0].mean_ped.is_none());
    }

    #[test]
    fn untouched_blocks_stay_missing_and_ridership_zero() {
        let rows = assemble(&streets(), &aggregates(), &Corrections::default()).unwrap().rows().unwrap();
        let row = &rows[1];
        assert_eq!(row.street_id, StreetId(42));
        assert!(row.n_res.is_none() && row.n_jobs.is_none() && row.res_dens.is_none());
        assert!(row.job_dens.is_none() && row.building_height.is_none());
        assert_eq!(row.riders, [0.0; 3]);
        assert_eq!(row.retail_area, 0.0);
        assert_eq!(rows[0].riders, [1.0, 2.0, 3.0]);
        assert_eq!(rows[0].location, Some(Point::new(50.0, 100.0)));
    }

    #[test]
    fn applies_height_corrections_and_high_ped_flag() {
        let rows = assemble(&streets(), &aggregates(), &Corrections::default()).unwrap().rows().unwrap();
        assert_eq!(rows[2].street_id, StreetId(3120));
        assert_eq!(rows[2].building_height, Some(62.5));
        assert_eq!(rows[0].building_height, Some(30.0));
        assert!(rows[0].high_ped_type);
        assert!(!rows[1].high_ped_type && !rows[2].high_ped_type);
    }

    #[test]
    fn predictions_fill_only_unobserved_streets() {
        let mut table = assemble(&streets(), &aggregates(), &Corrections::default()).unwrap();
        table.fill_predictions(&[(StreetId(42), 3_500.0), (StreetId(5), 1.0)]).unwrap();

        let mean_ped = common::f64_values(table.frame(), "mean_ped").unwrap();
        assert_eq!(mean_ped, vec![Some(12_000.0), Some(3_500.0), Some(8_000.0)]);
        let source = common::str_values(table.frame(), "mean_ped_source").unwrap();
        assert_eq!(source[1].as_deref(), Some("predicted"));
        assert_eq!(source[0].as_deref(), Some("observed"));
    }
}
