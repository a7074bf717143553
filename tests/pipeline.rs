use geo::{Geometry, Point, Rect, coord, line_string};
use pedvol::{
    AnalysisOptions, Block, BlockLayer, Corrections, Crs, GeometryTable, ParcelLayer, PipelineInputs,
    RetailCategory, SensorLayer, SensorReading, Street, StreetId, StreetLayer, TransitMode, TransitStop,
    TransitStops, estimate,
};

const CRS: Crs = Crs::PA_SOUTH_FT;

/// Sixty 100 ft segments on a 10 x 6 grid, each with its own block just north of it,
/// plus one stray segment far outside the covered area.
fn district() -> PipelineInputs {
    let cell = |i: usize| ((i % 10) as f64 * 200.0, (i / 10) as f64 * 200.0);

    let mut streets = Vec::new();
    let mut lines = Vec::new();
    for i in 0..60 {
        let (x, y) = cell(i);
        streets.push(Street {
            id: StreetId(i as i64 + 1),
            corridor_type: Some(if i % 4 == 0 { "Walkable Commercial Corridor" } else { "Local" }.into()),
            local_integ: Some(1.0 + ((i * 7) % 9) as f64 * 0.2),
        });
        lines.push(Geometry::LineString(line_string![(x: x, y: y), (x: x + 100.0, y: y)]));
    }
    streets.push(Street { id: StreetId(61), corridor_type: None, local_integ: Some(1.0) });
    lines.push(Geometry::LineString(line_string![(x: 50_000.0, y: 50_000.0), (x: 50_100.0, y: 50_000.0)]));
    let streets = StreetLayer::new(streets, GeometryTable::new(lines, CRS)).unwrap();

    let (blocks, shapes): (Vec<_>, Vec<_>) = (0..60)
        .map(|i| {
            let (x, y) = cell(i);
            let block = Block {
                geoid: format!("42101{i:010}"),
                population: 50 * (i % 5) as u64,
                jobs: ((i * 37) % 11) as f64 * 100.0,
                area: 10_000.0,
                height_sum: 40.0,
                height_count: 1,
            };
            let shape = Geometry::Polygon(Rect::new(coord! { x: x, y: y + 3.0 }, coord! { x: x + 100.0, y: y + 103.0 }).to_polygon());
            (block, shape)
        })
        .unzip();
    let blocks = BlockLayer::new(blocks, GeometryTable::new(shapes, CRS)).unwrap();

    let stops = (0..60)
        .map(|i| {
            let (x, y) = cell(i);
            let mode = if i % 3 == 0 { TransitMode::Subway } else { TransitMode::Bus };
            TransitStop::from_counts(Point::new(x + 50.0, y - 30.0), mode, Some(((i * 13) % 17) as f64 * 20.0), Some(10.0), None)
        })
        .collect();
    let hubs = GeometryTable::new(vec![
        Geometry::Point(Point::new(0.0, 0.0)),
        Geometry::Point(Point::new(1_000.0, 600.0)),
    ], CRS);

    let retail = ParcelLayer::new(RetailCategory::Retail, vec![2_000.0],
        GeometryTable::new(vec![Geometry::Point(Point::new(50.0, -20.0))], CRS)).unwrap();
    let food_beverage = ParcelLayer::new(RetailCategory::FoodBeverage, Vec::new(), GeometryTable::new(Vec::new(), CRS)).unwrap();

    // Sensors 2 ft south of every even segment, and one unrecorded sensor on segment 2.
    let mut readings = (0..60)
        .filter(|i| i % 2 == 0)
        .map(|i| {
            let (x, y) = cell(i);
            let integ = 1.0 + ((i * 7) % 9) as f64 * 0.2;
            let jobs = ((i * 37) % 11) as f64 * 100.0;
            let noise = 1.0 + 0.04 * ((i % 5) as f64 - 2.0);
            let weekly = (7.0 + 0.3 * integ + 0.0003 * jobs).exp() * noise;
            SensorReading { location: Point::new(x + 50.0, y - 2.0), weekly_sum: Some(weekly) }
        })
        .collect::<Vec<_>>();
    readings.push(SensorReading { location: Point::new(250.0, -2.0), weekly_sum: None });
    let sensors = SensorLayer::new(readings, CRS);

    PipelineInputs { streets, blocks, hubs, stops: TransitStops::new(stops, CRS), retail, food_beverage, sensors }
}

#[test]
fn estimates_every_street_with_complete_covariates() {
    let options = AnalysisOptions { moran_permutations: 99, ..AnalysisOptions::default() };
    let output = estimate(&district(), &Corrections::default(), &options).unwrap();

    assert_eq!(output.table.len(), 61);
    assert_eq!(output.diagnostics.n_obs, 30);
    assert_eq!(output.observed, 30);
    assert_eq!(output.predicted, 30);
    assert_eq!(output.unpredicted, 1);

    let rows = output.table.rows().unwrap();
    for row in &rows[..60] {
        let volume = row.mean_ped.unwrap();
        assert!(volume.is_finite() && volume >= 0.0);
    }

    // The stray segment touches no block, so its job count and volume stay missing.
    let stray = &rows[60];
    assert_eq!(stray.street_id, StreetId(61));
    assert!(stray.n_jobs.is_none() && stray.res_dens.is_none() && stray.mean_ped.is_none());
    assert_eq!(stray.riders, [0.0; 3]);

    // Segment 2 has a sensor without a recorded sum, so its volume is predicted.
    assert_eq!(rows[1].street_id, StreetId(2));
    let sources = output.table.frame().column("mean_ped_source").unwrap().str().unwrap()
        .into_iter()
        .map(|source| source.map(String::from))
        .collect::<Vec<_>>();
    assert_eq!(sources[0].as_deref(), Some("observed"));
    assert_eq!(sources[1].as_deref(), Some("predicted"));
    assert_eq!(sources[60], None);
    assert_eq!(sources.iter().filter(|s| s.as_deref() == Some("observed")).count(), 30);
}

#[test]
fn reports_diagnostics_and_cross_validation() {
    let options = AnalysisOptions { moran_permutations: 99, ..AnalysisOptions::default() };
    let output = estimate(&district(), &Corrections::default(), &options).unwrap();

    let d = &output.diagnostics;
    assert!(d.pseudo_r2 > 0.0 && d.pseudo_r2 <= 1.0);
    assert!(d.rmse >= d.mae);
    assert!(d.residual_moran.is_some());

    let cv = output.cross_validation.unwrap();
    assert_eq!(cv.fits, 30);
    assert_eq!(cv.predictions.len(), 30);
    assert!(cv.failed.is_empty());
    assert!(cv.rmse.is_finite());
}

#[test]
fn cross_validation_can_be_switched_off() {
    let options = AnalysisOptions { moran_permutations: 9, cross_validate: false, ..AnalysisOptions::default() };
    let output = estimate(&district(), &Corrections::default(), &options).unwrap();
    assert!(output.cross_validation.is_none());
}
