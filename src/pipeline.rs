use anyhow::{Context, Result};

use crate::{
    config::{AnalysisOptions, LayerSpec, ParcelSource, PipelineConfig},
    features::{
        BlockLayer, BlockTable, Corrections, FeatureTable, ParcelLayer, RetailCategory, SensorLayer,
        StreetAggregates, StreetId, StreetLayer, TransitStops,
        aggregate_blocks, aggregate_retail, aggregate_ridership, aggregate_sensors, assemble,
        assign_sensors, build_blocks, transit_distance,
    },
    geom::{Crs, FieldKind, GeometryTable, Layer, load_layer, load_table},
    io,
    model::{CvResult, Diagnostics, POINT_MODEL, QuasiPoissonModel, cross_validate, diagnose},
};

/// Every reference layer of a run, loaded, reprojected and clipped.
#[derive(Debug, Clone)]
pub struct PipelineInputs {
    pub streets: StreetLayer,
    pub blocks: BlockLayer,
    pub hubs: GeometryTable,
    pub stops: TransitStops,
    pub retail: ParcelLayer,
    pub food_beverage: ParcelLayer,
    pub sensors: SensorLayer,
}

impl PipelineInputs {
    /// Load every input named in `config`. Streets are clipped to the district and
    /// everything else to the extended study area.
    pub fn load(config: &PipelineConfig, corrections: &Corrections) -> Result<Self> {
        let target = Crs::from_epsg(config.target_epsg)?;
        let district = load_layer("district", &config.district, &[], &target)?;
        let study_area = load_layer("study_area", &config.study_area, &[], &target)?;
        let clipped = |name: &str, spec: &LayerSpec, fields: &[(&str, FieldKind)]| -> Result<Layer> {
            load_layer(name, spec, fields, &target)?.clip(&study_area)
        };

        let source = &config.streets;
        let streets = load_layer("streets", &source.layer, &[
            (source.id_field.as_str(), FieldKind::Number),
            (source.integration_field.as_str(), FieldKind::Number),
            (source.corridor_field.as_str(), FieldKind::Text),
        ], &target)?.clip(&district)?;
        let streets = StreetLayer::from_layer(&streets, &source.id_field, &source.integration_field, &source.corridor_field)?;
        log::info!("[pipeline] loaded {} streets", streets.len());

        let blocks = clipped("blocks", &config.blocks.layer, &[(config.blocks.id_field.as_str(), FieldKind::Text)])?;
        let population = load_table("population", &config.population.path, &[config.population.id_column.as_str()])?;
        let employment = load_table("employment", &config.employment.path, &[config.employment.id_column.as_str()])?;
        let buildings = clipped("buildings", &config.buildings.layer, &[(config.buildings.height_field.as_str(), FieldKind::Number)])?;
        let blocks = build_blocks(
            &blocks,
            &config.blocks.id_field,
            BlockTable { frame: &population, id_column: &config.population.id_column, value_column: &config.population.value_column },
            BlockTable { frame: &employment, id_column: &config.employment.id_column, value_column: &config.employment.value_column },
            &buildings,
            &config.buildings.height_field,
            &corrections.employer,
        )?;

        let hubs = clipped("transit_hubs", &config.transit_hubs, &[])?.geoms().clone();
        let mut stops = TransitStops::new(Vec::new(), target);
        for source in &config.ridership {
            let layer = clipped(&format!("ridership ({})", source.mode), &source.layer, &[
                (source.weekday_column.as_str(), FieldKind::Number),
                (source.saturday_column.as_str(), FieldKind::Number),
                (source.sunday_column.as_str(), FieldKind::Number),
            ])?;
            stops.push_layer(&layer, source.mode, &source.weekday_column, &source.saturday_column, &source.sunday_column)?;
        }
        log::info!("[pipeline] loaded {} transit hubs and {} ridership stops", hubs.len(), stops.len());

        let parcels = |name: &str, source: &ParcelSource, category| -> Result<ParcelLayer> {
            let layer = clipped(name, &source.layer, &[(source.area_field.as_str(), FieldKind::Number)])?;
            ParcelLayer::from_layer(&layer, &source.area_field, category)
        };
        let retail = parcels("retail", &config.retail, RetailCategory::Retail)?;
        let food_beverage = parcels("food_beverage", &config.food_beverage, RetailCategory::FoodBeverage)?;

        let sensors = clipped("sensors", &config.sensors.layer, &[(config.sensors.weekly_sum_column.as_str(), FieldKind::Number)])?;
        let sensors = SensorLayer::from_layer(&sensors, &config.sensors.weekly_sum_column)?;
        log::info!("[pipeline] loaded {} retail parcels, {} f&b parcels, {} sensors",
            retail.len(), food_beverage.len(), sensors.len());

        Ok(Self { streets, blocks, hubs, stops, retail, food_beverage, sensors })
    }
}

/// Results of one run: the filled feature table, the point model and its evaluation.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub table: FeatureTable,
    pub model: QuasiPoissonModel,
    pub diagnostics: Diagnostics,
    pub cross_validation: Option<CvResult>,
    /// Streets with an observed volume.
    pub observed: usize,
    /// Streets whose volume came from the model.
    pub predicted: usize,
    /// Streets left without a volume because a predictor is missing.
    pub unpredicted: usize,
}

/// Aggregate features onto the streets, fit the point model on sensor-equipped
/// streets and predict every other street with a complete predictor set.
pub fn estimate(inputs: &PipelineInputs, corrections: &Corrections, options: &AnalysisOptions) -> Result<PipelineOutput> {
    let streets = &inputs.streets;
    let assignment = assign_sensors(streets, &inputs.sensors)?;
    let aggregates = StreetAggregates {
        sensors: aggregate_sensors(streets, &inputs.sensors, &assignment),
        blocks: aggregate_blocks(streets, &inputs.blocks, &corrections.street_jobs)?,
        transit_distance: transit_distance(streets, &inputs.hubs)?,
        retail: aggregate_retail(streets, &inputs.retail, &inputs.food_beverage)?,
        ridership: aggregate_ridership(streets, &inputs.stops)?,
    };
    let mut table = assemble(streets, &aggregates, corrections)?;

    let (modeling, prediction) = table.partition()?;
    let model = QuasiPoissonModel::fit(POINT_MODEL, &modeling)
        .context("[pipeline] failed to fit the point model")?;
    let diagnostics = diagnose(&model, &modeling, options)?;
    let cross_validation = if options.cross_validate {
        Some(cross_validate(POINT_MODEL, &modeling)?)
    } else {
        None
    };

    let predicted = prediction.iter()
        .filter(|row| POINT_MODEL.covariates(row).is_some())
        .map(|row| -> Result<(StreetId, f64)> { Ok((row.street_id, model.predict_row(row)?)) })
        .collect::<Result<Vec<_>>>()?;
    let unpredicted = prediction.len() - predicted.len();
    if unpredicted > 0 {
        log::warn!("[pipeline] {unpredicted} streets lack a predictor and keep no volume estimate");
    }
    table.fill_predictions(&predicted)?;

    log_summary(&model, &diagnostics, cross_validation.as_ref());
    Ok(PipelineOutput {
        table, model, diagnostics, cross_validation,
        observed: modeling.len(), predicted: predicted.len(), unpredicted,
    })
}

fn log_summary(model: &QuasiPoissonModel, diagnostics: &Diagnostics, cv: Option<&CvResult>) {
    let names = std::iter::once("(intercept)").chain(model.spec().predictors.iter().map(|p| p.name()));
    for ((name, b), se) in names.zip(model.coefficients()).zip(model.standard_errors()) {
        log::info!("[pipeline] coefficient {name}: {b:.6} (se {se:.6})");
    }
    log::info!("[pipeline] {} training streets, dispersion {:.2}, pseudo-R² {:.3} ({} model), RMSE {:.1}, MAE {:.1}",
        diagnostics.n_obs, diagnostics.dispersion, diagnostics.pseudo_r2, diagnostics.pseudo_r2_model,
        diagnostics.rmse, diagnostics.mae);
    if let Some(moran) = &diagnostics.residual_moran {
        log::info!("[pipeline] residual Moran's I {:.4} (randomisation p {:.4}, permutation p {:.4})",
            moran.statistic, moran.p_randomization, moran.p_permutation);
    }
    if let Some(cv) = cv {
        log::info!("[pipeline] leave-one-out: {} fits ({} failed), RMSE {:.1}, MAE {:.1}",
            cv.fits, cv.failed.len(), cv.rmse, cv.mae);
    }
}

/// Load, estimate and write the per-street table to `config.output`.
pub fn run_pipeline(config: &PipelineConfig) -> Result<PipelineOutput> {
    let corrections = Corrections::default();
    let inputs = PipelineInputs::load(config, &corrections)?;
    let output = estimate(&inputs, &corrections, &config.analysis)?;

    let mut frame = output.table.frame().clone();
    io::write_csv(&mut frame, &config.output)?;
    log::info!("[pipeline] wrote {} streets to {}", frame.height(), config.output.display());
    Ok(output)
}
