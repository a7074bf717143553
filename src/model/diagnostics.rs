use anyhow::Result;
use geo::Point;

use crate::{
    config::AnalysisOptions,
    features::ModelingRow,
    model::{FIT_STATISTIC_MODEL, MoranResult, QuasiPoissonModel, SpatialWeights, moran_test},
};

/// Fit statistics of a point model on its training rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostics {
    pub n_obs: usize,
    pub pseudo_r2: f64,
    /// Name of the model the pseudo-R² was taken from.
    pub pseudo_r2_model: &'static str,
    pub rmse: f64,
    pub mae: f64,
    pub dispersion: f64,
    /// Moran's I of the deviance residuals; None when too few located rows.
    pub residual_moran: Option<MoranResult>,
}

/// Root mean squared and mean absolute error.
pub(crate) fn errors(pairs: impl Iterator<Item = (f64, f64)>) -> (f64, f64) {
    let (mut sq, mut abs, mut n) = (0.0, 0.0, 0usize);
    for (predicted, observed) in pairs {
        sq += (predicted - observed).powi(2);
        abs += (predicted - observed).abs();
        n += 1;
    }
    if n == 0 { return (f64::NAN, f64::NAN) }
    ((sq / n as f64).sqrt(), abs / n as f64)
}

/// Evaluate `model` on the rows it was trained on.
///
/// Pseudo-R² comes from the unrounded fit-statistic model refitted on the same rows,
/// falling back to the point model when that refit fails. Errors compare fitted
/// values with the observed mean volumes.
pub fn diagnose(model: &QuasiPoissonModel, rows: &[ModelingRow], options: &AnalysisOptions) -> Result<Diagnostics> {
    let usable = model.spec().usable(rows);

    let (pseudo_r2, pseudo_r2_model) = match QuasiPoissonModel::fit(FIT_STATISTIC_MODEL, rows) {
        Ok(secondary) => (secondary.pseudo_r2(), FIT_STATISTIC_MODEL.name),
        Err(err) => {
            log::warn!("[model::diagnostics] {} model failed ({err}); reporting the {} model's pseudo-R²",
                FIT_STATISTIC_MODEL.name, model.spec().name);
            (model.pseudo_r2(), model.spec().name)
        }
    };

    let fitted = usable.iter().map(|row| model.predict_row(row)).collect::<Result<Vec<_>>>()?;
    let (rmse, mae) = errors(fitted.iter().copied().zip(usable.iter().filter_map(|row| row.mean_ped)));

    let located = usable.iter().filter_map(|row| row.location.map(|point| (*row, point))).collect::<Vec<_>>();
    let residual_moran = if located.len() > options.moran_neighbors && located.len() >= 4 {
        let (rows, points): (Vec<&ModelingRow>, Vec<Point<f64>>) = located.into_iter().unzip();
        let residuals = model.deviance_residuals(&rows)?;
        let weights = SpatialWeights::knn(&points, options.moran_neighbors)?;
        match moran_test(&residuals, &weights, options.moran_permutations, options.seed) {
            Ok(result) => Some(result),
            Err(err) => {
                log::warn!("[model::diagnostics] residual Moran's I skipped: {err}");
                None
            }
        }
    } else {
        log::warn!("[model::diagnostics] residual Moran's I skipped: {} located rows for {} neighbours",
            located.len(), options.moran_neighbors);
        None
    };

    Ok(Diagnostics {
        n_obs: usable.len(),
        pseudo_r2,
        pseudo_r2_model,
        rmse,
        mae,
        dispersion: model.dispersion(),
        residual_moran,
    })
}
