use anyhow::Result;
use rayon::prelude::*;

use crate::{
    PipelineError,
    features::{ModelingRow, StreetId},
    model::{ModelSpec, QuasiPoissonModel, diagnostics::errors},
};

/// Leave-one-out cross-validation outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct CvResult {
    /// Number of successful model fits, one per held-out row.
    pub fits: usize,
    /// Held-out street, its prediction, and its observed volume.
    pub predictions: Vec<(StreetId, f64, f64)>,
    /// Held-out streets whose training fold could not be fitted.
    /// They are left out of the error summary.
    pub failed: Vec<StreetId>,
    pub rmse: f64,
    pub mae: f64,
}

/// Training indices of each leave-one-out fold: every index except the held-out one.
pub(crate) fn folds(n: usize) -> impl IndexedParallelIterator<Item = (usize, Vec<usize>)> {
    (0..n).into_par_iter().map(move |held_out| (held_out, (0..n).filter(|&i| i != held_out).collect()))
}

/// Refit `spec` once per usable row with that row held out, and predict it.
///
/// A fold whose training rows give a singular design is recorded in
/// [`CvResult::failed`] instead of failing the whole run.
pub fn cross_validate(spec: ModelSpec, rows: &[ModelingRow]) -> Result<CvResult> {
    let usable = spec.usable(rows);

    let outcomes = folds(usable.len())
        .map(|(held_out, training)| -> Result<_> {
            let row = usable[held_out];
            let training = training.into_iter().map(|i| usable[i]).collect::<Vec<_>>();
            let model = match QuasiPoissonModel::fit_rows(spec, &training) {
                Ok(model) => model,
                Err(err) if matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::SingularFit(_))) => {
                    log::warn!("[model::cv] fold holding out street {} failed: {err}", row.street_id.0);
                    return Ok(Err(row.street_id))
                }
                Err(err) => return Err(err),
            };
            Ok(Ok((row.street_id, model.predict_row(row)?, row.mean_ped.unwrap_or_default())))
        })
        .collect::<Result<Vec<_>>>()?;

    let (mut predictions, mut failed) = (Vec::with_capacity(outcomes.len()), Vec::new());
    for outcome in outcomes {
        match outcome {
            Ok(prediction) => predictions.push(prediction),
            Err(street) => failed.push(street),
        }
    }
    if !failed.is_empty() {
        log::warn!("[model::cv] {} of {} folds failed and are excluded from the errors", failed.len(), usable.len());
    }

    let (rmse, mae) = errors(predictions.iter().map(|&(_, predicted, observed)| (predicted, observed)));
    log::info!("[model::cv] {} leave-one-out fits: RMSE {rmse:.1}, MAE {mae:.1}", predictions.len());
    Ok(CvResult { fits: predictions.len(), predictions, failed, rmse, mae })
}
