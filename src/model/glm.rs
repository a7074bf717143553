use anyhow::{Result, ensure};
use ndarray::{Array1, Array2, Axis, Zip};

use crate::{
    error::PipelineError,
    features::ModelingRow,
    model::{ModelSpec, linalg::Cholesky},
};

const MAX_ITERATIONS: usize = 25;
const TOLERANCE: f64 = 1e-8;

/// A log-link Poisson-family GLM with dispersion estimated from Pearson residuals.
#[derive(Debug, Clone)]
pub struct QuasiPoissonModel {
    spec: ModelSpec,
    coefficients: Array1<f64>,
    standard_errors: Array1<f64>,
    dispersion: f64,
    deviance: f64,
    null_deviance: f64,
    n_obs: usize,
    iterations: usize,
}

impl QuasiPoissonModel {
    /// Fit on the rows that carry a response and every predictor; the rest are skipped.
    pub fn fit(spec: ModelSpec, rows: &[ModelingRow]) -> Result<Self> {
        let usable = spec.usable(rows);
        let skipped = rows.len() - usable.len();
        if skipped > 0 {
            log::info!("[model::glm] {} model: {skipped} of {} rows lack a response or predictor", spec.name, rows.len());
        }
        Self::fit_rows(spec, &usable)
    }

    /// Fit by iteratively reweighted least squares on rows already known to be usable.
    pub(crate) fn fit_rows(spec: ModelSpec, rows: &[&ModelingRow]) -> Result<Self> {
        let (x, y) = spec.design(rows);
        let (n, p) = x.dim();
        if n <= p {
            return Err(PipelineError::singular(format!("{n} rows cannot identify {p} coefficients")).into());
        }
        ensure!(y.iter().all(|&v| v.is_finite() && v >= 0.0),
            "[model::glm] responses must be finite non-negative counts");

        let mut mu = y.mapv(|v| v + 0.1);
        let mut eta = mu.mapv(f64::ln);
        let mut deviance = poisson_deviance(&y, &mu);
        let mut coefficients = Array1::<f64>::zeros(p);
        let mut iterations = 0;
        let mut converged = false;

        while iterations < MAX_ITERATIONS {
            iterations += 1;
            let z = &eta + &((&y - &mu) / &mu);
            let (xtwx, xtwz) = weighted_normal_equations(&x, &mu, &z);
            coefficients = Cholesky::factor(&xtwx)?.solve(&xtwz);
            if coefficients.iter().any(|b| !b.is_finite()) {
                return Err(PipelineError::singular("coefficients diverged").into());
            }

            eta = x.dot(&coefficients);
            mu = eta.mapv(f64::exp);
            let previous = deviance;
            deviance = poisson_deviance(&y, &mu);
            if (deviance - previous).abs() / (deviance.abs() + 0.1) < TOLERANCE {
                converged = true;
                break;
            }
        }
        if !converged {
            log::warn!("[model::glm] {} model did not converge in {MAX_ITERATIONS} iterations", spec.name);
        }

        let pearson = Zip::from(&y).and(&mu).fold(0.0, |acc, &y, &mu| acc + (y - mu).powi(2) / mu);
        let dispersion = pearson / (n - p) as f64;
        let (xtwx, _) = weighted_normal_equations(&x, &mu, &eta);
        let standard_errors = Cholesky::factor(&xtwx)?.inverse_diagonal().mapv(|v| (dispersion * v).sqrt());

        let mean = y.mean().unwrap_or(0.0);
        let null_deviance = poisson_deviance(&y, &Array1::from_elem(n, mean));

        log::debug!("[model::glm] {} model: {n} rows, {iterations} iterations, deviance {deviance:.3}", spec.name);
        Ok(Self { spec, coefficients, standard_errors, dispersion, deviance, null_deviance, n_obs: n, iterations })
    }

    #[inline] pub fn spec(&self) -> &ModelSpec { &self.spec }

    /// Intercept first, then one coefficient per predictor.
    #[inline] pub fn coefficients(&self) -> &Array1<f64> { &self.coefficients }

    #[inline] pub fn standard_errors(&self) -> &Array1<f64> { &self.standard_errors }

    #[inline] pub fn dispersion(&self) -> f64 { self.dispersion }

    #[inline] pub fn deviance(&self) -> f64 { self.deviance }

    #[inline] pub fn null_deviance(&self) -> f64 { self.null_deviance }

    #[inline] pub fn n_obs(&self) -> usize { self.n_obs }

    #[inline] pub fn iterations(&self) -> usize { self.iterations }

    /// One minus the ratio of residual to null deviance.
    pub fn pseudo_r2(&self) -> f64 {
        if self.null_deviance > 0.0 { 1.0 - self.deviance / self.null_deviance } else { 0.0 }
    }

    /// Response-scale prediction for one row.
    pub fn predict_row(&self, row: &ModelingRow) -> Result<f64> {
        let covariates = self.spec.covariates(row).ok_or_else(|| anyhow::anyhow!(
            "[model::glm] street {} is missing a predictor of the {} model", row.street_id, self.spec.name))?;
        let eta = covariates.iter().zip(&self.coefficients).map(|(x, b)| x * b).sum::<f64>();
        Ok(eta.exp())
    }

    /// Response-scale predictions, whether or not the rows carry a response.
    pub fn predict(&self, rows: &[ModelingRow]) -> Result<Vec<f64>> {
        rows.iter().map(|row| self.predict_row(row)).collect()
    }

    /// Signed square roots of each row's contribution to the deviance.
    pub(crate) fn deviance_residuals(&self, rows: &[&ModelingRow]) -> Result<Vec<f64>> {
        rows.iter()
            .map(|row| -> Result<f64> {
                let y = self.spec.response(row).ok_or_else(|| anyhow::anyhow!(
                    "[model::glm] street {} has no observed volume", row.street_id))?;
                let mu = self.predict_row(row)?;
                Ok((y - mu).signum() * unit_deviance(y, mu).max(0.0).sqrt())
            })
            .collect()
    }
}

/// `XᵀWX` and `XᵀWz` for diagonal weights `w`.
fn weighted_normal_equations(x: &Array2<f64>, w: &Array1<f64>, z: &Array1<f64>) -> (Array2<f64>, Array1<f64>) {
    let weighted = x * &w.view().insert_axis(Axis(1));
    (weighted.t().dot(x), weighted.t().dot(z))
}

fn unit_deviance(y: f64, mu: f64) -> f64 {
    let log_term = if y > 0.0 { y * (y / mu).ln() } else { 0.0 };
    2.0 * (log_term - (y - mu))
}

fn poisson_deviance(y: &Array1<f64>, mu: &Array1<f64>) -> f64 {
    Zip::from(y).and(mu).fold(0.0, |acc, &y, &mu| acc + unit_deviance(y, mu))
}
