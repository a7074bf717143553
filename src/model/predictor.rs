use ndarray::{Array1, Array2};

use crate::features::ModelingRow;

/// Covariates the regression can draw on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Predictor {
    LocalInteg,
    Jobs,
    Riders400,
    HighPedType,
}

impl Predictor {
    /// Column name in the feature table.
    pub fn name(&self) -> &'static str {
        match self {
            Self::LocalInteg => "local_integ",
            Self::Jobs => "n_jobs",
            Self::Riders400 => "riders_400",
            Self::HighPedType => "high_ped_type",
        }
    }

    pub fn value(&self, row: &ModelingRow) -> Option<f64> {
        match self {
            Self::LocalInteg => row.local_integ,
            Self::Jobs => row.n_jobs,
            Self::Riders400 => Some(row.riders[1]),
            Self::HighPedType => Some(if row.high_ped_type { 1.0 } else { 0.0 }),
        }
    }
}

/// A fixed predictor set and how the response is taken from `mean_ped`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelSpec {
    pub name: &'static str,
    pub predictors: &'static [Predictor],
    /// Round the response to whole counts before fitting.
    pub round_response: bool,
}

/// The model behind every reported prediction.
pub const POINT_MODEL: ModelSpec = ModelSpec {
    name: "point",
    predictors: &[Predictor::LocalInteg, Predictor::Jobs, Predictor::Riders400],
    round_response: true,
};

/// Unrounded variant with the corridor flag, used only for pseudo-R².
pub const FIT_STATISTIC_MODEL: ModelSpec = ModelSpec {
    name: "fit-statistic",
    predictors: &[Predictor::LocalInteg, Predictor::Jobs, Predictor::Riders400, Predictor::HighPedType],
    round_response: false,
};

impl ModelSpec {
    /// Number of coefficients, intercept included.
    #[inline] pub fn n_coefficients(&self) -> usize { self.predictors.len() + 1 }

    pub fn response(&self, row: &ModelingRow) -> Option<f64> {
        row.mean_ped.map(|y| if self.round_response { y.round() } else { y })
    }

    /// Design-matrix row: a leading 1 for the intercept, then the predictors.
    /// None if any predictor is missing.
    pub fn covariates(&self, row: &ModelingRow) -> Option<Vec<f64>> {
        std::iter::once(Some(1.0))
            .chain(self.predictors.iter().map(|predictor| predictor.value(row)))
            .collect()
    }

    /// Rows with a response and every predictor present.
    pub fn usable<'a>(&self, rows: &'a [ModelingRow]) -> Vec<&'a ModelingRow> {
        rows.iter()
            .filter(|row| self.response(row).is_some() && self.covariates(row).is_some())
            .collect()
    }

    /// Design matrix and response vector of usable rows.
    pub(crate) fn design(&self, rows: &[&ModelingRow]) -> (Array2<f64>, Array1<f64>) {
        let p = self.n_coefficients();
        let mut x = Array2::<f64>::zeros((rows.len(), p));
        let mut y = Array1::<f64>::zeros(rows.len());
        for (i, row) in rows.iter().enumerate() {
            if let Some(covariates) = self.covariates(row) {
                x.row_mut(i).assign(&Array1::from(covariates));
            }
            y[i] = self.response(row).unwrap_or(0.0);
        }
        (x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::row;

    #[test]
    fn rows_missing_a_predictor_are_unusable() {
        let mut incomplete = row(1, 1.0, 10.0, 5.0, Some(100.0));
        incomplete.local_integ = None;
        let rows = vec![incomplete, row(2, 1.0, 10.0, 5.0, Some(100.0)), row(3, 1.0, 10.0, 5.0, None)];

        let usable = POINT_MODEL.usable(&rows);
        assert_eq!(usable.len(), 1);
        assert_eq!(usable[0].street_id.0, 2);
    }

    #[test]
    fn only_the_point_model_rounds() {
        let row = row(3, 1.0, 10.0, 5.0, Some(100.6));
        assert_eq!(POINT_MODEL.response(&row), Some(101.0));
        assert_eq!(FIT_STATISTIC_MODEL.response(&row), Some(100.6));
        assert_eq!(FIT_STATISTIC_MODEL.covariates(&row), Some(vec![1.0, 1.0, 10.0, 5.0, 1.0]));
    }
}
