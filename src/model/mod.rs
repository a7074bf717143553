//! Quasi-Poisson regression of street volumes and its diagnostics.

mod cv;
mod diagnostics;
mod glm;
mod linalg;
mod moran;
mod predictor;

pub use cv::{CvResult, cross_validate};
pub use diagnostics::{Diagnostics, diagnose};
pub use glm::QuasiPoissonModel;
pub use moran::{MoranResult, SpatialWeights, moran_test};
pub use predictor::{FIT_STATISTIC_MODEL, ModelSpec, POINT_MODEL, Predictor};
