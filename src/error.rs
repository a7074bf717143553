use thiserror::Error;

/// Failure classes a pipeline run distinguishes between.
///
/// Library functions return `anyhow::Result` and raise these through `?`,
/// so callers recover the class with `err.downcast_ref::<PipelineError>()`.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing or malformed source, or a source without a usable CRS.
    #[error("failed to load layer `{layer}`: {reason}")]
    LayerLoad { layer: String, reason: String },

    /// A join that requires at least one reference feature found none.
    #[error("cannot join `{feature}`: no `{reference}` features to compare against")]
    SpatialJoinAmbiguity { feature: String, reference: String },

    /// Collinear or degenerate design matrix, or a fit that did not produce finite estimates.
    #[error("singular fit: {0}")]
    SingularFit(String),
}

impl PipelineError {
    pub(crate) fn layer_load(layer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LayerLoad { layer: layer.into(), reason: reason.into() }
    }

    pub(crate) fn ambiguity(feature: impl Into<String>, reference: impl Into<String>) -> Self {
        Self::SpatialJoinAmbiguity { feature: feature.into(), reference: reference.into() }
    }

    pub(crate) fn singular(reason: impl Into<String>) -> Self {
        Self::SingularFit(reason.into())
    }
}
