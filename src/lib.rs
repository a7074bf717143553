#![doc = "Street-level pedestrian volume estimation public API"]
mod common;
mod config;
mod error;
mod features;
mod geom;
mod io;
mod model;
mod pipeline;

#[doc(inline)]
pub use config::{
    AnalysisOptions, BlockSource, BuildingSource, LayerSpec, ParcelSource, PipelineConfig,
    RidershipSource, SensorSource, StreetSource, TableSource,
};

#[doc(inline)]
pub use error::PipelineError;

#[doc(inline)]
pub use geom::{Crs, FieldKind, LinearUnit, GeometryTable, Layer, Length, load_layer, load_table};

#[doc(inline)]
pub use features::{
    Block, BlockFeatures, BlockLayer, BlockTable, Corrections, EmployerOverride, FeatureTable, ModelingRow,
    ParcelLayer, RetailCategory, RetailFeatures, RidershipFeatures, SensorLayer, SensorReading,
    SensorSummary, Street, StreetAggregates, StreetId, StreetLayer, TransitMode, TransitStop,
    TransitStops,
    BUILDING_HEIGHT_CORRECTIONS, EMPLOYER_BLOCK_OVERRIDES, HIGH_PED_CORRIDORS,
    RETAIL_BUFFER, RIDERSHIP_RADII, STREET_JOB_OVERRIDE, TRANSIT_BUFFER, VERTEX_BUFFER,
    aggregate_blocks, aggregate_retail, aggregate_ridership, aggregate_sensors, assemble,
    assign_sensors, build_blocks, transit_distance,
};

#[doc(inline)]
pub use model::{
    CvResult, Diagnostics, ModelSpec, MoranResult, Predictor, QuasiPoissonModel, SpatialWeights,
    FIT_STATISTIC_MODEL, POINT_MODEL, cross_validate, diagnose, moran_test,
};

#[doc(inline)]
pub use pipeline::{PipelineInputs, PipelineOutput, estimate, run_pipeline};
