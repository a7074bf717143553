//! Per-block and per-street feature construction.

mod assemble;
mod block;
mod overrides;
mod retail;
mod sensor;
mod street;
mod transit;

pub use assemble::{FeatureTable, ModelingRow, StreetAggregates, assemble};
pub use block::{Block, BlockLayer, BlockTable, build_blocks};
pub use overrides::{
    Corrections, EmployerOverride, BUILDING_HEIGHT_CORRECTIONS, EMPLOYER_BLOCK_OVERRIDES,
    HIGH_PED_CORRIDORS, STREET_JOB_OVERRIDE,
};
pub use retail::{ParcelLayer, RetailCategory, RetailFeatures, RETAIL_BUFFER, aggregate_retail};
pub use sensor::{SensorLayer, SensorReading, SensorSummary, aggregate_sensors, assign_sensors};
pub use street::{BlockFeatures, Street, StreetId, StreetLayer, VERTEX_BUFFER, aggregate_blocks};
pub(crate) use transit::points_of;
pub use transit::{
    RidershipFeatures, TransitMode, TransitStop, TransitStops, RIDERSHIP_RADII, TRANSIT_BUFFER,
    aggregate_ridership, transit_distance,
};
