use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::features::TransitMode;

/// Where to find one vector layer and how to interpret it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSpec {
    /// `.shp` for vector layers, `.csv` for point tables.
    pub path: PathBuf,
    /// Source CRS. Shapefiles may leave this out and rely on their `.prj`.
    #[serde(default)]
    pub epsg: Option<u32>,
    /// Coordinate columns of point tables.
    #[serde(default = "default_x")]
    pub x_column: String,
    #[serde(default = "default_y")]
    pub y_column: String,
}

/// A plain attribute table keyed by block identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSource {
    pub path: PathBuf,
    #[serde(default = "default_geoid")]
    pub id_column: String,
    pub value_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockSource {
    pub layer: LayerSpec,
    #[serde(default = "default_block_id")]
    pub id_field: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildingSource {
    pub layer: LayerSpec,
    #[serde(default = "default_height")]
    pub height_field: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreetSource {
    pub layer: LayerSpec,
    #[serde(default = "default_street_id")]
    pub id_field: String,
    #[serde(default = "default_integration")]
    pub integration_field: String,
    #[serde(default = "default_corridor")]
    pub corridor_field: String,
}

/// One ridership table: boarding counts per stop for a single mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RidershipSource {
    pub layer: LayerSpec,
    pub mode: TransitMode,
    #[serde(default = "default_weekday")]
    pub weekday_column: String,
    #[serde(default = "default_saturday")]
    pub saturday_column: String,
    #[serde(default = "default_sunday")]
    pub sunday_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParcelSource {
    pub layer: LayerSpec,
    #[serde(default = "default_leasable_area")]
    pub area_field: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorSource {
    pub layer: LayerSpec,
    #[serde(default = "default_weekly_sum")]
    pub weekly_sum_column: String,
}

/// Knobs for the regression diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOptions {
    /// Neighbours per street in the Moran's I weights.
    #[serde(default = "default_neighbors")]
    pub moran_neighbors: usize,
    /// Permutations behind the resampling p-value.
    #[serde(default = "default_permutations")]
    pub moran_permutations: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_true")]
    pub cross_validate: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            moran_neighbors: default_neighbors(),
            moran_permutations: default_permutations(),
            seed: default_seed(),
            cross_validate: true,
        }
    }
}

/// The run manifest: every input of one pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Working CRS; all distances are measured in its linear unit.
    #[serde(default = "default_target_epsg")]
    pub target_epsg: u32,
    pub district: LayerSpec,
    pub study_area: LayerSpec,
    pub blocks: BlockSource,
    pub population: TableSource,
    pub employment: TableSource,
    pub buildings: BuildingSource,
    pub streets: StreetSource,
    pub transit_hubs: LayerSpec,
    pub ridership: Vec<RidershipSource>,
    pub retail: ParcelSource,
    pub food_beverage: ParcelSource,
    pub sensors: SensorSource,
    #[serde(default = "default_output")]
    pub output: PathBuf,
    #[serde(default)]
    pub analysis: AnalysisOptions,
}

impl PipelineConfig {
    /// Read a manifest from JSON. Relative paths are resolved against the manifest's directory.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("[config] Failed to read config: {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&text)
            .with_context(|| format!("[config] Failed to parse config: {}", path.display()))?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| if path.is_relative() { *path = base.join(&*path) };

        resolve(&mut self.district.path);
        resolve(&mut self.study_area.path);
        resolve(&mut self.blocks.layer.path);
        resolve(&mut self.population.path);
        resolve(&mut self.employment.path);
        resolve(&mut self.buildings.layer.path);
        resolve(&mut self.streets.layer.path);
        resolve(&mut self.transit_hubs.path);
        self.ridership.iter_mut().for_each(|source| resolve(&mut source.layer.path));
        resolve(&mut self.retail.layer.path);
        resolve(&mut self.food_beverage.layer.path);
        resolve(&mut self.sensors.layer.path);
        resolve(&mut self.output);
    }
}

fn default_x() -> String { "x".into() }
fn default_y() -> String { "y".into() }
fn default_geoid() -> String { "GEOID".into() }
fn default_block_id() -> String { "GEOID20".into() }
fn default_height() -> String { "MAX_HEIGHT".into() }
fn default_street_id() -> String { "streetID".into() }
fn default_integration() -> String { "LocalInteg".into() }
fn default_corridor() -> String { "CORRIDOR".into() }
fn default_weekday() -> String { "weekday".into() }
fn default_saturday() -> String { "saturday".into() }
fn default_sunday() -> String { "sunday".into() }
fn default_leasable_area() -> String { "LEASABLE_AREA".into() }
fn default_weekly_sum() -> String { "weekly_sum".into() }
fn default_neighbors() -> usize { 6 }
fn default_permutations() -> usize { 999 }
fn default_seed() -> u64 { 20190601 }
fn default_true() -> bool { true }
fn default_target_epsg() -> u32 { 2272 }
fn default_output() -> PathBuf { "street_volumes.csv".into() }
