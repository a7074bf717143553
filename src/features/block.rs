use anyhow::{Context, Result, ensure};
use geo::Area;
use polars::prelude::*;
use rayon::prelude::*;

use crate::{common, features::EmployerOverride, geom::{GeometryTable, Layer}};

/// A census block with its joined residents, jobs and building heights.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub geoid: String,
    pub population: u64,
    pub jobs: f64,
    /// Planar area in squared CRS units.
    pub area: f64,
    /// Sum and count of the non-zero building heights touching the block.
    pub height_sum: f64,
    pub height_count: usize,
}

impl Block {
    /// Residents per unit area; None for degenerate blocks.
    pub fn residential_density(&self) -> Option<f64> {
        (self.area > 0.0).then(|| self.population as f64 / self.area)
    }

    /// Jobs per unit area; None for degenerate blocks.
    pub fn job_density(&self) -> Option<f64> {
        (self.area > 0.0).then(|| self.jobs / self.area)
    }

    /// Mean building height, or None when no building with a recorded height touches the block.
    pub fn mean_height(&self) -> Option<f64> {
        (self.height_count > 0).then(|| self.height_sum / self.height_count as f64)
    }
}

/// Blocks paired index-for-index with their geometries.
#[derive(Debug, Clone)]
pub struct BlockLayer {
    blocks: Vec<Block>,
    geoms: GeometryTable,
}

impl BlockLayer {
    pub fn new(blocks: Vec<Block>, geoms: GeometryTable) -> Result<Self> {
        ensure!(blocks.len() == geoms.len(),
            "[features::block] {} blocks but {} geometries", blocks.len(), geoms.len());
        Ok(Self { blocks, geoms })
    }

    #[inline] pub fn blocks(&self) -> &[Block] { &self.blocks }

    #[inline] pub fn geoms(&self) -> &GeometryTable { &self.geoms }

    #[inline] pub fn len(&self) -> usize { self.blocks.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.blocks.is_empty() }
}

/// A block-keyed attribute table and the columns to join on.
#[derive(Debug, Clone, Copy)]
pub struct BlockTable<'a> {
    pub frame: &'a DataFrame,
    pub id_column: &'a str,
    pub value_column: &'a str,
}

/// Left-join a block-keyed table onto the block ids, in block order.
/// Blocks the table does not mention come back as None.
fn join_block_values(ids: &[String], table: BlockTable) -> Result<Vec<Option<f64>>> {
    let base = DataFrame::new(vec![Column::new("geoid".into(), ids)])?
        .with_row_index("idx".into(), None)?;

    let mut right = table.frame.select([table.id_column, table.value_column])?;
    let keys = right.column(table.id_column)?.cast(&DataType::String)?;
    right.with_column(keys)?;

    let joined = base.left_join(&right, ["geoid"], [table.id_column])?
        .sort(["idx"], SortMultipleOptions::default())?;
    ensure!(joined.height() == ids.len(),
        "[features::block] duplicate block identifiers in column {:?}", table.id_column);

    common::f64_values(&joined, table.value_column)
}

/// Join population and employment onto census blocks, apply the employer override,
/// and attach building heights.
///
/// Missing population or employment counts as zero. Building heights of exactly zero
/// are a data-quality sentinel and never enter an average.
pub fn build_blocks(
    layer: &Layer,
    id_field: &str,
    population: BlockTable,
    employment: BlockTable,
    buildings: &Layer,
    height_field: &str,
    employer: &EmployerOverride,
) -> Result<BlockLayer> {
    ensure!(layer.crs() == buildings.crs(),
        "[features::block] blocks ({}) and buildings ({}) must share a CRS", layer.crs(), buildings.crs());

    let ids = layer.str_values(id_field)?.into_iter()
        .enumerate()
        .map(|(i, id)| id.with_context(|| format!("[features::block] block {i} has no {id_field}")))
        .collect::<Result<Vec<_>>>()?;

    let residents = join_block_values(&ids, population)?;
    let jobs = join_block_values(&ids, employment)?;
    let heights = buildings.f64_values(height_field)?;

    let blocks = (0..ids.len()).into_par_iter()
        .map(|i| {
            let shape = &layer.geoms().shapes()[i];

            let population = residents[i].unwrap_or(0.0);
            ensure!(population >= 0.0, "[features::block] block {} has negative population", ids[i]);

            let (height_sum, height_count) = buildings.geoms().within_distance(shape, 0.0).into_iter()
                .filter_map(|j| heights[j].filter(|h| h.is_finite() && *h > 0.0))
                .fold((0.0, 0), |(sum, count), h| (sum + h, count + 1));

            Ok(Block {
                geoid: ids[i].clone(),
                population: population.round() as u64,
                jobs: employer.jobs_for(&ids[i]).unwrap_or(jobs[i].unwrap_or(0.0)),
                area: shape.unsigned_area(),
                height_sum,
                height_count,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let overridden = blocks.iter().filter(|block| employer.jobs_for(&block.geoid).is_some()).count();
    log::info!("[features::block] built {} blocks ({} with employer override)", blocks.len(), overridden);

    BlockLayer::new(blocks, layer.geoms().clone())
}
