use anyhow::{Result, ensure};
use geo::{Geometry, Point};
use rayon::prelude::*;
use smallvec::SmallVec;

use crate::{
    error::PipelineError,
    features::{Block, BlockLayer},
    geom::{self, GeometryTable, Layer, Length},
};

/// Radius of the buffer around each street vertex used to find touching blocks.
pub const VERTEX_BUFFER: Length = Length::Feet(5.0);

/// Street segment identifier, unique within a district.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreetId(pub i64);

impl std::fmt::Display for StreetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Attributes a street segment carries from its source layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Street {
    pub id: StreetId,
    pub corridor_type: Option<String>,
    /// Space-syntax local integration.
    pub local_integ: Option<f64>,
}

/// Street segments sorted by ascending id, paired index-for-index with their geometries.
#[derive(Debug, Clone)]
pub struct StreetLayer {
    streets: Vec<Street>,
    geoms: GeometryTable,
}

impl StreetLayer {
    /// Sort streets by id and check the ids are unique.
    pub fn new(streets: Vec<Street>, geoms: GeometryTable) -> Result<Self> {
        ensure!(streets.len() == geoms.len(),
            "[features::street] {} streets but {} geometries", streets.len(), geoms.len());

        let mut order = (0..streets.len()).collect::<Vec<_>>();
        order.sort_by_key(|&i| streets[i].id);
        if let Some(pair) = order.windows(2).find(|pair| streets[pair[0]].id == streets[pair[1]].id) {
            return Err(PipelineError::layer_load("streets", format!("duplicate street id {}", streets[pair[0]].id)).into());
        }

        let geoms = geoms.permute(&order);
        let mut streets = streets.into_iter().map(Some).collect::<Vec<_>>();
        let streets = order.iter().filter_map(|&i| streets[i].take()).collect();
        Ok(Self { streets, geoms })
    }

    /// Read streets from a loaded layer.
    pub fn from_layer(layer: &Layer, id_field: &str, integration_field: &str, corridor_field: &str) -> Result<Self> {
        let ids = layer.f64_values(id_field)?;
        let integration = layer.f64_values(integration_field)?;
        let corridors = layer.str_values(corridor_field)?;

        let streets = ids.into_iter().zip(integration).zip(corridors).enumerate()
            .map(|(row, ((id, local_integ), corridor_type))| match id {
                Some(id) if id.fract() == 0.0 => Ok(Street { id: StreetId(id as i64), corridor_type, local_integ }),
                _ => Err(PipelineError::layer_load("streets", format!("row {row} has no integer {id_field}"))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(streets, layer.geoms().clone())
    }

    #[inline] pub fn streets(&self) -> &[Street] { &self.streets }

    #[inline] pub fn geoms(&self) -> &GeometryTable { &self.geoms }

    #[inline] pub fn len(&self) -> usize { self.streets.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.streets.is_empty() }

    /// Position of a street in the layer.
    pub fn position(&self, id: StreetId) -> Option<usize> {
        self.streets.binary_search_by_key(&id, |street| street.id).ok()
    }

    /// Midpoint of every street, in layer order.
    pub fn midpoints(&self) -> Vec<Option<Point<f64>>> {
        self.geoms.shapes().iter().map(geom::midpoint).collect()
    }
}

/// Block-derived features of one street. Every field is None when the street
/// touches no block, which is distinct from touching blocks that hold zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BlockFeatures {
    pub n_res: Option<f64>,
    pub n_jobs: Option<f64>,
    pub res_dens: Option<f64>,
    pub job_dens: Option<f64>,
    pub building_height: Option<f64>,
}

impl BlockFeatures {
    /// Aggregate over the blocks a street touches. Densities are totals over the
    /// combined footprint, not averages of per-block densities.
    fn from_blocks<'a>(blocks: impl IntoIterator<Item = &'a Block>) -> Self {
        let mut touched = false;
        let (mut population, mut jobs, mut area, mut height_sum, mut height_count) = (0.0, 0.0, 0.0, 0.0, 0usize);
        for block in blocks {
            touched = true;
            population += block.population as f64;
            jobs += block.jobs;
            area += block.area;
            height_sum += block.height_sum;
            height_count += block.height_count;
        }
        if !touched { return Self::default() }

        Self {
            n_res: Some(population),
            n_jobs: Some(jobs),
            res_dens: (area > 0.0).then(|| population / area),
            job_dens: (area > 0.0).then(|| jobs / area),
            building_height: (height_count > 0).then(|| height_sum / height_count as f64),
        }
    }
}

/// Aggregate block features onto every street through 5 ft buffers around its vertices.
///
/// Blocks hit by several vertex buffers are counted once per hit. `street_jobs` then
/// hard-sets the job count of the listed streets.
pub fn aggregate_blocks(streets: &StreetLayer, blocks: &BlockLayer, street_jobs: &[(StreetId, f64)]) -> Result<Vec<BlockFeatures>> {
    let crs = streets.geoms().crs();
    ensure!(crs == blocks.geoms().crs(),
        "[features::street] streets ({crs}) and blocks ({}) must share a CRS", blocks.geoms().crs());
    let radius = VERTEX_BUFFER.to_crs_units(&crs)?;

    let mut features = streets.geoms().shapes().par_iter()
        .map(|shape| {
            let hits = geom::vertices(shape).into_iter()
                .flat_map(|vertex| blocks.geoms().within_distance(&Geometry::Point(vertex), radius))
                .collect::<SmallVec<[usize; 8]>>();
            BlockFeatures::from_blocks(hits.iter().map(|&i| &blocks.blocks()[i]))
        })
        .collect::<Vec<_>>();

    let uncovered = features.iter().filter(|f| f.n_res.is_none()).count();
    if uncovered > 0 {
        log::warn!("[features::street] {uncovered} of {} streets touch no block; their block features are missing", streets.len());
    }

    for &(id, jobs) in street_jobs {
        match streets.position(id) {
            Some(i) => features[i].n_jobs = Some(jobs),
            None => log::warn!("[features::street] job override for street {id} skipped: street not in layer"),
        }
    }

    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Crs;
    use approx::assert_relative_eq;
    use geo::{Rect, coord, line_string};

    fn block(geoid: &str, population: u64, jobs: f64, area: f64, heights: (f64, usize)) -> Block {
        Block { geoid: geoid.into(), population, jobs, area, height_sum: heights.0, height_count: heights.1 }
    }

    /// A: 10x10 with 100 residents. B: 30x10 with 30 residents, sharing the edge x = 10.
    fn two_blocks() -> BlockLayer {
        let shapes = vec![
            Geometry::Polygon(Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 10.0, y: 10.0 }).to_polygon()),
            Geometry::Polygon(Rect::new(coord! { x: 10.0, y: 0.0 }, coord! { x: 40.0, y: 10.0 }).to_polygon()),
        ];
        BlockLayer::new(
            vec![block("A", 100, 50.0, 100.0, (60.0, 2)), block("B", 30, 0.0, 300.0, (20.0, 1))],
            GeometryTable::new(shapes, Crs::PA_SOUTH_FT),
        ).unwrap()
    }

    fn streets(lines: Vec<(i64, Geometry<f64>)>) -> StreetLayer {
        let (streets, shapes): (Vec<_>, Vec<_>) = lines.into_iter()
            .map(|(id, shape)| (Street { id: StreetId(id), corridor_type: None, local_integ: Some(1.0) }, shape))
            .unzip();
        StreetLayer::new(streets, GeometryTable::new(shapes, Crs::PA_SOUTH_FT)).unwrap()
    }

    #[test]
    fn density_is_over_the_combined_footprint() {
        let layer = streets(vec![(1, Geometry::LineString(line_string![(x: 10.0, y: 0.0), (x: 10.0, y: 10.0)]))]);
        let features = aggregate_blocks(&layer, &two_blocks(), &[]).unwrap();

        let unioned = features[0].res_dens.unwrap();
        let naive = (100.0 / 100.0 + 30.0 / 300.0) / 2.0;
        assert_relative_eq!(unioned, 130.0 / 400.0);
        assert!((unioned - naive).abs() > 0.1);
    }

    #[test]
    fn repeated_hits_count_each_time() {
        // Both endpoints touch both blocks.
        let layer = streets(vec![(1, Geometry::LineString(line_string![(x: 10.0, y: 0.0), (x: 10.0, y: 10.0)]))]);
        let features = aggregate_blocks(&layer, &two_blocks(), &[]).unwrap();
        assert_eq!(features[0].n_res, Some(260.0));
        assert_eq!(features[0].n_jobs, Some(100.0));
        assert_relative_eq!(features[0].building_height.unwrap(), 80.0 / 3.0);
    }

    #[test]
    fn vertex_buffers_reach_five_feet() {
        // Endpoint 4 ft below block A, other endpoint far away.
        let layer = streets(vec![(1, Geometry::LineString(line_string![(x: 5.0, y: -4.0), (x: 5.0, y: -500.0)]))]);
        let features = aggregate_blocks(&layer, &two_blocks(), &[]).unwrap();
        assert_eq!(features[0].n_res, Some(100.0));
        assert_eq!(features[0].job_dens, Some(0.5));
    }

    #[test]
    fn streets_outside_the_blocks_are_missing_not_zero() {
        let layer = streets(vec![(7, Geometry::LineString(line_string![(x: 500.0, y: 500.0), (x: 600.0, y: 500.0)]))]);
        let features = aggregate_blocks(&layer, &two_blocks(), &[]).unwrap();
        assert_eq!(features[0], BlockFeatures::default());
        assert!(features[0].n_res.is_none() && features[0].res_dens.is_none() && features[0].building_height.is_none());
    }

    #[test]
    fn street_job_override_is_hard_set() {
        let layer = streets(vec![
            (2207, Geometry::LineString(line_string![(x: 5.0, y: 5.0), (x: 6.0, y: 5.0)])),
            (1, Geometry::LineString(line_string![(x: 20.0, y: 5.0), (x: 30.0, y: 5.0)])),
        ]);
        let features = aggregate_blocks(&layer, &two_blocks(), &[(StreetId(2207), 5_400.0)]).unwrap();
        assert_eq!(layer.streets()[1].id, StreetId(2207));
        assert_eq!(features[1].n_jobs, Some(5_400.0));
        assert_eq!(features[0].n_jobs, Some(0.0));
    }

    #[test]
    fn streets_are_sorted_and_unique() {
        let line = || Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)]);
        let layer = streets(vec![(9, line()), (3, line()), (5, line())]);
        let ids = layer.streets().iter().map(|s| s.id.0).collect::<Vec<_>>();
        assert_eq!(ids, vec![3, 5, 9]);
        assert_eq!(layer.position(StreetId(5)), Some(1));

        let dup = StreetLayer::new(
            vec![
                Street { id: StreetId(1), corridor_type: None, local_integ: None },
                Street { id: StreetId(1), corridor_type: None, local_integ: None },
            ],
            GeometryTable::new(vec![line(), line()], Crs::PA_SOUTH_FT),
        );
        assert!(matches!(dup.unwrap_err().downcast_ref::<PipelineError>(), Some(PipelineError::LayerLoad { .. })));
    }
}
