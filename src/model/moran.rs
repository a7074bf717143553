use ahash::AHashMap;
use anyhow::{Result, ensure};
use geo::Point;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use rstar::{RTree, primitives::GeomWithData};
use smallvec::SmallVec;

/// Row-standardised k-nearest-neighbour weights.
#[derive(Debug, Clone)]
pub struct SpatialWeights {
    neighbors: Vec<SmallVec<[usize; 8]>>,
}

impl SpatialWeights {
    /// Each point's `k` nearest other points, each with weight `1 / k`.
    pub fn knn(points: &[Point<f64>], k: usize) -> Result<Self> {
        ensure!(k > 0, "[model::moran] need at least one neighbour");
        ensure!(points.len() > k, "[model::moran] {} points cannot have {k} neighbours each", points.len());

        let tree = RTree::bulk_load(points.iter().enumerate()
            .map(|(i, point)| GeomWithData::new([point.x(), point.y()], i))
            .collect());

        let neighbors = points.iter().enumerate()
            .map(|(i, point)| tree.nearest_neighbor_iter(&[point.x(), point.y()])
                .map(|neighbor| neighbor.data)
                .filter(|&j| j != i)
                .take(k)
                .collect())
            .collect();
        Ok(Self { neighbors })
    }

    #[inline] pub fn len(&self) -> usize { self.neighbors.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.neighbors.is_empty() }

    #[inline] pub fn neighbors(&self, i: usize) -> &[usize] { &self.neighbors[i] }

    #[inline]
    fn weight(&self, i: usize) -> f64 { 1.0 / self.neighbors[i].len() as f64 }

    /// `Σᵢ zᵢ Σⱼ wᵢⱼ zⱼ`
    fn cross_product(&self, z: &[f64]) -> f64 {
        self.neighbors.iter().enumerate()
            .map(|(i, row)| z[i] * self.weight(i) * row.iter().map(|&j| z[j]).sum::<f64>())
            .sum()
    }

    /// The S0, S1, S2 weight sums of the moment formulas.
    fn sums(&self) -> (f64, f64, f64) {
        let mut entries = AHashMap::with_capacity(self.neighbors.iter().map(|row| row.len()).sum());
        for (i, row) in self.neighbors.iter().enumerate() {
            for &j in row {
                *entries.entry((i, j)).or_insert(0.0) += self.weight(i);
            }
        }

        let s0 = entries.values().sum::<f64>();
        let s1 = 0.5 * entries.iter()
            .map(|(&(i, j), &w)| match entries.get(&(j, i)) {
                Some(&back) => (w + back).powi(2),
                None => 2.0 * w * w,
            })
            .sum::<f64>();

        let mut col_sums = vec![0.0; self.len()];
        for (&(_, j), &w) in &entries {
            col_sums[j] += w;
        }
        let s2 = (0..self.len())
            .map(|i| (self.neighbors[i].iter().map(|_| self.weight(i)).sum::<f64>() + col_sums[i]).powi(2))
            .sum();
        (s0, s1, s2)
    }
}

/// Moran's I of a set of values with one-sided ("greater") p-values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoranResult {
    pub statistic: f64,
    pub expected: f64,
    /// Variance under the randomisation assumption.
    pub variance: f64,
    pub z_score: f64,
    /// Normal approximation under randomisation.
    pub p_randomization: f64,
    /// Share of random relabellings at least as extreme, counting the observed one.
    pub p_permutation: f64,
    pub permutations: usize,
}

fn statistic(weights: &SpatialWeights, z: &[f64], s0: f64, sum_sq: f64) -> f64 {
    z.len() as f64 / s0 * weights.cross_product(z) / sum_sq
}

/// Test `values` for spatial autocorrelation under `weights`.
pub fn moran_test(values: &[f64], weights: &SpatialWeights, permutations: usize, seed: u64) -> Result<MoranResult> {
    let n = values.len();
    ensure!(n == weights.len(), "[model::moran] {n} values but {} weighted points", weights.len());
    ensure!(n >= 4, "[model::moran] need at least four values, got {n}");

    let mean = values.iter().sum::<f64>() / n as f64;
    let z = values.iter().map(|v| v - mean).collect::<Vec<_>>();
    let sum_sq = z.iter().map(|v| v * v).sum::<f64>();
    ensure!(sum_sq > 0.0, "[model::moran] values are constant");

    let (s0, s1, s2) = weights.sums();
    let observed = statistic(weights, &z, s0, sum_sq);

    let nf = n as f64;
    let expected = -1.0 / (nf - 1.0);
    let kurtosis = nf * z.iter().map(|v| v.powi(4)).sum::<f64>() / sum_sq.powi(2);
    let variance = (nf * ((nf * nf - 3.0 * nf + 3.0) * s1 - nf * s2 + 3.0 * s0 * s0)
        - kurtosis * ((nf * nf - nf) * s1 - 2.0 * nf * s2 + 6.0 * s0 * s0))
        / ((nf - 1.0) * (nf - 2.0) * (nf - 3.0) * s0 * s0)
        - expected * expected;
    let z_score = (observed - expected) / variance.sqrt();
    let p_randomization = 0.5 * libm::erfc(z_score / std::f64::consts::SQRT_2);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut shuffled = z.clone();
    let mut extreme = 0usize;
    for _ in 0..permutations {
        shuffled.shuffle(&mut rng);
        if statistic(weights, &shuffled, s0, sum_sq) >= observed {
            extreme += 1;
        }
    }
    let p_permutation = (extreme + 1) as f64 / (permutations + 1) as f64;

    Ok(MoranResult { statistic: observed, expected, variance, z_score, p_randomization, p_permutation, permutations })
}
