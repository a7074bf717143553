//! Manual, data-level corrections applied before modeling.
//!
//! Each correction lives here as a named constant so its effect can be asserted directly.

use crate::features::StreetId;

/// A large employer whose jobs the employment source reports against a single block,
/// redistributed across the blocks it actually occupies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmployerOverride {
    /// Jobs assigned to a block in the full-count class.
    pub jobs_per_block: f64,
    /// Blocks receiving the full count.
    pub full: &'static [&'static str],
    /// Blocks receiving double the count.
    pub double: &'static [&'static str],
    /// Blocks receiving half the count.
    pub half: &'static [&'static str],
}

impl EmployerOverride {
    /// Jobs the override assigns to `geoid`, or None if the block is not overridden.
    pub fn jobs_for(&self, geoid: &str) -> Option<f64> {
        let listed = |blocks: &[&str]| blocks.iter().any(|&block| block == geoid);
        if listed(self.full) { Some(self.jobs_per_block) }
        else if listed(self.double) { Some(self.jobs_per_block * 2.0) }
        else if listed(self.half) { Some(self.jobs_per_block * 0.5) }
        else { None }
    }
}

/// Employment disaggregation for the hospital and university campus blocks.
pub const EMPLOYER_BLOCK_OVERRIDES: EmployerOverride = EmployerOverride {
    jobs_per_block: 1216.0,
    full: &["421010369021000", "421010369021001", "421010369021004"],
    double: &["421010369021002"],
    half: &["421010369022000", "421010369022003"],
};

/// Street carrying a federal office complex that the employment source omits.
pub const STREET_JOB_OVERRIDE: (StreetId, f64) = (StreetId(2207), 5_400.0);

/// Building heights entered in metres instead of feet on two segments.
pub const BUILDING_HEIGHT_CORRECTIONS: [(StreetId, f64); 2] = [
    (StreetId(1184), 46.0),
    (StreetId(3120), 62.5),
];

/// Corridor types treated as high pedestrian streets.
pub const HIGH_PED_CORRIDORS: &[&str] = &[
    "High-Volume Pedestrian",
    "Civic/Ceremonial Street",
    "Walkable Commercial Corridor",
];

/// The full set of corrections a run applies. `Default` is the published set.
#[derive(Debug, Clone, PartialEq)]
pub struct Corrections {
    pub employer: EmployerOverride,
    pub street_jobs: Vec<(StreetId, f64)>,
    pub building_heights: Vec<(StreetId, f64)>,
    pub high_ped_corridors: Vec<String>,
}

impl Default for Corrections {
    fn default() -> Self {
        Self {
            employer: EMPLOYER_BLOCK_OVERRIDES,
            street_jobs: vec![STREET_JOB_OVERRIDE],
            building_heights: BUILDING_HEIGHT_CORRECTIONS.to_vec(),
            high_ped_corridors: HIGH_PED_CORRIDORS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Corrections {
    /// Whether a corridor type counts as high pedestrian.
    pub fn is_high_ped(&self, corridor_type: Option<&str>) -> bool {
        corridor_type.is_some_and(|ty| self.high_ped_corridors.iter().any(|high| high == ty))
    }
}
