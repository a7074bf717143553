use anyhow::{Result, anyhow};

use crate::geom::{Crs, LinearUnit};

/// Metres per foot. Feet are US survey feet, the unit of the state plane systems.
const METERS_PER_FOOT: f64 = 1200.0 / 3937.0;

/// A distance with an explicit unit, resolved against a CRS before it is used.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Length {
    Meters(f64),
    Feet(f64),
}

impl Length {
    /// Get the length in metres.
    #[inline]
    pub fn in_meters(&self) -> f64 {
        match *self {
            Length::Meters(m) => m,
            Length::Feet(ft) => ft * METERS_PER_FOOT,
        }
    }

    /// Express the length in the linear unit of `crs`.
    /// Geographic systems have no linear unit, so this fails for them.
    pub fn to_crs_units(&self, crs: &Crs) -> Result<f64> {
        let unit = crs.linear_unit()
            .ok_or_else(|| anyhow!("[geom::length] {crs} is geographic; distances need a projected CRS"))?;
        Ok(match (unit, *self) {
            (LinearUnit::UsSurveyFoot, Length::Feet(ft)) => ft,
            (LinearUnit::UsSurveyFoot, Length::Meters(m)) => m / METERS_PER_FOOT,
            (LinearUnit::Meter, length) => length.in_meters(),
        })
    }
}

impl std::fmt::Display for Length {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Length::Meters(m) => write!(f, "{m} m"),
            Length::Feet(ft) => write!(f, "{ft} ft"),
        }
    }
}
