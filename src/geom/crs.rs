use anyhow::{Context, Result, anyhow, bail};
use geo::Coord;
use proj4rs::{proj::Proj as Proj4, transform::transform};

/// The linear unit of a projected CRS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinearUnit {
    Meter,
    UsSurveyFoot,
}

/// A coordinate reference system, identified by EPSG code.
///
/// Only the systems the pipeline works with are registered; every other code is
/// rejected rather than guessed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs {
    epsg: u32,
}

impl Crs {
    /// NAD83 / Pennsylvania South (US survey feet), the default working CRS.
    pub const PA_SOUTH_FT: Crs = Crs { epsg: 2272 };

    /// WGS84 longitude/latitude.
    pub const WGS84: Crs = Crs { epsg: 4326 };

    /// Look up a registered CRS by EPSG code.
    pub fn from_epsg(epsg: u32) -> Result<Self> {
        let crs = Self { epsg };
        crs.proj4()?;
        Ok(crs)
    }

    /// Get the EPSG code.
    #[inline] pub fn epsg(&self) -> u32 { self.epsg }

    /// PROJ.4 definition for the registered code.
    fn proj4(&self) -> Result<&'static str> {
        Ok(match self.epsg {
            4326  => "+proj=longlat +datum=WGS84 +no_defs +type=crs",
            4269  => "+proj=longlat +datum=NAD83 +no_defs +type=crs",
            2272  => "+proj=lcc +lat_1=40.96666666666667 +lat_2=39.93333333333333 +lat_0=39.33333333333334 \
                      +lon_0=-77.75 +x_0=600000 +y_0=0 +datum=NAD83 +units=us-ft +no_defs +type=crs",
            3857  => "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs +type=crs",
            32618 => "+proj=utm +zone=18 +datum=WGS84 +units=m +no_defs +type=crs",
            other => bail!("[geom::crs] unsupported EPSG code {other}"),
        })
    }

    /// True for longitude/latitude systems, whose coordinates are degrees.
    #[inline] pub fn is_geographic(&self) -> bool { matches!(self.epsg, 4326 | 4269) }

    /// Linear unit of the system, or None for geographic systems.
    pub fn linear_unit(&self) -> Option<LinearUnit> {
        match self.epsg {
            4326 | 4269 => None,
            2272 => Some(LinearUnit::UsSurveyFoot),
            _ => Some(LinearUnit::Meter),
        }
    }

    /// Recognise a CRS from the WKT found in a shapefile `.prj` sidecar.
    pub(crate) fn from_prj(wkt: &str) -> Option<Self> {
        let wkt = wkt.to_ascii_lowercase();
        let epsg = if wkt.starts_with("projcs") {
            if wkt.contains("pennsylvania_south") && wkt.contains("foot") { 2272 }
            else if wkt.contains("pseudo_mercator") || wkt.contains("pseudo-mercator") { 3857 }
            else if wkt.contains("utm_zone_18n") || wkt.contains("utm zone 18n") { 32618 }
            else { return None }
        } else if wkt.starts_with("geogcs") {
            if wkt.contains("north_american_1983") { 4269 }
            else if wkt.contains("wgs_1984") || wkt.contains("wgs 84") { 4326 }
            else { return None }
        } else {
            return None
        };
        Some(Self { epsg })
    }

    /// Build a coordinate transformer from `self` to `target`.
    /// Returns None when both are the same system, so callers skip the transform entirely.
    pub(crate) fn transformer(&self, target: &Crs) -> Result<Option<Transformer>> {
        if self == target { return Ok(None) }

        let from = {
            let proj_string = self.proj4()?;
            Proj4::from_proj_string(proj_string)
                .with_context(|| anyhow!("[geom::crs] failed to build source PROJ.4: {proj_string}"))?
        };
        let to = {
            let proj_string = target.proj4()?;
            Proj4::from_proj_string(proj_string)
                .with_context(|| anyhow!("[geom::crs] failed to build target PROJ.4: {proj_string}"))?
        };

        Ok(Some(Transformer {
            from,
            to,
            from_geographic: self.is_geographic(),
            to_geographic: target.is_geographic(),
        }))
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

/// A reusable pair of PROJ.4 definitions.
pub(crate) struct Transformer {
    from: Proj4,
    to: Proj4,
    from_geographic: bool,
    to_geographic: bool,
}

impl Transformer {
    /// Transform one coordinate. Degrees are converted to radians on the way in and back on the way out.
    pub(crate) fn apply(&self, coord: Coord<f64>) -> Result<Coord<f64>> {
        let mut point = if self.from_geographic {
            (coord.x.to_radians(), coord.y.to_radians(), 0.0)
        } else {
            (coord.x, coord.y, 0.0)
        };
        transform(&self.from, &self.to, &mut point)
            .with_context(|| format!("[geom::crs] CRS transform failed at ({}, {})", coord.x, coord.y))?;
        Ok(if self.to_geographic {
            Coord { x: point.0.to_degrees(), y: point.1.to_degrees() }
        } else {
            Coord { x: point.0, y: point.1 }
        })
    }
}
