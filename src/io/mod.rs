//! Readers and writers for the file formats the pipeline consumes.

mod csv;
mod shp;

pub(crate) use csv::*;
pub(crate) use shp::*;
