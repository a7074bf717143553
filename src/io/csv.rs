//! Delimited table reading and writing.

use std::{fs::File, path::Path, sync::Arc};

use anyhow::{Context, Result};
use polars::{
    frame::DataFrame,
    io::{SerReader, SerWriter},
    prelude::{CsvReadOptions, CsvWriter, DataType, Field, Schema},
};

/// Reads a CSV file from `path` into a Polars DataFrame.
/// Columns named in `text_columns` are read as strings, preserving leading zeros in identifiers.
pub(crate) fn read_csv(path: &Path, text_columns: &[&str]) -> Result<DataFrame> {
    let file = File::open(path)
        .with_context(|| format!("[io::csv::read] Failed to open CSV file: {}", path.display()))?;

    let schema = Arc::new(Schema::from_iter(
        text_columns.iter().map(|&name| Field::new(name.into(), DataType::String))
    ));

    CsvReadOptions::default()
        .with_has_header(true)
        .with_schema_overwrite(Some(schema))
        .into_reader_with_file_handle(file)
        .finish()
        .with_context(|| format!("[io::csv::read] Failed to read CSV from {:?}", path))
}

/// Write a DataFrame to a CSV file.
pub(crate) fn write_csv(df: &mut DataFrame, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("[io::csv::write] Failed to create CSV file: {}", path.display()))?;
    CsvWriter::new(file)
        .include_header(true)
        .finish(df)
        .with_context(|| format!("[io::csv::write] Failed to write CSV to {:?}", path))
}
