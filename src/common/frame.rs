use anyhow::{Context, Result};
use polars::{frame::DataFrame, prelude::{BooleanChunked, DataType, NewChunkedArray}};

/// Read a column as nullable f64 values, casting numeric or string columns as needed.
pub(crate) fn f64_values(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let column = df.column(name)
        .with_context(|| format!("[common::frame] missing column {name:?}"))?
        .cast(&DataType::Float64)
        .with_context(|| format!("[common::frame] column {name:?} is not numeric"))?;
    Ok(column.f64()?.into_iter().collect())
}

/// Read a column as nullable i64 values.
pub(crate) fn i64_values(df: &DataFrame, name: &str) -> Result<Vec<Option<i64>>> {
    let column = df.column(name)
        .with_context(|| format!("[common::frame] missing column {name:?}"))?
        .cast(&DataType::Int64)
        .with_context(|| format!("[common::frame] column {name:?} is not an integer column"))?;
    Ok(column.i64()?.into_iter().collect())
}

/// Read a column as nullable, whitespace-trimmed strings.
pub(crate) fn str_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let column = df.column(name)
        .with_context(|| format!("[common::frame] missing column {name:?}"))?
        .cast(&DataType::String)?;
    Ok(column.str()?.into_iter()
        .map(|value| value.map(|s| s.trim().to_string()))
        .collect())
}

/// Keep the rows of `df` whose mask entry is true.
pub(crate) fn filter_rows(df: &DataFrame, keep: &[bool]) -> Result<DataFrame> {
    let mask = BooleanChunked::from_slice("keep".into(), keep);
    df.filter(&mask).context("[common::frame] failed to filter rows")
}
