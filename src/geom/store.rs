use std::path::Path;

use anyhow::{Context, Result};
use geo::{Geometry, Point};
use polars::{frame::DataFrame, prelude::Column};

use crate::{
    common,
    config::LayerSpec,
    error::PipelineError,
    geom::{Crs, GeometryTable, Layer},
    io,
};

/// How an attribute field should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Number,
    Text,
}

/// Load a vector layer and reproject it into `target`.
///
/// Shapefiles take their CRS from the spec or, failing that, from the `.prj` sidecar.
/// Delimited tables are point layers whose CRS must be named in the spec.
/// Any failure surfaces as [`PipelineError::LayerLoad`].
pub fn load_layer(name: &str, spec: &LayerSpec, fields: &[(&str, FieldKind)], target: &Crs) -> Result<Layer> {
    let layer = match spec.path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("shp") => load_shapefile(name, spec, fields),
        Some(ext) if ext.eq_ignore_ascii_case("csv") => load_points(name, spec, fields),
        _ => Err(PipelineError::layer_load(name, format!("unrecognised source format: {}", spec.path.display())).into()),
    }?;

    let layer = layer.reproject(target)
        .map_err(|e| PipelineError::layer_load(name, format!("{e:#}")))?;
    log::debug!("[geom::store] loaded {name}: {} features in {}", layer.len(), layer.crs());
    Ok(layer)
}

/// Load a plain attribute table (no geometry), forcing `text_columns` to strings.
pub fn load_table(name: &str, path: &Path, text_columns: &[&str]) -> Result<DataFrame> {
    let df = io::read_csv(path, text_columns)
        .map_err(|e| PipelineError::layer_load(name, format!("{e:#}")))?;
    for &column in text_columns {
        if df.column(column).is_err() {
            return Err(PipelineError::layer_load(name, format!("missing column {column:?}")).into());
        }
    }
    log::debug!("[geom::store] loaded {name}: {} rows", df.height());
    Ok(df)
}

/// Resolve the source CRS of a layer; never assume one.
fn source_crs(name: &str, spec: &LayerSpec, prj: Option<String>) -> Result<Crs> {
    match (spec.epsg, prj) {
        (Some(epsg), _) => Crs::from_epsg(epsg)
            .map_err(|e| PipelineError::layer_load(name, format!("{e:#}")).into()),
        (None, Some(wkt)) => Crs::from_prj(&wkt)
            .ok_or_else(|| PipelineError::layer_load(name, "undefined CRS: unrecognised .prj").into()),
        (None, None) => Err(PipelineError::layer_load(name, "undefined CRS: no EPSG code and no .prj sidecar").into()),
    }
}

fn load_shapefile(name: &str, spec: &LayerSpec, fields: &[(&str, FieldKind)]) -> Result<Layer> {
    let crs = source_crs(name, spec, io::read_prj(&spec.path))?;
    let items = io::read_shapefile(&spec.path)
        .map_err(|e| PipelineError::layer_load(name, format!("{e:#}")))?;

    let (shapes, records): (Vec<_>, Vec<_>) = items.into_iter().unzip();
    let shapes = shapes.into_iter()
        .map(io::shape_to_geometry)
        .collect::<Result<Vec<_>>>()
        .map_err(|e| PipelineError::layer_load(name, format!("{e:#}")))?;

    let columns = fields.iter()
        .map(|&(field, kind)| -> Result<Column> {
            Ok(match kind {
                FieldKind::Number => Column::new(field.into(), records.iter()
                    .map(|record| io::record_number(record, field))
                    .collect::<Result<Vec<_>>>()?),
                FieldKind::Text => Column::new(field.into(), records.iter()
                    .map(|record| io::record_text(record, field))
                    .collect::<Result<Vec<_>>>()?),
            })
        })
        .collect::<Result<Vec<_>>>()
        .map_err(|e| PipelineError::layer_load(name, format!("{e:#}")))?;

    let data = frame_with_height(columns, shapes.len())?;
    Layer::new(name, GeometryTable::new(shapes, crs), data)
}

fn load_points(name: &str, spec: &LayerSpec, fields: &[(&str, FieldKind)]) -> Result<Layer> {
    let crs = source_crs(name, spec, None)?;
    let text_columns = fields.iter()
        .filter_map(|&(field, kind)| (kind == FieldKind::Text).then_some(field))
        .collect::<Vec<_>>();
    let df = io::read_csv(&spec.path, &text_columns)
        .map_err(|e| PipelineError::layer_load(name, format!("{e:#}")))?;

    let malformed = |e: anyhow::Error| PipelineError::layer_load(name, format!("{e:#}"));
    let xs = common::f64_values(&df, &spec.x_column).map_err(malformed)?;
    let ys = common::f64_values(&df, &spec.y_column).map_err(malformed)?;

    let shapes = xs.into_iter().zip(ys).enumerate()
        .map(|(row, coords)| match coords {
            (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Ok(Geometry::Point(Point::new(x, y))),
            _ => Err(PipelineError::layer_load(name, format!("row {row} has no usable coordinates"))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let columns = fields.iter()
        .map(|&(field, _)| df.column(field).cloned()
            .with_context(|| format!("missing column {field:?}")))
        .collect::<Result<Vec<_>>>()
        .map_err(malformed)?;

    let data = frame_with_height(columns, shapes.len())?;
    Layer::new(name, GeometryTable::new(shapes, crs), data)
}

/// Build an attribute frame; a layer read without fields still needs one row per feature.
fn frame_with_height(columns: Vec<Column>, height: usize) -> Result<DataFrame> {
    if columns.is_empty() {
        return Ok(DataFrame::new(vec![Column::new("row".into(), (0..height as u32).collect::<Vec<_>>())])?);
    }
    Ok(DataFrame::new(columns)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs::File, io::Write, path::PathBuf};

    fn spec(path: PathBuf, epsg: Option<u32>) -> LayerSpec {
        LayerSpec { path, epsg, x_column: "x".into(), y_column: "y".into() }
    }

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn point_tables_load_with_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "sensors.csv", "x,y,weekly_sum\n10,20,1500\n30,40,\n");
        let layer = load_layer("sensors", &spec(path, Some(2272)), &[("weekly_sum", FieldKind::Number)], &Crs::PA_SOUTH_FT).unwrap();

        assert_eq!(layer.len(), 2);
        assert_eq!(layer.geoms().shapes()[1], Geometry::Point(Point::new(30.0, 40.0)));
        assert_eq!(layer.f64_values("weekly_sum").unwrap(), vec![Some(1500.0), None]);
    }

    #[test]
    fn point_tables_without_crs_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "hubs.csv", "x,y\n1,2\n");
        let err = load_layer("hubs", &spec(path, None), &[], &Crs::PA_SOUTH_FT).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::LayerLoad { .. })));
        assert!(err.to_string().contains("undefined CRS"));
    }

    #[test]
    fn rows_without_coordinates_are_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "hubs.csv", "x,y\n1,2\n,3\n");
        let err = load_layer("hubs", &spec(path, Some(2272)), &[], &Crs::PA_SOUTH_FT).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::LayerLoad { .. })));
    }

    #[test]
    fn missing_sources_are_layer_load_errors() {
        let err = load_layer("blocks", &spec(PathBuf::from("/nowhere/blocks.shp"), Some(2272)), &[], &Crs::PA_SOUTH_FT).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::LayerLoad { .. })));

        let err = load_table("population", Path::new("/nowhere/population.csv"), &["GEOID"]).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::LayerLoad { .. })));
    }

    const PA_SOUTH_PRJ: &str = r#"PROJCS["NAD_1983_StatePlane_Pennsylvania_South_FIPS_3702_Feet",GEOGCS["GCS_North_American_1983"],UNIT["Foot_US",0.3048006096012192]]"#;

    /// Two square blocks with a text GEOID and a numeric job count.
    fn write_blocks(dir: &Path) -> PathBuf {
        use shapefile::dbase::{FieldValue, Record, TableWriterBuilder};

        let path = dir.join("blocks.shp");
        let table = TableWriterBuilder::new()
            .add_character_field("GEOID".try_into().unwrap(), 15)
            .add_numeric_field("JOBS".try_into().unwrap(), 10, 0);
        let mut writer = shapefile::Writer::from_path(&path, table).unwrap();
        for (i, (geoid, jobs)) in [("421010001001000", Some(120.0)), ("421010001001001", None)].into_iter().enumerate() {
            let x0 = i as f64 * 100.0;
            let polygon = shapefile::Polygon::new(shapefile::PolygonRing::Outer(vec![
                shapefile::Point { x: x0, y: 0.0 },
                shapefile::Point { x: x0, y: 50.0 },
                shapefile::Point { x: x0 + 50.0, y: 50.0 },
                shapefile::Point { x: x0 + 50.0, y: 0.0 },
            ]));
            let mut record = Record::default();
            record.insert("GEOID".to_string(), FieldValue::Character(Some(geoid.to_string())));
            record.insert("JOBS".to_string(), FieldValue::Numeric(jobs));
            writer.write_shape_and_record(&polygon, &record).unwrap();
        }
        path
    }

    #[test]
    fn shapefiles_take_their_crs_from_the_prj() {
        use geo::Area;

        let dir = tempfile::tempdir().unwrap();
        let path = write_blocks(dir.path());
        write(dir.path(), "blocks.prj", PA_SOUTH_PRJ);

        let fields = [("GEOID", FieldKind::Text), ("JOBS", FieldKind::Number)];
        let layer = load_layer("blocks", &spec(path, None), &fields, &Crs::PA_SOUTH_FT).unwrap();
        assert_eq!(layer.crs(), Crs::PA_SOUTH_FT);
        assert_eq!(layer.len(), 2);
        assert_eq!(layer.str_values("GEOID").unwrap(),
            vec![Some("421010001001000".to_string()), Some("421010001001001".to_string())]);
        assert_eq!(layer.f64_values("JOBS").unwrap(), vec![Some(120.0), None]);

        let Geometry::MultiPolygon(block) = &layer.geoms().shapes()[1] else { panic!("expected a polygon") };
        assert!((block.unsigned_area() - 2_500.0).abs() < 1e-9);
    }

    #[test]
    fn shapefiles_without_a_prj_need_an_epsg_code() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_blocks(dir.path());

        let err = load_layer("blocks", &spec(path.clone(), None), &[], &Crs::PA_SOUTH_FT).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::LayerLoad { .. })));
        assert!(err.to_string().contains("undefined CRS"));

        let layer = load_layer("blocks", &spec(path, Some(2272)), &[], &Crs::PA_SOUTH_FT).unwrap();
        assert_eq!(layer.len(), 2);
    }

    #[test]
    fn unrecognised_prj_is_an_undefined_crs() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_blocks(dir.path());
        write(dir.path(), "blocks.prj", r#"PROJCS["Somewhere_Else"]"#);

        let err = load_layer("blocks", &spec(path, None), &[], &Crs::PA_SOUTH_FT).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::LayerLoad { .. })));
        assert!(err.to_string().contains("undefined CRS"));
    }

    #[test]
    fn missing_shapefile_fields_are_layer_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_blocks(dir.path());
        let err = load_layer("blocks", &spec(path, Some(2272)), &[("POP", FieldKind::Number)], &Crs::PA_SOUTH_FT).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::LayerLoad { .. })));
    }

    #[test]
    fn lonlat_points_are_reprojected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "hubs.csv", "x,y\n-75.1635,39.9524\n");
        let layer = load_layer("hubs", &spec(path, Some(4326)), &[], &Crs::PA_SOUTH_FT).unwrap();
        assert_eq!(layer.crs(), Crs::PA_SOUTH_FT);
        let Geometry::Point(point) = layer.geoms().shapes()[0] else { panic!("expected a point") };
        assert!(point.x() > 2_600_000.0 && point.x() < 2_800_000.0);
    }
}
