mod bbox;
mod crs;
mod layer;
mod length;
mod shape;
mod store;
mod table;

use bbox::BoundingBox;
pub use crs::{Crs, LinearUnit};
pub use layer::Layer;
pub use length::Length;
pub(crate) use shape::{midpoint, vertices};
pub use store::{load_layer, load_table};
pub use store::FieldKind;
pub use table::GeometryTable;
