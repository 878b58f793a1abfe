//! Row and cell data model.

pub mod coerce;
mod row;
mod value;

pub(crate) use row::NULL;
pub use row::{is_null_value, Row, RowId};
pub use value::CellValue;
