//! Core types shared by every migration stage.
//!
//! - [`graphid`]: packed AGE vertex/edge identifiers
//! - [`identifier`]: SQL identifier validation and quoting
//! - [`schema`]: target table layouts
//! - [`value`]: column values handed to the target store

pub mod graphid;
pub mod identifier;
pub mod schema;
pub mod value;

pub use graphid::{GraphId, VertexIdMap};
pub use schema::{ColumnSpec, TableKind, TableSpec};
pub use value::{Row, SqlValue};
