//! Schema handling for bronze appends.
//!
//! `normalize` makes a decoded table appendable; `evolution` reconciles it
//! with the schema of an existing bronze table.

pub mod evolution;
pub mod normalize;

pub use evolution::{SchemaComparison, align_batch, compare_schemas, is_type_widening, merge_schemas};
pub use normalize::{NormalizedTable, normalize};
