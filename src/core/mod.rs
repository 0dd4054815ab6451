//! Core data types and I/O operations.

pub mod loaders;
pub mod table;
pub mod transforms;
pub mod writers;

pub use loaders::{load_profile_csv, load_sources, LoaderError};
pub use table::{ProfileTable, TableError};
pub use writers::{write_sweep_csv, write_table_csv, WriteError};
