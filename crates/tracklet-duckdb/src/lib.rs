pub mod backend;
pub mod events;
pub mod identity;
pub mod queries;
pub mod schema;
pub mod website;

pub use backend::DuckDbBackend;

/// Re-export the `duckdb` crate so consumers (especially tests) can use
/// `tracklet_duckdb::duckdb::params!` without an extra dependency.
pub use duckdb;
