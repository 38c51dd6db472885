pub mod buckets;
pub mod channel;
pub mod config;
pub mod filters;
pub mod limits;
pub mod payload;
pub mod range;
pub mod urls;
pub mod visitor;
