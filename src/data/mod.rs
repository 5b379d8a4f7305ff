//! Data domain: loading the input table and partitioning it per entity.

pub mod domain;
pub mod repo_fs;
pub mod service;

pub use domain::{EntityGroup, EntityId, RawTable, Record, TableSource};
pub use service::{partition, Partition};
