pub mod config;
pub mod records;
pub mod stats;
pub mod types;
