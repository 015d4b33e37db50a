pub mod account;
pub mod aggregate;
pub mod change;
pub mod file_metrics;
pub mod metric;
pub mod rule;
pub mod version;
pub mod version_metrics;
