pub mod analyze;
pub mod client;
pub mod config;
pub mod model;
pub mod report;
