pub mod archive;
pub mod config;
pub mod dataset;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod report;
pub mod schema;
pub mod sink;
