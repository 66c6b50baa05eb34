//! Files generated from a configuration for the environment around a set of
//! cooperating generators: a compose file to start them, a Prometheus target
//! list to scrape them and a CSV of the topology their flows trace.

use std::io;

pub mod compose;
pub mod graph;
pub mod targets;

/// Errors produced while generating artifacts.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Writing the file failed
    #[error("Failed to write artifact: {0}")]
    Io(#[from] io::Error),
    /// YAML serialization failed
    #[error("Failed to serialize yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// JSON serialization failed
    #[error("Failed to serialize json: {0}")]
    Json(#[from] serde_json::Error),
    /// CSV serialization failed
    #[error("Failed to write csv: {0}")]
    Csv(#[from] csv::Error),
}
