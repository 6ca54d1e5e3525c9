// src/config.rs

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Artifact format for the report sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Parquet,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Parquet => "parquet",
        }
    }
}

/// Run configuration. Loaded from YAML, then overridden from the command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding the input archives.
    pub input_dir: PathBuf,
    /// Directory the reports are published into.
    pub output_dir: PathBuf,
    /// Glob (relative to `input_dir`) selecting the archives.
    pub archive_pattern: String,
    pub format: OutputFormat,
    /// Upper bound on archives extracted at the same time.
    pub workers: usize,
    /// Strict encoding label for every member table. Unset means UTF-8 with fallback.
    pub encoding: Option<String>,
    /// Encoding used when a member table is not valid UTF-8.
    pub fallback_encoding: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("reports"),
            archive_pattern: "*.zip".into(),
            format: OutputFormat::Csv,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            encoding: None,
            fallback_encoding: "windows-1252".into(),
        }
    }
}

impl Config {
    /// Read a YAML config file. Missing keys keep their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("reading {:?}: {}", path, e)))?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(PipelineError::Config("workers must be at least 1".into()));
        }
        if self.archive_pattern.trim().is_empty() {
            return Err(PipelineError::Config("archive_pattern is empty".into()));
        }
        crate::schema::decode::TextDecoder::from_config(self)?;
        Ok(())
    }
}
