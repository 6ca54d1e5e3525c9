use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tripstats::{
    config::{Config, OutputFormat},
    logging, pipeline,
};

/// Consolidate quarterly trip archives and publish the summary reports.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// YAML config file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Directory holding the archives
    #[arg(short, long)]
    input: Option<PathBuf>,
    /// Directory the reports are written to
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Glob selecting archives inside the input directory
    #[arg(long)]
    pattern: Option<String>,
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,
    /// Archives extracted concurrently
    #[arg(long)]
    workers: Option<usize>,
    /// Decode every member table strictly with this encoding label
    #[arg(long)]
    encoding: Option<String>,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => Config::from_yaml_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => Config::default(),
        };
        if let Some(v) = self.input {
            cfg.input_dir = v;
        }
        if let Some(v) = self.output {
            cfg.output_dir = v;
        }
        if let Some(v) = self.pattern {
            cfg.archive_pattern = v;
        }
        if let Some(v) = self.format {
            cfg.format = v;
        }
        if let Some(v) = self.workers {
            cfg.workers = v;
        }
        if self.encoding.is_some() {
            cfg.encoding = self.encoding;
        }
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    std::panic::set_hook(Box::new(|info| {
        eprintln!("panic: {:?}", info);
    }));

    let config = Args::parse().into_config()?;
    info!(?config, "startup");

    match pipeline::run(&config).await {
        Ok(summary) if summary.is_complete() => Ok(()),
        Ok(summary) => {
            info!(
                failed_reports = summary.reports_failed.len(),
                "finished with skipped inputs or reports"
            );
            Ok(())
        }
        Err(e) => {
            error!("run aborted: {}", e);
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() -> Result<()> {
        let args = Args::try_parse_from([
            "tripstats",
            "--input",
            "/data/divvy",
            "--format",
            "parquet",
            "--workers",
            "3",
        ])?;
        let cfg = args.into_config()?;
        assert_eq!(cfg.input_dir, PathBuf::from("/data/divvy"));
        assert_eq!(cfg.format, OutputFormat::Parquet);
        assert_eq!(cfg.workers, 3);
        assert_eq!(cfg.archive_pattern, "*.zip");
        Ok(())
    }
}
