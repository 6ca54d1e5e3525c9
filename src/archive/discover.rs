use crate::error::{PipelineError, Result};
use glob::glob;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// List the archives under `dir` matching `pattern`, sorted by path.
pub fn discover_archives(dir: impl AsRef<Path>, pattern: &str) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(PipelineError::Config(format!(
            "input directory {:?} does not exist",
            dir
        )));
    }
    let full = dir.join(pattern);
    let full = full.to_string_lossy();

    let mut paths = Vec::new();
    for entry in glob(&full).map_err(|e| PipelineError::Config(format!("{}: {}", full, e)))? {
        match entry {
            Ok(path) if path.is_file() => paths.push(path),
            Ok(path) => debug!(path = %path.display(), "skipping non-file match"),
            Err(e) => warn!("unreadable glob match: {}", e),
        }
    }
    paths.sort();
    Ok(paths)
}
