// src/archive/mod.rs
pub mod discover;

pub use discover::discover_archives;

use crate::error::{PipelineError, Result};
use std::{
    fs::File,
    io::{Cursor, Read, Seek},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, trace};
use zip::ZipArchive;

/// One tabular member of an archive, still undecoded.
#[derive(Debug, Clone)]
pub struct MemberTable {
    /// Archive the member came from.
    pub archive: PathBuf,
    /// Member path inside the archive.
    pub name: String,
    /// Field delimiter detected from the extension or first line.
    pub delimiter: u8,
    pub bytes: Vec<u8>,
}

impl MemberTable {
    /// `archive!member`, used in logs and the run summary.
    pub fn id(&self) -> String {
        format!("{}!{}", self.archive.display(), self.name)
    }
}

/// Open the zip at `zip_path` and buffer every tabular member, in archive order.
#[instrument(level = "info", skip(zip_path), fields(archive = %zip_path.as_ref().display()))]
pub fn extract_archive<P: AsRef<Path>>(zip_path: P) -> Result<Vec<MemberTable>> {
    let zip_path = zip_path.as_ref();
    let file = File::open(zip_path).map_err(|e| PipelineError::archive_corrupt(zip_path, e))?;
    let members = extract_from(zip_path, file)?;
    info!(members = members.len(), "extracted archive");
    Ok(members)
}

/// Same as [`extract_archive`] for an archive already held in memory.
pub fn extract_bytes(archive: impl Into<PathBuf>, data: Vec<u8>) -> Result<Vec<MemberTable>> {
    let archive = archive.into();
    extract_from(&archive, Cursor::new(data))
}

/// Largest buffer reserved up front from a member's declared size; the
/// declared size of a damaged archive is not trusted beyond this.
const MAX_PREALLOC: usize = 64 * 1024 * 1024;

fn preallocation(declared: u64) -> usize {
    usize::try_from(declared).unwrap_or(MAX_PREALLOC).min(MAX_PREALLOC)
}

fn extract_from<R: Read + Seek>(archive_path: &Path, reader: R) -> Result<Vec<MemberTable>> {
    let mut archive =
        ZipArchive::new(reader).map_err(|e| PipelineError::archive_corrupt(archive_path, e))?;

    let mut members = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| {
            PipelineError::archive_corrupt(archive_path, format!("entry #{}: {}", i, e))
        })?;
        let name = entry.name().to_string();

        if !entry.is_file() || is_resource_fork(&name) {
            trace!(member = %name, "skipping non-file entry");
            continue;
        }
        let kind = TabularKind::from_name(&name);
        if kind == TabularKind::NotTabular {
            debug!(member = %name, "skipping non-tabular member");
            continue;
        }

        // decompression errors surface here, so a truncated deflate stream fails the archive
        let mut buf = Vec::with_capacity(preallocation(entry.size()));
        entry.read_to_end(&mut buf).map_err(|e| {
            PipelineError::archive_corrupt(archive_path, format!("reading {}: {}", name, e))
        })?;

        let Some(delimiter) = kind.delimiter(&buf) else {
            debug!(member = %name, "content sniff rejected member");
            continue;
        };
        members.push(MemberTable {
            archive: archive_path.to_path_buf(),
            name,
            delimiter,
            bytes: buf,
        });
    }
    Ok(members)
}

/// macOS zips carry `__MACOSX/` folders and `._name` AppleDouble files.
fn is_resource_fork(name: &str) -> bool {
    name.starts_with("__MACOSX/")
        || Path::new(name)
            .file_name()
            .and_then(|f| f.to_str())
            .map_or(false, |f| f.starts_with("._"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TabularKind {
    Csv,
    Tsv,
    /// `.txt` or no extension: decided by sniffing the first line.
    Sniff,
    NotTabular,
}

impl TabularKind {
    fn from_name(name: &str) -> Self {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("csv") => TabularKind::Csv,
            Some("tsv") => TabularKind::Tsv,
            Some("txt") | None => TabularKind::Sniff,
            Some(_) => TabularKind::NotTabular,
        }
    }

    fn delimiter(&self, bytes: &[u8]) -> Option<u8> {
        let first_line = bytes.split(|&b| b == b'\n').next().unwrap_or_default();
        let has_comma = first_line.contains(&b',');
        let has_tab = first_line.contains(&b'\t');
        match self {
            TabularKind::Csv if has_tab && !has_comma => Some(b'\t'),
            TabularKind::Csv => Some(b','),
            TabularKind::Tsv => Some(b'\t'),
            TabularKind::Sniff if first_line.contains(&0) => None,
            TabularKind::Sniff if has_comma => Some(b','),
            TabularKind::Sniff if has_tab => Some(b'\t'),
            TabularKind::Sniff | TabularKind::NotTabular => None,
        }
    }
}
