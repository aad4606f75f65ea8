// azmigrate/src/utils/archive.rs
use anyhow::{Context, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tar::Builder;
use tracing::info;
use walkdir::WalkDir;

/// What went into a scratch archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub files: usize,
    pub bytes: u64,
}

/// Packs the intermediate files of a scratch directory into `dest` as `.tar.gz`.
///
/// Entries sit under the directory's own name (`db_backup_<timestamp>/orders.dump`), so
/// unpacking next to other runs never mixes their dumps. Only regular files are stored;
/// symlinks are not followed and the archive itself is skipped when `dest` lies inside `dir`.
pub fn pack_scratch(dir: &Path, dest: &Path) -> Result<ArchiveSummary> {
    if !dir.is_dir() {
        anyhow::bail!("Scratch directory to archive does not exist: {}", dir.display());
    }
    let root = dir
        .file_name()
        .with_context(|| format!("Scratch directory has no name: {}", dir.display()))?;
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create archive directory {}", parent.display()))?;
    }
    let file = File::create(dest)
        .with_context(|| format!("Failed to create archive file: {}", dest.display()))?;
    let own_file = fs::canonicalize(dest).ok();
    let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));

    let mut summary = ArchiveSummary {
        path: dest.to_path_buf(),
        files: 0,
        bytes: 0,
    };
    for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if own_file.is_some() && fs::canonicalize(entry.path()).ok() == own_file {
            continue;
        }
        let relative = entry.path().strip_prefix(dir)?;
        let mut input = File::open(entry.path())
            .with_context(|| format!("Failed to open {}", entry.path().display()))?;
        builder
            .append_file(Path::new(root).join(relative), &mut input)
            .with_context(|| format!("Failed to add {} to archive", relative.display()))?;
        summary.files += 1;
        summary.bytes += input.metadata()?.len();
    }

    builder
        .into_inner()
        .and_then(|gz| gz.finish())
        .with_context(|| format!("Failed to finish archive {}", dest.display()))?;
    info!(
        archive = %dest.display(),
        files = summary.files,
        bytes = summary.bytes,
        "scratch directory archived"
    );
    Ok(summary)
}
