// azmigrate/src/utils/scratch.rs
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use super::archive::{pack_scratch, ArchiveSummary};
use crate::config::ScratchOptions;
use crate::errors::Result;

/// Working directory for intermediate files (dumps, downloaded blobs).
///
/// Deleting it at any point never affects source or target.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    path: PathBuf,
    reuse_existing: bool,
}

impl ScratchDir {
    /// Creates `<root>/<prefix>_<timestamp>`, or uses the override directory as-is.
    pub fn prepare(prefix: &str, options: &ScratchOptions) -> Result<Self> {
        let path = match &options.dir_override {
            Some(dir) => dir.clone(),
            None => {
                let root = options.root.clone().unwrap_or_else(std::env::temp_dir);
                let timestamp = Local::now().format("%Y-%m-%d_%H_%M_%S").to_string();
                root.join(format!("{}_{}", prefix, timestamp))
            }
        };
        fs::create_dir_all(&path)?;
        info!(path = %path.display(), "scratch directory ready");
        Ok(Self {
            path,
            reuse_existing: options.reuse_existing,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path for an intermediate file; parent directories are created.
    pub fn file(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let target = self.path.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(target)
    }

    /// True when resume mode is on and a non-empty intermediate file already exists.
    pub fn reusable(&self, file: &Path) -> bool {
        self.reuse_existing
            && fs::metadata(file)
                .map(|m| m.is_file() && m.len() > 0)
                .unwrap_or(false)
    }

    /// Packs everything produced so far into a `.tar.gz` at `dest`.
    pub fn archive_to(&self, dest: &Path) -> anyhow::Result<ArchiveSummary> {
        pack_scratch(&self.path, dest)
    }

    pub fn remove(&self) {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "scratch directory removed"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove scratch directory"),
        }
    }
}

/// A scratch directory created on first use, so read-only workflows never touch disk.
pub struct LazyScratch {
    prefix: &'static str,
    options: ScratchOptions,
    cell: OnceCell<ScratchDir>,
}

impl LazyScratch {
    pub fn new(prefix: &'static str, options: ScratchOptions) -> Self {
        Self {
            prefix,
            options,
            cell: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<&ScratchDir> {
        self.cell
            .get_or_try_init(|| async { ScratchDir::prepare(self.prefix, &self.options) })
            .await
    }

    pub fn prepared(&self) -> Option<&ScratchDir> {
        self.cell.get()
    }

    /// Archives and/or removes the directory once the workflow is over.
    ///
    /// Cleanup only happens after a fully successful run so failed units can be resumed.
    pub fn finalize(&self, success: bool) -> anyhow::Result<Option<ArchiveSummary>> {
        let Some(scratch) = self.prepared() else {
            return Ok(None);
        };
        let archived = match &self.options.archive {
            Some(dest) => Some(scratch.archive_to(dest)?),
            None => None,
        };
        if self.options.cleanup && success {
            scratch.remove();
        }
        Ok(archived)
    }
}
