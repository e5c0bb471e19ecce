//! Staging copies of source libraries
//!
//! A library is never mapped from its source path. Each load copies the
//! source to a fresh, uniquely named file so the source stays writable by
//! the build while the copy is mapped.

use hotswap_core::{Error, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Length of the UUID prefix in staged file names
const ID_LEN: usize = 36;

/// Directory holding staged library copies
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    /// Create a staging area rooted at `dir`; the directory is created lazily
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Staging directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Pick an unused staging path for `source`
    ///
    /// Names are `<uuid>-<source file name>`, regenerated until no file with
    /// that name exists.
    pub fn next_path(&self, source: &Path) -> io::Result<PathBuf> {
        let file_name = source.file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no file name", source.display()),
            )
        })?;

        fs::create_dir_all(&self.dir)?;

        loop {
            let mut name = Uuid::new_v4().to_string();
            name.push('-');
            name.push_str(&file_name.to_string_lossy());

            let candidate = self.dir.join(name);
            if !candidate.exists() {
                return Ok(candidate);
            }
        }
    }

    /// Copy `source` to a fresh staging path and return that path
    ///
    /// An existing file at the chosen path is overwritten.
    pub fn stage(&self, module_id: &str, source: &Path) -> Result<PathBuf> {
        let path = self.next_path(source).map_err(|e| Error::CopyFailed {
            module: module_id.to_string(),
            path: self.dir.clone(),
            source: e,
        })?;

        fs::copy(source, &path).map_err(|e| Error::CopyFailed {
            module: module_id.to_string(),
            path: path.clone(),
            source: e,
        })?;

        debug!(
            module = %module_id,
            source = %source.display(),
            staged = %path.display(),
            "Staged library copy"
        );

        Ok(path)
    }

    /// Staged copies currently present in the directory
    pub fn staged_files(&self) -> io::Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && is_staged_name(&path) {
                files.push(path);
            }
        }
        files.sort();

        Ok(files)
    }

    /// Delete staged copies not listed in `keep`, returning how many were removed
    ///
    /// Files that cannot be removed (still mapped on some platforms) are skipped.
    pub fn purge(&self, keep: &[PathBuf]) -> io::Result<usize> {
        let mut removed = 0;

        for path in self.staged_files()? {
            if keep.contains(&path) {
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => debug!(path = %path.display(), error = %e, "Skipping staged copy"),
            }
        }

        Ok(removed)
    }
}

fn is_staged_name(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };

    name.len() > ID_LEN + 1
        && name.as_bytes()[ID_LEN] == b'-'
        && name.get(..ID_LEN).is_some_and(|id| Uuid::parse_str(id).is_ok())
}
