//! # Raw Line Log
//!
//! Appends every decoded serial line to a text file so sessions can be replayed
//! later. The previous session's file is rotated away once, at start-up.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default number of numbered backups kept by rotation
pub const DEFAULT_MAX_BACKUPS: usize = 5;

/// Path of backup number `index` (`<path>.<index>`)
pub fn backup_path(path: &Path, index: usize) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{}", index));
    PathBuf::from(name)
}

/// Rotate `path` into numbered backups
///
/// `path` becomes `path.1`, `path.1` becomes `path.2`, and so on; whatever
/// sat at `path.<max_backups>` is deleted. A missing `path` is not an error.
///
/// # Errors
///
/// Returns the first filesystem error; rotation stops at that point.
pub fn rotate_log_file(path: &Path, max_backups: usize) -> io::Result<()> {
    if !path.exists() || max_backups == 0 {
        return Ok(());
    }

    let oldest = backup_path(path, max_backups);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }

    for index in (1..max_backups).rev() {
        let from = backup_path(path, index);
        if from.exists() {
            fs::rename(&from, backup_path(path, index + 1))?;
        }
    }

    fs::rename(path, backup_path(path, 1))
}

/// Line-buffered append-only log of raw serial lines
#[derive(Debug)]
pub struct RawLineLog {
    writer: LineWriter<File>,
    path: PathBuf,
}

impl RawLineLog {
    /// Rotate any existing file at `path`, then open a fresh one for append
    ///
    /// Rotation failures are logged and ignored; only failing to open the new
    /// file is an error.
    pub fn open(path: impl AsRef<Path>, max_backups: usize) -> io::Result<Self> {
        let path = path.as_ref();

        if let Err(e) = rotate_log_file(path, max_backups) {
            warn!(path = %path.display(), error = %e, "Failed to rotate raw line log");
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!(path = %path.display(), "Logging raw serial lines");

        Ok(Self {
            writer: LineWriter::new(file),
            path: path.to_path_buf(),
        })
    }

    #[cfg(test)]
    pub(crate) fn from_file(file: File, path: &Path) -> Self {
        Self {
            writer: LineWriter::new(file),
            path: path.to_path_buf(),
        }
    }

    /// Append one line, normalising its ending to a single `\n`
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        let line = line.trim_end_matches(|c| c == '\r' || c == '\n');
        writeln!(self.writer, "{}", line)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
