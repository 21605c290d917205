// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Log file naming.
//!
//! Files are named `<base>_<YYYYMMDDHHmm>.<ext>` after the configured path.
//! Two files started in the same minute get a numeric suffix:
//! `<base>_<YYYYMMDDHHmm>_2.<ext>`.

use super::LogFileError;
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Extension used when the configured path has none.
pub const DEFAULT_EXTENSION: &str = "out";

const DEFAULT_BASE: &str = "wcnoise";
const MAX_SUFFIX: u32 = 1000;

/// Directory, base name and extension of the log files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogNaming {
    dir: PathBuf,
    base: String,
    extension: String,
}

impl LogNaming {
    /// Split a configured path such as `/data/em710.wcd`.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let base = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_BASE.to_string());
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());

        Self {
            dir,
            base,
            extension,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Minute-resolution timestamp used in file names.
    pub fn stamp(now: DateTime<Local>) -> String {
        now.format("%Y%m%d%H%M").to_string()
    }

    /// File name for `stamp`; `suffix` 0 or 1 means no suffix.
    pub fn file_name(&self, stamp: &str, suffix: u32) -> String {
        if suffix <= 1 {
            format!("{}_{}.{}", self.base, stamp, self.extension)
        } else {
            format!("{}_{}_{}.{}", self.base, stamp, suffix, self.extension)
        }
    }

    /// Create a new, not yet existing, file named after the current time.
    pub fn create_next(&self) -> Result<(PathBuf, File), LogFileError> {
        self.create_at(Local::now())
    }

    /// Create a new file named after `now`. Never truncates an existing file.
    pub fn create_at(&self, now: DateTime<Local>) -> Result<(PathBuf, File), LogFileError> {
        let stamp = Self::stamp(now);
        let mut last = self.dir.join(self.file_name(&stamp, 1));

        for suffix in 1..=MAX_SUFFIX {
            let path = self.dir.join(self.file_name(&stamp, suffix));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => last = path,
                Err(source) => return Err(LogFileError::FileOpenFailed { path, source }),
            }
        }

        Err(LogFileError::FileOpenFailed {
            path: last,
            source: io::Error::new(io::ErrorKind::AlreadyExists, "no free log file name"),
        })
    }
}
