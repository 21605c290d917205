// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Raw datagram log files.
//!
//! # File format
//!
//! A log file is a plain sequence of records, no file header:
//!
//! ```text
//! +--------------------+----------------------+
//! | length (u32, LE)   | datagram bytes       |
//! +--------------------+----------------------+
//! | length (u32, LE)   | datagram bytes       |
//! ...
//! ```
//!
//! Files rotate by size; see [`RotatingLogWriter`].

pub mod naming;
pub mod reader;
pub mod writer;

pub use naming::{LogNaming, DEFAULT_EXTENSION};
pub use reader::LogReader;
pub use writer::{LogWriterConfig, LogWriterStats, RotatingLogWriter, RotationHook};

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Size of the record length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Log file errors.
#[derive(Debug, Error)]
pub enum LogFileError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot open log file {}: {source}", path.display())]
    FileOpenFailed { path: PathBuf, source: io::Error },

    #[error("truncated record at offset {offset}: need {needed} bytes, got {got}")]
    Truncated {
        offset: u64,
        needed: usize,
        got: usize,
    },

    #[error("file logging disabled after an earlier failure")]
    Disabled,
}
