// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Size-rotated, length-framed datagram log.
//!
//! The receive loop must never block on the file system. When the byte
//! counter passes the threshold a helper thread opens the next file and
//! hands it back over a channel; frames written meanwhile are buffered in
//! memory and flushed into the new file once it arrives. The old file is
//! flushed and closed on another helper thread.
//!
//! Frames written up to and including the one that triggered the rotation
//! are in the old file, every later frame is in the new one.

use super::naming::LogNaming;
use super::{LogFileError, LENGTH_PREFIX_LEN};
use byteorder::{LittleEndian, WriteBytesExt};
use crossbeam::channel::{self, Receiver, TryRecvError};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Called on the rotation thread with the path of each newly opened file.
///
/// [`RotatingLogWriter::finish`] waits for a running hook, so long work
/// belongs on a thread of its own.
pub type RotationHook = Arc<dyn Fn(&Path) + Send + Sync>;

/// Writer configuration.
#[derive(Debug, Clone)]
pub struct LogWriterConfig {
    /// Template path: directory, base name and extension of the log files.
    pub path: PathBuf,

    /// Bytes written to a file before the next one is started.
    pub max_file_size: u64,
}

impl LogWriterConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_file_size: 1_000_000,
        }
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }
}

/// Writer statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogWriterStats {
    /// Frames accepted.
    pub datagrams: u64,

    /// Bytes accepted, length prefixes included.
    pub bytes: u64,

    /// Completed rotations.
    pub rotations: u64,

    /// Files in the order they were opened.
    pub files: Vec<PathBuf>,

    /// Set once a file could not be opened or written.
    pub disabled: bool,
}

type OpenResult = Result<(PathBuf, File), LogFileError>;

struct PendingRotation {
    rx: Receiver<OpenResult>,
    buffered: Vec<u8>,
}

/// Length-framed log writer with background size rotation.
pub struct RotatingLogWriter {
    naming: LogNaming,
    max_file_size: u64,
    active: BufWriter<File>,
    active_path: PathBuf,
    since_rotation: u64,
    pending: Option<PendingRotation>,
    helpers: Vec<JoinHandle<()>>,
    hook: Option<RotationHook>,
    stats: LogWriterStats,
}

impl RotatingLogWriter {
    /// Open the first log file.
    pub fn create(config: &LogWriterConfig) -> Result<Self, LogFileError> {
        let naming = LogNaming::from_path(&config.path);
        let (path, file) = naming.create_next()?;
        info!("Logging datagrams to {}", path.display());

        Ok(Self {
            naming,
            max_file_size: config.max_file_size,
            active: BufWriter::new(file),
            active_path: path.clone(),
            since_rotation: 0,
            pending: None,
            helpers: Vec::new(),
            hook: None,
            stats: LogWriterStats {
                files: vec![path],
                ..Default::default()
            },
        })
    }

    /// Run `hook` after every rotation, on the rotation thread.
    pub fn with_rotation_hook(mut self, hook: RotationHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Append one length-prefixed frame.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), LogFileError> {
        if self.stats.disabled {
            return Err(LogFileError::Disabled);
        }
        self.poll_rotation()?;

        let frame_len = (LENGTH_PREFIX_LEN + bytes.len()) as u64;
        let result = match &mut self.pending {
            Some(pending) => write_frame(&mut pending.buffered, bytes),
            None => write_frame(&mut self.active, bytes),
        };
        if let Err(e) = result {
            return Err(self.disable(e.into()));
        }

        self.stats.datagrams += 1;
        self.stats.bytes += frame_len;
        self.since_rotation += frame_len;

        if self.since_rotation > self.max_file_size && self.pending.is_none() {
            self.since_rotation = 0;
            self.begin_rotation()?;
        }
        Ok(())
    }

    /// Flush the active file; installs a rotated file if one is ready.
    pub fn flush(&mut self) -> Result<(), LogFileError> {
        if self.stats.disabled {
            return Err(LogFileError::Disabled);
        }
        self.poll_rotation()?;
        if let Err(e) = self.active.flush() {
            return Err(self.disable(e.into()));
        }
        Ok(())
    }

    fn begin_rotation(&mut self) -> Result<(), LogFileError> {
        self.reap_helpers();
        let (tx, rx) = channel::bounded::<OpenResult>(1);
        let naming = self.naming.clone();
        let hook = self.hook.clone();

        let spawned = thread::Builder::new()
            .name("wcnoise-log-rotate".into())
            .spawn(move || {
                let result = naming.create_next();
                let opened = result.as_ref().ok().map(|(path, _)| path.clone());
                if tx.send(result).is_err() {
                    return;
                }
                if let (Some(path), Some(hook)) = (opened, hook) {
                    hook(&path);
                }
            });

        match spawned {
            Ok(handle) => {
                debug!("rotation started after {} bytes", self.max_file_size);
                self.helpers.push(handle);
                self.pending = Some(PendingRotation {
                    rx,
                    buffered: Vec::new(),
                });
                Ok(())
            }
            Err(e) => Err(self.disable(e.into())),
        }
    }

    /// Install the next file if the rotation thread has delivered it.
    fn poll_rotation(&mut self) -> Result<(), LogFileError> {
        let Some(pending) = &self.pending else {
            return Ok(());
        };
        let received = pending.rx.try_recv();
        match received {
            Err(TryRecvError::Empty) => Ok(()),
            Ok(opened) => self.complete_rotation(opened),
            Err(TryRecvError::Disconnected) => self.complete_rotation(Err(rotation_thread_gone())),
        }
    }

    fn complete_rotation(&mut self, opened: OpenResult) -> Result<(), LogFileError> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        let (path, file) = match opened {
            Ok(opened) => opened,
            Err(e) => return Err(self.disable(e)),
        };

        let mut next = BufWriter::new(file);
        if let Err(e) = next.write_all(&pending.buffered) {
            return Err(self.disable(e.into()));
        }

        let old = std::mem::replace(&mut self.active, next);
        let old_path = std::mem::replace(&mut self.active_path, path.clone());
        self.stats.rotations += 1;
        self.stats.files.push(path);
        info!(
            "Rotated log {} -> {}",
            old_path.display(),
            self.active_path.display()
        );
        self.close_in_background(old, old_path);
        Ok(())
    }

    fn close_in_background(&mut self, mut old: BufWriter<File>, path: PathBuf) {
        let spawned = thread::Builder::new()
            .name("wcnoise-log-close".into())
            .spawn(move || close_file(&mut old, &path));
        match spawned {
            Ok(handle) => self.helpers.push(handle),
            Err(e) => warn!("cannot spawn closer thread, closing inline: {}", e),
        }
    }

    /// Join helper threads that have already exited.
    fn reap_helpers(&mut self) {
        let (done, running): (Vec<_>, Vec<_>) = std::mem::take(&mut self.helpers)
            .into_iter()
            .partition(JoinHandle::is_finished);
        self.helpers = running;
        for handle in done {
            if handle.join().is_err() {
                warn!("log helper thread panicked");
            }
        }
    }

    fn disable(&mut self, err: LogFileError) -> LogFileError {
        if !self.stats.disabled {
            error!("File logging disabled: {}", err);
        }
        self.stats.disabled = true;
        self.pending = None;
        err
    }

    /// Wait for any pending rotation and helper threads, flush, and report.
    pub fn finish(mut self) -> LogWriterStats {
        let opened = self
            .pending
            .as_ref()
            .map(|p| p.rx.recv().unwrap_or_else(|_| Err(rotation_thread_gone())));
        if let Some(opened) = opened {
            if let Err(e) = self.complete_rotation(opened) {
                warn!("last rotation failed: {}", e);
            }
        }
        close_file(&mut self.active, &self.active_path);
        for handle in self.helpers.drain(..) {
            if handle.join().is_err() {
                warn!("log helper thread panicked");
            }
        }
        self.stats
    }

    /// Path of the file receiving frames (the pending one's predecessor during rotation).
    pub fn active_path(&self) -> &Path {
        &self.active_path
    }

    pub fn is_rotating(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_disabled(&self) -> bool {
        self.stats.disabled
    }

    pub fn stats(&self) -> &LogWriterStats {
        &self.stats
    }
}

impl std::fmt::Debug for RotatingLogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingLogWriter")
            .field("active_path", &self.active_path)
            .field("max_file_size", &self.max_file_size)
            .field("rotating", &self.pending.is_some())
            .field("stats", &self.stats)
            .finish()
    }
}

fn write_frame<W: Write>(out: &mut W, bytes: &[u8]) -> io::Result<()> {
    out.write_u32::<LittleEndian>(bytes.len() as u32)?;
    out.write_all(bytes)
}

fn close_file(writer: &mut BufWriter<File>, path: &Path) {
    let result = writer.flush().and_then(|_| writer.get_ref().sync_all());
    if let Err(e) = result {
        warn!("error closing {}: {}", path.display(), e);
    }
}

fn rotation_thread_gone() -> LogFileError {
    LogFileError::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        "rotation thread exited without a file",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logfile::reader::LogReader;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn read_records(path: &Path) -> Vec<Vec<u8>> {
        LogReader::open(path)
            .expect("open")
            .collect::<Result<Vec<_>, _>>()
            .expect("records")
    }

    #[test]
    fn test_round_trip_without_rotation() {
        let dir = TempDir::new().expect("tempdir");
        let config = LogWriterConfig::new(dir.path().join("noise.out"));
        let mut writer = RotatingLogWriter::create(&config).expect("create");

        let datagrams: Vec<Vec<u8>> = vec![vec![1, 2, 3], vec![], vec![0xAB; 300]];
        for d in &datagrams {
            writer.write(d).expect("write");
        }
        let stats = writer.finish();

        assert_eq!(stats.datagrams, 3);
        assert_eq!(stats.bytes, 3 * 4 + 3 + 300);
        assert_eq!(stats.files.len(), 1);
        assert_eq!(read_records(&stats.files[0]), datagrams);
    }

    #[test]
    fn test_rotation_partitions_frames() {
        let dir = TempDir::new().expect("tempdir");
        let config = LogWriterConfig::new(dir.path().join("noise.out")).max_file_size(20);
        let mut writer = RotatingLogWriter::create(&config).expect("create");

        let d1 = vec![1u8; 10];
        let d2 = vec![2u8; 10];
        let d3 = vec![3u8; 3];
        let d4 = vec![4u8; 5];

        writer.write(&d1).expect("write");
        assert!(!writer.is_rotating());
        // 14 + 14 bytes passes the 20 byte threshold.
        writer.write(&d2).expect("write");
        writer.write(&d3).expect("write");
        writer.write(&d4).expect("write");
        let stats = writer.finish();

        assert_eq!(stats.rotations, 1);
        assert_eq!(stats.files.len(), 2);
        assert_ne!(stats.files[0], stats.files[1]);
        assert_eq!(read_records(&stats.files[0]), vec![d1, d2]);
        assert_eq!(read_records(&stats.files[1]), vec![d3, d4]);
    }

    #[test]
    fn test_many_rotations_lose_nothing() {
        let dir = TempDir::new().expect("tempdir");
        let config = LogWriterConfig::new(dir.path().join("noise.out")).max_file_size(64);
        let mut writer = RotatingLogWriter::create(&config).expect("create");

        let frames: Vec<Vec<u8>> = (0..200u8).map(|i| vec![i; 1 + (i as usize % 40)]).collect();
        for f in &frames {
            writer.write(f).expect("write");
        }
        let stats = writer.finish();

        assert!(stats.files.len() > 1);
        let mut all = Vec::new();
        for file in &stats.files {
            all.extend(read_records(file));
        }
        assert_eq!(all, frames);
    }

    #[test]
    fn test_finished_helpers_are_joined() {
        let dir = TempDir::new().expect("tempdir");
        let config = LogWriterConfig::new(dir.path().join("noise.out")).max_file_size(8);
        let mut writer = RotatingLogWriter::create(&config).expect("create");

        let mut peak = 0;
        for i in 0..300u32 {
            writer.write(&i.to_le_bytes()).expect("write");
            peak = peak.max(writer.helpers.len());
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        let stats = writer.finish();

        assert!(stats.rotations > 10);
        assert!(peak < 32, "{} helper threads held", peak);
    }

    #[test]
    fn test_rotation_hook_runs() {
        let dir = TempDir::new().expect("tempdir");
        let config = LogWriterConfig::new(dir.path().join("noise.out")).max_file_size(8);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let mut writer = RotatingLogWriter::create(&config)
            .expect("create")
            .with_rotation_hook(Arc::new(move |_path: &Path| {
                seen.fetch_add(1, Ordering::SeqCst);
            }));

        writer.write(&[0u8; 16]).expect("write");
        let stats = writer.finish();

        assert_eq!(stats.rotations, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_create_fails_without_directory() {
        let dir = TempDir::new().expect("tempdir");
        let config = LogWriterConfig::new(dir.path().join("nowhere/noise.out"));
        let err = RotatingLogWriter::create(&config).expect_err("no dir");
        assert!(matches!(err, LogFileError::FileOpenFailed { .. }));
    }

    #[test]
    fn test_failed_rotation_disables_writer() {
        let dir = TempDir::new().expect("tempdir");
        let sub = dir.path().join("logs");
        std::fs::create_dir(&sub).expect("mkdir");
        let config = LogWriterConfig::new(sub.join("noise.out")).max_file_size(4);
        let mut writer = RotatingLogWriter::create(&config).expect("create");
        let first = writer.active_path().to_path_buf();

        // The next file cannot be created once the directory is gone.
        std::fs::remove_file(&first).expect("rm");
        std::fs::remove_dir(&sub).expect("rmdir");
        writer.write(&[9u8; 8]).expect("write");

        // Keep writing until the failed open is observed.
        let mut failed = false;
        for _ in 0..1000 {
            match writer.write(&[1u8]) {
                Ok(()) => thread::sleep(std::time::Duration::from_millis(1)),
                Err(LogFileError::FileOpenFailed { .. }) => {
                    failed = true;
                    break;
                }
                Err(other) => panic!("unexpected error {:?}", other),
            }
        }
        assert!(failed);
        assert!(writer.is_disabled());
        assert!(matches!(writer.write(&[1u8]), Err(LogFileError::Disabled)));
        assert!(writer.finish().disabled);
    }
}
