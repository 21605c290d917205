// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP listener.
//!
//! Owns the socket and one receive thread. Each datagram is, in order,
//! appended to the log file, copied to the memory log, and routed. The
//! router, reassembly engine and log writer live on the receive thread;
//! consumers read completed pings through the shared [`PingSlot`].

use crate::config::{ListenerConfig, WcConfig};
use crate::datagram::{Datagram, RecordedDatagram, MAX_DATAGRAM_SIZE};
use crate::decoder::{Em107Decoder, TvgCorrection};
use crate::logfile::{LogWriterConfig, LogWriterStats, RotatingLogWriter, RotationHook};
use crate::reassembly::{FragmentOutcome, ReassemblyStats};
use crate::router::{DatagramRouter, RouteError, RouteOutcome, RouterStats};
use crate::slot::PingSlot;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Listener errors.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("cannot bind {addr}: {source}")]
    BindFailed { addr: SocketAddr, source: io::Error },

    #[error("Already listening")]
    AlreadyListening,

    #[error("Not listening")]
    NotListening,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("receive thread panicked")]
    WorkerPanicked,
}

/// Receive-side counters, updated by the receive thread.
#[derive(Debug, Default)]
pub struct ListenerMetrics {
    pub datagrams: AtomicU64,
    pub bytes: AtomicU64,
    pub receive_errors: AtomicU64,
    pub filtered: AtomicU64,
    pub malformed: AtomicU64,
    pub pings_completed: AtomicU64,
    pub pings_discarded: AtomicU64,
}

/// Point-in-time copy of [`ListenerMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub datagrams: u64,
    pub bytes: u64,
    pub receive_errors: u64,
    pub filtered: u64,
    pub malformed: u64,
    pub pings_completed: u64,
    pub pings_discarded: u64,
}

impl ListenerMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            datagrams: self.datagrams.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            pings_completed: self.pings_completed.load(Ordering::Relaxed),
            pings_discarded: self.pings_discarded.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &Result<RouteOutcome, RouteError>) {
        match outcome {
            Ok(RouteOutcome::Filtered(_)) => {
                self.filtered.fetch_add(1, Ordering::Relaxed);
            }
            Ok(RouteOutcome::Recorded(_)) => {}
            Ok(RouteOutcome::Fragment(fragment)) => {
                let abandoned = match fragment {
                    FragmentOutcome::Completed { abandoned, .. } => {
                        self.pings_completed.fetch_add(1, Ordering::Relaxed);
                        abandoned.is_some()
                    }
                    FragmentOutcome::Accumulating { abandoned, .. } => abandoned.is_some(),
                    FragmentOutcome::Duplicate { .. } => false,
                };
                if abandoned {
                    self.pings_discarded.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(_) => {
                self.malformed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// In-memory copy of every received datagram.
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<RecordedDatagram>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, datagram: RecordedDatagram) {
        self.entries.lock().push(datagram);
    }

    /// Copy of all entries.
    pub fn snapshot(&self) -> Vec<RecordedDatagram> {
        self.entries.lock().clone()
    }

    /// Take all entries, leaving the log empty.
    pub fn drain(&self) -> Vec<RecordedDatagram> {
        std::mem::take(&mut *self.entries.lock())
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Final report returned by [`UdpListener::stop`].
#[derive(Debug, Clone, Default)]
pub struct ListenerSummary {
    pub metrics: MetricsSnapshot,
    pub router: RouterStats,
    pub reassembly: ReassemblyStats,
    /// `None` when file logging was not configured. `disabled` is set when
    /// a log file could not be opened.
    pub log_file: Option<LogWriterStats>,
}

struct WorkerReport {
    router: RouterStats,
    reassembly: ReassemblyStats,
    log_file: Option<LogWriterStats>,
}

struct Worker {
    socket: UdpSocket,
    router: DatagramRouter<Em107Decoder>,
    writer: Option<RotatingLogWriter>,
    log_disabled: bool,
    memory_log: Option<Arc<MemoryLog>>,
    metrics: Arc<ListenerMetrics>,
    running: Arc<AtomicBool>,
    debug: bool,
}

/// UDP listener for the echosounder data stream.
pub struct UdpListener {
    config: ListenerConfig,
    log_file: Option<LogWriterConfig>,
    tvg: TvgCorrection,
    rotation_hook: Option<RotationHook>,
    slot: Arc<PingSlot>,
    memory_log: Arc<MemoryLog>,
    metrics: Arc<ListenerMetrics>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<WorkerReport>>,
    local_addr: Option<SocketAddr>,
}

impl UdpListener {
    /// Create a stopped listener.
    pub fn new(config: ListenerConfig) -> Self {
        Self {
            config,
            log_file: None,
            tvg: TvgCorrection::default(),
            rotation_hook: None,
            slot: Arc::new(PingSlot::new()),
            memory_log: Arc::new(MemoryLog::new()),
            metrics: Arc::new(ListenerMetrics::default()),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            local_addr: None,
        }
    }

    /// Listener wired from a full configuration, auxiliary requests included.
    pub fn from_config(config: &WcConfig) -> Self {
        let mut listener = Self::new(config.listener.clone()).with_tvg(config.decoder.tvg());
        if let Some(log) = &config.log_file {
            listener = listener.with_log_file(log.writer_config());
        }
        if let Some(aux) = config.aux_request.as_ref().filter(|a| a.on_rotation) {
            listener = listener.with_rotation_hook(aux.emitter().into_rotation_hook(aux.remote_addr()));
        }
        listener
    }

    /// Log every datagram to rotating files.
    pub fn with_log_file(mut self, config: LogWriterConfig) -> Self {
        self.log_file = Some(config);
        self
    }

    pub fn with_tvg(mut self, tvg: TvgCorrection) -> Self {
        self.tvg = tvg;
        self
    }

    /// Run `hook` whenever the log file rotates.
    pub fn with_rotation_hook(mut self, hook: RotationHook) -> Self {
        self.rotation_hook = Some(hook);
        self
    }

    /// Bind the socket and start the receive thread.
    ///
    /// Returns the bound address (useful with port 0).
    pub fn start(&mut self) -> Result<SocketAddr, ListenerError> {
        if self.worker.is_some() {
            return Err(ListenerError::AlreadyListening);
        }

        let socket = self.bind()?;
        let local_addr = socket.local_addr()?;

        // A log file that cannot be opened only turns file logging off.
        let mut log_disabled = false;
        let writer = match &self.log_file {
            Some(config) => match RotatingLogWriter::create(config) {
                Ok(mut writer) => {
                    if let Some(hook) = &self.rotation_hook {
                        writer = writer.with_rotation_hook(Arc::clone(hook));
                    }
                    Some(writer)
                }
                Err(e) => {
                    error!("{}; file logging disabled", e);
                    log_disabled = true;
                    None
                }
            },
            None => None,
        };

        let router = DatagramRouter::with_decoder(
            self.config.kind_filter(),
            Em107Decoder::new(self.tvg),
            Arc::clone(&self.slot),
        );

        self.running.store(true, Ordering::Release);
        let worker = Worker {
            socket,
            router,
            writer,
            log_disabled,
            memory_log: self.config.memory_log.then(|| Arc::clone(&self.memory_log)),
            metrics: Arc::clone(&self.metrics),
            running: Arc::clone(&self.running),
            debug: self.config.debug,
        };

        let handle = thread::Builder::new()
            .name("wcnoise-rx".into())
            .spawn(move || worker.run());
        match handle {
            Ok(handle) => self.worker = Some(handle),
            Err(e) => {
                self.running.store(false, Ordering::Release);
                return Err(e.into());
            }
        }

        self.local_addr = Some(local_addr);
        info!(
            "Listening on {} (types: {:?})",
            local_addr, self.config.datagram_kinds
        );
        Ok(local_addr)
    }

    fn bind(&self) -> Result<UdpSocket, ListenerError> {
        let addr = self.config.bind_addr();
        let bind_failed = |source| ListenerError::BindFailed { addr, source };

        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
            .map_err(bind_failed)?;
        if let Err(e) = socket.set_recv_buffer_size(self.config.recv_buffer_size) {
            warn!("cannot set receive buffer to {} bytes: {}", self.config.recv_buffer_size, e);
        }
        socket.bind(&addr.into()).map_err(bind_failed)?;

        let socket: UdpSocket = socket.into();
        socket.set_read_timeout(Some(self.config.receive_timeout()))?;
        Ok(socket)
    }

    /// Stop the receive thread and close the socket.
    ///
    /// Returns within roughly one receive timeout.
    pub fn stop(&mut self) -> Result<ListenerSummary, ListenerError> {
        let handle = self.worker.take().ok_or(ListenerError::NotListening)?;
        self.running.store(false, Ordering::Release);
        let report = handle.join().map_err(|_| ListenerError::WorkerPanicked)?;
        self.local_addr = None;

        let summary = ListenerSummary {
            metrics: self.metrics.snapshot(),
            router: report.router,
            reassembly: report.reassembly,
            log_file: report.log_file,
        };
        info!(
            "Stopped listening: {} datagrams, {} pings completed, {} discarded",
            summary.metrics.datagrams, summary.metrics.pings_completed, summary.metrics.pings_discarded
        );
        Ok(summary)
    }

    pub fn is_listening(&self) -> bool {
        self.worker.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Completed pings.
    pub fn slot(&self) -> &Arc<PingSlot> {
        &self.slot
    }

    pub fn memory_log(&self) -> &Arc<MemoryLog> {
        &self.memory_log
    }

    pub fn metrics(&self) -> &Arc<ListenerMetrics> {
        &self.metrics
    }
}

impl Drop for UdpListener {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.stop() {
                warn!("listener shutdown failed: {}", e);
            }
        }
    }
}

impl Worker {
    fn run(mut self) -> WorkerReport {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        while self.running.load(Ordering::Acquire) {
            match self.socket.recv_from(&mut buf) {
                Ok((n, sender)) => self.handle(Datagram::new(&buf[..n], sender)),
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    trace!("receive timeout");
                    self.flush_log();
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.metrics.receive_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("receive error: {}", e);
                }
            }
        }

        WorkerReport {
            router: self.router.stats().clone(),
            reassembly: self.router.engine().stats().clone(),
            log_file: match self.writer {
                Some(writer) => Some(writer.finish()),
                None if self.log_disabled => Some(LogWriterStats {
                    disabled: true,
                    ..Default::default()
                }),
                None => None,
            },
        }
    }

    fn handle(&mut self, datagram: Datagram<'_>) {
        self.metrics.datagrams.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .bytes
            .fetch_add(datagram.len() as u64, Ordering::Relaxed);

        if self.debug {
            match datagram.kind() {
                Some(kind) => info!("{} bytes from {}: {}", datagram.len(), datagram.sender, kind),
                None => info!("{} bytes from {}", datagram.len(), datagram.sender),
            }
        }

        if let Some(writer) = &mut self.writer {
            if let Err(e) = writer.write(datagram.payload) {
                debug!("datagram not logged: {}", e);
            }
        }

        if let Some(memory_log) = &self.memory_log {
            memory_log.push(datagram.to_recorded());
        }

        let outcome = self.router.route(&datagram);
        self.metrics.record(&outcome);
        if let Err(e) = outcome {
            warn!("dropping datagram from {}: {}", datagram.sender, e);
        }
    }

    fn flush_log(&mut self) {
        if let Some(writer) = &mut self.writer {
            if !writer.is_disabled() {
                if let Err(e) = writer.flush() {
                    debug!("log flush failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn loopback_config() -> ListenerConfig {
        ListenerConfig {
            bind_address: Ipv4Addr::LOCALHOST.into(),
            port: 0,
            receive_timeout_ms: 50,
            ..Default::default()
        }
    }

    #[test]
    fn test_stop_without_start() {
        let mut listener = UdpListener::new(loopback_config());
        assert!(matches!(listener.stop(), Err(ListenerError::NotListening)));
    }

    #[test]
    fn test_start_twice() {
        let mut listener = UdpListener::new(loopback_config());
        listener.start().expect("start");
        assert!(matches!(listener.start(), Err(ListenerError::AlreadyListening)));
        listener.stop().expect("stop");
        assert!(!listener.is_listening());
    }

    #[test]
    fn test_bind_failure_is_reported() {
        let taken = UdpSocket::bind("127.0.0.1:0").expect("bind");
        let port = taken.local_addr().expect("addr").port();

        let mut listener = UdpListener::new(ListenerConfig {
            port,
            ..loopback_config()
        });
        let err = listener.start().expect_err("port in use");
        assert!(matches!(err, ListenerError::BindFailed { .. }));
        assert!(!listener.is_listening());
        assert!(listener.local_addr().is_none());
    }

    #[test]
    fn test_memory_log_records_everything() {
        let mut listener = UdpListener::new(ListenerConfig {
            memory_log: true,
            datagram_kinds: vec![],
            ..loopback_config()
        });
        let addr = listener.start().expect("start");

        let sender = UdpSocket::bind("127.0.0.1:0").expect("bind");
        sender.send_to(&[0x02, 80, 1, 2, 3], addr).expect("send");
        sender.send_to(&[0x02, 68, 4], addr).expect("send");

        for _ in 0..200 {
            if listener.memory_log().len() == 2 {
                break;
            }
            thread::sleep(std::time::Duration::from_millis(10));
        }
        let summary = listener.stop().expect("stop");

        let entries = listener.memory_log().snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].payload, vec![0x02, 80, 1, 2, 3]);
        assert_eq!(summary.metrics.datagrams, 2);
        assert_eq!(summary.metrics.filtered, 2);
        assert!(summary.log_file.is_none());

        assert_eq!(listener.memory_log().drain().len(), 2);
        assert!(listener.memory_log().is_empty());
    }

    #[test]
    fn test_unopenable_log_file_keeps_listening() {
        use crate::decoder::fixture::{encode_datagram, BeamSpec, FragmentSpec};

        let dir = tempfile::TempDir::new().expect("tempdir");
        let mut listener = UdpListener::new(loopback_config())
            .with_log_file(LogWriterConfig::new(dir.path().join("missing").join("em710.wcd")));
        let addr = listener.start().expect("start without file logging");
        assert!(listener.is_listening());

        let ping = encode_datagram(&FragmentSpec {
            ping: 12,
            fragment_count: 1,
            fragment_number: 1,
            total_beams: 2,
            beams: vec![
                BeamSpec::new(-30.0, 15, vec![-40; 20]),
                BeamSpec::new(30.0, 15, vec![-40; 20]),
            ],
        });
        let sender = UdpSocket::bind("127.0.0.1:0").expect("bind");
        sender.send_to(&ping, addr).expect("send");

        let assembled = listener
            .slot()
            .wait(std::time::Duration::from_secs(5))
            .expect("ping");
        assert_eq!(assembled.ping_id, 12);

        let summary = listener.stop().expect("stop");
        let log = summary.log_file.expect("log stats");
        assert!(log.disabled);
        assert!(log.files.is_empty());
        assert_eq!(summary.metrics.pings_completed, 1);
    }

    #[test]
    fn test_stop_after_rotation_skips_aux_burst() {
        use crate::control::{request_message, ControlEmitter};
        use std::time::{Duration, Instant};

        let sonar = UdpSocket::bind("127.0.0.1:0").expect("bind");
        sonar
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("timeout");
        let hook = ControlEmitter::new()
            .with_pause(Duration::from_secs(1))
            .into_rotation_hook(sonar.local_addr().expect("addr"));

        let dir = tempfile::TempDir::new().expect("tempdir");
        let mut listener = UdpListener::new(loopback_config())
            .with_log_file(LogWriterConfig::new(dir.path().join("em710.wcd")).max_file_size(8))
            .with_rotation_hook(hook);
        let addr = listener.start().expect("start");

        let sender = UdpSocket::bind("127.0.0.1:0").expect("bind");
        sender.send_to(&[0x02, 80, 0, 0, 0, 0, 0, 0], addr).expect("send");

        // The first request arrives once the rotation hook has fired.
        let mut buf = [0u8; 64];
        let (n, _) = sonar.recv_from(&mut buf).expect("aux request");
        assert_eq!(&buf[..n], request_message("710").as_bytes());

        let started = Instant::now();
        let summary = listener.stop().expect("stop");
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(summary.log_file.expect("log stats").rotations, 1);
    }
}
