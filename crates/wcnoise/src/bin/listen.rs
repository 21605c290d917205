// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! wcnoise-listen - Listen to a multibeam echosounder and monitor watercolumn noise.
//!
//! Usage:
//!   wcnoise-listen
//!   wcnoise-listen --port 55709 --log-file /data/em710.wcd --max-file-size 50000000
//!   wcnoise-listen --config wcnoise.toml --aux-request 192.168.1.20

use anyhow::Context;
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wcnoise::config::{AuxRequestConfig, LogFileConfig};
use wcnoise::{NoiseMonitor, UdpListener, WcConfig};

#[derive(Parser, Debug)]
#[command(name = "wcnoise-listen")]
#[command(about = "Listen to a multibeam echosounder and monitor watercolumn noise")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Local address to bind
    #[arg(long)]
    bind: Option<IpAddr>,

    /// UDP port to listen on (0 = any free port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Datagram type identifiers to route, comma separated
    #[arg(short, long, value_delimiter = ',')]
    kinds: Option<Vec<u8>>,

    /// Receive timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Log raw datagrams to files named after this path
    #[arg(short, long)]
    log_file: Option<PathBuf>,

    /// Rotate log files after this many bytes
    #[arg(long)]
    max_file_size: Option<u64>,

    /// Keep received datagrams in memory
    #[arg(long)]
    memory_log: bool,

    /// Request auxiliary data from the echosounder at this address
    #[arg(long)]
    aux_request: Option<IpAddr>,

    /// Absorption coefficient for gain compensation (dB/m)
    #[arg(long)]
    absorption: Option<f32>,

    /// Per-datagram diagnostics
    #[arg(short, long)]
    debug: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Quiet mode (no per-ping output)
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    /// Command-line values override the configuration file.
    fn apply(&self, config: &mut WcConfig) {
        let listener = &mut config.listener;
        if let Some(bind) = self.bind {
            listener.bind_address = bind;
        }
        if let Some(port) = self.port {
            listener.port = port;
        }
        if let Some(kinds) = &self.kinds {
            listener.datagram_kinds = kinds.clone();
        }
        if let Some(timeout) = self.timeout_ms {
            listener.receive_timeout_ms = timeout;
        }
        listener.memory_log |= self.memory_log;
        listener.debug |= self.debug;

        if let Some(path) = &self.log_file {
            let mut log = LogFileConfig::new(path);
            if let Some(existing) = &config.log_file {
                log.max_file_size = existing.max_file_size;
            }
            config.log_file = Some(log);
        }
        if let (Some(size), Some(log)) = (self.max_file_size, config.log_file.as_mut()) {
            log.max_file_size = size;
        }

        if let Some(remote) = self.aux_request {
            config.aux_request = Some(match config.aux_request.take() {
                Some(existing) => AuxRequestConfig { remote, ..existing },
                None => AuxRequestConfig::new(remote),
            });
        }
        if let Some(absorption) = self.absorption {
            config.decoder.absorption_db_per_m = absorption;
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.debug { "debug" } else { args.log_level.as_str() };
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = match &args.config {
        Some(path) => WcConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => WcConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    info!("wcnoise listener v{}", env!("CARGO_PKG_VERSION"));

    let mut listener = UdpListener::from_config(&config);
    let addr = listener.start().context("starting listener")?;
    info!("Listening on {}. Press Ctrl+C to stop.", addr);

    // The first log file gets auxiliary data too, not only rotated ones.
    if let Some(aux) = config.aux_request.clone() {
        let spawned = std::thread::Builder::new()
            .name("wcnoise-aux".into())
            .spawn(move || {
                if let Err(e) = aux.emitter().request_auxiliary_data(aux.remote_addr()) {
                    warn!("auxiliary data request failed: {}", e);
                }
            });
        if let Err(e) = spawned {
            warn!("cannot start auxiliary data request: {}", e);
        }
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let mut monitor: Option<NoiseMonitor> = None;
    let mut last_report = Instant::now();

    while running.load(Ordering::SeqCst) {
        if let Some(ping) = listener.slot().wait(Duration::from_millis(200)) {
            let monitor = monitor.get_or_insert_with(|| NoiseMonitor::new(&ping));
            let frame = monitor.update(&ping);
            if !args.quiet {
                info!(
                    "ping {}: {} beams x {} samples, detection at {}, beam noise {:.1}..{:.1} dB",
                    ping.ping_id,
                    ping.beam_count,
                    ping.sample_count,
                    ping.min_detection_range,
                    frame.beam_average_range.min,
                    frame.beam_average_range.max
                );
            }
        }

        if !args.quiet && last_report.elapsed() >= Duration::from_secs(10) {
            let m = listener.metrics().snapshot();
            info!(
                "{} datagrams ({:.1} MB), {} pings, {} discarded, {} malformed",
                m.datagrams,
                m.bytes as f64 / 1_048_576.0,
                m.pings_completed,
                m.pings_discarded,
                m.malformed
            );
            last_report = Instant::now();
        }
    }

    let summary = listener.stop()?;
    info!("Listener stopped");
    info!("  Datagrams: {}", summary.metrics.datagrams);
    info!("  Pings: {}", summary.metrics.pings_completed);
    info!("  Discarded pings: {}", summary.metrics.pings_discarded);
    info!("  Malformed: {}", summary.metrics.malformed);
    for (kind, count) in &summary.router.received {
        info!("  {}: {}", kind, count);
    }
    if let Some(log) = &summary.log_file {
        for file in &log.files {
            info!("  File: {}", file.display());
        }
    }

    Ok(())
}
