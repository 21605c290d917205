// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! wcnoise-replay - Route recorded datagram logs through the ping reassembly.
//!
//! Usage:
//!   wcnoise-replay em710_201602140905.wcd
//!   wcnoise-replay --kinds 107,80 /data/*.wcd

use anyhow::Context;
use clap::Parser;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wcnoise::{
    Datagram, DatagramRouter, Em107Decoder, KindFilter, LogReader, NoiseMonitor, PingSlot,
    TvgCorrection,
};

#[derive(Parser, Debug)]
#[command(name = "wcnoise-replay")]
#[command(about = "Route recorded datagram logs through the ping reassembly")]
#[command(version)]
struct Args {
    /// Log files, in recording order
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Datagram type identifiers to route, comma separated
    #[arg(short, long, value_delimiter = ',', default_value = "107")]
    kinds: Vec<u8>,

    /// Absorption coefficient for gain compensation (dB/m)
    #[arg(long, default_value = "0.030")]
    absorption: f32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Quiet mode (summary only)
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let slot = Arc::new(PingSlot::new());
    let tvg = TvgCorrection {
        absorption_db_per_m: args.absorption,
        ..TvgCorrection::default()
    };
    let mut router = DatagramRouter::with_decoder(
        KindFilter::allow(args.kinds.iter().copied()),
        Em107Decoder::new(tvg),
        Arc::clone(&slot),
    );
    let sender = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
    let mut monitor: Option<NoiseMonitor> = None;

    for input in &args.inputs {
        let reader = LogReader::open(input).with_context(|| format!("opening {}", input.display()))?;
        info!("Replaying {}", input.display());

        for record in reader {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    warn!("{}: {}", input.display(), e);
                    break;
                }
            };
            if let Err(e) = router.route(&Datagram::new(&record, sender)) {
                warn!("skipping datagram: {}", e);
                continue;
            }
            if let Some(ping) = slot.take() {
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
        }
    }

    let stats = router.stats();
    let reassembly = router.engine().stats();
    info!("Replay complete");
    info!("  Datagrams: {}", stats.total());
    info!("  Filtered: {}", stats.filtered);
    info!("  Malformed: {}", stats.malformed);
    info!("  Pings: {}", reassembly.pings_completed);
    info!("  Discarded pings: {}", reassembly.pings_discarded);
    for (kind, count) in &stats.received {
        info!("  {}: {}", kind, count);
    }

    Ok(())
}
