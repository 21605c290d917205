// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! wcnoise - multibeam watercolumn listener
//!
//! Listens to the UDP data stream of a Kongsberg EM multibeam echosounder,
//! reassembles fragmented watercolumn pings (datagram 107) and logs the raw
//! stream to size-rotated files.
//!
//! # Quick Start
//!
//! ```bash
//! # Listen on the default port, log to /data/em710_<time>.wcd
//! wcnoise-listen --log-file /data/em710.wcd
//!
//! # Also request installation and sound speed data from the sonar
//! wcnoise-listen --log-file /data/em710.wcd --aux-request 192.168.1.20
//!
//! # Re-run the reassembly over a recorded log
//! wcnoise-replay /data/em710_201602140905.wcd
//! ```
//!
//! # Pipeline
//!
//! | Stage | Type |
//! |-------|------|
//! | Socket receive | [`UdpListener`] |
//! | Raw log | [`RotatingLogWriter`] |
//! | Type dispatch | [`DatagramRouter`] |
//! | Fragment decode | [`Em107Decoder`] |
//! | Ping assembly | [`PingReassembler`] |
//! | Consumer handoff | [`PingSlot`] |
//! | Noise views | [`NoiseMonitor`] |

pub mod config;
pub mod control;
pub mod datagram;
pub mod decoder;
pub mod listener;
pub mod logfile;
pub mod matrix;
pub mod monitor;
pub mod reassembly;
pub mod router;
pub mod slot;

pub use config::{ConfigError, WcConfig};
pub use control::{ControlEmitter, ControlError, EmitReport};
pub use datagram::{Datagram, DatagramKind, RecordedDatagram};
pub use decoder::{DecodeError, Em107Decoder, TvgCorrection, WatercolumnDecoder, WatercolumnFragment};
pub use listener::{ListenerError, ListenerSummary, MemoryLog, MetricsSnapshot, UdpListener};
pub use logfile::{LogFileError, LogReader, LogWriterConfig, LogWriterStats, RotatingLogWriter};
pub use matrix::Matrix;
pub use monitor::{ColorRange, ColorRangeTracker, MonitorFrame, NoiseMonitor};
pub use reassembly::{AssembledPing, AssemblyState, FragmentOutcome, PingReassembler, ReassemblyError};
pub use router::{DatagramRouter, KindFilter, RouteError, RouteOutcome};
pub use slot::PingSlot;
