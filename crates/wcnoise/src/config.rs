// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Listener configuration.
//!
//! Supports both programmatic and file-based configuration.
//!
//! ```toml
//! [listener]
//! port = 55709
//! datagram_kinds = [107, 80]
//!
//! [log_file]
//! path = "/data/em710.wcd"
//! max_file_size = 50_000_000
//!
//! [aux_request]
//! remote = "192.168.1.20"
//! ```

use crate::control::{ControlEmitter, CONTROL_PORT, SENSOR_CODES};
use crate::decoder::TvgCorrection;
use crate::logfile::LogWriterConfig;
use crate::router::KindFilter;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default UDP port the echosounder streams to.
pub const DEFAULT_PORT: u16 = 55709;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WcConfig {
    #[serde(default)]
    pub listener: ListenerConfig,

    /// File logging; disabled when absent.
    #[serde(default)]
    pub log_file: Option<LogFileConfig>,

    #[serde(default)]
    pub decoder: DecoderConfig,

    /// Auxiliary data requests; disabled when absent.
    #[serde(default)]
    pub aux_request: Option<AuxRequestConfig>,
}

/// UDP listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// 0 binds an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bound on shutdown latency.
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,

    /// Requested `SO_RCVBUF`.
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,

    /// Type identifiers passed to the router. Empty passes nothing.
    #[serde(default = "default_datagram_kinds")]
    pub datagram_kinds: Vec<u8>,

    /// Keep a copy of every datagram in memory.
    #[serde(default)]
    pub memory_log: bool,

    /// Per-datagram diagnostics.
    #[serde(default)]
    pub debug: bool,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_receive_timeout_ms() -> u64 {
    1000
}

fn default_recv_buffer_size() -> usize {
    65_536
}

fn default_datagram_kinds() -> Vec<u8> {
    vec![107]
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: DEFAULT_PORT,
            receive_timeout_ms: default_receive_timeout_ms(),
            recv_buffer_size: default_recv_buffer_size(),
            datagram_kinds: default_datagram_kinds(),
            memory_log: false,
            debug: false,
        }
    }
}

impl ListenerConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn kind_filter(&self) -> KindFilter {
        KindFilter::allow(self.datagram_kinds.iter().copied())
    }
}

/// Log file settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogFileConfig {
    /// Template path; files are named `<stem>_<YYYYMMDDHHmm>.<ext>` beside it.
    pub path: PathBuf,

    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

fn default_max_file_size() -> u64 {
    1_000_000
}

impl LogFileConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_file_size: default_max_file_size(),
        }
    }

    pub fn writer_config(&self) -> LogWriterConfig {
        LogWriterConfig::new(&self.path).max_file_size(self.max_file_size)
    }
}

/// Gain compensation applied by the watercolumn decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderConfig {
    #[serde(default = "default_absorption")]
    pub absorption_db_per_m: f32,

    #[serde(default)]
    pub tvg_offset_db: f32,
}

fn default_absorption() -> f32 {
    TvgCorrection::default().absorption_db_per_m
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            absorption_db_per_m: default_absorption(),
            tvg_offset_db: 0.0,
        }
    }
}

impl DecoderConfig {
    pub fn tvg(&self) -> TvgCorrection {
        TvgCorrection {
            absorption_db_per_m: self.absorption_db_per_m,
            offset_db: self.tvg_offset_db,
        }
    }
}

/// Auxiliary data request settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxRequestConfig {
    /// Echosounder address.
    pub remote: IpAddr,

    #[serde(default = "default_control_port")]
    pub port: u16,

    #[serde(default = "default_pause_ms")]
    pub pause_ms: u64,

    #[serde(default = "default_codes")]
    pub codes: Vec<String>,

    /// Repeat the request whenever the log file rotates.
    #[serde(default = "default_true")]
    pub on_rotation: bool,
}

fn default_control_port() -> u16 {
    CONTROL_PORT
}

fn default_pause_ms() -> u64 {
    1000
}

fn default_codes() -> Vec<String> {
    SENSOR_CODES.iter().map(|c| c.to_string()).collect()
}

fn default_true() -> bool {
    true
}

impl AuxRequestConfig {
    pub fn new(remote: IpAddr) -> Self {
        Self {
            remote,
            port: CONTROL_PORT,
            pause_ms: default_pause_ms(),
            codes: default_codes(),
            on_rotation: true,
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        SocketAddr::new(self.remote, self.port)
    }

    pub fn emitter(&self) -> ControlEmitter {
        ControlEmitter::new()
            .with_codes(self.codes.iter().cloned())
            .with_pause(Duration::from_millis(self.pause_ms))
    }
}

impl WcConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let listener = &self.listener;
        if listener.receive_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "receive_timeout_ms must be greater than zero".into(),
            ));
        }
        if listener.recv_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "recv_buffer_size must be greater than zero".into(),
            ));
        }

        if let Some(log) = &self.log_file {
            if log.path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid("log_file.path is empty".into()));
            }
            if log.max_file_size == 0 {
                return Err(ConfigError::Invalid(
                    "log_file.max_file_size must be greater than zero".into(),
                ));
            }
        }

        let absorption = self.decoder.absorption_db_per_m;
        if !absorption.is_finite() || absorption < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "decoder.absorption_db_per_m must be a non-negative number, got {}",
                absorption
            )));
        }
        if !self.decoder.tvg_offset_db.is_finite() {
            return Err(ConfigError::Invalid("decoder.tvg_offset_db is not finite".into()));
        }

        if let Some(aux) = &self.aux_request {
            if aux.codes.is_empty() {
                return Err(ConfigError::Invalid("aux_request.codes is empty".into()));
            }
            for code in &aux.codes {
                if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(ConfigError::Invalid(format!(
                        "aux_request code '{}' must be alphanumeric",
                        code
                    )));
                }
            }
            if aux.port == 0 {
                return Err(ConfigError::Invalid("aux_request.port is zero".into()));
            }
        }

        Ok(())
    }
}
