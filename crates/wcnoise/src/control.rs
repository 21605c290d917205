// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Auxiliary data requests sent to the echosounder.
//!
//! The sonar model is not configured, so a request is sent for each known
//! model code in turn and whichever matches answers on the normal data
//! stream. Messages are NMEA-style sentences:
//!
//! ```text
//! $SMR20,EMX=<code>,*<hh>\<CR><LF>
//! ```
//!
//! `hh` is the lowercase hex XOR of every byte between `$` and `*`.

use crate::logfile::RotationHook;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// UDP port the echosounder listens on for requests.
pub const CONTROL_PORT: u16 = 4001;

/// Model codes tried in order.
pub const SENSOR_CODES: [&str; 5] = ["710", "122", "302", "3020", "2040"];

/// Pause after each request.
pub const DEFAULT_PAUSE: Duration = Duration::from_secs(1);

/// Control emitter errors.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("cannot open control socket: {0}")]
    Socket(#[from] io::Error),

    #[error("sending request {code} to {remote} failed: {source}")]
    SendFailed {
        code: String,
        remote: SocketAddr,
        source: io::Error,
    },
}

/// XOR of all bytes.
pub fn nmea_checksum(body: &[u8]) -> u8 {
    body.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// Request sentence for one model code.
pub fn request_message(code: &str) -> String {
    let body = format!("SMR20,EMX={},", code);
    format!("${}*{:02x}\\\r\n", body, nmea_checksum(body.as_bytes()))
}

/// Control address on `ip`.
pub fn control_address(ip: impl Into<std::net::IpAddr>) -> SocketAddr {
    SocketAddr::new(ip.into(), CONTROL_PORT)
}

/// Result of one request burst.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmitReport {
    /// Codes sent successfully.
    pub sent: Vec<String>,
    /// Codes whose send failed.
    pub failed: Vec<String>,
}

/// Sends the auxiliary data request burst.
#[derive(Debug, Clone)]
pub struct ControlEmitter {
    codes: Vec<String>,
    pause: Duration,
}

impl Default for ControlEmitter {
    fn default() -> Self {
        Self {
            codes: SENSOR_CODES.iter().map(|c| c.to_string()).collect(),
            pause: DEFAULT_PAUSE,
        }
    }
}

impl ControlEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the model codes.
    pub fn with_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.codes = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    /// Send one request per code to `remote`, pausing after each.
    ///
    /// Nothing is acknowledged or retried. A failed send is logged and
    /// recorded in the report; the remaining codes are still tried.
    pub fn request_auxiliary_data(&self, remote: SocketAddr) -> Result<EmitReport, ControlError> {
        let local: SocketAddr = if remote.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)?;

        let mut report = EmitReport::default();
        for code in &self.codes {
            let message = request_message(code);
            match socket.send_to(message.as_bytes(), remote) {
                Ok(_) => {
                    debug!("requested auxiliary data from model {} at {}", code, remote);
                    report.sent.push(code.clone());
                }
                Err(source) => {
                    let err = ControlError::SendFailed {
                        code: code.clone(),
                        remote,
                        source,
                    };
                    warn!("{}", err);
                    report.failed.push(code.clone());
                }
            }
            if !self.pause.is_zero() {
                thread::sleep(self.pause);
            }
        }

        info!(
            "Auxiliary data request to {}: {} sent, {} failed",
            remote,
            report.sent.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Hook for the log writer: request auxiliary data after each rotation so
    /// every log file carries installation and sound speed records.
    ///
    /// The burst runs on a detached thread; the hook returns at once and
    /// shutdown never waits for the pauses.
    pub fn into_rotation_hook(self, remote: SocketAddr) -> RotationHook {
        let emitter = Arc::new(self);
        Arc::new(move |path: &Path| {
            debug!("new log file {}, requesting auxiliary data", path.display());
            let emitter = Arc::clone(&emitter);
            let spawned = thread::Builder::new()
                .name("wcnoise-aux".into())
                .spawn(move || {
                    if let Err(e) = emitter.request_auxiliary_data(remote) {
                        warn!("auxiliary data request failed: {}", e);
                    }
                });
            if let Err(e) = spawned {
                warn!("cannot start auxiliary data request: {}", e);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum() {
        assert_eq!(nmea_checksum(b""), 0);
        assert_eq!(nmea_checksum(&[0x41, 0x41]), 0);
        assert_eq!(nmea_checksum(&[0x0f, 0xf0]), 0xff);
    }

    #[test]
    fn test_request_message_format() {
        // XOR of "SMR20,EMX=710," is 0x15.
        assert_eq!(request_message("710").as_bytes(), b"$SMR20,EMX=710,*15\\\r\n");
    }

    #[test]
    fn test_checksum_is_lowercase_hex() {
        for code in SENSOR_CODES {
            let msg = request_message(code);
            let star = msg.find('*').expect("star");
            let hex = &msg[star + 1..star + 3];
            assert!(hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        }
    }

    #[test]
    fn test_burst_sends_every_code() {
        let receiver = UdpSocket::bind("127.0.0.1:0").expect("bind");
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .expect("timeout");
        let remote = receiver.local_addr().expect("addr");

        let emitter = ControlEmitter::new().with_pause(Duration::ZERO);
        let report = emitter.request_auxiliary_data(remote).expect("emit");
        assert_eq!(report.sent, SENSOR_CODES.to_vec());
        assert!(report.failed.is_empty());

        let mut buf = [0u8; 64];
        for code in SENSOR_CODES {
            let (n, _) = receiver.recv_from(&mut buf).expect("recv");
            assert_eq!(&buf[..n], request_message(code).as_bytes());
        }
    }

    #[test]
    fn test_rotation_hook_does_not_block() {
        let receiver = UdpSocket::bind("127.0.0.1:0").expect("bind");
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .expect("timeout");
        let remote = receiver.local_addr().expect("addr");

        let hook = ControlEmitter::new()
            .with_pause(Duration::from_secs(1))
            .into_rotation_hook(remote);
        let started = std::time::Instant::now();
        hook(Path::new("noise_202602140905.out"));
        assert!(started.elapsed() < Duration::from_millis(500));

        let mut buf = [0u8; 64];
        let (n, _) = receiver.recv_from(&mut buf).expect("recv");
        assert_eq!(&buf[..n], request_message("710").as_bytes());
    }

    #[test]
    fn test_control_address() {
        let addr = control_address(Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(addr.to_string(), "10.0.0.5:4001");
    }
}
