// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Raw echosounder datagrams and their type identifiers.
//!
//! # Common header
//!
//! ```text
//! +-----+------+-------+------+------+------+--------+
//! | STX | type | model | date | time | ping | serial |
//! |  1  |  1   |   2   |  4   |  4   |  2   |   2    |
//! +-----+------+-------+------+------+------+--------+
//! ```
//!
//! All multi-byte fields are little endian.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Offset of the type identifier byte.
pub const KIND_OFFSET: usize = 1;

/// Offset of the ping counter; type-specific payload starts here.
pub const PING_OFFSET: usize = 12;

/// Largest datagram the listener will receive.
pub const MAX_DATAGRAM_SIZE: usize = 65_536;

/// Echosounder datagram type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatagramKind(pub u8);

impl DatagramKind {
    pub const PU_STATUS: Self = Self(49);
    pub const ATTITUDE: Self = Self(65);
    pub const BIST_OUTPUT: Self = Self(66);
    pub const CLOCK: Self = Self(67);
    pub const DEPTH: Self = Self(68);
    pub const SURFACE_SOUND_SPEED: Self = Self(71);
    pub const HEADING: Self = Self(72);
    pub const INSTALLATION_START: Self = Self(73);
    pub const RAW_RANGE_ANGLE_78: Self = Self(78);
    pub const POSITION: Self = Self(80);
    pub const RUNTIME_PARAMETERS: Self = Self(82);
    pub const SEABED_IMAGE: Self = Self(83);
    pub const SOUND_SPEED_PROFILE: Self = Self(85);
    pub const XYZ_88: Self = Self(88);
    pub const SEABED_IMAGERY_89: Self = Self(89);
    pub const RAW_BEAM_ANGLE: Self = Self(102);
    pub const INSTALLATION_STOP: Self = Self(105);
    pub const WATERCOLUMN: Self = Self(107);
    pub const NETWORK_ATTITUDE: Self = Self(110);

    /// Read the type identifier from a raw datagram.
    pub fn of(bytes: &[u8]) -> Option<Self> {
        bytes.get(KIND_OFFSET).copied().map(Self)
    }

    pub fn id(self) -> u8 {
        self.0
    }

    /// Human-readable name, "Unknown" for identifiers outside the table.
    pub fn name(self) -> &'static str {
        match self.0 {
            49 => "PU Status",
            65 => "Attitude",
            66 => "BIST Output",
            67 => "Clock",
            68 => "Depth",
            71 => "Surface Sound Speed",
            72 => "Heading",
            73 => "Installation Parameters (start)",
            78 => "Raw Range and Angle (78)",
            80 => "Position",
            82 => "Runtime Parameters",
            83 => "Seabed Image",
            85 => "Sound Speed Profile (new)",
            88 => "XYZ (88)",
            89 => "Seabed Imagery (89)",
            102 => "Raw Beam and Angle (new)",
            105 => "Installation Parameters (stop)",
            107 => "Watercolumn",
            110 => "Network Attitude Velocity",
            _ => "Unknown",
        }
    }

    pub fn is_known(self) -> bool {
        self.name() != "Unknown"
    }
}

impl fmt::Display for DatagramKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/0x{:02x} ({})", self.0, self.0, self.name())
    }
}

impl From<u8> for DatagramKind {
    fn from(id: u8) -> Self {
        Self(id)
    }
}

/// A datagram as received, borrowed from the listener's receive buffer.
#[derive(Debug, Clone, Copy)]
pub struct Datagram<'a> {
    pub payload: &'a [u8],
    pub sender: SocketAddr,
    pub received_at: DateTime<Utc>,
}

impl<'a> Datagram<'a> {
    pub fn new(payload: &'a [u8], sender: SocketAddr) -> Self {
        Self {
            payload,
            sender,
            received_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> Option<DatagramKind> {
        DatagramKind::of(self.payload)
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Copy out of the receive buffer.
    pub fn to_recorded(&self) -> RecordedDatagram {
        RecordedDatagram {
            payload: self.payload.to_vec(),
            sender: self.sender,
            received_at: self.received_at,
        }
    }
}

/// Owned copy of a datagram, kept by the memory log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedDatagram {
    pub payload: Vec<u8>,
    pub sender: SocketAddr,
    pub received_at: DateTime<Utc>,
}

impl RecordedDatagram {
    pub fn as_datagram(&self) -> Datagram<'_> {
        Datagram {
            payload: &self.payload,
            sender: self.sender,
            received_at: self.received_at,
        }
    }
}
