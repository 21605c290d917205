// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Watercolumn (datagram 107) record decoder.
//!
//! The router hands the decoder everything from the ping counter onwards
//! (the datagram minus its first 12 bytes).
//!
//! # Fragment layout
//!
//! ```text
//! +------+--------+--------+-------+-----+-------------+-----+
//! | ping | serial | n_dgms | dgm # | ntx | total beams | nrx |   2 bytes each
//! +------+--------+--------+-------+-----+-------------+-----+
//! | sound speed dm/s (2) | sample rate 0.01 Hz (4) | heave cm (2) |
//! | TVG X (1) | TVG C (1, signed) | scanning (1) | spare (3)      |
//! +-----------------------------------------------------------------+
//! | ntx x { tilt 0.01 deg (i16) | freq 10 Hz (u16) | sector | spare } |
//! +-----------------------------------------------------------------+
//! | nrx x { angle 0.01 deg (i16) | start sample (u16) | n (u16) |    |
//! |         detected range (u16) | tx sector | beam # |              |
//! |         n x amplitude (i8, 0.5 dB) }                             |
//! +-----------------------------------------------------------------+
//! ```

use crate::matrix::Matrix;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io;
use thiserror::Error;

/// Fixed part of a fragment, up to the transmit sector table.
pub const FRAGMENT_HEADER_LEN: usize = 28;

/// Deepest range sample a beam may reach.
pub const MAX_SAMPLES: usize = 65_536;

/// Receive beams a ping may announce.
pub const MAX_BEAMS: usize = 1024;

/// Largest samples x beams matrix built from one fragment or ping (64 MiB of f32).
pub const MAX_MATRIX_CELLS: usize = 16 * 1024 * 1024;

const TX_SECTOR_LEN: usize = 6;
const BEAM_HEADER_LEN: usize = 10;

/// Decoder errors. Any of these makes the fragment malformed.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("fragment too short: need {needed} bytes, got {got}")]
    TooShort { needed: usize, got: usize },

    #[error("beam {beam} runs past the end of the fragment")]
    TruncatedBeam { beam: usize },

    #[error("{rows} samples x {beams} beams exceeds the matrix limit")]
    Oversized { rows: usize, beams: usize },

    #[error("sample rate is zero")]
    ZeroSampleRate,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Transmit sector entry.
#[derive(Debug, Clone, PartialEq)]
pub struct TxSector {
    pub tilt_deg: f32,
    pub center_frequency_hz: u32,
    pub sector: u8,
}

/// Per-beam header of a watercolumn fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct BeamInfo {
    /// Pointing angle re vertical, degrees.
    pub angle_deg: f32,
    pub start_sample: u16,
    pub sample_count: u16,
    /// Bottom detection sample index, 0 if no detection.
    pub detected_range: u16,
    pub tx_sector: u8,
    pub beam_number: u8,
}

/// One decoded watercolumn fragment.
#[derive(Debug, Clone)]
pub struct WatercolumnFragment {
    pub ping_id: u16,
    pub serial: u16,
    /// Number of datagrams the ping is split across.
    pub fragment_count: u16,
    /// 1-based position of this datagram in the ping.
    pub fragment_number: u16,
    pub total_beams: u16,
    /// Metres per second.
    pub sound_speed: f32,
    /// Hertz.
    pub sample_rate: f32,
    pub tx_heave_cm: i16,
    pub tvg_function: u8,
    pub tvg_offset: i8,
    pub tx_sectors: Vec<TxSector>,
    pub beams: Vec<BeamInfo>,
    /// samples x beams-in-this-fragment, dB, TVG removed.
    pub amplitudes: Matrix,
}

impl WatercolumnFragment {
    pub fn beam_count(&self) -> usize {
        self.beams.len()
    }

    pub fn sample_count(&self) -> usize {
        self.amplitudes.rows()
    }

    /// Smallest nonzero detected range in this fragment.
    pub fn min_detected_range(&self) -> Option<u16> {
        self.beams
            .iter()
            .map(|b| b.detected_range)
            .filter(|&r| r != 0)
            .min()
    }

    pub fn beam_angles(&self) -> impl Iterator<Item = f32> + '_ {
        self.beams.iter().map(|b| b.angle_deg)
    }
}

/// Turns raw fragment bytes into a [`WatercolumnFragment`].
pub trait WatercolumnDecoder: Send {
    fn decode(&self, fragment: &[u8]) -> Result<WatercolumnFragment, DecodeError>;
}

/// Gain compensation removed from the amplitudes ("de-TVG").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TvgCorrection {
    /// Absorption coefficient, dB per metre.
    pub absorption_db_per_m: f32,
    /// Offset added after the sonar TVG is removed, dB.
    pub offset_db: f32,
}

impl Default for TvgCorrection {
    fn default() -> Self {
        Self {
            absorption_db_per_m: 0.030,
            offset_db: 0.0,
        }
    }
}

impl TvgCorrection {
    /// No correction beyond undoing the sonar's own TVG offset.
    pub fn none() -> Self {
        Self {
            absorption_db_per_m: 0.0,
            offset_db: 0.0,
        }
    }

    /// Gain to subtract from sample `index` of a beam.
    ///
    /// Range is two-way: `index * c / (2 fs)`. Sample 0 has no spreading term.
    pub fn gain_db(&self, index: usize, sound_speed: f32, sample_rate: f32, x: u8, c: i8) -> f32 {
        let range = index as f32 * sound_speed / (2.0 * sample_rate);
        let spreading = if range > 0.0 {
            x as f32 * range.log10()
        } else {
            0.0
        };
        spreading + 2.0 * self.absorption_db_per_m * range + c as f32 - self.offset_db
    }
}

/// Decoder for Kongsberg EM datagram 107.
#[derive(Debug, Clone, Default)]
pub struct Em107Decoder {
    tvg: TvgCorrection,
}

impl Em107Decoder {
    pub fn new(tvg: TvgCorrection) -> Self {
        Self { tvg }
    }

    pub fn tvg(&self) -> TvgCorrection {
        self.tvg
    }
}

impl WatercolumnDecoder for Em107Decoder {
    fn decode(&self, fragment: &[u8]) -> Result<WatercolumnFragment, DecodeError> {
        if fragment.len() < FRAGMENT_HEADER_LEN {
            return Err(DecodeError::TooShort {
                needed: FRAGMENT_HEADER_LEN,
                got: fragment.len(),
            });
        }

        let mut r = fragment;
        let ping_id = r.read_u16::<LittleEndian>()?;
        let serial = r.read_u16::<LittleEndian>()?;
        let fragment_count = r.read_u16::<LittleEndian>()?;
        let fragment_number = r.read_u16::<LittleEndian>()?;
        let ntx = r.read_u16::<LittleEndian>()? as usize;
        let total_beams = r.read_u16::<LittleEndian>()?;
        let nrx = r.read_u16::<LittleEndian>()? as usize;
        let sound_speed = r.read_u16::<LittleEndian>()? as f32 / 10.0;
        let sample_rate = r.read_u32::<LittleEndian>()? as f32 / 100.0;
        let tx_heave_cm = r.read_i16::<LittleEndian>()?;
        let tvg_function = r.read_u8()?;
        let tvg_offset = r.read_i8()?;
        let _scanning = r.read_u8()?;
        r = &r[3..];

        if sample_rate <= 0.0 {
            return Err(DecodeError::ZeroSampleRate);
        }

        let fixed = FRAGMENT_HEADER_LEN + ntx * TX_SECTOR_LEN + nrx * BEAM_HEADER_LEN;
        if fragment.len() < fixed {
            return Err(DecodeError::TooShort {
                needed: fixed,
                got: fragment.len(),
            });
        }

        let mut tx_sectors = Vec::with_capacity(ntx);
        for _ in 0..ntx {
            let tilt = r.read_i16::<LittleEndian>()?;
            let freq = r.read_u16::<LittleEndian>()?;
            let sector = r.read_u8()?;
            let _spare = r.read_u8()?;
            tx_sectors.push(TxSector {
                tilt_deg: tilt as f32 / 100.0,
                center_frequency_hz: freq as u32 * 10,
                sector,
            });
        }

        let mut beams = Vec::with_capacity(nrx);
        let mut raw_samples: Vec<&[u8]> = Vec::with_capacity(nrx);
        for beam in 0..nrx {
            if r.len() < BEAM_HEADER_LEN {
                return Err(DecodeError::TruncatedBeam { beam });
            }
            let angle = r.read_i16::<LittleEndian>()?;
            let start_sample = r.read_u16::<LittleEndian>()?;
            let sample_count = r.read_u16::<LittleEndian>()?;
            let detected_range = r.read_u16::<LittleEndian>()?;
            let tx_sector = r.read_u8()?;
            let beam_number = r.read_u8()?;

            let n = sample_count as usize;
            if r.len() < n {
                return Err(DecodeError::TruncatedBeam { beam });
            }
            raw_samples.push(&r[..n]);
            r = &r[n..];

            beams.push(BeamInfo {
                angle_deg: angle as f32 / 100.0,
                start_sample,
                sample_count,
                detected_range,
                tx_sector,
                beam_number,
            });
        }

        let rows = beams
            .iter()
            .map(|b| b.start_sample as usize + b.sample_count as usize)
            .max()
            .unwrap_or(0);
        if rows > MAX_SAMPLES || rows.saturating_mul(nrx) > MAX_MATRIX_CELLS {
            return Err(DecodeError::Oversized { rows, beams: nrx });
        }
        let mut amplitudes = Matrix::empty(rows, nrx);
        for (col, (beam, samples)) in beams.iter().zip(&raw_samples).enumerate() {
            for (k, &raw) in samples.iter().enumerate() {
                let row = beam.start_sample as usize + k;
                let level = (raw as i8) as f32 * 0.5;
                let gain =
                    self.tvg
                        .gain_db(row, sound_speed, sample_rate, tvg_function, tvg_offset);
                amplitudes.set(row, col, level - gain);
            }
        }

        Ok(WatercolumnFragment {
            ping_id,
            serial,
            fragment_count,
            fragment_number,
            total_beams,
            sound_speed,
            sample_rate,
            tx_heave_cm,
            tvg_function,
            tvg_offset,
            tx_sectors,
            beams,
            amplitudes,
        })
    }
}

/// Encoder for synthetic datagrams used by the unit tests.
#[cfg(test)]
pub(crate) mod fixture {
    use byteorder::{LittleEndian, WriteBytesExt};

    pub(crate) struct BeamSpec {
        pub angle_deg: f32,
        pub start_sample: u16,
        pub detected_range: u16,
        pub samples: Vec<i8>,
    }

    pub(crate) struct FragmentSpec {
        pub ping: u16,
        pub fragment_count: u16,
        pub fragment_number: u16,
        pub total_beams: u16,
        pub beams: Vec<BeamSpec>,
    }

    impl BeamSpec {
        pub(crate) fn new(angle_deg: f32, detected_range: u16, samples: Vec<i8>) -> Self {
            Self {
                angle_deg,
                start_sample: 0,
                detected_range,
                samples,
            }
        }
    }

    /// Full datagram, header included.
    pub(crate) fn encode_datagram(spec: &FragmentSpec) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(0x02);
        buf.push(107);
        buf.write_u16::<LittleEndian>(710).unwrap();
        buf.write_u32::<LittleEndian>(20_160_214).unwrap();
        buf.write_u32::<LittleEndian>(3_600_000).unwrap();
        buf.write_u16::<LittleEndian>(spec.ping).unwrap();
        buf.write_u16::<LittleEndian>(101).unwrap();
        buf.write_u16::<LittleEndian>(spec.fragment_count).unwrap();
        buf.write_u16::<LittleEndian>(spec.fragment_number).unwrap();
        buf.write_u16::<LittleEndian>(1).unwrap();
        buf.write_u16::<LittleEndian>(spec.total_beams).unwrap();
        buf.write_u16::<LittleEndian>(spec.beams.len() as u16).unwrap();
        buf.write_u16::<LittleEndian>(15_000).unwrap();
        buf.write_u32::<LittleEndian>(1_000_000).unwrap();
        buf.write_i16::<LittleEndian>(0).unwrap();
        buf.push(0);
        buf.push(0);
        buf.push(0);
        buf.extend_from_slice(&[0, 0, 0]);
        buf.write_i16::<LittleEndian>(0).unwrap();
        buf.write_u16::<LittleEndian>(30_000).unwrap();
        buf.push(0);
        buf.push(0);
        for (i, beam) in spec.beams.iter().enumerate() {
            buf.write_i16::<LittleEndian>((beam.angle_deg * 100.0).round() as i16)
                .unwrap();
            buf.write_u16::<LittleEndian>(beam.start_sample).unwrap();
            buf.write_u16::<LittleEndian>(beam.samples.len() as u16).unwrap();
            buf.write_u16::<LittleEndian>(beam.detected_range).unwrap();
            buf.push(0);
            buf.push(i as u8);
            buf.extend(beam.samples.iter().map(|&s| s as u8));
        }
        buf.push(0x03);
        buf.write_u16::<LittleEndian>(0).unwrap();
        buf
    }
}
