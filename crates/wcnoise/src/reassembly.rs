// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ping reassembly for fragmented watercolumn datagrams.
//!
//! A ping's beams are spread over several datagrams. Fragments of one ping
//! are accumulated until the announced fragment count is reached, then the
//! ping is assembled into a single samples x beams matrix.
//!
//! # State machine
//!
//! ```text
//!            first fragment                 last fragment
//!  Empty ------------------> Accumulating ------------------> Complete
//!                             |      ^                          |
//!                             +------+  same ping               |
//!                             new ping (incomplete discarded)   |
//!  Accumulating <-----------------------------------------------+
//!                 fragment of another ping
//! ```
//!
//! A fragment of a different ping while accumulating abandons the current
//! ping without emitting anything; the abandoned assembly is kept as
//! `previous` for diagnostics only. Fragments are placed in arrival order.

use crate::decoder::{WatercolumnFragment, MAX_BEAMS, MAX_MATRIX_CELLS};
use crate::matrix::Matrix;
use crate::slot::PingSlot;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Rows above the shallowest bottom detection excluded from the beam average.
pub const GUARD_SAMPLES: usize = 10;

/// Fragment rejected by the reassembly engine. State is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReassemblyError {
    #[error("ping {ping_id}: fragment announces zero beams")]
    NoBeams { ping_id: u16 },

    #[error("ping {ping_id}: fragment announces zero datagrams")]
    NoFragments { ping_id: u16 },

    #[error("ping {ping_id}: {incoming} beams at offset {offset} exceed {total} total beams")]
    BeamOverflow {
        ping_id: u16,
        offset: usize,
        incoming: usize,
        total: usize,
    },

    #[error("ping {ping_id}: {beams} beams x {samples} samples exceeds the matrix limit")]
    Oversized {
        ping_id: u16,
        beams: usize,
        samples: usize,
    },

    #[error("ping {ping_id}: {field} is {got}, assembly expects {expected}")]
    Inconsistent {
        ping_id: u16,
        field: &'static str,
        expected: usize,
        got: usize,
    },
}

/// Fragments of one ping accumulated so far.
#[derive(Debug, Clone)]
pub struct PingAssembly {
    ping_id: u16,
    expected_fragments: u16,
    received_fragments: u16,
    total_beams: usize,
    /// Indexed by cumulative beam offset; NaN until filled.
    beam_angles: Vec<f32>,
    beams_filled: usize,
    blocks: Vec<Matrix>,
    max_samples: usize,
    min_detection: Option<u16>,
    started_at: DateTime<Utc>,
}

impl PingAssembly {
    fn start(fragment: WatercolumnFragment) -> Result<Self, ReassemblyError> {
        let ping_id = fragment.ping_id;
        if fragment.total_beams == 0 {
            return Err(ReassemblyError::NoBeams { ping_id });
        }
        if fragment.fragment_count == 0 {
            return Err(ReassemblyError::NoFragments { ping_id });
        }

        let total_beams = fragment.total_beams as usize;
        if total_beams > MAX_BEAMS {
            return Err(ReassemblyError::Oversized {
                ping_id,
                beams: total_beams,
                samples: fragment.sample_count(),
            });
        }
        let mut assembly = Self {
            ping_id,
            expected_fragments: fragment.fragment_count,
            received_fragments: 0,
            total_beams,
            beam_angles: vec![f32::NAN; total_beams],
            beams_filled: 0,
            blocks: Vec::with_capacity(fragment.fragment_count as usize),
            max_samples: 0,
            min_detection: None,
            started_at: Utc::now(),
        };
        assembly.check(&fragment)?;
        assembly.push(fragment);
        Ok(assembly)
    }

    fn check(&self, fragment: &WatercolumnFragment) -> Result<(), ReassemblyError> {
        if fragment.total_beams as usize != self.total_beams {
            return Err(ReassemblyError::Inconsistent {
                ping_id: self.ping_id,
                field: "total beam count",
                expected: self.total_beams,
                got: fragment.total_beams as usize,
            });
        }
        if fragment.fragment_count != self.expected_fragments {
            return Err(ReassemblyError::Inconsistent {
                ping_id: self.ping_id,
                field: "datagram count",
                expected: self.expected_fragments as usize,
                got: fragment.fragment_count as usize,
            });
        }
        if self.beams_filled + fragment.beam_count() > self.total_beams {
            return Err(ReassemblyError::BeamOverflow {
                ping_id: self.ping_id,
                offset: self.beams_filled,
                incoming: fragment.beam_count(),
                total: self.total_beams,
            });
        }
        let samples = self.max_samples.max(fragment.sample_count());
        if self.total_beams.saturating_mul(samples) > MAX_MATRIX_CELLS {
            return Err(ReassemblyError::Oversized {
                ping_id: self.ping_id,
                beams: self.total_beams,
                samples,
            });
        }
        Ok(())
    }

    fn push(&mut self, fragment: WatercolumnFragment) {
        let start = self.beams_filled;
        let end = start + fragment.beam_count();
        for (slot, angle) in self.beam_angles[start..end]
            .iter_mut()
            .zip(fragment.beam_angles())
        {
            *slot = angle;
        }
        self.beams_filled = end;

        self.max_samples = self.max_samples.max(fragment.sample_count());
        if let Some(range) = fragment.min_detected_range() {
            self.min_detection = Some(self.min_detection.map_or(range, |m| m.min(range)));
        }
        self.blocks.push(fragment.amplitudes);
        self.received_fragments += 1;
    }

    pub fn ping_id(&self) -> u16 {
        self.ping_id
    }

    pub fn expected_fragments(&self) -> u16 {
        self.expected_fragments
    }

    pub fn received_fragments(&self) -> u16 {
        self.received_fragments
    }

    pub fn total_beams(&self) -> usize {
        self.total_beams
    }

    /// Beam angles in arrival order; unfilled beams are NaN.
    pub fn beam_angles(&self) -> &[f32] {
        &self.beam_angles
    }

    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_complete(&self) -> bool {
        self.received_fragments == self.expected_fragments
    }

    /// Shallowest nonzero bottom detection, or the sample count if no beam detected.
    pub fn min_detection_range(&self) -> usize {
        self.min_detection
            .map(usize::from)
            .unwrap_or(self.max_samples)
    }

    fn assemble(&self) -> AssembledPing {
        let mut matrix = Matrix::empty(self.max_samples, self.total_beams);
        let mut offset = 0;
        for block in &self.blocks {
            matrix.paste_columns(block, offset);
            offset += block.cols();
        }

        // Physical beam order, before sorting by angle.
        let nadir = matrix.column(self.total_beams / 2);

        let mut order: Vec<usize> = (0..self.total_beams).collect();
        order.sort_by(|&a, &b| self.beam_angles[a].total_cmp(&self.beam_angles[b]));
        let beam_angles = order.iter().map(|&i| self.beam_angles[i]).collect();
        let amplitude = matrix.permute_columns(&order);

        let min_detection_range = self.min_detection_range();
        let beam_averaged = amplitude.column_means(min_detection_range.saturating_sub(GUARD_SAMPLES));

        AssembledPing {
            ping_id: self.ping_id,
            beam_count: self.total_beams,
            sample_count: self.max_samples,
            min_detection_range,
            beam_angles,
            amplitude,
            beam_averaged,
            nadir,
            completed_at: Utc::now(),
        }
    }
}

/// A fully reassembled ping. Read-only once built.
#[derive(Debug, Clone)]
pub struct AssembledPing {
    pub ping_id: u16,
    pub beam_count: usize,
    pub sample_count: usize,
    pub min_detection_range: usize,
    /// Ascending.
    pub beam_angles: Vec<f32>,
    /// samples x beams, columns in ascending angle order.
    pub amplitude: Matrix,
    /// Per-beam mean above the bottom guard band, same column order.
    pub beam_averaged: Vec<f32>,
    /// Centre beam in physical order, full range.
    pub nadir: Vec<f32>,
    pub completed_at: DateTime<Utc>,
}

/// Reassembly state.
#[derive(Debug, Default)]
pub enum AssemblyState {
    #[default]
    Empty,
    Accumulating(PingAssembly),
    Complete {
        assembly: PingAssembly,
        ping: Arc<AssembledPing>,
    },
}

impl AssemblyState {
    pub fn ping_id(&self) -> Option<u16> {
        match self {
            Self::Empty => None,
            Self::Accumulating(a) => Some(a.ping_id),
            Self::Complete { assembly, .. } => Some(assembly.ping_id),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Accumulating(_) => "accumulating",
            Self::Complete { .. } => "complete",
        }
    }
}

/// What happened to an accepted fragment.
#[derive(Debug, Clone)]
pub enum FragmentOutcome {
    /// Fragment stored, ping not complete yet.
    Accumulating {
        ping_id: u16,
        received: u16,
        expected: u16,
        /// Ping discarded to make room for this one.
        abandoned: Option<u16>,
    },
    /// Fragment completed its ping.
    Completed {
        ping: Arc<AssembledPing>,
        abandoned: Option<u16>,
    },
    /// Fragment of a ping that already completed; ignored.
    Duplicate { ping_id: u16 },
}

/// Reassembly counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub fragments: u64,
    pub rejected: u64,
    pub duplicates: u64,
    pub pings_completed: u64,
    pub pings_discarded: u64,
}

/// Reassembly engine: one live assembly plus the previous one for diagnostics.
#[derive(Debug)]
pub struct PingReassembler {
    state: AssemblyState,
    previous: Option<PingAssembly>,
    slot: Arc<PingSlot>,
    stats: ReassemblyStats,
}

impl PingReassembler {
    /// Create an engine publishing completed pings to `slot`.
    pub fn new(slot: Arc<PingSlot>) -> Self {
        Self {
            state: AssemblyState::Empty,
            previous: None,
            slot,
            stats: ReassemblyStats::default(),
        }
    }

    /// Feed one decoded fragment.
    pub fn accept(
        &mut self,
        fragment: WatercolumnFragment,
    ) -> Result<FragmentOutcome, ReassemblyError> {
        self.stats.fragments += 1;
        let ping_id = fragment.ping_id;

        match std::mem::take(&mut self.state) {
            AssemblyState::Accumulating(mut assembly) if assembly.ping_id == ping_id => {
                if let Err(err) = assembly.check(&fragment) {
                    self.state = AssemblyState::Accumulating(assembly);
                    return Err(self.reject(err));
                }
                assembly.push(fragment);
                Ok(self.settle(assembly, None))
            }
            AssemblyState::Complete { assembly, ping } if assembly.ping_id == ping_id => {
                self.state = AssemblyState::Complete { assembly, ping };
                self.stats.duplicates += 1;
                debug!("ping {} already complete, ignoring fragment", ping_id);
                Ok(FragmentOutcome::Duplicate { ping_id })
            }
            current => {
                let assembly = match PingAssembly::start(fragment) {
                    Ok(assembly) => assembly,
                    Err(err) => {
                        self.state = current;
                        return Err(self.reject(err));
                    }
                };
                let abandoned = self.retire(current);
                Ok(self.settle(assembly, abandoned))
            }
        }
    }

    fn reject(&mut self, err: ReassemblyError) -> ReassemblyError {
        self.stats.rejected += 1;
        err
    }

    /// Move the outgoing state aside as `previous`.
    fn retire(&mut self, state: AssemblyState) -> Option<u16> {
        match state {
            AssemblyState::Empty => None,
            AssemblyState::Accumulating(old) => {
                self.stats.pings_discarded += 1;
                debug!(
                    "ping {} abandoned after {}/{} datagrams",
                    old.ping_id, old.received_fragments, old.expected_fragments
                );
                let id = old.ping_id;
                self.previous = Some(old);
                Some(id)
            }
            AssemblyState::Complete { assembly, .. } => {
                self.previous = Some(assembly);
                None
            }
        }
    }

    fn settle(&mut self, assembly: PingAssembly, abandoned: Option<u16>) -> FragmentOutcome {
        if !assembly.is_complete() {
            let outcome = FragmentOutcome::Accumulating {
                ping_id: assembly.ping_id,
                received: assembly.received_fragments,
                expected: assembly.expected_fragments,
                abandoned,
            };
            self.state = AssemblyState::Accumulating(assembly);
            return outcome;
        }

        let ping = Arc::new(assembly.assemble());
        self.stats.pings_completed += 1;
        debug!(
            "ping {} complete: {} beams x {} samples, min detection {}",
            ping.ping_id, ping.beam_count, ping.sample_count, ping.min_detection_range
        );
        self.slot.publish(Arc::clone(&ping));
        self.state = AssemblyState::Complete {
            assembly,
            ping: Arc::clone(&ping),
        };
        FragmentOutcome::Completed { ping, abandoned }
    }

    pub fn state(&self) -> &AssemblyState {
        &self.state
    }

    /// Ping currently tracked (accumulating or just completed).
    pub fn current_ping(&self) -> Option<u16> {
        self.state.ping_id()
    }

    /// Whether a fragment of `ping_id` would be ignored as a duplicate.
    pub fn is_completed(&self, ping_id: u16) -> bool {
        matches!(&self.state, AssemblyState::Complete { assembly, .. } if assembly.ping_id == ping_id)
    }

    /// The assembly replaced most recently.
    pub fn previous(&self) -> Option<&PingAssembly> {
        self.previous.as_ref()
    }

    pub fn slot(&self) -> &Arc<PingSlot> {
        &self.slot
    }

    pub fn stats(&self) -> &ReassemblyStats {
        &self.stats
    }
}
