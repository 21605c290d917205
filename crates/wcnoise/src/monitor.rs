// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Noise monitor views computed from completed pings.
//!
//! Three views, each with an adaptive colour range:
//! - beam-averaged noise history (beams x last 63 pings, newest first)
//! - nadir beam history (range samples x last 63 pings, newest first)
//! - high-pass water column: the current ping minus the mean of the last
//!   ten pings, which suppresses the static acoustic background

use crate::matrix::{nan_mean, nan_std, Matrix};
use crate::reassembly::AssembledPing;
use std::collections::VecDeque;
use tracing::info;

/// Pings kept in the scrolling histories.
pub const HISTORY_LEN: usize = 63;

/// Pings averaged for the high-pass view.
pub const HIGH_PASS_PINGS: usize = 10;

/// Deepest range sample kept for the high-pass view.
pub const MAX_HIGH_PASS_ROWS: usize = 4000;

/// Samples remembered by a [`ColorRangeTracker`].
pub const COLOR_HISTORY: usize = 200;

/// Display limits, dB.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorRange {
    pub min: f32,
    pub max: f32,
}

/// Colour limits following the recent mean and spread of a view.
///
/// Limits are `mean(means) -/+ m * mean(stds)` over the last
/// [`COLOR_HISTORY`] updates, NaN values ignored.
#[derive(Debug, Clone)]
pub struct ColorRangeTracker {
    means: VecDeque<f32>,
    stds: VecDeque<f32>,
    capacity: usize,
    multiplier: f32,
}

impl ColorRangeTracker {
    pub fn new(multiplier: f32) -> Self {
        Self::with_capacity(COLOR_HISTORY, multiplier)
    }

    pub fn with_capacity(capacity: usize, multiplier: f32) -> Self {
        Self {
            means: VecDeque::with_capacity(capacity),
            stds: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            multiplier,
        }
    }

    /// Record the mean and standard deviation of `values`.
    pub fn add(&mut self, values: &[f32]) {
        if self.means.len() == self.capacity {
            self.means.pop_back();
            self.stds.pop_back();
        }
        self.means.push_front(nan_mean(values));
        self.stds.push_front(nan_std(values));
    }

    /// Current limits; NaN until a finite value has been added.
    pub fn range(&self) -> ColorRange {
        let means: Vec<f32> = self.means.iter().copied().collect();
        let stds: Vec<f32> = self.stds.iter().copied().collect();
        let centre = nan_mean(&means);
        let spread = self.multiplier * nan_mean(&stds);
        ColorRange {
            min: centre - spread,
            max: centre + spread,
        }
    }

    pub fn len(&self) -> usize {
        self.means.len()
    }

    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }
}

/// Result of one monitor update.
#[derive(Debug, Clone)]
pub struct MonitorFrame {
    pub ping_id: u16,
    /// Current ping minus the recent mean, up to [`MAX_HIGH_PASS_ROWS`] rows.
    pub high_pass: Matrix,
    pub beam_average_range: ColorRange,
    pub nadir_range: ColorRange,
    pub high_pass_range: ColorRange,
}

/// Consumer of completed pings maintaining the noise views.
#[derive(Debug, Clone)]
pub struct NoiseMonitor {
    beams: usize,
    beam_average: Matrix,
    nadir: Matrix,
    recent: Vec<Matrix>,
    next_slot: usize,
    beam_average_colors: ColorRangeTracker,
    nadir_colors: ColorRangeTracker,
    high_pass_colors: ColorRangeTracker,
    pings: u64,
}

impl NoiseMonitor {
    /// Size the views after the first ping; nadir rows stay at its
    /// shallowest detection.
    pub fn new(first: &AssembledPing) -> Self {
        Self::sized(first.beam_count, first.min_detection_range)
    }

    fn sized(beams: usize, nadir_rows: usize) -> Self {
        Self {
            beams,
            beam_average: Matrix::empty(beams, HISTORY_LEN),
            nadir: Matrix::empty(nadir_rows, HISTORY_LEN),
            recent: (0..HIGH_PASS_PINGS).map(|_| Matrix::empty(0, beams)).collect(),
            next_slot: 0,
            beam_average_colors: ColorRangeTracker::new(3.0),
            nadir_colors: ColorRangeTracker::new(2.0),
            high_pass_colors: ColorRangeTracker::new(3.0),
            pings: 0,
        }
    }

    /// Fold one ping into every view.
    pub fn update(&mut self, ping: &AssembledPing) -> MonitorFrame {
        if ping.beam_count != self.beams {
            info!(
                "beam count changed from {} to {}, resetting monitor",
                self.beams, ping.beam_count
            );
            *self = Self::new(ping);
        }
        self.pings += 1;

        self.beam_average.shift_columns_right();
        self.beam_average.set_column(0, &ping.beam_averaged);
        self.beam_average_colors.add(&ping.beam_averaged);

        self.nadir.shift_columns_right();
        self.nadir.set_column(0, &ping.nadir);
        self.nadir_colors.add(&ping.nadir);

        let high_pass = self.high_pass(&ping.amplitude);
        self.high_pass_colors.add(high_pass.as_slice());

        MonitorFrame {
            ping_id: ping.ping_id,
            high_pass,
            beam_average_range: self.beam_average_colors.range(),
            nadir_range: self.nadir_colors.range(),
            high_pass_range: self.high_pass_colors.range(),
        }
    }

    fn high_pass(&mut self, amplitude: &Matrix) -> Matrix {
        let rows = amplitude.rows().min(MAX_HIGH_PASS_ROWS);

        // Rows a shorter ping does not reach keep older pings' samples.
        let slot = &mut self.recent[self.next_slot];
        if slot.rows() < rows {
            *slot = slot.with_rows(rows);
        }
        let clipped = amplitude.with_rows(rows);
        slot.paste_columns(&clipped, 0);
        self.next_slot = (self.next_slot + 1) % self.recent.len();

        let mut out = Matrix::empty(rows, self.beams);
        let mut cell = Vec::with_capacity(self.recent.len());
        for r in 0..rows {
            for c in 0..self.beams {
                cell.clear();
                cell.extend(self.recent.iter().filter_map(|m| m.get(r, c)));
                let background = nan_mean(&cell);
                if let Some(v) = clipped.get(r, c) {
                    out.set(r, c, v - background);
                }
            }
        }
        out
    }

    /// Beam-averaged noise, beams x [`HISTORY_LEN`], newest ping in column 0.
    pub fn beam_average_history(&self) -> &Matrix {
        &self.beam_average
    }

    /// Nadir beam, samples x [`HISTORY_LEN`], newest ping in column 0.
    pub fn nadir_history(&self) -> &Matrix {
        &self.nadir
    }

    pub fn beams(&self) -> usize {
        self.beams
    }

    /// Pings folded in since the last reset.
    pub fn pings(&self) -> u64 {
        self.pings
    }
}
