// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datagram routing by type identifier.
//!
//! Only allow-listed types pass. Watercolumn datagrams are decoded and fed
//! to the reassembly engine; every other allowed type is only counted.

use crate::datagram::{Datagram, DatagramKind, KIND_OFFSET, PING_OFFSET};
use crate::decoder::{DecodeError, Em107Decoder, WatercolumnDecoder};
use crate::reassembly::{FragmentOutcome, PingReassembler, ReassemblyError};
use crate::slot::PingSlot;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Allow-list of datagram types. Empty lets nothing through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KindFilter {
    kinds: BTreeSet<DatagramKind>,
}

impl KindFilter {
    /// Allow only the given types.
    pub fn allow<I>(kinds: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<DatagramKind>,
    {
        Self {
            kinds: kinds.into_iter().map(Into::into).collect(),
        }
    }

    /// Watercolumn only.
    pub fn watercolumn() -> Self {
        Self::allow([DatagramKind::WATERCOLUMN])
    }

    pub fn matches(&self, kind: DatagramKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = DatagramKind> + '_ {
        self.kinds.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// Why a watercolumn fragment could not be used.
#[derive(Debug, Error)]
pub enum MalformedFragment {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Reassembly(#[from] ReassemblyError),
}

/// Routing errors. Reassembly state is untouched when these are returned.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("datagram too short: need {needed} bytes, got {got}")]
    TooShort { needed: usize, got: usize },

    #[error("malformed watercolumn fragment: {0}")]
    Malformed(#[from] MalformedFragment),
}

/// What the router did with a datagram.
#[derive(Debug, Clone)]
pub enum RouteOutcome {
    /// Not in the allow-list.
    Filtered(DatagramKind),
    /// Allowed but not interpreted.
    Recorded(DatagramKind),
    /// Watercolumn fragment handed to the reassembly engine.
    Fragment(FragmentOutcome),
}

/// Per-type routing counters.
#[derive(Debug, Clone, Default)]
pub struct RouterStats {
    pub received: BTreeMap<DatagramKind, u64>,
    pub filtered: u64,
    pub recorded: u64,
    pub fragments: u64,
    pub malformed: u64,
}

impl RouterStats {
    pub fn total(&self) -> u64 {
        self.received.values().sum()
    }
}

/// Type demultiplexer in front of the reassembly engine.
#[derive(Debug)]
pub struct DatagramRouter<D: WatercolumnDecoder = Em107Decoder> {
    filter: KindFilter,
    decoder: D,
    engine: PingReassembler,
    stats: RouterStats,
}

impl DatagramRouter<Em107Decoder> {
    /// Router with the EM 107 decoder and default gain compensation.
    pub fn new(filter: KindFilter, slot: Arc<PingSlot>) -> Self {
        Self::with_decoder(filter, Em107Decoder::default(), slot)
    }
}

impl<D: WatercolumnDecoder> DatagramRouter<D> {
    pub fn with_decoder(filter: KindFilter, decoder: D, slot: Arc<PingSlot>) -> Self {
        Self {
            filter,
            decoder,
            engine: PingReassembler::new(slot),
            stats: RouterStats::default(),
        }
    }

    /// Dispatch one datagram.
    pub fn route(&mut self, datagram: &Datagram<'_>) -> Result<RouteOutcome, RouteError> {
        let Some(kind) = datagram.kind() else {
            self.stats.malformed += 1;
            return Err(RouteError::TooShort {
                needed: KIND_OFFSET + 1,
                got: datagram.len(),
            });
        };
        *self.stats.received.entry(kind).or_insert(0) += 1;

        if !self.filter.matches(kind) {
            self.stats.filtered += 1;
            debug!("filtered {} from {} ({} bytes)", kind, datagram.sender, datagram.len());
            return Ok(RouteOutcome::Filtered(kind));
        }

        if kind != DatagramKind::WATERCOLUMN {
            self.stats.recorded += 1;
            debug!("received {} from {} ({} bytes)", kind, datagram.sender, datagram.len());
            return Ok(RouteOutcome::Recorded(kind));
        }

        match self.route_watercolumn(datagram.payload) {
            Ok(outcome) => {
                self.stats.fragments += 1;
                Ok(RouteOutcome::Fragment(outcome))
            }
            Err(err) => {
                self.stats.malformed += 1;
                Err(err)
            }
        }
    }

    fn route_watercolumn(&mut self, payload: &[u8]) -> Result<FragmentOutcome, RouteError> {
        if payload.len() < PING_OFFSET + 2 {
            return Err(RouteError::TooShort {
                needed: PING_OFFSET + 2,
                got: payload.len(),
            });
        }
        let fragment = self
            .decoder
            .decode(&payload[PING_OFFSET..])
            .map_err(MalformedFragment::from)?;
        debug!(
            "watercolumn ping {} datagram {}/{} ({} beams)",
            fragment.ping_id,
            fragment.fragment_number,
            fragment.fragment_count,
            fragment.beam_count()
        );
        let outcome = self
            .engine
            .accept(fragment)
            .map_err(MalformedFragment::from)?;
        Ok(outcome)
    }

    pub fn filter(&self) -> &KindFilter {
        &self.filter
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    pub fn engine(&self) -> &PingReassembler {
        &self.engine
    }

    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::fixture::{encode_datagram, BeamSpec, FragmentSpec};
    use crate::decoder::TvgCorrection;
    use std::net::SocketAddr;

    fn sender() -> SocketAddr {
        "192.168.1.20:5000".parse().expect("addr")
    }

    fn router(filter: KindFilter) -> DatagramRouter {
        DatagramRouter::with_decoder(
            filter,
            Em107Decoder::new(TvgCorrection::none()),
            Arc::new(PingSlot::new()),
        )
    }

    fn watercolumn(ping: u16, count: u16, number: u16, angles: &[f32]) -> Vec<u8> {
        encode_datagram(&FragmentSpec {
            ping,
            fragment_count: count,
            fragment_number: number,
            total_beams: angles.len() as u16 * count,
            beams: angles
                .iter()
                .map(|&a| BeamSpec::new(a, 30, vec![-40; 40]))
                .collect(),
        })
    }

    #[test]
    fn test_kind_filter() {
        let filter = KindFilter::allow([107u8, 80]);
        assert!(filter.matches(DatagramKind::WATERCOLUMN));
        assert!(filter.matches(DatagramKind::POSITION));
        assert!(!filter.matches(DatagramKind::DEPTH));
        assert!(!KindFilter::default().matches(DatagramKind::WATERCOLUMN));
    }

    #[test]
    fn test_filtered_and_recorded() {
        let mut router = router(KindFilter::allow([107u8, 80]));

        let depth = [0x02u8, 68, 0, 0];
        let outcome = router.route(&Datagram::new(&depth, sender())).expect("route");
        assert!(matches!(outcome, RouteOutcome::Filtered(DatagramKind::DEPTH)));

        let position = [0x02u8, 80, 0, 0, 0, 0];
        let outcome = router.route(&Datagram::new(&position, sender())).expect("route");
        assert!(matches!(outcome, RouteOutcome::Recorded(DatagramKind::POSITION)));

        assert_eq!(router.stats().filtered, 1);
        assert_eq!(router.stats().recorded, 1);
        assert_eq!(router.stats().total(), 2);
        assert_eq!(router.engine().current_ping(), None);
    }

    #[test]
    fn test_empty_allow_list_routes_nothing() {
        let mut router = router(KindFilter::default());
        let bytes = watercolumn(1, 1, 1, &[0.0]);
        let outcome = router.route(&Datagram::new(&bytes, sender())).expect("route");
        assert!(matches!(outcome, RouteOutcome::Filtered(_)));
        assert!(!router.engine().slot().is_ready());
    }

    #[test]
    fn test_watercolumn_reaches_engine() {
        let mut router = router(KindFilter::watercolumn());
        let first = watercolumn(77, 2, 1, &[10.0, -5.0]);
        let second = watercolumn(77, 2, 2, &[-20.0, 5.0]);

        let outcome = router.route(&Datagram::new(&first, sender())).expect("route");
        assert!(matches!(
            outcome,
            RouteOutcome::Fragment(FragmentOutcome::Accumulating { ping_id: 77, .. })
        ));
        router.route(&Datagram::new(&second, sender())).expect("route");

        let ping = router.engine().slot().take().expect("ping");
        assert_eq!(ping.ping_id, 77);
        assert_eq!(ping.beam_angles, vec![-20.0, -5.0, 5.0, 10.0]);
        assert_eq!(ping.beam_count, 4);
        assert_eq!(router.stats().fragments, 2);
    }

    #[test]
    fn test_malformed_fragment_keeps_state() {
        let mut router = router(KindFilter::watercolumn());
        let first = watercolumn(5, 3, 1, &[0.0, 1.0]);
        router.route(&Datagram::new(&first, sender())).expect("route");

        // Header cut off inside the fragment header.
        let short = &first[..PING_OFFSET + 10];
        let err = router
            .route(&Datagram::new(short, sender()))
            .expect_err("malformed");
        assert!(matches!(
            err,
            RouteError::Malformed(MalformedFragment::Decode(DecodeError::TooShort { .. }))
        ));

        // Fewer bytes than the ping counter needs.
        let err = router
            .route(&Datagram::new(&first[..PING_OFFSET], sender()))
            .expect_err("too short");
        assert!(matches!(err, RouteError::TooShort { .. }));

        assert_eq!(router.stats().malformed, 2);
        assert_eq!(router.engine().current_ping(), Some(5));

        let second = watercolumn(5, 3, 2, &[2.0, 3.0]);
        let third = watercolumn(5, 3, 3, &[4.0, 5.0]);
        router.route(&Datagram::new(&second, sender())).expect("route");
        router.route(&Datagram::new(&third, sender())).expect("route");
        assert!(router.engine().slot().is_ready());
    }

    #[test]
    fn test_empty_datagram_is_too_short() {
        let mut router = router(KindFilter::watercolumn());
        let err = router
            .route(&Datagram::new(&[0x02], sender()))
            .expect_err("too short");
        assert!(matches!(err, RouteError::TooShort { needed: 2, got: 1 }));
    }

    #[test]
    fn test_oversized_ping_is_malformed() {
        let mut router = router(KindFilter::watercolumn());
        let first = watercolumn(5, 2, 1, &[0.0, 1.0]);
        router.route(&Datagram::new(&first, sender())).expect("route");

        let huge = encode_datagram(&FragmentSpec {
            ping: 6,
            fragment_count: 1,
            fragment_number: 1,
            total_beams: u16::MAX,
            beams: vec![BeamSpec {
                angle_deg: 0.0,
                start_sample: 65_000,
                detected_range: 0,
                samples: Vec::new(),
            }],
        });
        let err = router
            .route(&Datagram::new(&huge, sender()))
            .expect_err("oversized");
        assert!(matches!(
            err,
            RouteError::Malformed(MalformedFragment::Reassembly(ReassemblyError::Oversized {
                ping_id: 6,
                ..
            }))
        ));
        assert_eq!(router.stats().malformed, 1);
        assert_eq!(router.engine().current_ping(), Some(5));
        assert!(!router.engine().slot().is_ready());
    }
}
