// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Synthetic echosounder datagrams for the integration tests.

#![allow(dead_code)]

use byteorder::{LittleEndian, WriteBytesExt};

pub struct Beam {
    pub angle_deg: f32,
    pub detected_range: u16,
    pub samples: Vec<i8>,
}

impl Beam {
    pub fn new(angle_deg: f32, detected_range: u16, samples: Vec<i8>) -> Self {
        Self {
            angle_deg,
            detected_range,
            samples,
        }
    }
}

/// Watercolumn datagram carrying `beams` as fragment `number` of `count`.
pub fn watercolumn(ping: u16, count: u16, number: u16, total_beams: u16, beams: &[Beam]) -> Vec<u8> {
    let mut buf = vec![0x02, 107];
    buf.write_u16::<LittleEndian>(710).expect("model");
    buf.write_u32::<LittleEndian>(20_160_214).expect("date");
    buf.write_u32::<LittleEndian>(3_600_000).expect("time");
    buf.write_u16::<LittleEndian>(ping).expect("ping");
    buf.write_u16::<LittleEndian>(101).expect("serial");
    buf.write_u16::<LittleEndian>(count).expect("count");
    buf.write_u16::<LittleEndian>(number).expect("number");
    buf.write_u16::<LittleEndian>(1).expect("ntx");
    buf.write_u16::<LittleEndian>(total_beams).expect("total beams");
    buf.write_u16::<LittleEndian>(beams.len() as u16).expect("nrx");
    buf.write_u16::<LittleEndian>(15_000).expect("sound speed");
    buf.write_u32::<LittleEndian>(1_000_000).expect("sample rate");
    buf.write_i16::<LittleEndian>(0).expect("heave");
    buf.extend_from_slice(&[0, 0, 0, 0, 0, 0]);

    buf.write_i16::<LittleEndian>(0).expect("tilt");
    buf.write_u16::<LittleEndian>(30_000).expect("frequency");
    buf.extend_from_slice(&[0, 0]);

    for (i, beam) in beams.iter().enumerate() {
        buf.write_i16::<LittleEndian>((beam.angle_deg * 100.0).round() as i16)
            .expect("angle");
        buf.write_u16::<LittleEndian>(0).expect("start sample");
        buf.write_u16::<LittleEndian>(beam.samples.len() as u16)
            .expect("sample count");
        buf.write_u16::<LittleEndian>(beam.detected_range).expect("range");
        buf.push(0);
        buf.push(i as u8);
        buf.extend(beam.samples.iter().map(|&s| s as u8));
    }
    buf.extend_from_slice(&[0x03, 0, 0]);
    buf
}

/// Non-watercolumn datagram of type `kind`.
pub fn other(kind: u8, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len.max(2)];
    buf[0] = 0x02;
    buf[1] = kind;
    buf
}

/// Ping split over two fragments: beams at 30 and -10 deg, then 0 and -50 deg.
pub fn split_ping(ping: u16) -> [Vec<u8>; 2] {
    [
        watercolumn(
            ping,
            2,
            1,
            4,
            &[Beam::new(30.0, 20, vec![-40; 30]), Beam::new(-10.0, 15, vec![-50; 25])],
        ),
        watercolumn(
            ping,
            2,
            2,
            4,
            &[Beam::new(0.0, 12, vec![-60; 20]), Beam::new(-50.0, 25, vec![-70; 35])],
        ),
    ]
}
