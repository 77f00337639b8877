//! Builders for synthetic NEV/NSx files used by the integration tests.
#![allow(dead_code)]

use byteorder::{LittleEndian, WriteBytesExt};

pub const NEURAL_MIN: u16 = 1;
pub const COMMENT_ID: u16 = 65535;

pub fn fixed_str(out: &mut Vec<u8>, s: &str, n: usize) {
    let mut field = vec![0u8; n];
    for (slot, b) in field.iter_mut().zip(s.bytes()) {
        *slot = b;
    }
    out.extend_from_slice(&field);
}

fn time_origin(out: &mut Vec<u8>) {
    for v in [2023u16, 1, 0, 9, 12, 0, 0, 0] {
        out.write_u16::<LittleEndian>(v).unwrap();
    }
}

pub fn nev_basic(packet_bytes: u32, num_ext: u32) -> Vec<u8> {
    let mut out = Vec::new();
    fixed_str(&mut out, "NEURALEV", 8);
    out.push(2);
    out.push(3);
    out.write_u16::<LittleEndian>(0).unwrap();
    out.write_u32::<LittleEndian>(336 + 32 * num_ext).unwrap();
    out.write_u32::<LittleEndian>(packet_bytes).unwrap();
    out.write_u32::<LittleEndian>(30000).unwrap();
    out.write_u32::<LittleEndian>(30000).unwrap();
    time_origin(&mut out);
    fixed_str(&mut out, "integration test", 32);
    fixed_str(&mut out, "", 256);
    out.write_u32::<LittleEndian>(num_ext).unwrap();
    assert_eq!(out.len(), 336);
    out
}

pub fn neural_packet(ts: u32, channel: u16, unit: u8, packet_bytes: usize) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_u32::<LittleEndian>(ts).unwrap();
    out.write_u16::<LittleEndian>(channel).unwrap();
    out.push(unit);
    out.push(0);
    for k in 0..(packet_bytes - 8) / 2 {
        out.write_i16::<LittleEndian>((k as i16) * 10 - 100).unwrap();
    }
    assert_eq!(out.len(), packet_bytes);
    out
}

pub fn comment_packet(ts: u32, char_set: u8, text: &str, packet_bytes: usize) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_u32::<LittleEndian>(ts).unwrap();
    out.write_u16::<LittleEndian>(COMMENT_ID).unwrap();
    out.push(char_set);
    out.push(0);
    out.write_u32::<LittleEndian>(ts).unwrap();
    fixed_str(&mut out, text, packet_bytes - 12);
    assert_eq!(out.len(), packet_bytes);
    out
}

pub fn legacy_nsx(channel_ids: &[u32], period: u32, rows: &[Vec<i16>]) -> Vec<u8> {
    let mut out = Vec::new();
    fixed_str(&mut out, "NEURALSG", 8);
    fixed_str(&mut out, "30 kS/s", 16);
    out.write_u32::<LittleEndian>(period).unwrap();
    out.write_u32::<LittleEndian>(channel_ids.len() as u32).unwrap();
    for &id in channel_ids {
        out.write_u32::<LittleEndian>(id).unwrap();
    }
    for row in rows {
        for &v in row {
            out.write_i16::<LittleEndian>(v).unwrap();
        }
    }
    out
}

pub fn modern_nsx_header(spec: (u8, u8), period: u32, resolution: u32, n_chan: u32) -> Vec<u8> {
    let mut out = Vec::new();
    fixed_str(&mut out, "NEURALCD", 8);
    out.push(spec.0);
    out.push(spec.1);
    out.write_u32::<LittleEndian>(314 + 66 * n_chan).unwrap();
    fixed_str(&mut out, "integration", 16);
    fixed_str(&mut out, "", 256);
    out.write_u32::<LittleEndian>(period).unwrap();
    out.write_u32::<LittleEndian>(resolution).unwrap();
    time_origin(&mut out);
    out.write_u32::<LittleEndian>(n_chan).unwrap();
    assert_eq!(out.len(), 314);
    for ch in 1..=n_chan as u16 {
        fixed_str(&mut out, "CC", 2);
        out.write_u16::<LittleEndian>(ch).unwrap();
        fixed_str(&mut out, &format!("chan{}", ch), 16);
        out.push(1);
        out.push(ch as u8);
        out.write_i16::<LittleEndian>(-32767).unwrap();
        out.write_i16::<LittleEndian>(32767).unwrap();
        out.write_i16::<LittleEndian>(-8191).unwrap();
        out.write_i16::<LittleEndian>(8191).unwrap();
        fixed_str(&mut out, "uV", 16);
        out.write_u32::<LittleEndian>(300_000).unwrap();
        out.write_u32::<LittleEndian>(1).unwrap();
        out.write_u16::<LittleEndian>(1).unwrap();
        out.write_u32::<LittleEndian>(7_500_000).unwrap();
        out.write_u32::<LittleEndian>(3).unwrap();
        out.write_u16::<LittleEndian>(1).unwrap();
    }
    out
}

pub fn push_packet(out: &mut Vec<u8>, timestamp: u32, rows: &[Vec<i16>]) {
    out.push(0x01);
    out.write_u32::<LittleEndian>(timestamp).unwrap();
    out.write_u32::<LittleEndian>(rows.len() as u32).unwrap();
    for row in rows {
        for &v in row {
            out.write_i16::<LittleEndian>(v).unwrap();
        }
    }
}

pub fn push_ptp_records(out: &mut Vec<u8>, timestamps: &[u64], n_chan: usize) {
    for (i, &t) in timestamps.iter().enumerate() {
        out.push(0x01);
        out.write_u64::<LittleEndian>(t).unwrap();
        out.write_u32::<LittleEndian>(1).unwrap();
        for c in 0..n_chan {
            out.write_i16::<LittleEndian>((i % 1000) as i16 + c as i16).unwrap();
        }
    }
}
