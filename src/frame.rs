//! Frame encoding, COBS byte stuffing, and checksum.
//!
//! Wire format (before stuffing):
//! ```text
//! LEN_LO LEN_HI  MESSAGE...  CS_LO CS_HI
//! ```
//! `LEN` is little-endian and counts the whole frame: the length field
//! itself, the message, and the 2-byte checksum. The checksum is
//! CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF) over `LEN ‖ MESSAGE`,
//! appended little-endian. The framed buffer is then COBS-stuffed and
//! wrapped in `0x00` delimiters so a zero byte marks frame boundaries on
//! the notification stream.

use crate::codec;
use crate::error::{Result, WireError};

/// BLE writes are capped at 20 bytes; one byte is reserved for the session
/// header, leaving 19 bytes of frame data per chunk.
pub const MAX_CHUNK_SIZE: usize = 19;

/// Smallest decodable frame: 2-byte length + 2-byte checksum.
const MIN_FRAME_LEN: usize = 4;

/// A defragmented, unstuffed frame with its checksum verdict.
///
/// A failed checksum does not reject the frame: the device does not
/// retransmit, so the payload is surfaced anyway and the mismatch is left
/// to the caller to log.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Message bytes between the length field and the checksum.
    pub message: Vec<u8>,
    /// Checksum received on the wire.
    pub received_checksum: u16,
    /// Checksum recomputed over `LEN ‖ MESSAGE`.
    pub computed_checksum: u16,
}

impl RawFrame {
    /// Parse an unstuffed frame buffer (length field through checksum).
    pub fn parse(frame: &[u8]) -> Result<Self> {
        if frame.len() < MIN_FRAME_LEN {
            return Err(WireError::FrameTooShort {
                len: frame.len(),
                min: MIN_FRAME_LEN,
            });
        }
        let received_checksum = codec::read_uint16(frame, frame.len() - 2)?;
        let computed_checksum = checksum(&frame[..frame.len() - 2]);
        let message = frame[2..frame.len() - 2].to_vec();
        Ok(RawFrame {
            message,
            received_checksum,
            computed_checksum,
        })
    }

    pub fn checksum_ok(&self) -> bool {
        self.received_checksum == self.computed_checksum
    }
}

/// Frame a message and stuff it for transmission.
///
/// Returns the delimited wire buffer: `00 [COBS(LEN ‖ MSG ‖ CS)] 00`.
pub fn encode(message: &[u8]) -> Vec<u8> {
    // Length counts itself (2B) plus the trailing checksum (2B).
    let length = (message.len() + 4) as u16;
    let mut framed = Vec::with_capacity(message.len() + 4);
    codec::write_uint16(&mut framed, length);
    framed.extend_from_slice(message);
    let cs = checksum(&framed);
    codec::write_uint16(&mut framed, cs);

    let mut wire = Vec::with_capacity(framed.len() + 4);
    wire.push(0x00);
    wire.extend_from_slice(&cobs_stuff(&framed));
    wire.push(0x00);
    wire
}

/// Strip delimiters and unstuff a complete wire frame, then parse it.
pub fn decode(wire: &[u8]) -> Result<RawFrame> {
    let mut interior = wire;
    if let Some(rest) = interior.strip_prefix(&[0x00]) {
        interior = rest;
    }
    if let Some(rest) = interior.strip_suffix(&[0x00]) {
        interior = rest;
    }
    let unstuffed = cobs_unstuff(interior)?;
    RawFrame::parse(&unstuffed)
}

/// Split an encoded frame into transport-sized chunks.
///
/// The session header byte is prepended per chunk at enqueue time, not
/// here.
pub fn chunk(encoded: &[u8], max_chunk_size: usize) -> Vec<Vec<u8>> {
    encoded
        .chunks(max_chunk_size)
        .map(|c| c.to_vec())
        .collect()
}

// ---------------------------------------------------------------------------
// Checksum
// ---------------------------------------------------------------------------

/// CRC-16/CCITT-FALSE over `data` (poly 0x1021, init 0xFFFF, no reflection,
/// no final XOR). Check value: `checksum(b"123456789") == 0x29B1`.
pub fn checksum(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

// ---------------------------------------------------------------------------
// COBS
// ---------------------------------------------------------------------------

/// Consistent Overhead Byte Stuffing: remove all zero bytes.
///
/// Each code byte gives the distance to the next zero (or to the end of a
/// 254-byte zero-free run). Overhead is at most one byte per 254.
pub fn cobs_stuff(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 1 + data.len() / 254);
    let mut code_index = out.len();
    out.push(0); // placeholder code byte
    let mut code: u8 = 1;

    for &byte in data {
        if byte == 0 {
            out[code_index] = code;
            code_index = out.len();
            out.push(0);
            code = 1;
        } else {
            out.push(byte);
            code += 1;
            if code == 0xFF {
                out[code_index] = code;
                code_index = out.len();
                out.push(0);
                code = 1;
            }
        }
    }
    out[code_index] = code;
    out
}

/// Invert [`cobs_stuff`]. Fails if a code byte points past the end.
pub fn cobs_unstuff(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        let code = data[i] as usize;
        if code == 0 || i + code > data.len() {
            return Err(WireError::CobsOverrun { offset: i });
        }
        out.extend_from_slice(&data[i + 1..i + code]);
        i += code;
        // A maximal 0xFF group encodes 254 bytes with no implicit zero.
        if code != 0xFF && i < data.len() {
            out.push(0);
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_check_value() {
        assert_eq!(checksum(b"123456789"), 0x29B1);
    }

    #[test]
    fn cobs_known_vectors() {
        // Classic vectors from the COBS paper.
        assert_eq!(cobs_stuff(&[0x00]), vec![0x01, 0x01]);
        assert_eq!(cobs_stuff(&[0x00, 0x00]), vec![0x01, 0x01, 0x01]);
        assert_eq!(
            cobs_stuff(&[0x11, 0x22, 0x00, 0x33]),
            vec![0x03, 0x11, 0x22, 0x02, 0x33]
        );
        assert_eq!(
            cobs_stuff(&[0x11, 0x22, 0x33, 0x44]),
            vec![0x05, 0x11, 0x22, 0x33, 0x44]
        );
    }

    #[test]
    fn cobs_round_trip() {
        let cases: Vec<Vec<u8>> = vec![
            vec![],
            vec![0x00],
            vec![0x00, 0x00, 0x00],
            vec![0x01],
            vec![0xFF; 10],
            vec![0x00, 0x01, 0x00, 0x02, 0x00],
            (0u8..=255).collect(),
        ];
        for case in cases {
            let stuffed = cobs_stuff(&case);
            assert!(!stuffed.contains(&0x00), "stuffed output contains a zero");
            assert_eq!(cobs_unstuff(&stuffed).unwrap(), case, "case {case:02X?}");
        }
    }

    #[test]
    fn cobs_long_zero_free_run() {
        // Runs longer than 254 bytes force a 0xFF group without an implicit
        // zero at the boundary.
        for len in [253usize, 254, 255, 300, 510] {
            let data: Vec<u8> = (0..len).map(|i| (i % 255) as u8 + 1).collect();
            let stuffed = cobs_stuff(&data);
            assert_eq!(cobs_unstuff(&stuffed).unwrap(), data, "len {len}");
        }
    }

    #[test]
    fn cobs_rejects_overrun() {
        // Code byte 0x05 claims 4 data bytes but only 1 follows.
        assert!(matches!(
            cobs_unstuff(&[0x05, 0x11]),
            Err(WireError::CobsOverrun { offset: 0 })
        ));
    }

    #[test]
    fn encode_decode_round_trip() {
        let cases: Vec<Vec<u8>> = vec![
            vec![],
            vec![0x42],
            vec![0x00, 0xFF, 0x00],
            (0u8..=255).collect(),
        ];
        for msg in cases {
            let wire = encode(&msg);
            assert_eq!(wire.first(), Some(&0x00));
            assert_eq!(wire.last(), Some(&0x00));
            let frame = decode(&wire).unwrap();
            assert!(frame.checksum_ok());
            assert_eq!(frame.message, msg);
        }
    }

    #[test]
    fn length_field_covers_whole_frame() {
        let wire = encode(&[0xAA, 0xBB, 0xCC]);
        let unstuffed = cobs_unstuff(&wire[1..wire.len() - 1]).unwrap();
        // 2 (length) + 3 (message) + 2 (checksum)
        assert_eq!(u16::from_le_bytes([unstuffed[0], unstuffed[1]]), 7);
    }

    #[test]
    fn single_bit_corruption_is_detected() {
        let msg: Vec<u8> = (1u8..=40).collect();
        let wire = encode(&msg);
        let unstuffed = cobs_unstuff(&wire[1..wire.len() - 1]).unwrap();
        for byte in 0..unstuffed.len() {
            for bit in 0..8 {
                let mut corrupt = unstuffed.clone();
                corrupt[byte] ^= 1 << bit;
                // Corruption may break framing entirely; when it still
                // parses, the checksum must flag it.
                if let Ok(frame) = RawFrame::parse(&corrupt) {
                    assert!(
                        !frame.checksum_ok(),
                        "flip at byte {byte} bit {bit} went undetected"
                    );
                }
            }
        }
    }

    #[test]
    fn checksum_mismatch_still_yields_payload() {
        let wire = encode(&[0x01, 0x02, 0x03]);
        let mut unstuffed = cobs_unstuff(&wire[1..wire.len() - 1]).unwrap();
        let last = unstuffed.len() - 1;
        unstuffed[last] ^= 0x01;
        let frame = RawFrame::parse(&unstuffed).unwrap();
        assert!(!frame.checksum_ok());
        assert_eq!(frame.message, vec![0x01, 0x02, 0x03]);
    }

    #[test]
    fn chunking_respects_max_size() {
        let wire = encode(&(0u8..=255).collect::<Vec<_>>());
        let chunks = chunk(&wire, MAX_CHUNK_SIZE);
        assert!(chunks.iter().all(|c| c.len() <= MAX_CHUNK_SIZE));
        assert!(chunks.iter().all(|c| !c.is_empty()));
        let reassembled: Vec<u8> = chunks.concat();
        assert_eq!(reassembled, wire);
    }

    #[test]
    fn decode_tolerates_missing_delimiters() {
        let msg = vec![0x10, 0x20];
        let wire = encode(&msg);
        let frame = decode(&wire[1..wire.len() - 1]).unwrap();
        assert_eq!(frame.message, msg);
    }
}
