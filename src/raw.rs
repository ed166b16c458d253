//! Raw binary measurement decoder.
//!
//! Some transports never deliver protobuf shot notifications; there the
//! measurement characteristic pushes shots as one or two raw fragments.
//! Conventional balls arrive as a first fragment (`FF 00`) followed by a
//! continuation (`00 flags`); marked balls arrive as a single fragment
//! (`7E 00` or `3E 00`). Each fragment carries a 6-byte header: packet
//! type, sequence/flags, and the shot id as a little-endian uint32.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::codec;
use crate::shot::{BallType, ShotMetrics, SpinCalculation};

/// Fragment header: type byte, flags byte, 4-byte shot id.
const HEADER_LEN: usize = 6;

/// Shortest usable combined payload.
const MIN_PAYLOAD_LEN: usize = 10;

/// Combined payload is zero-padded to this before field extraction.
const FULL_PAYLOAD_LEN: usize = 18;

/// Pending buffers idle longer than this are evicted.
const STALE_AFTER: Duration = Duration::from_secs(10);

const MPH_TO_MS: f32 = 0.44704;

/// Flags value synthesized for single-fragment shots: bits 2-3 set to 3
/// (measured spin).
const MARKED_BALL_FLAGS: u8 = 0x0C;

struct ShotPacketBuffer {
    fragments: Vec<Vec<u8>>,
    last_update: Instant,
    flags: u8,
}

/// Reassembles raw measurement fragments into [`ShotMetrics`].
///
/// Deduplication by shot id is the caller's job; a replaced first fragment
/// or a re-sent shot will produce metrics again here.
#[derive(Default)]
pub struct RawMeasurementDecoder {
    pending: HashMap<u32, ShotPacketBuffer>,
}

impl RawMeasurementDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw notification. Returns metrics when a shot completes.
    pub fn process(&mut self, data: &[u8]) -> Option<ShotMetrics> {
        self.process_at(data, Instant::now())
    }

    fn process_at(&mut self, data: &[u8], now: Instant) -> Option<ShotMetrics> {
        if data.len() < HEADER_LEN {
            return None;
        }

        self.pending
            .retain(|_, buffer| now.duration_since(buffer.last_update) <= STALE_AFTER);

        let packet_type = data[0];
        let seq_or_flags = data[1];
        // Header length is checked above.
        let shot_id = codec::read_uint32(data, 2).ok()?;

        match (packet_type, seq_or_flags) {
            (0xFF, 0x00) => {
                // First fragment of a two-fragment shot. A repeat first
                // fragment restarts the buffer.
                let buffer = self.pending.entry(shot_id).or_insert(ShotPacketBuffer {
                    fragments: Vec::new(),
                    last_update: now,
                    flags: 0,
                });
                buffer.fragments.clear();
                buffer.fragments.push(data.to_vec());
                buffer.last_update = now;
                None
            }
            (0x7E, 0x00) | (0x3E, 0x00) => {
                // Single-fragment marked-ball shot, complete immediately.
                let buffer = ShotPacketBuffer {
                    fragments: vec![data.to_vec()],
                    last_update: now,
                    flags: MARKED_BALL_FLAGS,
                };
                parse_complete_shot(shot_id, &buffer)
            }
            (0x00, flags) => {
                let Some(buffer) = self.pending.get_mut(&shot_id) else {
                    return None;
                };
                buffer.fragments.push(data.to_vec());
                buffer.last_update = now;
                buffer.flags = flags;

                let metrics = parse_complete_shot(shot_id, buffer);
                if metrics.is_some() {
                    self.pending.remove(&shot_id);
                }
                metrics
            }
            _ => {
                info!("raw decoder: unknown packet type {packet_type:02X}-{seq_or_flags:02X}");
                None
            }
        }
    }

    /// Number of shots awaiting more fragments.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Concatenate fragment payloads and extract the nine 16-bit fields.
fn parse_complete_shot(shot_id: u32, buffer: &ShotPacketBuffer) -> Option<ShotMetrics> {
    let mut combined: Vec<u8> = Vec::new();
    for fragment in &buffer.fragments {
        combined.extend_from_slice(&fragment[HEADER_LEN..]);
    }

    if combined.len() < MIN_PAYLOAD_LEN {
        info!(
            "raw decoder: shot {shot_id} payload too short ({} bytes)",
            combined.len()
        );
        return None;
    }
    // Marked-ball fragments carry fewer fields; missing trailing fields
    // read as zero.
    combined.resize(combined.len().max(FULL_PAYLOAD_LEN), 0);

    let metrics = match extract_fields(shot_id, &combined, buffer.flags) {
        Ok(metrics) => metrics,
        Err(err) => {
            warn!("raw decoder: shot {shot_id} field extraction failed: {err}");
            return None;
        }
    };

    // Values far outside playable range mean the fragment layout did not
    // match; drop rather than forward garbage.
    if metrics.ball_speed <= 10.0 || metrics.ball_speed >= 150.0 {
        info!(
            "raw decoder: shot {shot_id} ball speed {:.1} m/s out of range, discarding",
            metrics.ball_speed
        );
        return None;
    }

    debug!(
        "raw decoder: shot {shot_id} ball {:.1} m/s, club {:.1} m/s, launch {:.1}\u{b0}/{:.1}\u{b0}, spin {} rpm",
        metrics.ball_speed,
        metrics.club_head_speed,
        metrics.launch_angle,
        metrics.launch_direction,
        metrics.total_spin
    );
    Some(metrics)
}

/// Nine sequential 16-bit fields, each in hundredths of its unit. Speeds
/// are transmitted in mph and converted to m/s; launch direction is
/// sign-inverted relative to the device's convention.
fn extract_fields(shot_id: u32, data: &[u8], flags: u8) -> crate::error::Result<ShotMetrics> {
    let ball_speed_mph = codec::read_uint16_scaled(data, 0, 100.0)?;
    let club_path = codec::read_uint16_scaled(data, 2, 100.0)?;
    let launch_direction = -codec::read_int16_scaled(data, 4, 100.0)?;
    let total_spin = codec::read_uint16(data, 6)?;
    let spin_axis = codec::read_int16_scaled(data, 8, 100.0)?;
    let club_speed_mph = codec::read_uint16_scaled(data, 10, 100.0)?;
    let attack_angle = codec::read_int16_scaled(data, 12, 100.0)?;
    let launch_angle = codec::read_int16_scaled(data, 14, 100.0)?;
    let club_face = codec::read_int16_scaled(data, 16, 100.0)?;

    let spin_calculation = match (flags >> 2) & 0x03 {
        1 => SpinCalculation::BallFlight,
        2 => SpinCalculation::Other,
        3 => SpinCalculation::Measured,
        _ => SpinCalculation::Ratio,
    };

    Ok(ShotMetrics {
        shot_id,
        ball_speed: ball_speed_mph * MPH_TO_MS,
        launch_angle,
        launch_direction,
        spin_axis,
        total_spin: u32::from(total_spin),
        spin_calculation,
        // The raw format does not reliably encode ball construction.
        ball_type: BallType::Unknown,
        club_head_speed: club_speed_mph * MPH_TO_MS,
        attack_angle,
        club_path,
        club_face,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn header(packet_type: u8, flags: u8, shot_id: u32) -> Vec<u8> {
        let mut data = vec![packet_type, flags];
        data.extend_from_slice(&shot_id.to_le_bytes());
        data
    }

    /// 18-byte payload for a plausible 7-iron: ball 9000 (90 mph), path
    /// 150, direction 312 (negated on read), spin 6500, axis -230, club
    /// 7800, attack -410, launch 1650, face 80.
    fn payload() -> Vec<u8> {
        let fields: [i16; 9] = [9000, 150, 312, 6500, -230, 7800, -410, 1650, 80];
        fields.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn two_fragment_shot(decoder: &mut RawMeasurementDecoder, shot_id: u32) -> Option<ShotMetrics> {
        let full = payload();
        let mut first = header(0xFF, 0x00, shot_id);
        first.extend_from_slice(&full[..14]);
        assert!(decoder.process(&first).is_none(), "first fragment alone completed");

        let mut second = header(0x00, 0x03, shot_id);
        second.extend_from_slice(&full[14..]);
        decoder.process(&second)
    }

    #[test]
    fn two_fragment_shot_completes() {
        let mut decoder = RawMeasurementDecoder::new();
        let shot = two_fragment_shot(&mut decoder, 5).unwrap();

        assert_eq!(shot.shot_id, 5);
        assert!((shot.ball_speed - 90.0 * MPH_TO_MS).abs() < 1e-3);
        assert!((shot.club_head_speed - 78.0 * MPH_TO_MS).abs() < 1e-3);
        assert!((shot.launch_angle - 16.5).abs() < 1e-3);
        assert!((shot.launch_direction + 3.12).abs() < 1e-3);
        assert!((shot.spin_axis + 2.3).abs() < 1e-3);
        assert!((shot.attack_angle + 4.1).abs() < 1e-3);
        assert!((shot.club_path - 1.5).abs() < 1e-3);
        assert!((shot.club_face - 0.8).abs() < 1e-3);
        assert_eq!(shot.total_spin, 6500);
        // Flags 0x03 has bits 2-3 clear.
        assert_eq!(shot.spin_calculation, SpinCalculation::Ratio);
        assert_eq!(shot.ball_type, BallType::Unknown);
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn marked_ball_single_fragment() {
        let mut decoder = RawMeasurementDecoder::new();
        let mut data = header(0x7E, 0x00, 9);
        data.extend_from_slice(&payload()[..12]);

        let shot = decoder.process(&data).unwrap();
        assert_eq!(shot.shot_id, 9);
        assert_eq!(shot.spin_calculation, SpinCalculation::Measured);
        // Fields past the fragment end read as zero padding.
        assert_eq!(shot.launch_angle, 0.0);
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn alternate_marked_ball_type() {
        let mut decoder = RawMeasurementDecoder::new();
        let mut data = header(0x3E, 0x00, 10);
        data.extend_from_slice(&payload()[..10]);
        let shot = decoder.process(&data).unwrap();
        assert_eq!(shot.spin_calculation, SpinCalculation::Measured);
    }

    #[test]
    fn continuation_without_first_fragment_is_dropped() {
        let mut decoder = RawMeasurementDecoder::new();
        let mut data = header(0x00, 0x03, 5);
        data.extend_from_slice(&payload()[14..]);
        assert!(decoder.process(&data).is_none());
    }

    #[test]
    fn repeated_first_fragment_restarts_buffer() {
        let mut decoder = RawMeasurementDecoder::new();
        let mut first = header(0xFF, 0x00, 5);
        first.extend_from_slice(&payload()[..14]);
        decoder.process(&first);
        decoder.process(&first);
        assert_eq!(decoder.pending_len(), 1);

        let mut second = header(0x00, 0x00, 5);
        second.extend_from_slice(&payload()[14..]);
        let shot = decoder.process(&second).unwrap();
        assert_eq!(shot.shot_id, 5);
    }

    #[test]
    fn stale_buffers_are_evicted() {
        let mut decoder = RawMeasurementDecoder::new();
        let start = Instant::now();

        let mut first = header(0xFF, 0x00, 5);
        first.extend_from_slice(&payload()[..14]);
        decoder.process_at(&first, start);
        assert_eq!(decoder.pending_len(), 1);

        // A later, unrelated packet triggers the sweep.
        let later = start + Duration::from_secs(11);
        let mut second = header(0x00, 0x03, 5);
        second.extend_from_slice(&payload()[14..]);
        assert!(decoder.process_at(&second, later).is_none());
        assert_eq!(decoder.pending_len(), 0);

        // The same shot id can then start fresh.
        decoder.process_at(&first, later);
        let shot = decoder.process_at(&second, later + Duration::from_secs(1));
        assert!(shot.is_some());
    }

    #[test]
    fn out_of_range_ball_speed_is_rejected() {
        let mut decoder = RawMeasurementDecoder::new();
        // 500 mph reads as ~223 m/s, outside the sanity window.
        let fields: [u16; 9] = [50000, 150, 312, 6500, 0, 7800, 0, 1650, 80];
        let payload: Vec<u8> = fields.iter().flat_map(|f| f.to_le_bytes()).collect();

        let mut data = header(0x7E, 0x00, 3);
        data.extend_from_slice(&payload);
        assert!(decoder.process(&data).is_none());
    }

    #[test]
    fn too_short_fragments_are_ignored() {
        let mut decoder = RawMeasurementDecoder::new();
        assert!(decoder.process(&[0xFF, 0x00, 0x05]).is_none());

        // Single-fragment shot with under 10 payload bytes parses nothing.
        let mut data = header(0x7E, 0x00, 4);
        data.extend_from_slice(&[0x01; 8]);
        assert!(decoder.process(&data).is_none());
    }

    #[test]
    fn unknown_packet_type_is_ignored() {
        let mut decoder = RawMeasurementDecoder::new();
        let mut data = header(0xAB, 0x01, 6);
        data.extend_from_slice(&payload());
        assert!(decoder.process(&data).is_none());
        assert_eq!(decoder.pending_len(), 0);
    }
}
