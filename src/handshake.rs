//! Session handshake state machine.
//!
//! Before any framed traffic flows, the device negotiates a one-byte
//! session header. The client sends a fixed 12-byte probe under header
//! `0x00`; the device answers with the probe echoed behind a `0x01` and the
//! negotiated header byte appended. Every subsequent outbound chunk is
//! prefixed with that header. The device may restart the exchange at any
//! time by sending a chunk with header `0x00`, so inbound header-zero
//! chunks are always routed back here.

/// Fixed probe payload sent to open negotiation.
pub const PROBE: [u8; 12] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00,
];

/// Expected prefix of the device's reply; byte 12 carries the header.
const REPLY_PREFIX: [u8; 12] = [
    0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00,
];

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingAck,
    Complete,
}

/// Negotiated session state. Guarded by the pipeline's handshake mutex.
#[derive(Debug)]
pub struct Handshake {
    phase: Phase,
    header: u8,
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            header: 0x00,
        }
    }

    /// Restart negotiation: clear the header and return the probe to send.
    pub fn begin(&mut self) -> &'static [u8] {
        self.phase = Phase::AwaitingAck;
        self.header = 0x00;
        &PROBE
    }

    /// Feed an inbound header-zero (or pre-completion) chunk payload.
    ///
    /// On a matching reply, the negotiated header is adopted and the 1-byte
    /// acknowledgement to send (under the new header) is returned. Anything
    /// else is ignored; the device retries on its own schedule.
    pub fn advance(&mut self, payload: &[u8]) -> Option<[u8; 1]> {
        if payload.len() > 12 && payload[..12] == REPLY_PREFIX {
            self.header = payload[12];
            self.phase = Phase::Complete;
            return Some([0x00]);
        }
        None
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Current session header for outbound chunk prefixes (0x00 until
    /// negotiation completes).
    pub fn header(&self) -> u8 {
        self.header
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
