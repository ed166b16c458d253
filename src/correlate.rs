//! Request/response correlation.
//!
//! The device answers RPCs asynchronously on the notification stream, so a
//! blocking call/response primitive is built from a counter embedded in
//! both directions. At most one request is in flight at a time; the
//! counter advances only when a matching response arrives, so a timed-out
//! request retries under the counter value the device still expects.

use std::time::Duration;

use log::warn;
use parking_lot::{Condvar, Mutex};

use crate::codec;
use crate::proto::Wrapper;

/// Outbound RPC tag. The device echoes responses under `B4 13`.
const TAG_REQUEST: [u8; 2] = [0xB3, 0x13];

struct Slot {
    counter: u32,
    in_flight: bool,
    resolved: bool,
    response: Option<Wrapper>,
}

/// Single-flight correlation state shared between the caller and the
/// dispatcher.
pub struct Correlator {
    slot: Mutex<Slot>,
    cond: Condvar,
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                counter: 0,
                in_flight: false,
                resolved: false,
                response: None,
            }),
            cond: Condvar::new(),
        }
    }

    /// Claim the flight slot and return the counter to embed in the
    /// request. `None` when another request is already outstanding.
    pub fn begin(&self) -> Option<u32> {
        let mut slot = self.slot.lock();
        if slot.in_flight {
            warn!("request rejected: another request is in flight");
            return None;
        }
        slot.in_flight = true;
        slot.resolved = false;
        slot.response = None;
        Some(slot.counter)
    }

    /// Block until the in-flight request resolves or `timeout` elapses.
    ///
    /// Resolution advances the counter and yields the response; a timeout
    /// releases the slot with the counter unchanged.
    pub fn wait(&self, timeout: Duration) -> Option<Wrapper> {
        let mut slot = self.slot.lock();
        if !slot.in_flight {
            return None;
        }
        self.cond.wait_while_for(&mut slot, |s| !s.resolved, timeout);
        slot.in_flight = false;
        if slot.resolved {
            slot.counter += 1;
            slot.resolved = false;
            slot.response.take()
        } else {
            warn!("no response for request {} within {timeout:?}", slot.counter);
            None
        }
    }

    /// Deliver a response carrying the embedded 2-byte counter. Returns
    /// `false` when nothing is in flight or the counter does not match the
    /// expected low 16 bits (stale response, dropped).
    pub fn deliver(&self, counter: u16, response: Wrapper) -> bool {
        let mut slot = self.slot.lock();
        if !slot.in_flight {
            warn!("dropping response {counter}: no request in flight");
            return false;
        }
        if counter != slot.counter as u16 {
            warn!(
                "dropping response with counter {counter}, expected {}",
                slot.counter as u16
            );
            return false;
        }
        slot.resolved = true;
        slot.response = Some(response);
        self.cond.notify_all();
        true
    }

    /// Serialize an RPC request message body:
    /// `B3 13 ‖ counter(4B LE) ‖ 00 00 ‖ len(4B LE) ‖ len(4B LE) ‖ proto`.
    pub fn encode_request(counter: u32, proto: &[u8]) -> Vec<u8> {
        let mut msg = Vec::with_capacity(16 + proto.len());
        msg.extend_from_slice(&TAG_REQUEST);
        codec::write_uint32(&mut msg, counter);
        msg.extend_from_slice(&[0x00, 0x00]);
        codec::write_uint32(&mut msg, proto.len() as u32);
        codec::write_uint32(&mut msg, proto.len() as u32);
        msg.extend_from_slice(proto);
        msg
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_on_matching_counter_only() {
        let correlator = Correlator::new();
        assert_eq!(correlator.begin(), Some(0));

        // A response for a different counter is dropped, call stays pending.
        assert!(!correlator.deliver(1, Wrapper::status_request()));
        // The matching counter resolves it.
        assert!(correlator.deliver(0, Wrapper::status_request()));

        let response = correlator.wait(Duration::from_secs(1)).unwrap();
        assert_eq!(response, Wrapper::status_request());

        // Counter advanced for the next call.
        assert_eq!(correlator.begin(), Some(1));
    }

    #[test]
    fn timeout_keeps_counter_for_retry() {
        let correlator = Correlator::new();
        assert_eq!(correlator.begin(), Some(0));
        assert!(correlator.wait(Duration::from_millis(20)).is_none());

        // Retry presents the same counter.
        assert_eq!(correlator.begin(), Some(0));
    }

    #[test]
    fn single_flight_is_enforced() {
        let correlator = Correlator::new();
        assert_eq!(correlator.begin(), Some(0));
        assert_eq!(correlator.begin(), None);

        correlator.wait(Duration::from_millis(20));
        assert_eq!(correlator.begin(), Some(0));
    }

    #[test]
    fn delivery_without_request_is_dropped() {
        let correlator = Correlator::new();
        assert!(!correlator.deliver(0, Wrapper::status_request()));
    }

    #[test]
    fn request_layout() {
        let msg = Correlator::encode_request(5, &[0xAA, 0xBB, 0xCC]);
        assert_eq!(&msg[0..2], &[0xB3, 0x13]);
        assert_eq!(&msg[2..6], &[0x05, 0x00, 0x00, 0x00]);
        assert_eq!(&msg[6..8], &[0x00, 0x00]);
        assert_eq!(&msg[8..12], &[0x03, 0x00, 0x00, 0x00]);
        assert_eq!(&msg[12..16], &[0x03, 0x00, 0x00, 0x00]);
        assert_eq!(&msg[16..], &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn cross_thread_resolution() {
        use std::sync::Arc;
        let correlator = Arc::new(Correlator::new());
        let counter = correlator.begin().unwrap();

        let delivering = Arc::clone(&correlator);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            delivering.deliver(counter as u16, Wrapper::tilt_request())
        });

        let response = correlator.wait(Duration::from_secs(2)).unwrap();
        assert_eq!(response, Wrapper::tilt_request());
        assert!(handle.join().unwrap());
    }
}
