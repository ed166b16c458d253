//! Concurrent I/O pipeline.
//!
//! Three worker threads run for the connection's lifetime: a writer
//! draining the outbound chunk queue into GATT writes, a reader turning
//! raw notification chunks back into unstuffed frames, and a dispatcher
//! routing decoded messages by type tag. Queues are crossbeam channels;
//! idle waits are bounded so cancellation is observed promptly. No failure
//! while processing a single chunk or frame may terminate a loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex, RwLock};

use crate::codec;
use crate::correlate::Correlator;
use crate::error::DeviceError;
use crate::events::{DeviceEvent, EventBus};
use crate::frame::{self, RawFrame, MAX_CHUNK_SIZE};
use crate::handshake::Handshake;
use crate::proto::Wrapper;
use crate::transport::{uuids, NotificationHandler, Transport};

/// RPC response pushed by the device.
const TAG_RPC_RESPONSE: [u8; 2] = [0xB4, 0x13];
/// Protobuf push (same tag the client uses for requests).
const TAG_PUSH: [u8; 2] = [0xB3, 0x13];
/// Acknowledgement sent for every received message.
const TAG_ACK: [u8; 2] = [0x88, 0x13];
/// Device info broadcast; acknowledged, not interpreted.
const TAG_DEVICE_INFO: [u8; 2] = [0xA0, 0x13];
/// Config broadcast; acknowledged, not interpreted.
const TAG_CONFIG: [u8; 2] = [0xBA, 0x13];

/// Offset of the protobuf payload within an RPC message body.
const PROTO_OFFSET: usize = 16;

/// Idle wait bound for all three loops, keeping cancellation latency low.
const IDLE_WAIT: Duration = Duration::from_secs(5);

/// How long a blocked RPC caller waits for its response.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Handler for protobuf messages pushed by the device.
pub type PushHandler = Box<dyn Fn(Wrapper) + Send + Sync>;

struct Shared {
    transport: Arc<dyn Transport>,
    events: Arc<EventBus>,
    /// Hex wire traces at debug level, from the `debugLogging` setting.
    wire_trace: bool,
    cancelled: AtomicBool,
    /// Outbound chunks, header already prepended.
    chunk_tx: Sender<Vec<u8>>,
    handshake: Mutex<Handshake>,
    handshake_cond: Condvar,
    correlator: Correlator,
    /// Installed by the owning device after construction, cleared on
    /// shutdown.
    push_handler: RwLock<Option<PushHandler>>,
}

impl Shared {
    /// Prefix the current session header and enqueue for the writer.
    fn enqueue(&self, bytes: &[u8]) {
        let header = self.handshake.lock().header();
        self.enqueue_with_header(header, bytes);
    }

    fn enqueue_with_header(&self, header: u8, bytes: &[u8]) {
        let mut chunk = Vec::with_capacity(bytes.len() + 1);
        chunk.push(header);
        chunk.extend_from_slice(bytes);
        let _ = self.chunk_tx.send(chunk);
    }

    /// Frame, stuff, chunk, and enqueue a complete message.
    fn write_message(&self, message: &[u8]) {
        if self.wire_trace {
            debug!("tx message {message:02X?}");
        }
        self.events
            .publish(DeviceEvent::MessageSent(message.to_vec()));
        let encoded = frame::encode(message);
        for chunk in frame::chunk(&encoded, MAX_CHUNK_SIZE) {
            self.enqueue(&chunk);
        }
    }
}

/// The three-loop engine between the transport and the message layer.
pub struct Pipeline {
    shared: Arc<Shared>,
    inbound_tx: Sender<Vec<u8>>,
    frame_tx: Sender<Vec<u8>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    pub fn new(transport: Arc<dyn Transport>, events: Arc<EventBus>, wire_trace: bool) -> Self {
        let (chunk_tx, chunk_rx) = unbounded::<Vec<u8>>();
        let (inbound_tx, inbound_rx) = unbounded::<Vec<u8>>();
        let (frame_tx, frame_rx) = unbounded::<Vec<u8>>();

        let shared = Arc::new(Shared {
            transport,
            events,
            wire_trace,
            cancelled: AtomicBool::new(false),
            chunk_tx,
            handshake: Mutex::new(Handshake::new()),
            handshake_cond: Condvar::new(),
            correlator: Correlator::new(),
            push_handler: RwLock::new(None),
        });

        let writer = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || writer_loop(&shared, chunk_rx))
        };
        let reader = {
            let shared = Arc::clone(&shared);
            let frame_tx = frame_tx.clone();
            thread::spawn(move || reader_loop(&shared, inbound_rx, frame_tx))
        };
        let dispatcher = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || dispatch_loop(shared, frame_rx))
        };

        Pipeline {
            shared,
            inbound_tx,
            frame_tx,
            workers: Mutex::new(vec![writer, reader, dispatcher]),
        }
    }

    /// Callback to register on the interface notifier characteristic.
    pub fn notification_handler(&self) -> NotificationHandler {
        let tx = self.inbound_tx.clone();
        Box::new(move |data| {
            let _ = tx.send(data.to_vec());
        })
    }

    /// Install the handler for device-initiated protobuf pushes.
    pub fn set_push_handler(&self, handler: PushHandler) {
        *self.shared.push_handler.write() = Some(handler);
    }

    /// Run the session handshake, blocking up to `timeout`.
    ///
    /// Failure is terminal for the connection attempt; the caller restarts
    /// the whole connection sequence rather than retrying the handshake.
    pub fn perform_handshake(&self, timeout: Duration) -> Result<(), DeviceError> {
        let deadline = Instant::now() + timeout;
        let mut hs = self.shared.handshake.lock();
        let probe = hs.begin();
        // The probe goes out under the reset header; enqueue directly to
        // avoid re-locking the handshake for the prefix byte.
        self.shared.enqueue_with_header(hs.header(), probe);

        while !hs.is_complete() {
            let now = Instant::now();
            if now >= deadline {
                return Err(DeviceError::HandshakeTimeout(timeout));
            }
            self.shared
                .handshake_cond
                .wait_for(&mut hs, deadline - now);
        }
        info!("handshake complete, session header 0x{:02X}", hs.header());
        Ok(())
    }

    /// Send an RPC and block for its response. `None` on timeout or when
    /// another request is already in flight; a timed-out request is safe
    /// to retry.
    pub fn send_request(&self, request: &Wrapper) -> Option<Wrapper> {
        let counter = self.shared.correlator.begin()?;
        let message = Correlator::encode_request(counter, &request.encode());
        self.shared.write_message(&message);
        self.shared.correlator.wait(RESPONSE_TIMEOUT)
    }

    /// Frame and send a message without awaiting any response.
    pub fn send_message(&self, message: &[u8]) {
        self.shared.write_message(message);
    }

    /// Stop the loops, join them, and drop the push handler.
    pub fn shutdown(&self) {
        if self.shared.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        // Wake any loop blocked on an empty queue.
        let _ = self.shared.chunk_tx.send(Vec::new());
        let _ = self.inbound_tx.send(Vec::new());
        let _ = self.frame_tx.send(Vec::new());

        for worker in self.workers.lock().drain(..) {
            if worker.join().is_err() {
                error!("pipeline worker panicked during shutdown");
            }
        }
        *self.shared.push_handler.write() = None;
        self.shared.handshake.lock().begin();
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Worker loops
// ---------------------------------------------------------------------------

fn cancelled(shared: &Shared) -> bool {
    shared.cancelled.load(Ordering::SeqCst)
}

fn writer_loop(shared: &Shared, chunk_rx: Receiver<Vec<u8>>) {
    while !cancelled(shared) {
        let chunk = match chunk_rx.recv_timeout(IDLE_WAIT) {
            Ok(chunk) => chunk,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if cancelled(shared) || chunk.is_empty() {
            continue;
        }
        if let Err(err) =
            shared
                .transport
                .write_value(uuids::INTERFACE_SERVICE, uuids::INTERFACE_WRITER, &chunk)
        {
            warn!("chunk write failed: {err}");
        }
    }
}

fn reader_loop(shared: &Shared, inbound_rx: Receiver<Vec<u8>>, frame_tx: Sender<Vec<u8>>) {
    let mut accumulator: Vec<u8> = Vec::new();

    while !cancelled(shared) {
        let chunk = match inbound_rx.recv_timeout(IDLE_WAIT) {
            Ok(chunk) => chunk,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let Some((&header, payload)) = chunk.split_first() else {
            continue;
        };
        if shared.wire_trace {
            debug!("rx chunk 0x{header:02X} {payload:02X?}");
        }

        {
            let mut hs = shared.handshake.lock();
            // Header zero is always handshake traffic, as is anything
            // arriving before negotiation finishes.
            if header == 0x00 || !hs.is_complete() {
                if let Some(ack) = hs.advance(payload) {
                    let new_header = hs.header();
                    drop(hs);
                    shared.enqueue_with_header(new_header, &ack);
                    shared.handshake_cond.notify_all();
                }
                continue;
            }
        }

        let mut payload = payload;
        let mut complete = false;
        if payload.last() == Some(&0x00) {
            // Trailing delimiter closes the frame.
            complete = true;
            payload = &payload[..payload.len() - 1];
        }
        if payload.first() == Some(&0x00) {
            // Leading delimiter starts a fresh frame, dropping any
            // partial accumulation from a lost chunk.
            accumulator.clear();
            payload = &payload[1..];
        }
        accumulator.extend_from_slice(payload);

        if complete && !accumulator.is_empty() {
            match frame::cobs_unstuff(&accumulator) {
                Ok(unstuffed) => {
                    let _ = frame_tx.send(unstuffed);
                }
                Err(err) => warn!("dropping undecodable frame: {err}"),
            }
            accumulator.clear();
        }
    }
}

fn dispatch_loop(shared: Arc<Shared>, frame_rx: Receiver<Vec<u8>>) {
    while !cancelled(&shared) {
        let raw = match frame_rx.recv_timeout(IDLE_WAIT) {
            Ok(raw) => raw,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if cancelled(&shared) || raw.is_empty() {
            continue;
        }
        dispatch_frame(&shared, &raw);
    }
}

fn dispatch_frame(shared: &Arc<Shared>, raw: &[u8]) {
    let frame = match RawFrame::parse(raw) {
        Ok(frame) => frame,
        Err(err) => {
            warn!("dropping malformed frame: {err}");
            return;
        }
    };
    if !frame.checksum_ok() {
        // The device never retransmits; deliver anyway.
        warn!(
            "frame checksum mismatch (received 0x{:04X}, computed 0x{:04X})",
            frame.received_checksum, frame.computed_checksum
        );
    }

    let msg = &frame.message;
    if shared.wire_trace {
        debug!("rx message {msg:02X?}");
    }
    if msg.len() < 2 {
        debug!("ignoring {}-byte message", msg.len());
        return;
    }
    let tag = [msg[0], msg[1]];
    let mut ack_body = vec![0x00];

    match tag {
        TAG_RPC_RESPONSE => {
            shared
                .events
                .publish(DeviceEvent::MessageReceived(msg.clone()));
            if msg.len() < PROTO_OFFSET {
                warn!("truncated response message ({} bytes)", msg.len());
            } else {
                // The read cannot fail past the length check above.
                let counter = codec::read_uint16(msg, 2).unwrap_or_default();
                ack_body.extend_from_slice(&msg[2..4]);
                ack_body.extend_from_slice(&[0x00; 7]);
                match Wrapper::decode(&msg[PROTO_OFFSET..]) {
                    Ok(response) => {
                        shared.correlator.deliver(counter, response);
                    }
                    Err(err) => warn!("undecodable response {counter}: {err}"),
                }
            }
        }
        TAG_PUSH => {
            shared
                .events
                .publish(DeviceEvent::MessageReceived(msg.clone()));
            if msg.len() < PROTO_OFFSET {
                warn!("truncated push message ({} bytes)", msg.len());
            } else {
                ack_body.extend_from_slice(&msg[2..4]);
                ack_body.extend_from_slice(&[0x00; 7]);
                // Parsing is offloaded so a slow handler cannot stall
                // dispatch; ordering against RPC responses is irrelevant
                // because responses correlate by counter.
                let payload = msg[PROTO_OFFSET..].to_vec();
                let shared = Arc::clone(shared);
                thread::spawn(move || handle_push(&shared, &payload));
            }
        }
        TAG_DEVICE_INFO => debug!("device info message acknowledged"),
        TAG_CONFIG => debug!("config message acknowledged"),
        _ => debug!("unrecognized message tag {:02X}{:02X}", tag[0], tag[1]),
    }

    let mut ack = Vec::with_capacity(4 + ack_body.len());
    ack.extend_from_slice(&TAG_ACK);
    ack.extend_from_slice(&msg[0..2]);
    ack.extend_from_slice(&ack_body);
    shared.write_message(&ack);
}

fn handle_push(shared: &Shared, payload: &[u8]) {
    match Wrapper::decode(payload) {
        Ok(wrapper) => {
            if let Some(handler) = shared.push_handler.read().as_ref() {
                handler(wrapper);
            } else {
                debug!("push message dropped: no handler installed");
            }
        }
        Err(err) => warn!("undecodable push message: {err}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::PROBE;
    use crate::proto::service::{ServiceMessage, State, StateType};
    use crate::transport::MockTransport;

    const SESSION_HEADER: u8 = 0x3F;

    /// `RUST_LOG=debug cargo test` shows the traces these tests generate.
    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn handshake_reply_chunk() -> Vec<u8> {
        let mut chunk = vec![0x00, 0x01];
        chunk.extend_from_slice(&[0x00; 8]);
        chunk.extend_from_slice(&[0x01, 0x00, 0x00, SESSION_HEADER]);
        chunk
    }

    /// Split a device-side message into notification chunks.
    fn device_chunks(message: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
        frame::chunk(&frame::encode(message), chunk_size)
            .into_iter()
            .map(|body| {
                let mut chunk = vec![SESSION_HEADER];
                chunk.extend_from_slice(&body);
                chunk
            })
            .collect()
    }

    /// Message body for a device-originated tagged message with the proto
    /// payload at the standard offset.
    fn tagged_message(tag: [u8; 2], counter: u16, proto: &[u8]) -> Vec<u8> {
        let mut msg = Vec::new();
        msg.extend_from_slice(&tag);
        msg.extend_from_slice(&counter.to_le_bytes());
        msg.resize(PROTO_OFFSET, 0x00);
        msg.extend_from_slice(proto);
        msg
    }

    fn connect(transport: &Arc<MockTransport>, pipeline: &Pipeline) {
        init_logging();
        transport
            .subscribe(
                uuids::INTERFACE_SERVICE,
                uuids::INTERFACE_NOTIFIER,
                pipeline.notification_handler(),
            )
            .unwrap();
    }

    #[test]
    fn handshake_negotiates_and_prefixes_header() {
        let transport = Arc::new(MockTransport::new());
        let writes = transport.writes();
        let events = Arc::new(EventBus::new());
        let pipeline = Pipeline::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&events),
            false,
        );
        connect(&transport, &pipeline);

        // Script the device: answer the probe with the negotiated header.
        let scripted = Arc::clone(&transport);
        transport.on_write(move |_, chunk| {
            if chunk.get(0) == Some(&0x00) && chunk[1..] == PROBE {
                scripted.notify(uuids::INTERFACE_NOTIFIER, &handshake_reply_chunk());
            }
        });

        pipeline
            .perform_handshake(Duration::from_secs(5))
            .expect("handshake should complete");

        // Probe went out under header 0x00.
        let (_, probe_chunk) = writes.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(probe_chunk[0], 0x00);
        assert_eq!(&probe_chunk[1..], &PROBE);

        // The 1-byte acknowledgement already carries the new header.
        let (_, ack_chunk) = writes.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(ack_chunk, vec![SESSION_HEADER, 0x00]);

        // So does all later traffic.
        pipeline.send_message(&[0xAA, 0xBB]);
        let (_, chunk) = writes.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(chunk[0], SESSION_HEADER);
    }

    #[test]
    fn handshake_times_out_without_reply() {
        let transport = Arc::new(MockTransport::new());
        let events = Arc::new(EventBus::new());
        let pipeline = Pipeline::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&events),
            false,
        );
        connect(&transport, &pipeline);

        let result = pipeline.perform_handshake(Duration::from_millis(50));
        assert!(matches!(result, Err(DeviceError::HandshakeTimeout(_))));
    }

    #[test]
    fn rpc_round_trips_through_scripted_device() {
        let transport = Arc::new(MockTransport::new());
        let events = Arc::new(EventBus::new());
        // Wire tracing on: the tx/rx trace paths must not disturb traffic.
        let pipeline = Pipeline::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&events),
            true,
        );
        connect(&transport, &pipeline);

        // Device model: complete the handshake, then answer every RPC
        // request with a status response echoing the request counter.
        let scripted = Arc::clone(&transport);
        let inbound = Mutex::new(Vec::<u8>::new());
        transport.on_write(move |_, chunk| {
            let (header, payload) = chunk.split_first().unwrap();
            if *header == 0x00 {
                if payload == PROBE {
                    scripted.notify(uuids::INTERFACE_NOTIFIER, &handshake_reply_chunk());
                }
                return;
            }
            let mut acc = inbound.lock();
            acc.extend_from_slice(payload);
            if payload.last() != Some(&0x00) {
                return;
            }
            let buffered = std::mem::take(&mut *acc);
            let Ok(parsed) = frame::decode(&buffered) else {
                return;
            };
            if parsed.message.len() < PROTO_OFFSET || parsed.message[..2] != TAG_PUSH {
                return; // acks and the handshake ack byte
            }
            let counter = u16::from_le_bytes([parsed.message[2], parsed.message[3]]);
            let reply = Wrapper::service(ServiceMessage::StatusResponse {
                state: Some(State {
                    state: StateType::Waiting,
                }),
            });
            let response = tagged_message(TAG_RPC_RESPONSE, counter, &reply.encode());
            for chunk in device_chunks(&response, MAX_CHUNK_SIZE) {
                scripted.notify(uuids::INTERFACE_NOTIFIER, &chunk);
            }
        });

        pipeline.perform_handshake(Duration::from_secs(5)).unwrap();

        let response = pipeline
            .send_request(&Wrapper::status_request())
            .expect("first request should resolve");
        assert_eq!(
            response.service,
            Some(ServiceMessage::StatusResponse {
                state: Some(State {
                    state: StateType::Waiting
                })
            })
        );

        // The counter advanced; a second call still correlates.
        let response = pipeline
            .send_request(&Wrapper::tilt_request())
            .expect("second request should resolve");
        assert!(response.service.is_some());
    }

    #[test]
    fn push_message_reaches_handler_and_is_acked() {
        let transport = Arc::new(MockTransport::new());
        let writes = transport.writes();
        let events = Arc::new(EventBus::new());
        let pipeline = Pipeline::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&events),
            false,
        );
        connect(&transport, &pipeline);

        let (push_tx, push_rx) = unbounded();
        pipeline.set_push_handler(Box::new(move |wrapper| {
            let _ = push_tx.send(wrapper);
        }));

        // Complete the handshake directly off the notification path.
        transport.notify(uuids::INTERFACE_NOTIFIER, &handshake_reply_chunk());
        let (_, hs_ack) = writes.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(hs_ack, vec![SESSION_HEADER, 0x00]);

        // Feed a push notification split across small chunks.
        let push = tagged_message(TAG_PUSH, 9, &Wrapper::wake_up_request().encode());
        for chunk in device_chunks(&push, 7) {
            transport.notify(uuids::INTERFACE_NOTIFIER, &chunk);
        }

        let wrapper = push_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(wrapper.service, Some(ServiceMessage::WakeUpRequest));

        // The dispatcher acknowledged with the push's tag and counter.
        let mut ack_stream = Vec::new();
        while ack_stream.is_empty() || ack_stream.last() != Some(&0x00) {
            let (_, chunk) = writes.recv_timeout(Duration::from_secs(1)).unwrap();
            assert_eq!(chunk[0], SESSION_HEADER);
            ack_stream.extend_from_slice(&chunk[1..]);
        }
        let ack = frame::decode(&ack_stream).unwrap();
        assert_eq!(&ack.message[..2], &TAG_ACK);
        assert_eq!(&ack.message[2..4], &TAG_PUSH);
        assert_eq!(ack.message[4], 0x00);
        assert_eq!(&ack.message[5..7], &9u16.to_le_bytes());
    }

    #[test]
    fn reader_resets_on_leading_delimiter() {
        let transport = Arc::new(MockTransport::new());
        let writes = transport.writes();
        let events = Arc::new(EventBus::new());
        let pipeline = Pipeline::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&events),
            false,
        );
        connect(&transport, &pipeline);

        let (push_tx, push_rx) = unbounded();
        pipeline.set_push_handler(Box::new(move |wrapper| {
            let _ = push_tx.send(wrapper);
        }));

        transport.notify(uuids::INTERFACE_NOTIFIER, &handshake_reply_chunk());
        let _ = writes.recv_timeout(Duration::from_secs(1)).unwrap();

        // Half of an abandoned frame, never terminated.
        let orphan = device_chunks(&tagged_message(TAG_PUSH, 1, &[0x01]), MAX_CHUNK_SIZE)
            .remove(0);
        transport.notify(uuids::INTERFACE_NOTIFIER, &orphan[..orphan.len() - 1]);

        // A complete frame then arrives; its leading delimiter discards
        // the stale accumulation.
        let push = tagged_message(TAG_PUSH, 2, &Wrapper::status_request().encode());
        for chunk in device_chunks(&push, MAX_CHUNK_SIZE) {
            transport.notify(uuids::INTERFACE_NOTIFIER, &chunk);
        }

        let wrapper = push_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(wrapper.service, Some(ServiceMessage::StatusRequest));
    }

    #[test]
    fn shutdown_is_idempotent() {
        let transport = Arc::new(MockTransport::new());
        let events = Arc::new(EventBus::new());
        let pipeline = Pipeline::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&events),
            false,
        );
        pipeline.shutdown();
        pipeline.shutdown();
    }
}
