//! Abstract GATT transport.
//!
//! The engine talks to the device through this capability set only; the
//! platform BLE stack (bluer, btleplug, a test double) lives behind it.
//! Notification delivery is push-based: the transport invokes the
//! registered callback once per value change, from its own context.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::TransportError;

/// GATT identifiers for the launch monitor.
pub mod uuids {
    /// Framed protocol service and its notify/write characteristics.
    pub const INTERFACE_SERVICE: &str = "6a4e2800-667b-11e3-949a-0800200c9a66";
    pub const INTERFACE_NOTIFIER: &str = "6a4e2812-667b-11e3-949a-0800200c9a66";
    pub const INTERFACE_WRITER: &str = "6a4e2822-667b-11e3-949a-0800200c9a66";

    /// Raw measurement service, used where protobuf pushes are unavailable.
    pub const MEASUREMENT_SERVICE: &str = "6a4e3400-667b-11e3-949a-0800200c9a66";
    pub const MEASUREMENT_CHARACTERISTIC: &str = "6a4e3401-667b-11e3-949a-0800200c9a66";

    /// Standard battery service.
    pub const BATTERY_SERVICE: &str = "0000180f-0000-1000-8000-00805f9b34fb";
    pub const BATTERY_LEVEL: &str = "00002a19-0000-1000-8000-00805f9b34fb";

    /// Standard device information service.
    pub const DEVICE_INFO_SERVICE: &str = "0000180a-0000-1000-8000-00805f9b34fb";
    pub const FIRMWARE_REVISION: &str = "00002a28-0000-1000-8000-00805f9b34fb";
    pub const MODEL_NUMBER: &str = "00002a24-0000-1000-8000-00805f9b34fb";
    pub const SERIAL_NUMBER: &str = "00002a25-0000-1000-8000-00805f9b34fb";
}

/// Callback invoked per notification with the raw characteristic value.
pub type NotificationHandler = Box<dyn Fn(&[u8]) + Send + Sync>;

/// Platform GATT capability consumed by the engine.
pub trait Transport: Send + Sync {
    /// Read a characteristic's current value.
    fn read_value(&self, service: &str, characteristic: &str)
        -> Result<Vec<u8>, TransportError>;

    /// Write with acknowledgement ("with response") semantics.
    fn write_value(
        &self,
        service: &str,
        characteristic: &str,
        value: &[u8],
    ) -> Result<(), TransportError>;

    /// Subscribe to value-change notifications on a characteristic.
    fn subscribe(
        &self,
        service: &str,
        characteristic: &str,
        handler: NotificationHandler,
    ) -> Result<(), TransportError>;

    /// Tear down the link. Idempotent.
    fn disconnect(&self) -> Result<(), TransportError>;
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------

type WriteHook = Box<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Scriptable in-memory transport.
///
/// Tests install notification handlers through [`Transport::subscribe`] as
/// production code does, then push inbound bytes with
/// [`MockTransport::notify`]. Outbound writes are recorded and optionally
/// forwarded to an `on_write` hook so a test can script device replies.
#[derive(Default)]
pub struct MockTransport {
    values: Mutex<Vec<(String, Vec<u8>)>>,
    handlers: Mutex<Vec<(String, NotificationHandler)>>,
    writes_tx: Mutex<Option<Sender<(String, Vec<u8>)>>>,
    on_write: Mutex<Option<WriteHook>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload a readable characteristic value.
    pub fn set_value(&self, characteristic: &str, value: Vec<u8>) {
        self.values.lock().push((characteristic.to_string(), value));
    }

    /// Receive every write issued through the transport.
    pub fn writes(&self) -> Receiver<(String, Vec<u8>)> {
        let (tx, rx) = unbounded();
        *self.writes_tx.lock() = Some(tx);
        rx
    }

    /// Script a device: invoked synchronously with each write's
    /// characteristic UUID and bytes.
    pub fn on_write(&self, hook: impl Fn(&str, &[u8]) + Send + Sync + 'static) {
        *self.on_write.lock() = Some(Box::new(hook));
    }

    /// Deliver an inbound notification to subscribers of `characteristic`.
    pub fn notify(&self, characteristic: &str, value: &[u8]) {
        let handlers = self.handlers.lock();
        for (uuid, handler) in handlers.iter() {
            if uuid == characteristic {
                handler(value);
            }
        }
    }
}

impl Transport for MockTransport {
    fn read_value(
        &self,
        _service: &str,
        characteristic: &str,
    ) -> Result<Vec<u8>, TransportError> {
        self.values
            .lock()
            .iter()
            .find(|(uuid, _)| uuid == characteristic)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| TransportError::CharacteristicNotFound(characteristic.to_string()))
    }

    fn write_value(
        &self,
        _service: &str,
        characteristic: &str,
        value: &[u8],
    ) -> Result<(), TransportError> {
        if let Some(tx) = self.writes_tx.lock().as_ref() {
            let _ = tx.send((characteristic.to_string(), value.to_vec()));
        }
        if let Some(hook) = self.on_write.lock().as_ref() {
            hook(characteristic, value);
        }
        Ok(())
    }

    fn subscribe(
        &self,
        _service: &str,
        characteristic: &str,
        handler: NotificationHandler,
    ) -> Result<(), TransportError> {
        self.handlers
            .lock()
            .push((characteristic.to_string(), handler));
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
