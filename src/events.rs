//! Device event fan-out.
//!
//! Consumers subscribe with a bounded or unbounded channel and receive
//! every event published after subscription. Dropping the receiver is the
//! unsubscribe: senders whose peer has disconnected are pruned on the next
//! publish, so dispatch never blocks on a dead subscriber.

use crossbeam_channel::{unbounded, Receiver, Sender, TrySendError};
use log::trace;
use parking_lot::Mutex;

use crate::proto::event::Severity;
use crate::shot::ShotMetrics;

/// Everything the engine reports to the outside world.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// A deduplicated, completed shot.
    Shot(ShotMetrics),
    /// Readiness flipped. Fires only on change.
    ReadinessChanged(bool),
    /// Battery level sample, 0-100.
    BatteryLevel(u8),
    /// Device-reported error alert.
    Error { severity: Severity, message: String },
    /// Trace of an outbound message (pre-framing bytes).
    MessageSent(Vec<u8>),
    /// Trace of an inbound defragmented message.
    MessageReceived(Vec<u8>),
}

/// Multicast publisher for [`DeviceEvent`].
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<DeviceEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber and return its receiving end.
    pub fn subscribe(&self) -> Receiver<DeviceEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver an event to every live subscriber, pruning dead ones.
    pub fn publish(&self, event: DeviceEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                // Unbounded channels never report full; keep the
                // subscriber if that ever changes.
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                trace!("pruning disconnected event subscriber");
                false
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
