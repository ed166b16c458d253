pub mod bridge;
pub mod codec;
pub mod config;
pub mod correlate;
pub mod error;
pub mod events;
pub mod frame;
pub mod handshake;
pub mod monitor;
pub mod pipeline;
pub mod proto;
pub mod raw;
pub mod shot;
pub mod state;
pub mod transport;

pub use bridge::{BallData, ClubData, SimulatorSink};
pub use config::{MonitorConfig, TelemetrySource};
pub use error::{DeviceError, TransportError, WireError};
pub use events::DeviceEvent;
pub use monitor::LaunchMonitor;
pub use shot::ShotMetrics;
pub use transport::{NotificationHandler, Transport};
