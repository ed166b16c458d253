//! Monitor configuration.
//!
//! Mirrors the camelCase key/value section of the host application's
//! settings file. Numeric values are accepted as JSON numbers or as
//! quoted strings, since hand-edited settings files carry both.

use serde::{Deserialize, Deserializer};

/// Which telemetry path delivers shots.
///
/// Protobuf push notifications do not arrive on every platform BLE stack;
/// where they are unavailable the raw measurement characteristic is
/// decoded instead. This is a deliberate capability switch, not an
/// automatic fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TelemetrySource {
    ProtobufAlerts,
    RawMeasurement,
}

/// Launch-monitor settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorConfig {
    /// Advertised name to match during discovery.
    pub bluetooth_device_name: Option<String>,
    /// Exact adapter address, preferred over name matching when set.
    pub bluetooth_device_address: Option<String>,
    /// Send a wake RPC when the device reports standby.
    pub auto_wake: bool,
    /// Start tilt calibration as part of setup.
    pub calibrate_tilt_on_connect: bool,
    pub debug_logging: bool,
    /// Ambient temperature, Fahrenheit.
    #[serde(deserialize_with = "lenient_f32")]
    pub temperature: f32,
    /// Relative humidity, 0-1.
    #[serde(deserialize_with = "lenient_f32")]
    pub humidity: f32,
    /// Altitude, feet.
    #[serde(deserialize_with = "lenient_f32")]
    pub altitude: f32,
    #[serde(deserialize_with = "lenient_f32")]
    pub air_density: f32,
    /// Ball-to-device distance; converted to meters for the shot config
    /// RPC.
    #[serde(deserialize_with = "lenient_f32")]
    pub tee_distance_in_feet: f32,
    /// Seconds between reconnect attempts after a dropped connection.
    pub reconnect_interval: u64,
    pub telemetry_source: TelemetrySource,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            bluetooth_device_name: None,
            bluetooth_device_address: None,
            auto_wake: true,
            calibrate_tilt_on_connect: false,
            debug_logging: false,
            temperature: 60.0,
            humidity: 1.0,
            altitude: 0.0,
            air_density: 1.0,
            tee_distance_in_feet: 7.0,
            reconnect_interval: 10,
            telemetry_source: TelemetrySource::ProtobufAlerts,
        }
    }
}

/// Accept `60`, `60.0`, or `"60"`.
fn lenient_f32<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f32),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(value) => Ok(value),
        NumberOrString::String(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}
