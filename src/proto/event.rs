//! Alert subscription and notification messages on the event channel.
//!
//! After setup the client subscribes to launch-monitor alerts; the device
//! then pushes notifications carrying state changes, errors, shot metrics,
//! and tilt calibration results.

use super::service::{State, Tilt};
use super::wire::{self, Reader};
use crate::error::Result;

/// Alert categories a client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertType {
    Unknown,
    LaunchMonitor,
}

impl AlertType {
    fn from_raw(raw: u64) -> Self {
        match raw {
            1 => AlertType::LaunchMonitor,
            _ => AlertType::Unknown,
        }
    }

    fn as_raw(self) -> u32 {
        match self {
            AlertType::Unknown => 0,
            AlertType::LaunchMonitor => 1,
        }
    }
}

/// Severity attached to device error alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Unknown,
    Info,
    Warning,
    Error,
}

impl Severity {
    fn from_raw(raw: u64) -> Self {
        match raw {
            1 => Severity::Info,
            2 => Severity::Warning,
            3 => Severity::Error,
            _ => Severity::Unknown,
        }
    }

    fn as_raw(self) -> u32 {
        match self {
            Severity::Unknown => 0,
            Severity::Info => 1,
            Severity::Warning => 2,
            Severity::Error => 3,
        }
    }
}

/// How the device arrived at the reported spin number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinCalculationType {
    Ratio,
    BallFlight,
    Other,
    Measured,
}

impl SpinCalculationType {
    pub fn from_raw(raw: u64) -> Self {
        match raw {
            1 => SpinCalculationType::BallFlight,
            2 => SpinCalculationType::Other,
            3 => SpinCalculationType::Measured,
            _ => SpinCalculationType::Ratio,
        }
    }

    fn as_raw(self) -> u32 {
        match self {
            SpinCalculationType::Ratio => 0,
            SpinCalculationType::BallFlight => 1,
            SpinCalculationType::Other => 2,
            SpinCalculationType::Measured => 3,
        }
    }
}

/// Ball construction detected by the radar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GolfBallType {
    Unknown,
    Conventional,
    Marked,
}

impl GolfBallType {
    fn from_raw(raw: u64) -> Self {
        match raw {
            1 => GolfBallType::Conventional,
            2 => GolfBallType::Marked,
            _ => GolfBallType::Unknown,
        }
    }

    fn as_raw(self) -> u32 {
        match self {
            GolfBallType::Unknown => 0,
            GolfBallType::Conventional => 1,
            GolfBallType::Marked => 2,
        }
    }
}

/// Ball launch measurements. Speeds in m/s, angles in degrees, spin in rpm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BallMetrics {
    pub ball_speed: f32,
    pub launch_angle: f32,
    pub launch_direction: f32,
    pub spin_axis: f32,
    pub total_spin: u32,
    pub golf_ball_type: GolfBallType,
    pub spin_calculation_type: SpinCalculationType,
}

impl Default for BallMetrics {
    fn default() -> Self {
        Self {
            ball_speed: 0.0,
            launch_angle: 0.0,
            launch_direction: 0.0,
            spin_axis: 0.0,
            total_spin: 0,
            golf_ball_type: GolfBallType::Unknown,
            spin_calculation_type: SpinCalculationType::Ratio,
        }
    }
}

impl BallMetrics {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        wire::put_float(&mut buf, 1, self.ball_speed);
        wire::put_float(&mut buf, 2, self.launch_angle);
        wire::put_float(&mut buf, 3, self.launch_direction);
        wire::put_float(&mut buf, 4, self.spin_axis);
        wire::put_uint32(&mut buf, 5, self.total_spin);
        wire::put_uint32(&mut buf, 6, self.golf_ball_type.as_raw());
        wire::put_uint32(&mut buf, 7, self.spin_calculation_type.as_raw());
        buf
    }

    fn decode(body: &[u8]) -> Result<Self> {
        let mut metrics = BallMetrics::default();
        let mut reader = Reader::new(body);
        while let Some((field, value)) = reader.next_field()? {
            match field {
                1 => metrics.ball_speed = value.float(field)?,
                2 => metrics.launch_angle = value.float(field)?,
                3 => metrics.launch_direction = value.float(field)?,
                4 => metrics.spin_axis = value.float(field)?,
                5 => metrics.total_spin = value.uint32(field)?,
                6 => metrics.golf_ball_type = GolfBallType::from_raw(value.varint(field)?),
                7 => {
                    metrics.spin_calculation_type =
                        SpinCalculationType::from_raw(value.varint(field)?)
                }
                _ => {}
            }
        }
        Ok(metrics)
    }
}

/// Club delivery measurements. Speed in m/s, angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClubMetrics {
    pub club_head_speed: f32,
    pub attack_angle: f32,
    pub club_angle_path: f32,
    pub club_angle_face: f32,
}

impl ClubMetrics {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        wire::put_float(&mut buf, 1, self.club_head_speed);
        wire::put_float(&mut buf, 2, self.attack_angle);
        wire::put_float(&mut buf, 3, self.club_angle_path);
        wire::put_float(&mut buf, 4, self.club_angle_face);
        buf
    }

    fn decode(body: &[u8]) -> Result<Self> {
        let mut metrics = ClubMetrics::default();
        let mut reader = Reader::new(body);
        while let Some((field, value)) = reader.next_field()? {
            match field {
                1 => metrics.club_head_speed = value.float(field)?,
                2 => metrics.attack_angle = value.float(field)?,
                3 => metrics.club_angle_path = value.float(field)?,
                4 => metrics.club_angle_face = value.float(field)?,
                _ => {}
            }
        }
        Ok(metrics)
    }
}

/// A complete measured shot as pushed by the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metrics {
    pub shot_id: u32,
    pub ball_metrics: Option<BallMetrics>,
    pub club_metrics: Option<ClubMetrics>,
}

impl Metrics {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        wire::put_uint32(&mut buf, 1, self.shot_id);
        if let Some(ball) = &self.ball_metrics {
            wire::put_message(&mut buf, 2, &ball.encode());
        }
        if let Some(club) = &self.club_metrics {
            wire::put_message(&mut buf, 3, &club.encode());
        }
        buf
    }

    fn decode(body: &[u8]) -> Result<Self> {
        let mut metrics = Metrics {
            shot_id: 0,
            ball_metrics: None,
            club_metrics: None,
        };
        let mut reader = Reader::new(body);
        while let Some((field, value)) = reader.next_field()? {
            match field {
                1 => metrics.shot_id = value.uint32(field)?,
                2 => metrics.ball_metrics = Some(BallMetrics::decode(value.bytes(field)?)?),
                3 => metrics.club_metrics = Some(ClubMetrics::decode(value.bytes(field)?)?),
                _ => {}
            }
        }
        Ok(metrics)
    }
}

/// Error alert. `code` uses explicit presence; a notification can carry a
/// severity with no code.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertError {
    pub code: Option<u32>,
    pub severity: Severity,
    pub device_tilt: Option<Tilt>,
}

impl AlertError {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        if let Some(code) = self.code {
            wire::put_tag(&mut buf, 1, wire::WT_VARINT);
            wire::put_varint(&mut buf, u64::from(code));
        }
        wire::put_uint32(&mut buf, 2, self.severity.as_raw());
        if let Some(tilt) = &self.device_tilt {
            wire::put_message(&mut buf, 3, &tilt.encode());
        }
        buf
    }

    fn decode(body: &[u8]) -> Result<Self> {
        let mut error = AlertError {
            code: None,
            severity: Severity::Unknown,
            device_tilt: None,
        };
        let mut reader = Reader::new(body);
        while let Some((field, value)) = reader.next_field()? {
            match field {
                1 => error.code = Some(value.uint32(field)?),
                2 => error.severity = Severity::from_raw(value.varint(field)?),
                3 => error.device_tilt = Some(Tilt::decode(value.bytes(field)?)?),
                _ => {}
            }
        }
        Ok(error)
    }
}

/// Tilt calibration completion alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TiltCalibration {
    pub status: u32,
}

impl TiltCalibration {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        wire::put_uint32(&mut buf, 1, self.status);
        buf
    }

    fn decode(body: &[u8]) -> Result<Self> {
        let mut cal = TiltCalibration::default();
        let mut reader = Reader::new(body);
        while let Some((field, value)) = reader.next_field()? {
            if field == 1 {
                cal.status = value.uint32(field)?;
            }
        }
        Ok(cal)
    }
}

/// Body of a pushed alert notification. Any subset of sections may be
/// present in one notification.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AlertDetails {
    pub state: Option<State>,
    pub error: Option<AlertError>,
    pub metrics: Option<Metrics>,
    pub tilt_calibration: Option<TiltCalibration>,
}

impl AlertDetails {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        if let Some(state) = &self.state {
            wire::put_message(&mut buf, 1, &state.encode());
        }
        if let Some(error) = &self.error {
            wire::put_message(&mut buf, 2, &error.encode());
        }
        if let Some(metrics) = &self.metrics {
            wire::put_message(&mut buf, 3, &metrics.encode());
        }
        if let Some(cal) = &self.tilt_calibration {
            wire::put_message(&mut buf, 4, &cal.encode());
        }
        buf
    }

    fn decode(body: &[u8]) -> Result<Self> {
        let mut details = AlertDetails::default();
        let mut reader = Reader::new(body);
        while let Some((field, value)) = reader.next_field()? {
            match field {
                1 => details.state = Some(State::decode(value.bytes(field)?)?),
                2 => details.error = Some(AlertError::decode(value.bytes(field)?)?),
                3 => details.metrics = Some(Metrics::decode(value.bytes(field)?)?),
                4 => {
                    details.tilt_calibration =
                        Some(TiltCalibration::decode(value.bytes(field)?)?)
                }
                _ => {}
            }
        }
        Ok(details)
    }
}

/// Subscription status for one alert type, echoed back on subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertStatus {
    pub alert_type: AlertType,
    pub status: u32,
}

/// One event-channel payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EventMessage {
    /// Subscribe to the listed alert types.
    SubscribeRequest { alerts: Vec<AlertType> },
    /// Per-type subscription outcome.
    SubscribeResponse { alert_status: Vec<AlertStatus> },
    /// Pushed alert notification.
    Notification { details: AlertDetails },
}

const F_SUBSCRIBE_REQ: u32 = 1;
const F_SUBSCRIBE_RESP: u32 = 2;
const F_NOTIFICATION: u32 = 3;

impl EventMessage {
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            EventMessage::SubscribeRequest { alerts } => {
                let mut body = Vec::new();
                for alert in alerts {
                    let mut entry = Vec::new();
                    wire::put_uint32(&mut entry, 1, alert.as_raw());
                    wire::put_message(&mut body, 1, &entry);
                }
                wire::put_message(&mut buf, F_SUBSCRIBE_REQ, &body);
            }
            EventMessage::SubscribeResponse { alert_status } => {
                let mut body = Vec::new();
                for status in alert_status {
                    let mut entry = Vec::new();
                    wire::put_uint32(&mut entry, 1, status.alert_type.as_raw());
                    wire::put_uint32(&mut entry, 2, status.status);
                    wire::put_message(&mut body, 1, &entry);
                }
                wire::put_message(&mut buf, F_SUBSCRIBE_RESP, &body);
            }
            EventMessage::Notification { details } => {
                // The notification wraps the alert body one level deeper.
                let mut body = Vec::new();
                wire::put_message(&mut body, 1, &details.encode());
                wire::put_message(&mut buf, F_NOTIFICATION, &body);
            }
        }
        buf
    }

    pub(crate) fn decode(body: &[u8]) -> Result<Option<Self>> {
        let mut message = None;
        let mut reader = Reader::new(body);
        while let Some((field, value)) = reader.next_field()? {
            let inner = match value.bytes(field) {
                Ok(b) => b,
                Err(_) => continue,
            };
            message = Some(match field {
                F_SUBSCRIBE_REQ => {
                    let mut alerts = Vec::new();
                    let mut entries = Reader::new(inner);
                    while let Some((f, v)) = entries.next_field()? {
                        if f == 1 {
                            let mut entry = Reader::new(v.bytes(f)?);
                            while let Some((ef, ev)) = entry.next_field()? {
                                if ef == 1 {
                                    alerts.push(AlertType::from_raw(ev.varint(ef)?));
                                }
                            }
                        }
                    }
                    EventMessage::SubscribeRequest { alerts }
                }
                F_SUBSCRIBE_RESP => {
                    let mut alert_status = Vec::new();
                    let mut entries = Reader::new(inner);
                    while let Some((f, v)) = entries.next_field()? {
                        if f == 1 {
                            let mut status = AlertStatus {
                                alert_type: AlertType::Unknown,
                                status: 0,
                            };
                            let mut entry = Reader::new(v.bytes(f)?);
                            while let Some((ef, ev)) = entry.next_field()? {
                                match ef {
                                    1 => {
                                        status.alert_type = AlertType::from_raw(ev.varint(ef)?)
                                    }
                                    2 => status.status = ev.uint32(ef)?,
                                    _ => {}
                                }
                            }
                            alert_status.push(status);
                        }
                    }
                    EventMessage::SubscribeResponse { alert_status }
                }
                F_NOTIFICATION => {
                    let mut details = AlertDetails::default();
                    let mut fields = Reader::new(inner);
                    while let Some((f, v)) = fields.next_field()? {
                        if f == 1 {
                            details = AlertDetails::decode(v.bytes(f)?)?;
                        }
                    }
                    EventMessage::Notification { details }
                }
                _ => continue,
            });
        }
        Ok(message)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
