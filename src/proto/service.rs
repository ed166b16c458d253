//! Request/response messages on the service channel.
//!
//! The service channel carries one request or response per wrapper, tagged
//! by field number. Requests with no parameters still encode as an empty
//! submessage so the device can tell which operation is being invoked.

use super::wire::{self, Reader};
use crate::error::Result;

/// Device power/measurement state reported by status responses and state
/// change alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateType {
    Unknown,
    Standby,
    Waiting,
    Measuring,
    Error,
}

impl StateType {
    pub fn from_raw(raw: u64) -> Self {
        match raw {
            1 => StateType::Standby,
            2 => StateType::Waiting,
            3 => StateType::Measuring,
            4 => StateType::Error,
            _ => StateType::Unknown,
        }
    }

    pub fn as_raw(self) -> u32 {
        match self {
            StateType::Unknown => 0,
            StateType::Standby => 1,
            StateType::Waiting => 2,
            StateType::Measuring => 3,
            StateType::Error => 4,
        }
    }
}

/// Outcome of a wake-up request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Unknown,
    Success,
    Failure,
}

impl ResponseStatus {
    pub fn from_raw(raw: u64) -> Self {
        match raw {
            1 => ResponseStatus::Success,
            2 => ResponseStatus::Failure,
            _ => ResponseStatus::Unknown,
        }
    }
}

/// Device orientation relative to level ground, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Tilt {
    pub roll: f32,
    pub pitch: f32,
}

impl Tilt {
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        wire::put_float(&mut buf, 1, self.roll);
        wire::put_float(&mut buf, 2, self.pitch);
        buf
    }

    pub(crate) fn decode(body: &[u8]) -> Result<Self> {
        let mut tilt = Tilt::default();
        let mut reader = Reader::new(body);
        while let Some((field, value)) = reader.next_field()? {
            match field {
                1 => tilt.roll = value.float(field)?,
                2 => tilt.pitch = value.float(field)?,
                _ => {}
            }
        }
        Ok(tilt)
    }
}

/// Device state submessage carried by status responses and alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct State {
    pub state: StateType,
}

impl State {
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        wire::put_uint32(&mut buf, 1, self.state.as_raw());
        buf
    }

    pub(crate) fn decode(body: &[u8]) -> Result<Self> {
        let mut state = StateType::Unknown;
        let mut reader = Reader::new(body);
        while let Some((field, value)) = reader.next_field()? {
            if field == 1 {
                state = StateType::from_raw(value.varint(field)?);
            }
        }
        Ok(State { state })
    }
}

/// Environmental parameters applied before shot capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShotConfig {
    pub temperature: f32,
    pub humidity: f32,
    pub altitude: f32,
    pub air_density: f32,
    /// Tee-to-device distance in meters.
    pub tee_range: f32,
}

impl ShotConfig {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        wire::put_float(&mut buf, 1, self.temperature);
        wire::put_float(&mut buf, 2, self.humidity);
        wire::put_float(&mut buf, 3, self.altitude);
        wire::put_float(&mut buf, 4, self.air_density);
        wire::put_float(&mut buf, 5, self.tee_range);
        buf
    }

    fn decode(body: &[u8]) -> Result<Self> {
        let mut config = ShotConfig {
            temperature: 0.0,
            humidity: 0.0,
            altitude: 0.0,
            air_density: 0.0,
            tee_range: 0.0,
        };
        let mut reader = Reader::new(body);
        while let Some((field, value)) = reader.next_field()? {
            match field {
                1 => config.temperature = value.float(field)?,
                2 => config.humidity = value.float(field)?,
                3 => config.altitude = value.float(field)?,
                4 => config.air_density = value.float(field)?,
                5 => config.tee_range = value.float(field)?,
                _ => {}
            }
        }
        Ok(config)
    }
}

/// One service-channel payload. Mirrors the device's oneof: exactly one
/// variant per wrapper.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceMessage {
    StatusRequest,
    StatusResponse { state: Option<State> },
    WakeUpRequest,
    WakeUpResponse { status: ResponseStatus },
    TiltRequest,
    TiltResponse { tilt: Option<Tilt> },
    ShotConfigRequest(ShotConfig),
    ShotConfigResponse { success: bool },
    StartTiltCalRequest,
    StartTiltCalResponse { status: u32 },
    ResetTiltCalRequest { should_reset: bool },
    ResetTiltCalResponse { status: u32 },
}

// Field numbers inside the service wrapper. Requests and responses pair up
// as odd/even neighbors.
const F_STATUS_REQ: u32 = 1;
const F_STATUS_RESP: u32 = 2;
const F_WAKE_REQ: u32 = 3;
const F_WAKE_RESP: u32 = 4;
const F_TILT_REQ: u32 = 5;
const F_TILT_RESP: u32 = 6;
const F_SHOT_CONFIG_REQ: u32 = 7;
const F_SHOT_CONFIG_RESP: u32 = 8;
const F_START_CAL_REQ: u32 = 9;
const F_START_CAL_RESP: u32 = 10;
const F_RESET_CAL_REQ: u32 = 11;
const F_RESET_CAL_RESP: u32 = 12;

impl ServiceMessage {
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            ServiceMessage::StatusRequest => wire::put_message(&mut buf, F_STATUS_REQ, &[]),
            ServiceMessage::StatusResponse { state } => {
                let mut body = Vec::new();
                if let Some(state) = state {
                    wire::put_message(&mut body, 1, &state.encode());
                }
                wire::put_message(&mut buf, F_STATUS_RESP, &body);
            }
            ServiceMessage::WakeUpRequest => wire::put_message(&mut buf, F_WAKE_REQ, &[]),
            ServiceMessage::WakeUpResponse { status } => {
                let mut body = Vec::new();
                let raw = match status {
                    ResponseStatus::Unknown => 0,
                    ResponseStatus::Success => 1,
                    ResponseStatus::Failure => 2,
                };
                wire::put_uint32(&mut body, 1, raw);
                wire::put_message(&mut buf, F_WAKE_RESP, &body);
            }
            ServiceMessage::TiltRequest => wire::put_message(&mut buf, F_TILT_REQ, &[]),
            ServiceMessage::TiltResponse { tilt } => {
                let mut body = Vec::new();
                if let Some(tilt) = tilt {
                    wire::put_message(&mut body, 1, &tilt.encode());
                }
                wire::put_message(&mut buf, F_TILT_RESP, &body);
            }
            ServiceMessage::ShotConfigRequest(config) => {
                wire::put_message(&mut buf, F_SHOT_CONFIG_REQ, &config.encode());
            }
            ServiceMessage::ShotConfigResponse { success } => {
                let mut body = Vec::new();
                wire::put_bool(&mut body, 1, *success);
                wire::put_message(&mut buf, F_SHOT_CONFIG_RESP, &body);
            }
            ServiceMessage::StartTiltCalRequest => {
                wire::put_message(&mut buf, F_START_CAL_REQ, &[]);
            }
            ServiceMessage::StartTiltCalResponse { status } => {
                let mut body = Vec::new();
                wire::put_uint32(&mut body, 1, *status);
                wire::put_message(&mut buf, F_START_CAL_RESP, &body);
            }
            ServiceMessage::ResetTiltCalRequest { should_reset } => {
                let mut body = Vec::new();
                wire::put_bool(&mut body, 1, *should_reset);
                wire::put_message(&mut buf, F_RESET_CAL_REQ, &body);
            }
            ServiceMessage::ResetTiltCalResponse { status } => {
                let mut body = Vec::new();
                wire::put_uint32(&mut body, 1, *status);
                wire::put_message(&mut buf, F_RESET_CAL_RESP, &body);
            }
        }
        buf
    }

    /// Decode the service wrapper body. Returns `None` when no recognized
    /// variant is present.
    pub(crate) fn decode(body: &[u8]) -> Result<Option<Self>> {
        let mut message = None;
        let mut reader = Reader::new(body);
        while let Some((field, value)) = reader.next_field()? {
            let inner = match value.bytes(field) {
                Ok(b) => b,
                Err(_) => continue,
            };
            message = Some(match field {
                F_STATUS_REQ => ServiceMessage::StatusRequest,
                F_STATUS_RESP => {
                    let mut state = None;
                    let mut fields = Reader::new(inner);
                    while let Some((f, v)) = fields.next_field()? {
                        if f == 1 {
                            state = Some(State::decode(v.bytes(f)?)?);
                        }
                    }
                    ServiceMessage::StatusResponse { state }
                }
                F_WAKE_REQ => ServiceMessage::WakeUpRequest,
                F_WAKE_RESP => {
                    let mut status = ResponseStatus::Unknown;
                    let mut fields = Reader::new(inner);
                    while let Some((f, v)) = fields.next_field()? {
                        if f == 1 {
                            status = ResponseStatus::from_raw(v.varint(f)?);
                        }
                    }
                    ServiceMessage::WakeUpResponse { status }
                }
                F_TILT_REQ => ServiceMessage::TiltRequest,
                F_TILT_RESP => {
                    let mut tilt = None;
                    let mut fields = Reader::new(inner);
                    while let Some((f, v)) = fields.next_field()? {
                        if f == 1 {
                            tilt = Some(Tilt::decode(v.bytes(f)?)?);
                        }
                    }
                    ServiceMessage::TiltResponse { tilt }
                }
                F_SHOT_CONFIG_REQ => ServiceMessage::ShotConfigRequest(ShotConfig::decode(inner)?),
                F_SHOT_CONFIG_RESP => {
                    let mut success = false;
                    let mut fields = Reader::new(inner);
                    while let Some((f, v)) = fields.next_field()? {
                        if f == 1 {
                            success = v.boolean(f)?;
                        }
                    }
                    ServiceMessage::ShotConfigResponse { success }
                }
                F_START_CAL_REQ => ServiceMessage::StartTiltCalRequest,
                F_START_CAL_RESP => {
                    let mut status = 0;
                    let mut fields = Reader::new(inner);
                    while let Some((f, v)) = fields.next_field()? {
                        if f == 1 {
                            status = v.uint32(f)?;
                        }
                    }
                    ServiceMessage::StartTiltCalResponse { status }
                }
                F_RESET_CAL_REQ => {
                    let mut should_reset = false;
                    let mut fields = Reader::new(inner);
                    while let Some((f, v)) = fields.next_field()? {
                        if f == 1 {
                            should_reset = v.boolean(f)?;
                        }
                    }
                    ServiceMessage::ResetTiltCalRequest { should_reset }
                }
                F_RESET_CAL_RESP => {
                    let mut status = 0;
                    let mut fields = Reader::new(inner);
                    while let Some((f, v)) = fields.next_field()? {
                        if f == 1 {
                            status = v.uint32(f)?;
                        }
                    }
                    ServiceMessage::ResetTiltCalResponse { status }
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
