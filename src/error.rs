use thiserror::Error;

/// Errors arising from wire-level parsing and encoding.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame too short ({len} bytes, minimum {min})")]
    FrameTooShort { len: usize, min: usize },

    #[error("COBS code byte at offset {offset} overruns the buffer")]
    CobsOverrun { offset: usize },

    #[error("checksum mismatch (received 0x{received:04X}, computed 0x{computed:04X})")]
    ChecksumMismatch { received: u16, computed: u16 },

    #[error("payload too short for {msg_type}: need {need} bytes, got {got}")]
    PayloadTooShort {
        msg_type: &'static str,
        need: usize,
        got: usize,
    },

    #[error("varint at offset {offset} is truncated or longer than 10 bytes")]
    InvalidVarint { offset: usize },

    #[error("unsupported wire type {wire_type} for field {field}")]
    UnexpectedWireType { field: u32, wire_type: u8 },

    #[error("length-delimited field at offset {offset} overruns the buffer")]
    TruncatedField { offset: usize },
}

impl WireError {
    pub(crate) fn payload_too_short(msg_type: &'static str, need: usize, got: usize) -> Self {
        Self::PayloadTooShort { msg_type, need, got }
    }
}

/// Errors from the platform GATT transport boundary.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,

    #[error("GATT service {0} not found")]
    ServiceNotFound(String),

    #[error("GATT characteristic {0} not found")]
    CharacteristicNotFound(String),

    #[error("GATT {op} failed: {detail}")]
    Gatt { op: &'static str, detail: String },
}

/// Errors surfaced to the owner of a device connection.
///
/// Per-message failures (checksum mismatch, counter mismatch, malformed
/// fragments) are logged and absorbed by the pipeline; only conditions that
/// require a full reconnect appear here.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("handshake did not complete within {0:?}")]
    HandshakeTimeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, WireError>;
