/// Error types shared by the SensorTag session, decoders and sinks
use std::time::Duration;
use thiserror::Error;

/// Failures of the GATT link. While sensors are being set up an unknown
/// handle is reported as a `ProtocolError` instead.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("no notification within {0:?}")]
    Timeout(Duration),
    #[error("failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },
    #[error("no characteristic with handle 0x{0:04x}")]
    UnknownHandle(u16),
    #[error("link closed")]
    Closed,
    #[error("bluetooth error: {0}")]
    Bluetooth(String),
}

impl LinkError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, LinkError::Timeout(_))
    }
}

/// The device answered with something the protocol does not allow.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("barometer calibration must be {expected} bytes, got {actual}")]
    CalibrationLength { expected: usize, actual: usize },
    #[error("device has no characteristic with handle 0x{0:04x}")]
    UnknownHandle(u16),
}

/// A single notification could not be turned into a reading.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{sensor} payload needs {expected} bytes, got {actual}")]
    ShortPayload {
        sensor: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{sensor} reading is not a finite number")]
    NonFinite { sensor: &'static str },
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(String),
    #[error("sink write took longer than {0:?}")]
    Timeout(Duration),
}

/// Errors that end one connection attempt of a session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] LinkError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no SensorTag devices configured. Please set SENSORTAG_DEVICES or SENSORTAG_<N>_MAC/SENSORTAG_<N>_NAME environment variables")]
    NoDevices,
    #[error("invalid value {value:?} for {key}")]
    InvalidNumber { key: &'static str, value: String },
}
