//! Error types
//!
//! [`DualSenseError`] is the only failure signal that crosses the public
//! boundary. The decoder and the transport adapters have their own narrower
//! enums which convert into it.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DualSenseError {
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Buffer too small: need {required} bytes, got {provided}")]
    InsufficientBuffer { required: usize, provided: usize },

    #[error("Host I/O error: {0}")]
    ExternalIo(String),

    #[error("Device removed")]
    DeviceRemoved,

    #[error("I/O timeout")]
    IoTimeout,

    #[error("I/O request still pending")]
    IoPending,

    #[error("No I/O request found")]
    IoNotFound,

    #[error("Report integrity check failed (expected {expected:#010x}, got {actual:#010x})")]
    Integrity { expected: u32, actual: u32 },

    #[error("Invalid report received: {0}")]
    InvalidReport(String),

    #[error("Invalid calibration data: {0}")]
    InvalidCalibration(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl DualSenseError {
    /// Whether the error only invalidates the report that produced it. The
    /// session stays usable and the caller may simply read again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DualSenseError::Integrity { .. }
                | DualSenseError::InvalidReport(_)
                | DualSenseError::Unsupported(_)
                | DualSenseError::IoTimeout
        )
    }
}

/// Failure to turn raw input bytes into an [`InputState`](crate::input::InputState).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("report too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("trailer mismatch: expected {expected:#010x}, computed {actual:#010x}")]
    Integrity { expected: u32, actual: u32 },

    #[error("unsupported input report id {0:#04x}")]
    UnsupportedReport(u8),
}

impl From<DecodeError> for DualSenseError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::TooShort { .. } => DualSenseError::InvalidReport(err.to_string()),
            DecodeError::Integrity { expected, actual } => {
                DualSenseError::Integrity { expected, actual }
            }
            DecodeError::UnsupportedReport(_) => DualSenseError::Unsupported(err.to_string()),
        }
    }
}

/// Errors raised by a [`Transport`](crate::transport::Transport) adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The device is no longer attached to the host.
    #[error("device no longer present")]
    Removed,

    #[error("transport timed out")]
    Timeout,

    #[error("{0}")]
    Io(String),
}

impl From<TransportError> for DualSenseError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Removed => DualSenseError::DeviceRemoved,
            TransportError::Timeout => DualSenseError::IoTimeout,
            TransportError::Io(msg) => DualSenseError::ExternalIo(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_mapping() {
        let err: DualSenseError = DecodeError::Integrity {
            expected: 1,
            actual: 2,
        }
        .into();
        assert_eq!(
            err,
            DualSenseError::Integrity {
                expected: 1,
                actual: 2
            }
        );
        assert!(err.is_transient());

        let err: DualSenseError = DecodeError::TooShort {
            expected: 64,
            actual: 10,
        }
        .into();
        assert!(matches!(err, DualSenseError::InvalidReport(_)));
    }

    #[test]
    fn test_transport_error_mapping() {
        assert_eq!(
            DualSenseError::from(TransportError::Removed),
            DualSenseError::DeviceRemoved
        );
        assert_eq!(
            DualSenseError::from(TransportError::Timeout),
            DualSenseError::IoTimeout
        );
        assert!(!DualSenseError::DeviceRemoved.is_transient());
    }
}
