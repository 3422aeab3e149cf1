//! Byte-level transport boundary
//!
//! A [`Connector`] opens a [`Transport`] for a [`DeviceDescriptor`]; the
//! session only ever sees these two traits. [`crate::hid`] provides the
//! hidapi-backed implementation.

use std::time::Duration;

use crate::device::DeviceDescriptor;
use crate::error::TransportError;

/// Raw report exchange with one opened device
pub trait Transport {
    /// Read one input report into `buf`.
    ///
    /// `timeout` of `None` blocks until a report arrives; `Some(Duration::ZERO)`
    /// polls. Returns `Ok(0)` when no report was available in time.
    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize, TransportError>;

    /// Write one complete output report, report ID first
    fn write(&mut self, report: &[u8]) -> Result<usize, TransportError>;

    /// Fetch a feature report. `buf[0]` holds the report ID on entry.
    fn get_feature_report(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

/// Opens transports for descriptors. Used by `open` and `reconnect`.
pub trait Connector {
    type Transport: Transport;

    fn connect(&self, descriptor: &DeviceDescriptor) -> Result<Self::Transport, TransportError>;
}

impl<C: Connector + ?Sized> Connector for &C {
    type Transport = C::Transport;

    fn connect(&self, descriptor: &DeviceDescriptor) -> Result<Self::Transport, TransportError> {
        (**self).connect(descriptor)
    }
}
