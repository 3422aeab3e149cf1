//! Device session state machine
//!
//! A [`Session`] owns one transport to one controller. It is `Connected`
//! after [`Session::open`], drops to `Disconnected` whenever the transport
//! reports the device gone, comes back through [`Session::reconnect`], and
//! ends in the terminal `Closed` state after [`Session::close`].
//!
//! Input can be read in two ways:
//!
//! - [`Session::read_input_blocking`] waits for the next report.
//! - [`Session::start_input_request`] polls without blocking. When no report
//!   is ready the request stays pending until [`Session::await_input_request`]
//!   collects it, after which [`Session::held_input_state`] returns it.
//!
//! At most one request is outstanding at a time.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::calibration::CalibrationModel;
use crate::device::DeviceDescriptor;
use crate::error::{DualSenseError, TransportError};
use crate::input::{self, InputState};
use crate::output::{self, OutputFeatures, OutputState};
use crate::protocol::{
    ConnectionType, FEATURE_REPORT_CALIBRATION, FEATURE_REPORT_CALIBRATION_SIZE,
    MAX_INPUT_REPORT_SIZE,
};
use crate::transport::{Connector, Transport};

/// Session tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Transport read timeout for blocking reads and awaits, in milliseconds.
    /// `None` waits forever.
    pub read_timeout_ms: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: Some(1000),
        }
    }
}

impl SessionConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    /// Transport lost; `reconnect` may restore it
    Disconnected,
    /// Terminal
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Outcome of [`Session::start_input_request`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// A report was already available and is now held
    Complete,
    /// Nothing yet; collect it with [`Session::await_input_request`]
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputRequest {
    Idle,
    Pending { issued: Instant },
    Completed,
}

/// Live handle to one controller
pub struct Session<C: Connector> {
    connector: C,
    descriptor: DeviceDescriptor,
    config: SessionConfig,
    calibration: CalibrationModel,
    transport: Option<C::Transport>,
    state: ConnectionState,
    request: InputRequest,
    buffer: [u8; MAX_INPUT_REPORT_SIZE],
    held: Option<InputState>,
    last_timestamp: Option<u32>,
}

impl<C: Connector> Session<C> {
    /// Connect to `descriptor` and load its calibration
    pub fn open(
        connector: C,
        descriptor: DeviceDescriptor,
        config: SessionConfig,
    ) -> Result<Self, DualSenseError> {
        let mut transport = connector.connect(&descriptor)?;
        let calibration = load_calibration(&mut transport, descriptor.connection())?;
        info!("Session opened for {}", descriptor);

        Ok(Self {
            connector,
            descriptor,
            config,
            calibration,
            transport: Some(transport),
            state: ConnectionState::Connected,
            request: InputRequest::Idle,
            buffer: [0u8; MAX_INPUT_REPORT_SIZE],
            held: None,
            last_timestamp: None,
        })
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn connection(&self) -> ConnectionType {
        self.descriptor.connection()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn calibration(&self) -> &CalibrationModel {
        &self.calibration
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Device timestamp of the last decoded report
    pub fn last_timestamp(&self) -> Option<u32> {
        self.last_timestamp
    }

    /// Whether a request from `start_input_request` is still outstanding
    pub fn has_pending_request(&self) -> bool {
        matches!(self.request, InputRequest::Pending { .. })
    }

    /// Wait for the next input report
    pub fn read_input_blocking(&mut self) -> Result<InputState, DualSenseError> {
        self.ensure_connected()?;
        if self.has_pending_request() {
            return Err(DualSenseError::IoPending);
        }
        let timeout = self.config.read_timeout();
        match self.read_report(timeout)? {
            0 => Err(DualSenseError::IoTimeout),
            len => self.complete(len),
        }
    }

    /// Encode and send `state` with every output block
    pub fn write_output_blocking(&mut self, state: &OutputState) -> Result<(), DualSenseError> {
        self.write_output_with(state, OutputFeatures::all())
    }

    /// Encode and send only the blocks selected by `features`
    pub fn write_output_with(
        &mut self,
        state: &OutputState,
        features: OutputFeatures,
    ) -> Result<(), DualSenseError> {
        self.ensure_connected()?;
        let report = output::encode_with(state, self.connection(), features);

        let Some(transport) = self.transport.as_mut() else {
            return Err(DualSenseError::DeviceRemoved);
        };
        let written = match transport.write(report.as_bytes()) {
            Ok(n) => n,
            Err(err) => return Err(self.transport_failed(err)),
        };
        if written < report.len() {
            return Err(DualSenseError::ExternalIo(format!(
                "short write: {written} of {} bytes",
                report.len()
            )));
        }
        trace!("Wrote output report ({} bytes)", written);
        Ok(())
    }

    /// Poll for a report without blocking
    pub fn start_input_request(&mut self) -> Result<RequestStatus, DualSenseError> {
        self.ensure_connected()?;
        if self.has_pending_request() {
            return Err(DualSenseError::InvalidArgs(
                "an input request is already pending".to_string(),
            ));
        }
        match self.read_report(Some(Duration::ZERO))? {
            0 => {
                self.request = InputRequest::Pending {
                    issued: Instant::now(),
                };
                Ok(RequestStatus::Pending)
            }
            len => {
                self.complete(len)?;
                Ok(RequestStatus::Complete)
            }
        }
    }

    /// Block until the outstanding request completes. Returns the decoded
    /// state, which stays available through `held_input_state`.
    pub fn await_input_request(&mut self) -> Result<InputState, DualSenseError> {
        self.ensure_connected()?;
        match self.request {
            InputRequest::Idle => Err(DualSenseError::IoNotFound),
            InputRequest::Completed => self.held.ok_or(DualSenseError::IoNotFound),
            InputRequest::Pending { issued } => {
                let timeout = self.config.read_timeout();
                match self.read_report(timeout)? {
                    0 => Err(DualSenseError::IoTimeout),
                    len => {
                        trace!("Input request completed after {:?}", issued.elapsed());
                        self.complete(len)
                    }
                }
            }
        }
    }

    /// Last completed state, without any I/O
    pub fn held_input_state(&self) -> Result<InputState, DualSenseError> {
        self.ensure_connected()?;
        match (self.held, self.request) {
            (Some(state), _) => Ok(state),
            (None, InputRequest::Pending { .. }) => Err(DualSenseError::IoPending),
            (None, _) => Err(DualSenseError::IoNotFound),
        }
    }

    /// Re-open the transport after the device went away. Calibration from
    /// `open` is kept. Over Bluetooth the calibration report is requested
    /// again, since reading it is what switches the controller from simple
    /// 0x01 reports to extended 0x31 reports.
    pub fn reconnect(&mut self) -> Result<(), DualSenseError> {
        match self.state {
            ConnectionState::Disconnected => {}
            ConnectionState::Connected => {
                return Err(DualSenseError::InvalidArgs(
                    "session is already connected".to_string(),
                ))
            }
            ConnectionState::Closed => return Err(closed()),
        }

        let mut transport = self.connector.connect(&self.descriptor)?;
        if self.descriptor.connection() == ConnectionType::Bluetooth {
            request_extended_reports(&mut transport)?;
        }
        self.transport = Some(transport);
        self.state = ConnectionState::Connected;
        self.request = InputRequest::Idle;
        self.held = None;
        self.last_timestamp = None;
        info!("Session reconnected to {}", self.descriptor);
        Ok(())
    }

    /// Release the transport but allow a later `reconnect`
    pub fn shutdown(&mut self) -> Result<(), DualSenseError> {
        if self.state == ConnectionState::Closed {
            return Err(closed());
        }
        self.release(ConnectionState::Disconnected);
        info!("Session for {} shut down", self.descriptor);
        Ok(())
    }

    /// Release everything. The session cannot be used afterwards.
    pub fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            self.release(ConnectionState::Closed);
            info!("Session for {} closed", self.descriptor);
        }
    }

    fn ensure_connected(&self) -> Result<(), DualSenseError> {
        match self.state {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Disconnected => Err(DualSenseError::DeviceRemoved),
            ConnectionState::Closed => Err(closed()),
        }
    }

    fn release(&mut self, state: ConnectionState) {
        // Dropping the transport interrupts anything in flight
        self.transport = None;
        self.request = InputRequest::Idle;
        self.state = state;
    }

    /// Map a transport failure, dropping to `Disconnected` on removal
    fn transport_failed(&mut self, err: TransportError) -> DualSenseError {
        if err == TransportError::Removed {
            warn!("Device {} removed", self.descriptor);
            self.release(ConnectionState::Disconnected);
        }
        err.into()
    }

    fn read_report(&mut self, timeout: Option<Duration>) -> Result<usize, DualSenseError> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(DualSenseError::DeviceRemoved);
        };
        match transport.read(&mut self.buffer, timeout) {
            Ok(len) => Ok(len),
            Err(err) => Err(self.transport_failed(err)),
        }
    }

    /// Decode the buffered report and make it the held state
    fn complete(&mut self, len: usize) -> Result<InputState, DualSenseError> {
        let decoded = input::decode(self.connection(), &self.buffer[..len], &self.calibration);
        let mut state = match decoded {
            Ok(state) => state,
            Err(err) => {
                self.request = InputRequest::Idle;
                debug!("Discarding input report: {}", err);
                return Err(err.into());
            }
        };

        state.delta_time = match self.last_timestamp {
            Some(previous) => state.current_time.wrapping_sub(previous),
            None => 0,
        };
        self.last_timestamp = Some(state.current_time);
        self.held = Some(state);
        self.request = InputRequest::Completed;
        trace!(
            "Input report at {} (+{})",
            state.current_time,
            state.delta_time
        );
        Ok(state)
    }
}

fn closed() -> DualSenseError {
    DualSenseError::InvalidArgs("session is closed".to_string())
}

fn load_calibration<T: Transport>(
    transport: &mut T,
    connection: ConnectionType,
) -> Result<CalibrationModel, DualSenseError> {
    let mut report = [0u8; FEATURE_REPORT_CALIBRATION_SIZE];
    report[0] = FEATURE_REPORT_CALIBRATION;
    let len = transport.get_feature_report(&mut report)?;
    CalibrationModel::from_feature_report(&report[..len.min(report.len())], connection)
}

/// The payload is discarded; calibration does not change across a reconnect.
fn request_extended_reports<T: Transport>(transport: &mut T) -> Result<(), DualSenseError> {
    let mut report = [0u8; FEATURE_REPORT_CALIBRATION_SIZE];
    report[0] = FEATURE_REPORT_CALIBRATION;
    let len = transport.get_feature_report(&mut report)?;
    debug!("Requested extended input reports ({} byte feature report)", len);
    Ok(())
}
