//! DualSense controller sessions over USB and Bluetooth
//!
//! - [`input`] decodes raw input reports into [`InputState`].
//! - [`output`] encodes [`OutputState`] into output reports, with the
//!   Bluetooth CRC trailer.
//! - [`calibration`] turns raw motion samples into physical units.
//! - [`session`] ties them to a [`Transport`] and tracks connect, disconnect
//!   and reconnect.
//!
//! ```no_run
//! use dualsense_link::{HidConnector, Session, SessionConfig};
//!
//! # fn main() -> Result<(), dualsense_link::DualSenseError> {
//! let connector = HidConnector::new()?;
//! let device = connector.enumerate()?.remove(0);
//! let mut session = Session::open(connector, device, SessionConfig::default())?;
//! let state = session.read_input_blocking()?;
//! println!("left stick: {:?}", state.left_stick);
//! session.close();
//! # Ok(())
//! # }
//! ```

pub mod calibration;
pub mod config;
pub mod device;
pub mod error;
pub mod hid;
pub mod input;
pub mod output;
pub mod profile;
pub mod protocol;
pub mod session;
pub mod transport;

pub use calibration::{AxisCalibration, CalibrationModel};
pub use device::{unknown_devices, DeviceDescriptor};
pub use error::{DecodeError, DualSenseError, TransportError};
pub use hid::{HidConnector, HidTransport};
pub use input::{decode, InputState};
pub use output::{encode, encode_into, encode_with, OutputFeatures, OutputState, TriggerEffect};
pub use protocol::ConnectionType;
pub use session::{ConnectionState, RequestStatus, Session, SessionConfig};
pub use transport::{Connector, Transport};
