//! hidapi-backed discovery and transport

use std::ffi::CString;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hidapi::{DeviceInfo, HidApi, HidDevice, HidError};
use tracing::{debug, info, trace, warn};

use crate::device::DeviceDescriptor;
use crate::error::{DualSenseError, TransportError};
use crate::protocol::{
    ConnectionType, DUALSENSE_EDGE_PRODUCT_ID, DUALSENSE_PRODUCT_ID, SONY_VENDOR_ID,
};
use crate::transport::{Connector, Transport};

fn is_dualsense(info: &DeviceInfo) -> bool {
    info.vendor_id() == SONY_VENDOR_ID
        && (info.product_id() == DUALSENSE_PRODUCT_ID
            || info.product_id() == DUALSENSE_EDGE_PRODUCT_ID)
}

fn connection_of(info: &DeviceInfo) -> ConnectionType {
    // USB devices have interface_number >= 0, Bluetooth reports -1
    if info.interface_number() == -1 {
        ConnectionType::Bluetooth
    } else {
        ConnectionType::Usb
    }
}

fn io_error(err: HidError) -> TransportError {
    TransportError::Io(err.to_string())
}

/// Shared handle to the host HID subsystem
#[derive(Clone)]
pub struct HidConnector {
    api: Arc<Mutex<HidApi>>,
}

impl HidConnector {
    pub fn new() -> Result<Self, DualSenseError> {
        let api = HidApi::new().map_err(|e| DualSenseError::ExternalIo(e.to_string()))?;
        Ok(Self {
            api: Arc::new(Mutex::new(api)),
        })
    }

    /// All attached DualSense controllers
    pub fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DualSenseError> {
        let mut api = lock(&self.api)?;
        api.refresh_devices()
            .map_err(|e| DualSenseError::ExternalIo(e.to_string()))?;

        let mut descriptors: Vec<DeviceDescriptor> = Vec::new();
        for info in api.device_list().filter(|d| is_dualsense(d)) {
            let path = info.path().to_string_lossy().into_owned();
            if descriptors.iter().any(|d| d.path() == path) {
                continue;
            }
            let descriptor = DeviceDescriptor::new(path, connection_of(info));
            debug!(
                "Found {} (serial: {}) {}",
                info.product_string().unwrap_or("DualSense"),
                info.serial_number().unwrap_or("unknown"),
                descriptor
            );
            descriptors.push(descriptor);
        }
        Ok(descriptors)
    }
}

fn lock(api: &Mutex<HidApi>) -> Result<std::sync::MutexGuard<'_, HidApi>, DualSenseError> {
    api.lock()
        .map_err(|_| DualSenseError::ExternalIo("HID API lock poisoned".to_string()))
}

impl Connector for HidConnector {
    type Transport = HidTransport;

    fn connect(&self, descriptor: &DeviceDescriptor) -> Result<HidTransport, TransportError> {
        let path = CString::new(descriptor.path()).map_err(|_| {
            TransportError::Io(format!("invalid device path {:?}", descriptor.path()))
        })?;

        let api = self
            .api
            .lock()
            .map_err(|_| TransportError::Io("HID API lock poisoned".to_string()))?;
        let device = api.open_path(&path).map_err(io_error)?;
        info!("Opened {}", descriptor);
        drop(api);

        Ok(HidTransport {
            device,
            path,
            api: Arc::clone(&self.api),
        })
    }
}

/// One opened HID device
pub struct HidTransport {
    device: HidDevice,
    path: CString,
    api: Arc<Mutex<HidApi>>,
}

impl HidTransport {
    /// hidapi reports removal as a generic error; tell the two apart by
    /// checking whether the path is still enumerated.
    fn classify(&self, err: HidError) -> TransportError {
        let Ok(mut api) = self.api.lock() else {
            return io_error(err);
        };
        if let Err(refresh) = api.refresh_devices() {
            warn!("Could not refresh HID device list: {}", refresh);
            return io_error(err);
        }
        let present = api
            .device_list()
            .any(|d| d.path() == self.path.as_c_str());
        if present {
            io_error(err)
        } else {
            info!("Device {:?} no longer present", self.path);
            TransportError::Removed
        }
    }
}

impl Transport for HidTransport {
    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize, TransportError> {
        let timeout_ms = match timeout {
            None => -1,
            Some(d) => d.as_millis().min(i32::MAX as u128) as i32,
        };
        let n = self
            .device
            .read_timeout(buf, timeout_ms)
            .map_err(|e| self.classify(e))?;
        trace!("Read {} bytes", n);
        Ok(n)
    }

    fn write(&mut self, report: &[u8]) -> Result<usize, TransportError> {
        self.device.write(report).map_err(|e| self.classify(e))
    }

    fn get_feature_report(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.device
            .get_feature_report(buf)
            .map_err(|e| self.classify(e))
    }
}

impl Drop for HidTransport {
    fn drop(&mut self) {
        debug!("HID device {:?} released", self.path);
    }
}
