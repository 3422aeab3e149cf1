//! Device identity produced by discovery

use serde::Serialize;

use crate::protocol::ConnectionType;

/// Identity of one attached controller. The id is a CRC-32 of the transport
/// path, so it stays the same across enumerations for as long as the OS keeps
/// the path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceDescriptor {
    path: String,
    connection: ConnectionType,
    id: u32,
}

impl DeviceDescriptor {
    pub fn new(path: impl Into<String>, connection: ConnectionType) -> Self {
        let path = path.into();
        let id = crc32fast::hash(path.as_bytes());
        Self {
            path,
            connection,
            id,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn connection(&self) -> ConnectionType {
        self.connection
    }

    pub fn id(&self) -> u32 {
        self.id
    }
}

impl std::fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08x} ({}) {}", self.id, self.connection, self.path)
    }
}

/// Descriptors whose id is not in `known`, in input order
pub fn unknown_devices<'a>(
    descriptors: &'a [DeviceDescriptor],
    known: &[u32],
) -> Vec<&'a DeviceDescriptor> {
    descriptors
        .iter()
        .filter(|d| !known.contains(&d.id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_is_stable() {
        let a = DeviceDescriptor::new("/dev/hidraw3", ConnectionType::Usb);
        let b = DeviceDescriptor::new("/dev/hidraw3".to_string(), ConnectionType::Usb);
        assert_eq!(a.id(), b.id());
        assert_eq!(a.id(), crc32fast::hash(b"/dev/hidraw3"));

        let c = DeviceDescriptor::new("/dev/hidraw4", ConnectionType::Usb);
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn test_unknown_devices() {
        let devices = vec![
            DeviceDescriptor::new("a", ConnectionType::Usb),
            DeviceDescriptor::new("b", ConnectionType::Bluetooth),
            DeviceDescriptor::new("c", ConnectionType::Usb),
        ];
        let known = [devices[1].id()];
        let new: Vec<&str> = unknown_devices(&devices, &known)
            .into_iter()
            .map(|d| d.path())
            .collect();
        assert_eq!(new, vec!["a", "c"]);
        assert!(unknown_devices(&devices, &[]).len() == 3);
    }
}
