//! Wire-level constants shared by the input decoder and output encoder
//!
//! Layout follows the DualSense HID reports as documented by the Linux
//! `hid-playstation` driver and the Game Controller Collective wiki.

use serde::{Deserialize, Serialize};

/// Sony vendor ID
pub const SONY_VENDOR_ID: u16 = 0x054C;
/// DualSense product ID
pub const DUALSENSE_PRODUCT_ID: u16 = 0x0CE6;
/// DualSense Edge product ID
pub const DUALSENSE_EDGE_PRODUCT_ID: u16 = 0x0DF2;

/// Input report IDs
pub const USB_INPUT_REPORT_ID: u8 = 0x01;
pub const BT_INPUT_REPORT_ID: u8 = 0x31;

/// Input report sizes, including the report ID
pub const USB_INPUT_REPORT_SIZE: usize = 64;
pub const BT_INPUT_REPORT_SIZE: usize = 78;
pub const MAX_INPUT_REPORT_SIZE: usize = BT_INPUT_REPORT_SIZE;

/// Output report IDs
pub const USB_OUTPUT_REPORT_ID: u8 = 0x02;
pub const BT_OUTPUT_REPORT_ID: u8 = 0x31;
/// Second byte of every Bluetooth output report
pub const BT_OUTPUT_REPORT_TAG: u8 = 0x02;

/// Output report sizes, including the report ID (and trailer for Bluetooth)
pub const USB_OUTPUT_REPORT_SIZE: usize = 48;
pub const BT_OUTPUT_REPORT_SIZE: usize = 78;
pub const MAX_OUTPUT_REPORT_SIZE: usize = BT_OUTPUT_REPORT_SIZE;

/// Calibration feature report
pub const FEATURE_REPORT_CALIBRATION: u8 = 0x05;
pub const FEATURE_REPORT_CALIBRATION_SIZE: usize = 41;

/// Seed bytes prepended to the CRC input, one per report direction
pub const CRC_SEED_INPUT: u8 = 0xA1;
pub const CRC_SEED_OUTPUT: u8 = 0xA2;
pub const CRC_SEED_FEATURE: u8 = 0xA3;

/// Size of the Bluetooth integrity trailer
pub const TRAILER_SIZE: usize = 4;

/// Physical link a device is attached through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Usb,
    Bluetooth,
}

impl ConnectionType {
    /// Fixed size of an input report on this transport
    pub fn input_report_size(self) -> usize {
        match self {
            ConnectionType::Usb => USB_INPUT_REPORT_SIZE,
            ConnectionType::Bluetooth => BT_INPUT_REPORT_SIZE,
        }
    }

    /// Fixed size of an output report on this transport
    pub fn output_report_size(self) -> usize {
        match self {
            ConnectionType::Usb => USB_OUTPUT_REPORT_SIZE,
            ConnectionType::Bluetooth => BT_OUTPUT_REPORT_SIZE,
        }
    }

    /// Offset of the transport-independent payload in an input report
    pub(crate) fn input_payload_offset(self) -> usize {
        match self {
            ConnectionType::Usb => 1,
            ConnectionType::Bluetooth => 2,
        }
    }

    /// Offset of the common output block in an output report
    pub(crate) fn output_payload_offset(self) -> usize {
        match self {
            ConnectionType::Usb => 1,
            ConnectionType::Bluetooth => 2,
        }
    }
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionType::Usb => write!(f, "USB"),
            ConnectionType::Bluetooth => write!(f, "Bluetooth"),
        }
    }
}

/// CRC-32 over the seed byte followed by `data`
pub fn checksum(seed: u8, data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[seed]);
    hasher.update(data);
    hasher.finalize()
}

/// Compute the trailer over everything before the last four bytes of `report`
/// and store it there, little-endian.
pub fn write_trailer(seed: u8, report: &mut [u8]) {
    let Some(body_len) = report.len().checked_sub(TRAILER_SIZE) else {
        return;
    };
    let crc = checksum(seed, &report[..body_len]);
    report[body_len..].copy_from_slice(&crc.to_le_bytes());
}

/// Check the trailer of `report`. On mismatch returns `(stored, computed)`.
pub fn verify_trailer(seed: u8, report: &[u8]) -> Result<(), (u32, u32)> {
    let Some(body_len) = report.len().checked_sub(TRAILER_SIZE) else {
        return Err((0, 0));
    };
    let stored = u32::from_le_bytes([
        report[body_len],
        report[body_len + 1],
        report[body_len + 2],
        report[body_len + 3],
    ]);
    let computed = checksum(seed, &report[..body_len]);
    if stored == computed {
        Ok(())
    } else {
        Err((stored, computed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailer_roundtrip() {
        let mut report = [0u8; BT_OUTPUT_REPORT_SIZE];
        report[0] = BT_OUTPUT_REPORT_ID;
        report[1] = BT_OUTPUT_REPORT_TAG;
        report[10] = 0x7F;
        write_trailer(CRC_SEED_OUTPUT, &mut report);
        assert!(verify_trailer(CRC_SEED_OUTPUT, &report).is_ok());
        // Same bytes under the input seed must not verify
        assert!(verify_trailer(CRC_SEED_INPUT, &report).is_err());
    }

    #[test]
    fn test_single_bit_flip_detected() {
        let mut report = [0u8; BT_INPUT_REPORT_SIZE];
        report[0] = BT_INPUT_REPORT_ID;
        for (i, b) in report.iter_mut().enumerate().skip(1).take(60) {
            *b = (i * 7) as u8;
        }
        write_trailer(CRC_SEED_INPUT, &mut report);

        let body_len = report.len() - TRAILER_SIZE;
        for byte in 0..body_len {
            for bit in 0..8 {
                let mut corrupted = report;
                corrupted[byte] ^= 1 << bit;
                assert!(
                    verify_trailer(CRC_SEED_INPUT, &corrupted).is_err(),
                    "flip of byte {byte} bit {bit} went undetected"
                );
                write_trailer(CRC_SEED_INPUT, &mut corrupted);
                assert!(verify_trailer(CRC_SEED_INPUT, &corrupted).is_ok());
            }
        }
    }

    #[test]
    fn test_report_sizes() {
        assert_eq!(ConnectionType::Usb.input_report_size(), 64);
        assert_eq!(ConnectionType::Bluetooth.input_report_size(), 78);
        assert_eq!(ConnectionType::Usb.output_report_size(), 48);
        assert_eq!(ConnectionType::Bluetooth.output_report_size(), 78);
    }
}
