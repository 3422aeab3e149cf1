//! Input report decoding
//!
//! Turns a raw USB or Bluetooth input report into the transport-independent
//! [`InputState`]. Decoding is pure: the caller owns the timestamp history and
//! fills in [`InputState::delta_time`].

use nalgebra::Vector3;
use serde::Serialize;

use crate::calibration::{CalibrationModel, ACC_RES_PER_G, GYRO_RES_PER_DEG_S};
use crate::error::DecodeError;
use crate::protocol::{
    verify_trailer, ConnectionType, BT_INPUT_REPORT_ID, CRC_SEED_INPUT, USB_INPUT_REPORT_ID,
};

/// Bits of [`InputState::buttons`]. The layout is the same on every transport
/// and the top 13 bits are always zero.
pub mod buttons {
    pub const DPAD_LEFT: u32 = 0x01;
    pub const DPAD_DOWN: u32 = 0x02;
    pub const DPAD_RIGHT: u32 = 0x04;
    pub const DPAD_UP: u32 = 0x08;
    pub const SQUARE: u32 = 0x10;
    pub const CROSS: u32 = 0x20;
    pub const CIRCLE: u32 = 0x40;
    pub const TRIANGLE: u32 = 0x80;
    pub const L_BUMPER: u32 = 0x100;
    pub const R_BUMPER: u32 = 0x200;
    pub const L_TRIGGER: u32 = 0x400;
    pub const R_TRIGGER: u32 = 0x800;
    pub const SELECT: u32 = 0x1000;
    pub const MENU: u32 = 0x2000;
    pub const L_STICK: u32 = 0x4000;
    pub const R_STICK: u32 = 0x8000;
    pub const PS_LOGO: u32 = 0x10000;
    pub const PAD_BUTTON: u32 = 0x20000;
    pub const MIC_BUTTON: u32 = 0x40000;

    /// Every defined bit
    pub const ALL: u32 = 0x7FFFF;

    /// Names used for display, in bit order
    pub const NAMES: [(u32, &str); 19] = [
        (DPAD_LEFT, "dpad_left"),
        (DPAD_DOWN, "dpad_down"),
        (DPAD_RIGHT, "dpad_right"),
        (DPAD_UP, "dpad_up"),
        (SQUARE, "square"),
        (CROSS, "cross"),
        (CIRCLE, "circle"),
        (TRIANGLE, "triangle"),
        (L_BUMPER, "l1"),
        (R_BUMPER, "r1"),
        (L_TRIGGER, "l2"),
        (R_TRIGGER, "r2"),
        (SELECT, "create"),
        (MENU, "options"),
        (L_STICK, "l3"),
        (R_STICK, "r3"),
        (PS_LOGO, "ps"),
        (PAD_BUTTON, "touchpad"),
        (MIC_BUTTON, "mute"),
    ];
}

// Offsets into the payload that follows the report ID (and the Bluetooth
// header byte).
const OFFSET_LEFT_STICK: usize = 0;
const OFFSET_RIGHT_STICK: usize = 2;
const OFFSET_LEFT_TRIGGER: usize = 4;
const OFFSET_RIGHT_TRIGGER: usize = 5;
const OFFSET_BUTTONS: usize = 7;
const OFFSET_GYRO: usize = 15;
const OFFSET_ACCEL: usize = 21;
const OFFSET_SENSOR_TIMESTAMP: usize = 27;
const OFFSET_TOUCH: usize = 32;
const OFFSET_RIGHT_TRIGGER_FEEDBACK: usize = 41;
const OFFSET_LEFT_TRIGGER_FEEDBACK: usize = 42;
const OFFSET_STATUS: usize = 52;
const OFFSET_PERIPHERALS: usize = 53;

/// Analog stick position, 0 = center. Up and right are positive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stick {
    pub x: i8,
    pub y: i8,
}

impl Stick {
    fn from_raw(x: u8, y: u8) -> Self {
        Self {
            x: (i16::from(x) - 128).clamp(-128, 127) as i8,
            y: (128 - i16::from(y)).clamp(-128, 127) as i8,
        }
    }

    /// Get normalized values (-1.0 to 1.0)
    pub fn normalized(&self) -> (f32, f32) {
        let x = self.x as f32 / 127.0;
        let y = self.y as f32 / 127.0;
        (x.clamp(-1.0, 1.0), y.clamp(-1.0, 1.0))
    }
}

/// Calibrated three-axis sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MotionVector {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl MotionVector {
    /// Accelerometer sample in g
    pub fn to_g(&self) -> Vector3<f32> {
        const SCALE: f32 = 1.0 / ACC_RES_PER_G as f32;
        Vector3::new(
            self.x as f32 * SCALE,
            self.y as f32 * SCALE,
            self.z as f32 * SCALE,
        )
    }

    /// Gyroscope sample in radians per second
    pub fn to_rad_per_sec(&self) -> Vector3<f32> {
        const SCALE: f32 = 1.0 / GYRO_RES_PER_DEG_S as f32;
        Vector3::new(
            (self.x as f32 * SCALE).to_radians(),
            (self.y as f32 * SCALE).to_radians(),
            (self.z as f32 * SCALE).to_radians(),
        )
    }
}

/// One touchpad contact
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Touch {
    /// 0 to about 2000
    pub x: u16,
    /// 0 to about 2048
    pub y: u16,
    pub down: bool,
    /// Rolling 7-bit contact id
    pub id: u8,
}

impl Touch {
    fn from_raw(data: &[u8]) -> Self {
        Self {
            // Bit 7 is set while the finger is lifted
            down: (data[0] & 0x80) == 0,
            id: data[0] & 0x7F,
            x: u16::from(data[2] & 0x0F) << 8 | u16::from(data[1]),
            y: u16::from(data[3]) << 4 | u16::from((data[2] & 0xF0) >> 4),
        }
    }
}

/// Battery status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Battery {
    pub charging: bool,
    pub fully_charged: bool,
    /// 0-10
    pub level: u8,
}

impl Battery {
    fn from_status(status: u8) -> Self {
        let charge_state = (status & 0xF0) >> 4;
        Self {
            charging: charge_state == 0x1,
            fully_charged: charge_state == 0x2,
            level: status & 0x0F,
        }
    }

    pub fn percentage(&self) -> u8 {
        if self.fully_charged {
            return 100;
        }
        (self.level.saturating_mul(10).saturating_add(5)).min(100)
    }
}

/// Transport-independent snapshot of one input report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InputState {
    pub left_stick: Stick,
    pub right_stick: Stick,
    /// Bitmask of [`buttons`] constants
    pub buttons: u32,
    pub left_trigger: u8,
    pub right_trigger: u8,
    /// Calibrated, 1/8192 g per unit
    pub accelerometer: MotionVector,
    /// Calibrated, 1/1024 deg/s per unit
    pub gyroscope: MotionVector,
    pub touch_points: [Touch; 2],
    /// Device clock in units of 1/3 microsecond, wrapping at 32 bits
    pub current_time: u32,
    /// Device time since the previous report, same units
    pub delta_time: u32,
    pub battery: Battery,
    pub headphone_connected: bool,
    pub left_trigger_feedback: u8,
    pub right_trigger_feedback: u8,
}

impl InputState {
    /// Whether every bit of `mask` is set
    pub fn is_pressed(&self, mask: u32) -> bool {
        self.buttons & mask == mask
    }

    /// Names of the pressed buttons, in bit order
    pub fn pressed_names(&self) -> Vec<&'static str> {
        buttons::NAMES
            .iter()
            .filter(|(bit, _)| self.buttons & bit != 0)
            .map(|(_, name)| *name)
            .collect()
    }
}

/// Decode a raw input report, report ID included.
///
/// Bluetooth reports are rejected with [`DecodeError::Integrity`] when their
/// trailer does not match; such a report should be discarded and the next one
/// read. `delta_time` is always 0 in the result.
pub fn decode(
    connection: ConnectionType,
    buffer: &[u8],
    calibration: &CalibrationModel,
) -> Result<InputState, DecodeError> {
    let expected_len = connection.input_report_size();
    let expected_id = match connection {
        ConnectionType::Usb => USB_INPUT_REPORT_ID,
        ConnectionType::Bluetooth => BT_INPUT_REPORT_ID,
    };

    let Some(&report_id) = buffer.first() else {
        return Err(DecodeError::TooShort {
            expected: expected_len,
            actual: 0,
        });
    };
    if report_id != expected_id {
        return Err(DecodeError::UnsupportedReport(report_id));
    }
    if buffer.len() < expected_len {
        return Err(DecodeError::TooShort {
            expected: expected_len,
            actual: buffer.len(),
        });
    }

    let report = &buffer[..expected_len];
    if connection == ConnectionType::Bluetooth {
        verify_trailer(CRC_SEED_INPUT, report)
            .map_err(|(expected, actual)| DecodeError::Integrity { expected, actual })?;
    }

    Ok(decode_payload(
        &report[connection.input_payload_offset()..],
        calibration,
    ))
}

fn decode_payload(d: &[u8], calibration: &CalibrationModel) -> InputState {
    let sample = |offset: usize| i16::from_le_bytes([d[offset], d[offset + 1]]);
    let gyro = calibration.gyroscope();
    let accel = calibration.accelerometer();

    InputState {
        left_stick: Stick::from_raw(d[OFFSET_LEFT_STICK], d[OFFSET_LEFT_STICK + 1]),
        right_stick: Stick::from_raw(d[OFFSET_RIGHT_STICK], d[OFFSET_RIGHT_STICK + 1]),
        buttons: unpack_buttons(&d[OFFSET_BUTTONS..OFFSET_BUTTONS + 3]),
        left_trigger: d[OFFSET_LEFT_TRIGGER],
        right_trigger: d[OFFSET_RIGHT_TRIGGER],
        gyroscope: MotionVector {
            x: gyro[0].apply(sample(OFFSET_GYRO)),
            y: gyro[1].apply(sample(OFFSET_GYRO + 2)),
            z: gyro[2].apply(sample(OFFSET_GYRO + 4)),
        },
        accelerometer: MotionVector {
            x: accel[0].apply(sample(OFFSET_ACCEL)),
            y: accel[1].apply(sample(OFFSET_ACCEL + 2)),
            z: accel[2].apply(sample(OFFSET_ACCEL + 4)),
        },
        touch_points: [
            Touch::from_raw(&d[OFFSET_TOUCH..OFFSET_TOUCH + 4]),
            Touch::from_raw(&d[OFFSET_TOUCH + 4..OFFSET_TOUCH + 8]),
        ],
        current_time: u32::from_le_bytes([
            d[OFFSET_SENSOR_TIMESTAMP],
            d[OFFSET_SENSOR_TIMESTAMP + 1],
            d[OFFSET_SENSOR_TIMESTAMP + 2],
            d[OFFSET_SENSOR_TIMESTAMP + 3],
        ]),
        delta_time: 0,
        battery: Battery::from_status(d[OFFSET_STATUS]),
        headphone_connected: (d[OFFSET_PERIPHERALS] & 0x01) != 0,
        left_trigger_feedback: d[OFFSET_LEFT_TRIGGER_FEEDBACK],
        right_trigger_feedback: d[OFFSET_RIGHT_TRIGGER_FEEDBACK],
    }
}

/// Unpack the three button bytes into the canonical mask
fn unpack_buttons(raw: &[u8]) -> u32 {
    let face = u32::from(raw[0] & 0xF0);
    let shoulder = u32::from(raw[1]) << 8;
    let system = u32::from(raw[2] & 0x07) << 16;

    // Hat switch: 0 = north, clockwise in 45 degree steps
    let dpad = match raw[0] & 0x0F {
        0 => buttons::DPAD_UP,
        1 => buttons::DPAD_UP | buttons::DPAD_RIGHT,
        2 => buttons::DPAD_RIGHT,
        3 => buttons::DPAD_RIGHT | buttons::DPAD_DOWN,
        4 => buttons::DPAD_DOWN,
        5 => buttons::DPAD_DOWN | buttons::DPAD_LEFT,
        6 => buttons::DPAD_LEFT,
        7 => buttons::DPAD_LEFT | buttons::DPAD_UP,
        _ => 0,
    };

    face | shoulder | system | dpad
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::calibration::AxisCalibration;
    use crate::protocol::{write_trailer, BT_INPUT_REPORT_SIZE, USB_INPUT_REPORT_SIZE};

    const HAT_RELEASED: u8 = 0x08;

    /// Report with centered sticks and released hat, payload zero elsewhere
    pub(crate) fn neutral_report(connection: ConnectionType) -> Vec<u8> {
        let mut report = vec![0u8; connection.input_report_size()];
        let offset = connection.input_payload_offset();
        report[0] = match connection {
            ConnectionType::Usb => USB_INPUT_REPORT_ID,
            ConnectionType::Bluetooth => BT_INPUT_REPORT_ID,
        };
        for i in 0..4 {
            report[offset + i] = 0x80;
        }
        report[offset + OFFSET_BUTTONS] = HAT_RELEASED;
        // Both fingers lifted
        report[offset + OFFSET_TOUCH] = 0x80;
        report[offset + OFFSET_TOUCH + 4] = 0x80;
        seal(connection, &mut report);
        report
    }

    /// Refresh the Bluetooth trailer after editing a report
    pub(crate) fn seal(connection: ConnectionType, report: &mut [u8]) {
        if connection == ConnectionType::Bluetooth {
            write_trailer(CRC_SEED_INPUT, report);
        }
    }

    pub(crate) fn with_timestamp(connection: ConnectionType, timestamp: u32) -> Vec<u8> {
        let mut report = neutral_report(connection);
        let at = connection.input_payload_offset() + OFFSET_SENSOR_TIMESTAMP;
        report[at..at + 4].copy_from_slice(&timestamp.to_le_bytes());
        seal(connection, &mut report);
        report
    }

    fn patch(connection: ConnectionType, edits: &[(usize, u8)]) -> Vec<u8> {
        let mut report = neutral_report(connection);
        let offset = connection.input_payload_offset();
        for &(at, value) in edits {
            report[offset + at] = value;
        }
        seal(connection, &mut report);
        report
    }

    #[test]
    fn test_neutral_report_is_centered() {
        for connection in [ConnectionType::Usb, ConnectionType::Bluetooth] {
            let report = neutral_report(connection);
            let state = decode(connection, &report, &CalibrationModel::identity()).unwrap();
            assert_eq!(state.left_stick, Stick { x: 0, y: 0 });
            assert_eq!(state.right_stick, Stick { x: 0, y: 0 });
            assert_eq!(state.buttons, 0);
            assert_eq!(state.left_trigger, 0);
            assert_eq!(state.right_trigger, 0);
            assert_eq!(state.battery.level, 0);
            assert!(!state.touch_points[0].down);
            assert!(!state.touch_points[1].down);
        }
    }

    #[test]
    fn test_zeroed_payload() {
        let mut report = [0u8; USB_INPUT_REPORT_SIZE];
        report[0] = USB_INPUT_REPORT_ID;
        let state = decode(ConnectionType::Usb, &report, &CalibrationModel::identity()).unwrap();
        assert_eq!(state.left_trigger, 0);
        assert_eq!(state.right_trigger, 0);
        assert_eq!(state.battery, Battery::default());
        // Hat value 0 is "north"
        assert_eq!(state.buttons, buttons::DPAD_UP);
        assert_eq!(state.left_stick, Stick { x: -128, y: 127 });
    }

    #[test]
    fn test_cross_and_left_bumper() {
        let report = patch(
            ConnectionType::Usb,
            &[(OFFSET_BUTTONS, 0x20 | HAT_RELEASED), (OFFSET_BUTTONS + 1, 0x01)],
        );
        let state = decode(ConnectionType::Usb, &report, &CalibrationModel::identity()).unwrap();
        assert_eq!(state.buttons, 0x120);
        assert!(state.is_pressed(buttons::CROSS | buttons::L_BUMPER));
        assert_eq!(state.pressed_names(), vec!["cross", "l1"]);
    }

    #[test]
    fn test_every_button_bit() {
        let report = patch(
            ConnectionType::Bluetooth,
            &[
                (OFFSET_BUTTONS, 0xF0 | 0x05),
                (OFFSET_BUTTONS + 1, 0xFF),
                // Edge paddles and unknown bits must not leak into the mask
                (OFFSET_BUTTONS + 2, 0xFF),
            ],
        );
        let state =
            decode(ConnectionType::Bluetooth, &report, &CalibrationModel::identity()).unwrap();
        assert_eq!(state.buttons, buttons::ALL & !(buttons::DPAD_UP | buttons::DPAD_RIGHT));
        assert_eq!(state.buttons >> 19, 0);
    }

    #[test]
    fn test_hat_directions() {
        let expected = [
            buttons::DPAD_UP,
            buttons::DPAD_UP | buttons::DPAD_RIGHT,
            buttons::DPAD_RIGHT,
            buttons::DPAD_RIGHT | buttons::DPAD_DOWN,
            buttons::DPAD_DOWN,
            buttons::DPAD_DOWN | buttons::DPAD_LEFT,
            buttons::DPAD_LEFT,
            buttons::DPAD_LEFT | buttons::DPAD_UP,
            0,
        ];
        for (hat, mask) in expected.iter().enumerate() {
            assert_eq!(unpack_buttons(&[hat as u8, 0, 0]), *mask, "hat {hat}");
        }
        assert_eq!(unpack_buttons(&[0x0F, 0, 0]), 0);
    }

    #[test]
    fn test_sticks_and_triggers() {
        let report = patch(
            ConnectionType::Usb,
            &[(0, 0xFF), (1, 0x00), (2, 0x00), (3, 0xFF), (4, 17), (5, 240)],
        );
        let state = decode(ConnectionType::Usb, &report, &CalibrationModel::identity()).unwrap();
        assert_eq!(state.left_stick, Stick { x: 127, y: 127 });
        assert_eq!(state.right_stick, Stick { x: -128, y: -127 });
        assert_eq!(state.left_trigger, 17);
        assert_eq!(state.right_trigger, 240);
    }

    #[test]
    fn test_touch_points() {
        // x = 0x5A3, y = 0x3C7, id 0x15, down
        let report = patch(
            ConnectionType::Usb,
            &[
                (OFFSET_TOUCH, 0x15),
                (OFFSET_TOUCH + 1, 0xA3),
                (OFFSET_TOUCH + 2, 0x75),
                (OFFSET_TOUCH + 3, 0x3C),
                (OFFSET_TOUCH + 4, 0x80 | 0x16),
            ],
        );
        let state = decode(ConnectionType::Usb, &report, &CalibrationModel::identity()).unwrap();
        let first = state.touch_points[0];
        assert!(first.down);
        assert_eq!(first.id, 0x15);
        assert_eq!(first.x, 0x5A3);
        assert_eq!(first.y, 0x3C7);
        let second = state.touch_points[1];
        assert!(!second.down);
        assert_eq!(second.id, 0x16);
    }

    #[test]
    fn test_status_bytes() {
        let report = patch(
            ConnectionType::Usb,
            &[
                (OFFSET_STATUS, 0x17),
                (OFFSET_PERIPHERALS, 0x01),
                (OFFSET_LEFT_TRIGGER_FEEDBACK, 0x33),
                (OFFSET_RIGHT_TRIGGER_FEEDBACK, 0x44),
            ],
        );
        let state = decode(ConnectionType::Usb, &report, &CalibrationModel::identity()).unwrap();
        assert!(state.battery.charging);
        assert!(!state.battery.fully_charged);
        assert_eq!(state.battery.level, 7);
        assert_eq!(state.battery.percentage(), 75);
        assert!(state.headphone_connected);
        assert_eq!(state.left_trigger_feedback, 0x33);
        assert_eq!(state.right_trigger_feedback, 0x44);

        let full = Battery::from_status(0x2A);
        assert!(full.fully_charged);
        assert_eq!(full.percentage(), 100);
    }

    #[test]
    fn test_motion_is_calibrated() {
        let axis = AxisCalibration::new(100, 2, 1).unwrap();
        let calibration = CalibrationModel::new([axis; 3], [AxisCalibration::identity(); 3]);
        let mut edits = Vec::new();
        for (i, value) in [(OFFSET_ACCEL, 150i16), (OFFSET_GYRO, -20i16)] {
            let bytes = value.to_le_bytes();
            edits.push((i, bytes[0]));
            edits.push((i + 1, bytes[1]));
        }
        let report = patch(ConnectionType::Usb, &edits);
        let state = decode(ConnectionType::Usb, &report, &calibration).unwrap();
        assert_eq!(state.accelerometer.x, 100);
        assert_eq!(state.accelerometer.y, -200);
        assert_eq!(state.gyroscope.x, -20);

        let g = MotionVector { x: 8192, y: 0, z: -4096 }.to_g();
        assert!((g.x - 1.0).abs() < 1e-6);
        assert!((g.z + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_same_offsets_on_both_transports() {
        let usb = patch(ConnectionType::Usb, &[(4, 99), (OFFSET_STATUS, 0x05)]);
        let bt = patch(ConnectionType::Bluetooth, &[(4, 99), (OFFSET_STATUS, 0x05)]);
        let calibration = CalibrationModel::identity();
        assert_eq!(
            decode(ConnectionType::Usb, &usb, &calibration).unwrap(),
            decode(ConnectionType::Bluetooth, &bt, &calibration).unwrap()
        );
    }

    #[test]
    fn test_decode_is_deterministic() {
        let report = with_timestamp(ConnectionType::Bluetooth, 0xDEAD_BEEF);
        let calibration = CalibrationModel::identity();
        let a = decode(ConnectionType::Bluetooth, &report, &calibration).unwrap();
        let b = decode(ConnectionType::Bluetooth, &report, &calibration).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.current_time, 0xDEAD_BEEF);
        assert_eq!(a.delta_time, 0);
    }

    #[test]
    fn test_too_short() {
        let report = neutral_report(ConnectionType::Usb);
        assert_eq!(
            decode(ConnectionType::Usb, &report[..40], &CalibrationModel::identity()),
            Err(DecodeError::TooShort {
                expected: USB_INPUT_REPORT_SIZE,
                actual: 40
            })
        );
        assert!(matches!(
            decode(ConnectionType::Bluetooth, &[], &CalibrationModel::identity()),
            Err(DecodeError::TooShort { actual: 0, .. })
        ));
    }

    #[test]
    fn test_wrong_report_id() {
        // A Bluetooth controller in simple mode sends USB-style 0x01 reports
        let report = neutral_report(ConnectionType::Usb);
        assert_eq!(
            decode(ConnectionType::Bluetooth, &report, &CalibrationModel::identity()),
            Err(DecodeError::UnsupportedReport(USB_INPUT_REPORT_ID))
        );
    }

    #[test]
    fn test_corrupted_bluetooth_report() {
        let mut report = neutral_report(ConnectionType::Bluetooth);
        assert_eq!(report.len(), BT_INPUT_REPORT_SIZE);
        report[10] ^= 0x04;
        assert!(matches!(
            decode(ConnectionType::Bluetooth, &report, &CalibrationModel::identity()),
            Err(DecodeError::Integrity { .. })
        ));
        seal(ConnectionType::Bluetooth, &mut report);
        assert!(decode(ConnectionType::Bluetooth, &report, &CalibrationModel::identity()).is_ok());
    }
}
