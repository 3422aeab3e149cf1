//! Motion sensor calibration
//!
//! The controller stores per-axis bias and sensitivity in feature report
//! 0x05. Samples are corrected with integer arithmetic,
//! `(raw - bias) * numerator / denominator`, rounding toward zero, which
//! yields gyroscope values in 1/1024 deg/s and accelerometer values in
//! 1/8192 g.

use tracing::debug;

use crate::error::DualSenseError;
use crate::protocol::{
    verify_trailer, ConnectionType, CRC_SEED_FEATURE, FEATURE_REPORT_CALIBRATION,
    FEATURE_REPORT_CALIBRATION_SIZE,
};

/// Gyroscope resolution per degree per second
pub const GYRO_RES_PER_DEG_S: i32 = 1024;
/// Accelerometer resolution per g
pub const ACC_RES_PER_G: i32 = 8192;

/// Linear correction for one sensor axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisCalibration {
    bias: i16,
    gain_numerator: i32,
    gain_denominator: i32,
}

impl AxisCalibration {
    /// Build an axis correction. A zero denominator is rejected here so that
    /// [`apply`](Self::apply) never divides by zero.
    pub fn new(
        bias: i16,
        gain_numerator: i32,
        gain_denominator: i32,
    ) -> Result<Self, DualSenseError> {
        if gain_denominator == 0 {
            return Err(DualSenseError::InvalidCalibration(
                "axis gain denominator is zero".to_string(),
            ));
        }
        Ok(Self {
            bias,
            gain_numerator,
            gain_denominator,
        })
    }

    /// Pass-through correction (bias 0, gain 1)
    pub const fn identity() -> Self {
        Self {
            bias: 0,
            gain_numerator: 1,
            gain_denominator: 1,
        }
    }

    pub fn bias(&self) -> i16 {
        self.bias
    }

    pub fn gain_numerator(&self) -> i32 {
        self.gain_numerator
    }

    pub fn gain_denominator(&self) -> i32 {
        self.gain_denominator
    }

    /// Convert a raw sample to calibrated units
    pub fn apply(&self, raw: i16) -> i32 {
        let centered = i64::from(raw) - i64::from(self.bias);
        let scaled = centered * i64::from(self.gain_numerator) / i64::from(self.gain_denominator);
        scaled.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
    }

    /// Best raw sample for a calibrated value, rounded to nearest
    pub fn invert(&self, value: i32) -> i16 {
        if self.gain_numerator == 0 {
            return self.bias;
        }
        let raw = i64::from(self.bias)
            + div_round(
                i64::from(value) * i64::from(self.gain_denominator),
                i64::from(self.gain_numerator),
            );
        raw.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16
    }
}

impl Default for AxisCalibration {
    fn default() -> Self {
        Self::identity()
    }
}

fn div_round(n: i64, d: i64) -> i64 {
    let q = n / d;
    let r = n % d;
    if 2 * r.abs() >= d.abs() {
        q + n.signum() * d.signum()
    } else {
        q
    }
}

/// Calibration for all six motion axes of one controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CalibrationModel {
    accelerometer: [AxisCalibration; 3],
    gyroscope: [AxisCalibration; 3],
}

impl CalibrationModel {
    pub fn new(accelerometer: [AxisCalibration; 3], gyroscope: [AxisCalibration; 3]) -> Self {
        Self {
            accelerometer,
            gyroscope,
        }
    }

    /// Model that leaves raw samples untouched
    pub const fn identity() -> Self {
        Self {
            accelerometer: [AxisCalibration::identity(); 3],
            gyroscope: [AxisCalibration::identity(); 3],
        }
    }

    /// Accelerometer axes in x, y, z order
    pub fn accelerometer(&self) -> &[AxisCalibration; 3] {
        &self.accelerometer
    }

    /// Gyroscope axes in pitch, yaw, roll order
    pub fn gyroscope(&self) -> &[AxisCalibration; 3] {
        &self.gyroscope
    }

    /// Parse calibration feature report 0x05.
    ///
    /// `report` starts with the report ID. Over Bluetooth the report carries a
    /// CRC-32 trailer which must verify.
    pub fn from_feature_report(
        report: &[u8],
        connection: ConnectionType,
    ) -> Result<Self, DualSenseError> {
        if report.len() < FEATURE_REPORT_CALIBRATION_SIZE {
            return Err(DualSenseError::InvalidCalibration(format!(
                "calibration report too short: {} bytes",
                report.len()
            )));
        }
        if report[0] != FEATURE_REPORT_CALIBRATION {
            return Err(DualSenseError::InvalidCalibration(format!(
                "unexpected feature report id {:#04x}",
                report[0]
            )));
        }
        let report = &report[..FEATURE_REPORT_CALIBRATION_SIZE];
        if connection == ConnectionType::Bluetooth {
            verify_trailer(CRC_SEED_FEATURE, report).map_err(|(stored, computed)| {
                DualSenseError::InvalidCalibration(format!(
                    "calibration trailer mismatch: stored {stored:#010x}, computed {computed:#010x}"
                ))
            })?;
        }

        let word =
            |offset: usize| i32::from(i16::from_le_bytes([report[offset], report[offset + 1]]));

        let gyro_pitch_bias = word(1);
        let gyro_yaw_bias = word(3);
        let gyro_roll_bias = word(5);
        let gyro_pitch_plus = word(7);
        let gyro_pitch_minus = word(9);
        let gyro_yaw_plus = word(11);
        let gyro_yaw_minus = word(13);
        let gyro_roll_plus = word(15);
        let gyro_roll_minus = word(17);
        let gyro_speed_plus = word(19);
        let gyro_speed_minus = word(21);
        let acc_x_plus = word(23);
        let acc_x_minus = word(25);
        let acc_y_plus = word(27);
        let acc_y_minus = word(29);
        let acc_z_plus = word(31);
        let acc_z_minus = word(33);

        let speed_2x = gyro_speed_plus + gyro_speed_minus;
        let gyro_axis =
            |bias: i32, plus: i32, minus: i32| -> Result<AxisCalibration, DualSenseError> {
                AxisCalibration::new(
                    to_bias(bias)?,
                    speed_2x * GYRO_RES_PER_DEG_S,
                    (plus - bias).abs() + (minus - bias).abs(),
                )
            };
        let accel_axis = |plus: i32, minus: i32| -> Result<AxisCalibration, DualSenseError> {
            let range_2g = plus - minus;
            AxisCalibration::new(to_bias(plus - range_2g / 2)?, 2 * ACC_RES_PER_G, range_2g)
        };

        let model = Self {
            accelerometer: [
                accel_axis(acc_x_plus, acc_x_minus)?,
                accel_axis(acc_y_plus, acc_y_minus)?,
                accel_axis(acc_z_plus, acc_z_minus)?,
            ],
            gyroscope: [
                gyro_axis(gyro_pitch_bias, gyro_pitch_plus, gyro_pitch_minus)?,
                gyro_axis(gyro_yaw_bias, gyro_yaw_plus, gyro_yaw_minus)?,
                gyro_axis(gyro_roll_bias, gyro_roll_plus, gyro_roll_minus)?,
            ],
        };
        debug!("Loaded calibration: {:?}", model);
        Ok(model)
    }
}

fn to_bias(value: i32) -> Result<i16, DualSenseError> {
    i16::try_from(value).map_err(|_| {
        DualSenseError::InvalidCalibration(format!("bias {value} out of range"))
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocol::write_trailer;

    /// Calibration report with values in the range real controllers report
    pub(crate) fn sample_feature_report(
        connection: ConnectionType,
    ) -> [u8; FEATURE_REPORT_CALIBRATION_SIZE] {
        let words: [i16; 17] = [
            -3, 2, 1, // gyro bias pitch/yaw/roll
            8800, -8790, // pitch +/-
            8810, -8805, // yaw +/-
            8795, -8800, // roll +/-
            540, 540, // speed +/-
            8200, -8180, // acc x +/-
            8190, -8210, // acc y +/-
            8230, -8150, // acc z +/-
        ];
        let mut report = [0u8; FEATURE_REPORT_CALIBRATION_SIZE];
        report[0] = FEATURE_REPORT_CALIBRATION;
        for (i, w) in words.iter().enumerate() {
            report[1 + i * 2..3 + i * 2].copy_from_slice(&w.to_le_bytes());
        }
        if connection == ConnectionType::Bluetooth {
            write_trailer(CRC_SEED_FEATURE, &mut report);
        }
        report
    }

    #[test]
    fn test_apply_truncates_toward_zero() {
        let axis = AxisCalibration::new(10, 3, 2).unwrap();
        assert_eq!(axis.apply(10), 0);
        assert_eq!(axis.apply(13), 4); // 3 * 3 / 2 = 4.5
        assert_eq!(axis.apply(7), -4); // -3 * 3 / 2 = -4.5
    }

    #[test]
    fn test_zero_denominator_rejected() {
        assert!(matches!(
            AxisCalibration::new(0, 1, 0),
            Err(DualSenseError::InvalidCalibration(_))
        ));
    }

    #[test]
    fn test_apply_does_not_overflow() {
        let axis = AxisCalibration::new(i16::MIN, i32::MAX, 1).unwrap();
        assert_eq!(axis.apply(i16::MAX), i32::MAX);
    }

    #[test]
    fn test_parse_usb_report() {
        let report = sample_feature_report(ConnectionType::Usb);
        let model = CalibrationModel::from_feature_report(&report, ConnectionType::Usb).unwrap();

        let acc_x = model.accelerometer()[0];
        // range_2g = 16380, bias = 8200 - 8190
        assert_eq!(acc_x.bias(), 10);
        assert_eq!(acc_x.gain_numerator(), 2 * ACC_RES_PER_G);
        assert_eq!(acc_x.gain_denominator(), 16380);

        let pitch = model.gyroscope()[0];
        assert_eq!(pitch.bias(), -3);
        assert_eq!(pitch.gain_numerator(), 1080 * GYRO_RES_PER_DEG_S);
        assert_eq!(pitch.gain_denominator(), 8803 + 8787);
    }

    #[test]
    fn test_parse_bluetooth_report_checks_trailer() {
        let mut report = sample_feature_report(ConnectionType::Bluetooth);
        assert!(CalibrationModel::from_feature_report(&report, ConnectionType::Bluetooth).is_ok());

        report[5] ^= 0x01;
        assert!(matches!(
            CalibrationModel::from_feature_report(&report, ConnectionType::Bluetooth),
            Err(DualSenseError::InvalidCalibration(_))
        ));
    }

    #[test]
    fn test_degenerate_report_rejected() {
        let mut report = [0u8; FEATURE_REPORT_CALIBRATION_SIZE];
        report[0] = FEATURE_REPORT_CALIBRATION;
        assert!(matches!(
            CalibrationModel::from_feature_report(&report, ConnectionType::Usb),
            Err(DualSenseError::InvalidCalibration(_))
        ));
        assert!(CalibrationModel::from_feature_report(&report[..20], ConnectionType::Usb).is_err());
    }

    #[test]
    fn test_inverse_within_one_unit() {
        let report = sample_feature_report(ConnectionType::Usb);
        let model = CalibrationModel::from_feature_report(&report, ConnectionType::Usb).unwrap();

        // Accelerometer gain is close to 1, so both directions hold
        for axis in model.accelerometer() {
            for x in (-30_000..30_000).step_by(37) {
                let back = axis.apply(axis.invert(x));
                assert!((back - x).abs() <= 1, "x={x} back={back}");
            }
        }

        // Gyroscope gain is around 63, so neighbouring raw samples land that
        // far apart once calibrated. A calibrated value can only come back
        // to within half a step, while raw samples survive a round trip.
        for axis in model.gyroscope() {
            let gain = f64::from(axis.gain_numerator) / f64::from(axis.gain_denominator);
            assert!(gain.abs() > 2.0);
            let bound = (gain.abs() / 2.0).ceil() as i32 + 1;

            let lo = axis.apply(i16::MIN / 2);
            let hi = axis.apply(i16::MAX / 2);
            for x in (lo..hi).step_by(4099) {
                let back = axis.apply(axis.invert(x));
                assert!((back - x).abs() <= bound, "x={x} back={back} bound={bound}");
            }

            for raw in (i16::MIN / 2..i16::MAX / 2).step_by(13) {
                let back = axis.invert(axis.apply(raw));
                assert!((i32::from(back) - i32::from(raw)).abs() <= 1, "raw={raw} back={back}");
            }
        }
    }
}
