//! Output report encoding
//!
//! [`OutputState`] is the canonical description of rumble, lighting and
//! adaptive trigger settings. [`encode`] lays it out as a USB or Bluetooth
//! output report; Bluetooth reports get a CRC-32 trailer.

use serde::{Deserialize, Serialize};

use crate::error::DualSenseError;
use crate::protocol::{
    verify_trailer, write_trailer, ConnectionType, BT_OUTPUT_REPORT_ID, BT_OUTPUT_REPORT_TAG,
    CRC_SEED_OUTPUT, MAX_OUTPUT_REPORT_SIZE, USB_OUTPUT_REPORT_ID,
};

/// Size of one encoded trigger effect
pub const TRIGGER_BLOCK_SIZE: usize = 11;

// Offsets into the common block
const OFFSET_FLAGS0: usize = 0;
const OFFSET_FLAGS1: usize = 1;
const OFFSET_MOTOR_RIGHT: usize = 2;
const OFFSET_MOTOR_LEFT: usize = 3;
const OFFSET_MIC_LED: usize = 8;
const OFFSET_RIGHT_TRIGGER: usize = 10;
const OFFSET_LEFT_TRIGGER: usize = 21;
const OFFSET_RUMBLE_STRENGTH: usize = 36;
const OFFSET_FLAGS2: usize = 38;
const OFFSET_LED_SETUP: usize = 41;
const OFFSET_LED_BRIGHTNESS: usize = 42;
const OFFSET_PLAYER_LEDS: usize = 43;
const OFFSET_LIGHTBAR: usize = 44;

const FLAG0_RUMBLE: u8 = 0x01 | 0x02;
const FLAG0_RIGHT_TRIGGER: u8 = 0x04;
const FLAG0_LEFT_TRIGGER: u8 = 0x08;

const FLAG1_MIC_LED: u8 = 0x01;
const FLAG1_LIGHTBAR: u8 = 0x04;
const FLAG1_PLAYER_LEDS: u8 = 0x10;
const FLAG1_MOTOR_POWER: u8 = 0x40;

const FLAG2_LED_SETUP: u8 = 0x03;

const LED_SETUP_DISABLED: u8 = 0x01;
const LED_SETUP_ENABLED: u8 = 0x02;

const PLAYER_LEDS_INSTANT: u8 = 0x20;

// Trigger modes
const MODE_NO_RESISTANCE: u8 = 0x00;
const MODE_CONTINUOUS: u8 = 0x01;
const MODE_SECTION: u8 = 0x02;
const MODE_RELEASE_ALL: u8 = 0x05;
const MODE_EFFECT_EX: u8 = 0x26;
const MODE_CALIBRATE: u8 = 0xFC;

/// Microphone LED mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MicLed {
    #[default]
    Off,
    On,
    Pulse,
}

impl MicLed {
    fn as_byte(self) -> u8 {
        match self {
            MicLed::Off => 0x00,
            MicLed::On => 0x01,
            MicLed::Pulse => 0x02,
        }
    }
}

/// Player LED brightness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedBrightness {
    Low,
    Medium,
    #[default]
    High,
}

impl LedBrightness {
    fn as_byte(self) -> u8 {
        match self {
            LedBrightness::High => 0x00,
            LedBrightness::Medium => 0x01,
            LedBrightness::Low => 0x02,
        }
    }
}

/// The five player indicator LEDs below the touchpad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerLeds {
    /// Combination of the `PlayerLeds::*` bit constants
    pub bitmask: u8,
    /// Fade in instead of switching instantly
    #[serde(default)]
    pub fade: bool,
    #[serde(default)]
    pub brightness: LedBrightness,
}

impl PlayerLeds {
    pub const LEFT: u8 = 0x01;
    pub const MID_LEFT: u8 = 0x02;
    pub const MIDDLE: u8 = 0x04;
    pub const MID_RIGHT: u8 = 0x08;
    pub const RIGHT: u8 = 0x10;
    pub const ALL: u8 = 0x1F;

    pub fn new(bitmask: u8) -> Self {
        Self {
            bitmask: bitmask & Self::ALL,
            ..Default::default()
        }
    }

    /// Conventional pattern for player 1-5; anything else turns the LEDs off
    pub fn player(n: u8) -> Self {
        let bitmask = match n {
            1 => Self::MIDDLE,
            2 => Self::MID_LEFT | Self::MID_RIGHT,
            3 => Self::LEFT | Self::MIDDLE | Self::RIGHT,
            4 => Self::LEFT | Self::MID_LEFT | Self::MID_RIGHT | Self::RIGHT,
            5 => Self::ALL,
            _ => 0,
        };
        Self::new(bitmask)
    }
}

/// Lightbar color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl From<(u8, u8, u8)> for Color {
    fn from((r, g, b): (u8, u8, u8)) -> Self {
        Self { r, g, b }
    }
}

/// Adaptive trigger effect. Only the payload of the active variant is
/// encoded; all other bytes of the block are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerEffect {
    #[default]
    NoResistance,
    ContinuousResistance {
        start_position: u8,
        force: u8,
    },
    SectionResistance {
        start_position: u8,
        /// Clamped to `start_position` when smaller
        end_position: u8,
    },
    EffectEx {
        start_position: u8,
        #[serde(default)]
        keep_effect: bool,
        begin_force: u8,
        middle_force: u8,
        end_force: u8,
        /// Vibration frequency in Hz, 2 Hz resolution
        frequency: u8,
    },
    ReleaseAll,
    Calibrate,
}

impl TriggerEffect {
    /// Constant resistance from `start_position` to full pull
    pub fn continuous(start_position: u8, force: u8) -> Self {
        TriggerEffect::ContinuousResistance {
            start_position,
            force,
        }
    }

    /// Resistance between two positions
    pub fn section(start_position: u8, end_position: u8) -> Self {
        TriggerEffect::SectionResistance {
            start_position,
            end_position: end_position.max(start_position),
        }
    }

    /// Uniform vibration past `start_position`
    pub fn vibration(start_position: u8, force: u8, frequency: u8) -> Self {
        TriggerEffect::EffectEx {
            start_position,
            keep_effect: true,
            begin_force: force,
            middle_force: force,
            end_force: force,
            frequency,
        }
    }

    /// Short label for listings
    pub fn name(&self) -> &'static str {
        match self {
            TriggerEffect::NoResistance => "off",
            TriggerEffect::ContinuousResistance { .. } => "continuous",
            TriggerEffect::SectionResistance { .. } => "section",
            TriggerEffect::EffectEx { .. } => "effect-ex",
            TriggerEffect::ReleaseAll => "release",
            TriggerEffect::Calibrate => "calibrate",
        }
    }

    /// Whether the trigger pushes back on the finger
    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            TriggerEffect::NoResistance | TriggerEffect::ReleaseAll | TriggerEffect::Calibrate
        )
    }

    /// Encode into the fixed trigger parameter block
    pub fn to_block(&self) -> [u8; TRIGGER_BLOCK_SIZE] {
        let mut block = [0u8; TRIGGER_BLOCK_SIZE];
        match *self {
            TriggerEffect::NoResistance => block[0] = MODE_NO_RESISTANCE,
            TriggerEffect::ContinuousResistance {
                start_position,
                force,
            } => {
                block[0] = MODE_CONTINUOUS;
                block[1] = start_position;
                block[2] = force;
            }
            TriggerEffect::SectionResistance {
                start_position,
                end_position,
            } => {
                block[0] = MODE_SECTION;
                block[1] = start_position;
                block[2] = end_position.max(start_position);
            }
            TriggerEffect::EffectEx {
                start_position,
                keep_effect,
                begin_force,
                middle_force,
                end_force,
                frequency,
            } => {
                block[0] = MODE_EFFECT_EX;
                block[1] = 0xFF - start_position;
                block[2] = if keep_effect { 0x02 } else { 0x00 };
                block[4] = begin_force;
                block[5] = middle_force;
                block[6] = end_force;
                block[9] = (frequency / 2).max(1);
            }
            TriggerEffect::ReleaseAll => block[0] = MODE_RELEASE_ALL,
            TriggerEffect::Calibrate => block[0] = MODE_CALIBRATE,
        }
        block
    }

    /// Recover the effect from an encoded block
    pub fn from_block(block: &[u8; TRIGGER_BLOCK_SIZE]) -> Result<Self, DualSenseError> {
        let effect = match block[0] {
            MODE_NO_RESISTANCE => TriggerEffect::NoResistance,
            MODE_CONTINUOUS => TriggerEffect::ContinuousResistance {
                start_position: block[1],
                force: block[2],
            },
            MODE_SECTION => TriggerEffect::SectionResistance {
                start_position: block[1],
                end_position: block[2],
            },
            MODE_EFFECT_EX => TriggerEffect::EffectEx {
                start_position: 0xFF - block[1],
                keep_effect: block[2] & 0x02 != 0,
                begin_force: block[4],
                middle_force: block[5],
                end_force: block[6],
                frequency: block[9].saturating_mul(2),
            },
            MODE_RELEASE_ALL => TriggerEffect::ReleaseAll,
            MODE_CALIBRATE => TriggerEffect::Calibrate,
            mode => {
                return Err(DualSenseError::Unsupported(format!(
                    "trigger mode {mode:#04x}"
                )))
            }
        };
        Ok(effect)
    }
}

/// Everything the next output report should set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputState {
    /// Left, hard motor
    pub left_rumble: u8,
    /// Right, soft motor
    pub right_rumble: u8,
    /// Motor strength in 12.5% steps: low nibble main motors, high nibble
    /// trigger motors
    pub rumble_strength: u8,
    pub microphone_led: MicLed,
    pub disable_leds: bool,
    pub player_leds: PlayerLeds,
    pub lightbar: Color,
    pub left_trigger_effect: TriggerEffect,
    pub right_trigger_effect: TriggerEffect,
}

/// Blocks carried by an encoded report. Unselected regions stay zero and the
/// device leaves the corresponding state alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFeatures {
    pub rumble: bool,
    pub mic_led: bool,
    /// Player LEDs, brightness and the "all LEDs disabled" switch
    pub leds: bool,
    pub lightbar: bool,
    pub left_trigger: bool,
    pub right_trigger: bool,
}

impl OutputFeatures {
    pub const fn all() -> Self {
        Self {
            rumble: true,
            mic_led: true,
            leds: true,
            lightbar: true,
            left_trigger: true,
            right_trigger: true,
        }
    }

    pub const fn none() -> Self {
        Self {
            rumble: false,
            mic_led: false,
            leds: false,
            lightbar: false,
            left_trigger: false,
            right_trigger: false,
        }
    }
}

impl Default for OutputFeatures {
    fn default() -> Self {
        Self::all()
    }
}

/// An encoded output report
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct OutputReport {
    data: [u8; MAX_OUTPUT_REPORT_SIZE],
    len: usize,
}

impl OutputReport {
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::ops::Deref for OutputReport {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl std::fmt::Debug for OutputReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OutputReport(")?;
        for b in self.as_bytes() {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

/// Encode every block of `state`
pub fn encode(state: &OutputState, connection: ConnectionType) -> OutputReport {
    encode_with(state, connection, OutputFeatures::all())
}

/// Encode only the blocks selected by `features`
pub fn encode_with(
    state: &OutputState,
    connection: ConnectionType,
    features: OutputFeatures,
) -> OutputReport {
    let mut report = OutputReport {
        data: [0u8; MAX_OUTPUT_REPORT_SIZE],
        len: 0,
    };
    report.len = fill_report(state, connection, features, &mut report.data);
    report
}

/// Encode into a caller buffer, returning the number of bytes written
pub fn encode_into(
    state: &OutputState,
    connection: ConnectionType,
    features: OutputFeatures,
    buf: &mut [u8],
) -> Result<usize, DualSenseError> {
    let required = connection.output_report_size();
    if buf.len() < required {
        return Err(DualSenseError::InsufficientBuffer {
            required,
            provided: buf.len(),
        });
    }
    Ok(fill_report(state, connection, features, buf))
}

/// Check the framing of an encoded report: size, report ID and, over
/// Bluetooth, the trailer.
pub fn verify(connection: ConnectionType, report: &[u8]) -> Result<(), DualSenseError> {
    let size = connection.output_report_size();
    if report.len() != size {
        return Err(DualSenseError::InvalidReport(format!(
            "output report is {} bytes, expected {size}",
            report.len()
        )));
    }
    match connection {
        ConnectionType::Usb if report[0] == USB_OUTPUT_REPORT_ID => Ok(()),
        ConnectionType::Bluetooth
            if report[0] == BT_OUTPUT_REPORT_ID && report[1] == BT_OUTPUT_REPORT_TAG =>
        {
            verify_trailer(CRC_SEED_OUTPUT, report)
                .map_err(|(expected, actual)| DualSenseError::Integrity { expected, actual })
        }
        _ => Err(DualSenseError::Unsupported(format!(
            "output report id {:#04x}",
            report[0]
        ))),
    }
}

/// Write a complete report into `buf`, which must hold at least the
/// transport's report size.
fn fill_report(
    state: &OutputState,
    connection: ConnectionType,
    features: OutputFeatures,
    buf: &mut [u8],
) -> usize {
    let size = connection.output_report_size();
    let report = &mut buf[..size];
    report.fill(0);

    match connection {
        ConnectionType::Usb => report[0] = USB_OUTPUT_REPORT_ID,
        ConnectionType::Bluetooth => {
            report[0] = BT_OUTPUT_REPORT_ID;
            report[1] = BT_OUTPUT_REPORT_TAG;
        }
    }

    let offset = connection.output_payload_offset();
    fill_common(state, features, &mut report[offset..]);

    if connection == ConnectionType::Bluetooth {
        write_trailer(CRC_SEED_OUTPUT, report);
    }
    size
}

fn fill_common(state: &OutputState, features: OutputFeatures, c: &mut [u8]) {
    if features.rumble {
        c[OFFSET_FLAGS0] |= FLAG0_RUMBLE;
        c[OFFSET_FLAGS1] |= FLAG1_MOTOR_POWER;
        c[OFFSET_MOTOR_RIGHT] = state.right_rumble;
        c[OFFSET_MOTOR_LEFT] = state.left_rumble;
        c[OFFSET_RUMBLE_STRENGTH] = state.rumble_strength;
    }

    if features.mic_led {
        c[OFFSET_FLAGS1] |= FLAG1_MIC_LED;
        c[OFFSET_MIC_LED] = state.microphone_led.as_byte();
    }

    if features.leds {
        c[OFFSET_FLAGS1] |= FLAG1_PLAYER_LEDS;
        c[OFFSET_FLAGS2] = FLAG2_LED_SETUP;
        c[OFFSET_LED_SETUP] = if state.disable_leds {
            LED_SETUP_DISABLED
        } else {
            LED_SETUP_ENABLED
        };
        c[OFFSET_LED_BRIGHTNESS] = state.player_leds.brightness.as_byte();
        c[OFFSET_PLAYER_LEDS] = state.player_leds.bitmask & PlayerLeds::ALL;
        if !state.player_leds.fade {
            c[OFFSET_PLAYER_LEDS] |= PLAYER_LEDS_INSTANT;
        }
    }

    if features.lightbar {
        c[OFFSET_FLAGS1] |= FLAG1_LIGHTBAR;
        c[OFFSET_LIGHTBAR] = state.lightbar.r;
        c[OFFSET_LIGHTBAR + 1] = state.lightbar.g;
        c[OFFSET_LIGHTBAR + 2] = state.lightbar.b;
    }

    if features.right_trigger {
        c[OFFSET_FLAGS0] |= FLAG0_RIGHT_TRIGGER;
        c[OFFSET_RIGHT_TRIGGER..OFFSET_RIGHT_TRIGGER + TRIGGER_BLOCK_SIZE]
            .copy_from_slice(&state.right_trigger_effect.to_block());
    }

    if features.left_trigger {
        c[OFFSET_FLAGS0] |= FLAG0_LEFT_TRIGGER;
        c[OFFSET_LEFT_TRIGGER..OFFSET_LEFT_TRIGGER + TRIGGER_BLOCK_SIZE]
            .copy_from_slice(&state.left_trigger_effect.to_block());
    }
}
