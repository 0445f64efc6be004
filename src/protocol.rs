//! Protocol definitions
//!
//! This module defines the two sub-protocols sharing the serial line:
//! - ASCII command/reply handshakes (three-letter commands)
//! - Binary telemetry frames
//!
//! # Frame layout
//!
//! ```text
//! [sync: 1][state: 1][device_time_ms: 4 LE][ch0: 1][ch1: 1][vel0: 1][vel1: 1][thresh0: 2 LE][thresh1: 2 LE]
//! ```
//!
//! The sync byte is the mode tag. There is no checksum: the mode and state
//! tags are the only integrity check, so a corrupted value byte decodes as a
//! plausible but wrong reading. An appended CRC field would close that gap
//! but would break compatibility with deployed devices.

use crate::error::{LinkError, Result};
use std::fmt;

/// Total frame length, sync byte included
pub const FRAME_LEN: usize = 14;

/// Bytes following the sync byte
pub const PAYLOAD_LEN: usize = FRAME_LEN - 1;

/// Read attempts allowed while hunting for the sync byte
pub const SYNC_BUDGET: usize = 2 * FRAME_LEN;

/// Line terminator the device appends after each frame
pub const FRAME_TERMINATOR: &[u8] = b"\r\n";

/// Payload field offsets (relative to the byte after sync)
pub const OFFSET_STATE: usize = 0;
pub const OFFSET_TIME: usize = 1;
pub const OFFSET_CH0: usize = 5;
pub const OFFSET_CH1: usize = 6;
pub const OFFSET_VEL0: usize = 7;
pub const OFFSET_VEL1: usize = 8;
pub const OFFSET_THRESH0: usize = 9;
pub const OFFSET_THRESH1: usize = 11;

/// Device time is sent in milliseconds
pub const TIME_SCALE: f32 = 1000.0;
/// Velocities are sent in thousandths
pub const VELOCITY_SCALE: f32 = 1000.0;
/// Thresholds are sent in hundredths
pub const THRESHOLD_SCALE: f32 = 100.0;

/// Exact reply to the identity query
pub const IDENTITY_REPLY: &[u8; 4] = b"OKST";

/// Substring every other acknowledgement contains
pub const ACK: &[u8; 2] = b"OK";

/// Feedback mode of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum Mode {
    /// Posture (angle) monitoring
    #[default]
    Static = b'S',
    /// Movement (velocity) monitoring
    Dynamic = b'D',
}

impl Mode {
    /// Parse a mode tag byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            b'S' => Some(Mode::Static),
            b'D' => Some(Mode::Dynamic),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Byte is a frame sync marker
    pub fn is_marker(byte: u8) -> bool {
        Self::from_u8(byte).is_some()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Static => write!(f, "STATIC"),
            Mode::Dynamic => write!(f, "DYNAMIC"),
        }
    }
}

/// Run state reported in each frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum DeviceState {
    /// Sampling, no transmission of feedback
    #[default]
    Paused = b'P',
    /// Sampling with feedback
    Running = b'R',
    /// Recording without feedback (assessment)
    Testing = b'T',
}

impl DeviceState {
    /// Parse a state tag byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            b'P' => Some(DeviceState::Paused),
            b'R' => Some(DeviceState::Running),
            b'T' => Some(DeviceState::Testing),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Running or testing: the device is producing frames
    pub fn is_active(self) -> bool {
        matches!(self, DeviceState::Running | DeviceState::Testing)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Paused => write!(f, "PAUSE"),
            DeviceState::Running => write!(f, "RUNNING"),
            DeviceState::Testing => write!(f, "TESTING"),
        }
    }
}

/// Host-to-device commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Ask the device to identify itself
    QueryIdentity,
    /// Start feedback
    SetRunning,
    /// Stop feedback
    SetPaused,
    /// Switch to static mode (device reinitializes)
    SetStatic,
    /// Switch to dynamic mode (device reinitializes)
    SetDynamic,
    /// Record without feedback
    SetTesting,
}

impl Command {
    pub const ALL: [Command; 6] = [
        Command::QueryIdentity,
        Command::SetRunning,
        Command::SetPaused,
        Command::SetStatic,
        Command::SetDynamic,
        Command::SetTesting,
    ];

    /// Wire bytes
    pub fn as_bytes(self) -> &'static [u8; 3] {
        match self {
            Command::QueryIdentity => b"CDQ",
            Command::SetRunning => b"CDR",
            Command::SetPaused => b"CDP",
            Command::SetStatic => b"CDS",
            Command::SetDynamic => b"CDD",
            Command::SetTesting => b"CDT",
        }
    }

    /// Parse wire bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_bytes() == bytes)
    }

    /// Mode-selection command for `mode`
    pub fn select(mode: Mode) -> Self {
        match mode {
            Mode::Static => Command::SetStatic,
            Mode::Dynamic => Command::SetDynamic,
        }
    }

    /// Device reinitializes after this command
    pub fn needs_mode_settle(self) -> bool {
        matches!(self, Command::SetStatic | Command::SetDynamic)
    }

    /// Check a reply against this command's acknowledgement rule
    pub fn accepts(self, reply: &[u8]) -> bool {
        match self {
            Command::QueryIdentity => reply.get(..IDENTITY_REPLY.len()) == Some(&IDENTITY_REPLY[..]),
            _ => reply.windows(ACK.len()).any(|w| w == ACK),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}

/// One decoded telemetry frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryFrame {
    pub mode: Mode,
    pub state: DeviceState,
    /// Device uptime in seconds
    pub device_time: f32,
    /// Primary channel values (degrees)
    pub channels: [f32; 2],
    /// Derived velocities
    pub velocities: [f32; 2],
    /// Feedback thresholds, one per monitored channel
    pub thresholds: [f32; 2],
}

impl TelemetryFrame {
    /// Decode the payload that followed a sync byte
    pub fn decode(mode: Mode, payload: &[u8]) -> Result<Self> {
        if payload.len() != PAYLOAD_LEN {
            return Err(LinkError::malformed(format!(
                "expected {} payload bytes, got {}",
                PAYLOAD_LEN,
                payload.len()
            )));
        }

        let state_tag = payload[OFFSET_STATE];
        let state = DeviceState::from_u8(state_tag)
            .ok_or_else(|| LinkError::invalid(format!("unknown state tag 0x{:02x}", state_tag)))?;

        let time_ms = u32::from_le_bytes(read_array(payload, OFFSET_TIME)?);
        let thresh0 = u16::from_le_bytes(read_array(payload, OFFSET_THRESH0)?);
        let thresh1 = u16::from_le_bytes(read_array(payload, OFFSET_THRESH1)?);

        Ok(Self {
            mode,
            state,
            device_time: (f64::from(time_ms) / f64::from(TIME_SCALE)) as f32,
            channels: [f32::from(payload[OFFSET_CH0]), f32::from(payload[OFFSET_CH1])],
            velocities: [
                f32::from(payload[OFFSET_VEL0]) / VELOCITY_SCALE,
                f32::from(payload[OFFSET_VEL1]) / VELOCITY_SCALE,
            ],
            thresholds: [
                f32::from(thresh0) / THRESHOLD_SCALE,
                f32::from(thresh1) / THRESHOLD_SCALE,
            ],
        })
    }

    /// Decode a whole frame, sync byte first
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (&sync, payload) = bytes
            .split_first()
            .ok_or_else(|| LinkError::malformed("empty frame"))?;
        let mode = Mode::from_u8(sync)
            .ok_or_else(|| LinkError::invalid(format!("unknown mode tag 0x{:02x}", sync)))?;
        Self::decode(mode, payload)
    }

    /// Encode as the device does; values are rounded and saturated to their fields
    pub fn to_bytes(&self) -> [u8; FRAME_LEN] {
        let mut bytes = [0u8; FRAME_LEN];
        bytes[0] = self.mode.tag();

        let payload = &mut bytes[1..];
        payload[OFFSET_STATE] = self.state.tag();
        let time_ms = (f64::from(self.device_time) * f64::from(TIME_SCALE)).round() as u32;
        payload[OFFSET_TIME..OFFSET_TIME + 4].copy_from_slice(&time_ms.to_le_bytes());
        payload[OFFSET_CH0] = self.channels[0].round() as u8;
        payload[OFFSET_CH1] = self.channels[1].round() as u8;
        payload[OFFSET_VEL0] = (self.velocities[0] * VELOCITY_SCALE).round() as u8;
        payload[OFFSET_VEL1] = (self.velocities[1] * VELOCITY_SCALE).round() as u8;
        let t0 = (self.thresholds[0] * THRESHOLD_SCALE).round() as u16;
        let t1 = (self.thresholds[1] * THRESHOLD_SCALE).round() as u16;
        payload[OFFSET_THRESH0..OFFSET_THRESH0 + 2].copy_from_slice(&t0.to_le_bytes());
        payload[OFFSET_THRESH1..OFFSET_THRESH1 + 2].copy_from_slice(&t1.to_le_bytes());

        bytes
    }

    /// The value compared against each threshold for feedback.
    ///
    /// Static mode watches both angles; dynamic mode watches the velocities.
    pub fn monitored(&self) -> [f32; 2] {
        match self.mode {
            Mode::Static => self.channels,
            Mode::Dynamic => self.velocities,
        }
    }

    /// Some monitored value is above its threshold
    pub fn exceeds_threshold(&self) -> bool {
        let values = self.monitored();
        values[0] > self.thresholds[0] || values[1] > self.thresholds[1]
    }
}

fn read_array<const N: usize>(payload: &[u8], offset: usize) -> Result<[u8; N]> {
    payload
        .get(offset..offset + N)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| LinkError::malformed(format!("field at offset {} truncated", offset)))
}
