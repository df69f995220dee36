//! Robot command vocabulary and its two wire encodings
//!
//! Bluetooth commands are raw ASCII with no terminator:
//! ```text
//! a | b | l | w | s | t        drive forward/backward/left/right, stop, test
//! p<index>:<angle>;            servo, index 1-8, angle 0-180
//! ```
//!
//! WiFi commands are HTTP GET paths on the robot's control server:
//! ```text
//! /forward /backward /left /right /stop /set?servo=N&angle=A
//! ```

use bytes::Bytes;
use std::fmt;

use crate::error::ProtocolError;
use crate::Transport;

/// Lowest servo index accepted by the robot
pub const SERVO_INDEX_MIN: i64 = 1;
/// Highest servo index accepted by the robot
pub const SERVO_INDEX_MAX: i64 = 8;
/// Servo angle range in degrees
pub const SERVO_ANGLE_MAX: i64 = 180;

/// Servo numbers of the arm joints
pub mod servo {
    pub const BASE: i64 = 1;
    pub const SHOULDER: i64 = 2;
    pub const GRIPPER: i64 = 3;
}

/// A discrete command for the robot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotCommand {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
    /// Bluetooth-only self test
    Test,
    /// Move one servo; the angle is always within 0-180
    Servo { index: u8, angle: u8 },
}

impl RobotCommand {
    /// Build a servo command.
    ///
    /// Out-of-range indices are rejected; angles are clamped silently.
    pub fn servo(index: i64, angle: i64) -> Result<Self, ProtocolError> {
        if !(SERVO_INDEX_MIN..=SERVO_INDEX_MAX).contains(&index) {
            return Err(ProtocolError::InvalidServoIndex(index));
        }
        Ok(Self::Servo {
            index: index as u8,
            angle: angle.clamp(0, SERVO_ANGLE_MAX) as u8,
        })
    }

    pub fn base_servo(angle: i64) -> Self {
        Self::Servo {
            index: servo::BASE as u8,
            angle: angle.clamp(0, SERVO_ANGLE_MAX) as u8,
        }
    }

    pub fn shoulder_servo(angle: i64) -> Self {
        Self::Servo {
            index: servo::SHOULDER as u8,
            angle: angle.clamp(0, SERVO_ANGLE_MAX) as u8,
        }
    }

    pub fn gripper_servo(angle: i64) -> Self {
        Self::Servo {
            index: servo::GRIPPER as u8,
            angle: angle.clamp(0, SERVO_ANGLE_MAX) as u8,
        }
    }

    /// Parse either wire spelling of a command.
    ///
    /// Letters are trimmed and lower-cased; paths must start with `/`.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ProtocolError::Empty);
        }
        if text.starts_with('/') {
            return Self::parse_endpoint(text);
        }

        let lower = text.to_ascii_lowercase();
        match lower.as_str() {
            "a" => Ok(Self::Forward),
            "b" => Ok(Self::Backward),
            "l" => Ok(Self::Left),
            "w" => Ok(Self::Right),
            "s" => Ok(Self::Stop),
            "t" => Ok(Self::Test),
            _ if lower.starts_with('p') => Self::parse_servo_literal(&lower),
            _ => Err(ProtocolError::UnknownCommand(text.to_string())),
        }
    }

    fn parse_servo_literal(text: &str) -> Result<Self, ProtocolError> {
        let malformed = || ProtocolError::MalformedServo(text.to_string());
        let body = text[1..].strip_suffix(';').unwrap_or(&text[1..]);
        let (index, angle) = body.split_once(':').ok_or_else(malformed)?;
        let index: i64 = index.trim().parse().map_err(|_| malformed())?;
        let angle: i64 = angle.trim().parse().map_err(|_| malformed())?;
        Self::servo(index, angle)
    }

    fn parse_endpoint(path: &str) -> Result<Self, ProtocolError> {
        let (route, query) = match path.split_once('?') {
            Some((route, query)) => (route, Some(query)),
            None => (path, None),
        };

        match (route, query) {
            ("/forward", None) => Ok(Self::Forward),
            ("/backward", None) => Ok(Self::Backward),
            ("/left", None) => Ok(Self::Left),
            ("/right", None) => Ok(Self::Right),
            ("/stop", None) => Ok(Self::Stop),
            ("/set", Some(query)) => {
                let mut servo = None;
                let mut angle = None;
                for pair in query.split('&') {
                    match pair.split_once('=') {
                        Some(("servo", v)) => servo = v.parse::<i64>().ok(),
                        Some(("angle", v)) => angle = v.parse::<i64>().ok(),
                        _ => {}
                    }
                }
                match (servo, angle) {
                    (Some(servo), Some(angle)) => Self::servo(servo, angle),
                    _ => Err(ProtocolError::MalformedServo(path.to_string())),
                }
            }
            _ => Err(ProtocolError::UnknownCommand(path.to_string())),
        }
    }

    /// ASCII literal written to the Bluetooth stream
    pub fn bluetooth_literal(&self) -> String {
        match self {
            Self::Forward => "a".into(),
            Self::Backward => "b".into(),
            Self::Left => "l".into(),
            Self::Right => "w".into(),
            Self::Stop => "s".into(),
            Self::Test => "t".into(),
            Self::Servo { index, angle } => format!("p{}:{};", index, angle),
        }
    }

    /// Raw bytes for the Bluetooth stream, no trailing newline
    pub fn to_bluetooth_bytes(&self) -> Bytes {
        Bytes::from(self.bluetooth_literal().into_bytes())
    }

    /// HTTP path on the robot's WiFi control server
    pub fn wifi_endpoint(&self) -> Result<String, ProtocolError> {
        match self {
            Self::Forward => Ok("/forward".into()),
            Self::Backward => Ok("/backward".into()),
            Self::Left => Ok("/left".into()),
            Self::Right => Ok("/right".into()),
            Self::Stop => Ok("/stop".into()),
            Self::Servo { index, angle } => Ok(format!("/set?servo={}&angle={}", index, angle)),
            Self::Test => Err(ProtocolError::NoEncoding {
                command: self.to_string(),
                transport: "WiFi",
            }),
        }
    }

    /// Label reported upward for this command on a given transport
    pub fn label(&self, transport: Transport) -> Result<String, ProtocolError> {
        match transport {
            Transport::Bluetooth => Ok(self.bluetooth_literal()),
            Transport::Wifi => self.wifi_endpoint(),
        }
    }
}

impl fmt::Display for RobotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => write!(f, "forward"),
            Self::Backward => write!(f, "backward"),
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
            Self::Stop => write!(f, "stop"),
            Self::Test => write!(f, "test"),
            Self::Servo { index, angle } => write!(f, "servo {} -> {}°", index, angle),
        }
    }
}
