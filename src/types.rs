use crate::error::{Result, RoomError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Projector power state as reported by `POWR ?`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerState {
    Standby,
    On,
    Cooling,
    WarmUp,
    Unknown,
}

impl PowerState {
    /// Map the protocol digit onto a state
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => PowerState::Standby,
            1 => PowerState::On,
            2 => PowerState::Cooling,
            3 => PowerState::WarmUp,
            _ => PowerState::Unknown,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PowerState::Standby => "standby",
            PowerState::On => "on",
            PowerState::Cooling => "cooling",
            PowerState::WarmUp => "warm-up",
            PowerState::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Projector input source
///
/// The protocol code for each source comes from configuration, see
/// [`ProjectorConfig::input_map`](crate::ProjectorConfig).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InputSource {
    Computer1,
    Computer2,
    #[serde(rename = "HDMI1")]
    Hdmi1,
    #[serde(rename = "HDMI2")]
    Hdmi2,
    #[serde(rename = "HDBaseT")]
    HdBaseT,
    Auto,
}

impl InputSource {
    /// Canonical name, as used in configuration files
    pub fn name(&self) -> &'static str {
        match self {
            InputSource::Computer1 => "Computer1",
            InputSource::Computer2 => "Computer2",
            InputSource::Hdmi1 => "HDMI1",
            InputSource::Hdmi2 => "HDMI2",
            InputSource::HdBaseT => "HDBaseT",
            InputSource::Auto => "Auto",
        }
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for InputSource {
    type Err = RoomError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "COMPUTER1" => Ok(InputSource::Computer1),
            "COMPUTER2" => Ok(InputSource::Computer2),
            "HDMI1" => Ok(InputSource::Hdmi1),
            "HDMI2" => Ok(InputSource::Hdmi2),
            "HDBASET" => Ok(InputSource::HdBaseT),
            "AUTO" => Ok(InputSource::Auto),
            _ => Err(RoomError::InvalidArgument(format!("unknown input source: {}", s))),
        }
    }
}

/// Physical location of a mixer bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixerBus {
    pub is_output: bool,
    pub channel: u8,
}

impl MixerBus {
    pub fn input(channel: u8) -> Self {
        Self { is_output: false, channel }
    }

    pub fn output(channel: u8) -> Self {
        Self { is_output: true, channel }
    }
}

/// Direction of a one-step gain change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDirection {
    Up,
    Down,
}

impl StepDirection {
    /// Only the sign of `delta` matters; zero counts as up
    pub fn from_delta(delta: i32) -> Self {
        if delta >= 0 {
            StepDirection::Up
        } else {
            StepDirection::Down
        }
    }

    /// Value of the third data byte of a gain frame
    pub fn wire_value(self) -> u8 {
        match self {
            StepDirection::Up => 0,
            StepDirection::Down => 1,
        }
    }

    /// Logical step in dB
    pub fn step_db(self) -> f64 {
        match self {
            StepDirection::Up => 1.0,
            StepDirection::Down => -1.0,
        }
    }
}

impl FromStr for StepDirection {
    type Err = RoomError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" | "+" | "+1" => Ok(StepDirection::Up),
            "down" | "-" | "-1" => Ok(StepDirection::Down),
            _ => Err(RoomError::InvalidArgument(format!("unknown step direction: {}", s))),
        }
    }
}

/// Mixer preset slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Factory,
    User(u8),
}

impl Preset {
    /// `(d1, d2)` bytes of a load-preset frame
    pub fn wire_values(self) -> (u8, u8) {
        match self {
            Preset::Factory => (0, 0),
            Preset::User(index) => (1, index),
        }
    }
}

impl FromStr for Preset {
    type Err = RoomError;

    /// Parse `"F00"` or `"U01"`, `"U02"`, ...
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("F00") {
            return Ok(Preset::Factory);
        }

        let invalid = || RoomError::InvalidArgument(format!("unknown preset: {}", s));
        let digits = s
            .strip_prefix('U')
            .or_else(|| s.strip_prefix('u'))
            .filter(|d| !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(invalid)?;

        match digits.parse::<u8>() {
            Ok(index) if index > 0 => Ok(Preset::User(index)),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Preset::Factory => f.write_str("F00"),
            Preset::User(index) => write!(f, "U{:02}", index),
        }
    }
}

/// Level snapshot of one bus
///
/// Gain and volume share one register on the mixer, so both fields carry the
/// same reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BusLevel {
    pub gain: f64,
    pub volume: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_state_codes() {
        assert_eq!(PowerState::from_code(0), PowerState::Standby);
        assert_eq!(PowerState::from_code(1), PowerState::On);
        assert_eq!(PowerState::from_code(2), PowerState::Cooling);
        assert_eq!(PowerState::from_code(3), PowerState::WarmUp);
        assert_eq!(PowerState::from_code(7), PowerState::Unknown);
    }

    #[test]
    fn input_source_parses_case_insensitively() {
        assert_eq!("hdmi1".parse::<InputSource>().unwrap(), InputSource::Hdmi1);
        assert_eq!("HDBaseT".parse::<InputSource>().unwrap(), InputSource::HdBaseT);
        assert_eq!(" Computer2 ".parse::<InputSource>().unwrap(), InputSource::Computer2);
        assert!(matches!(
            "VGA".parse::<InputSource>(),
            Err(RoomError::InvalidArgument(_))
        ));
    }

    #[test]
    fn input_source_serde_names() {
        let json = serde_json::to_string(&InputSource::Hdmi2).unwrap();
        assert_eq!(json, "\"HDMI2\"");
        let parsed: InputSource = serde_json::from_str("\"HDBaseT\"").unwrap();
        assert_eq!(parsed, InputSource::HdBaseT);
    }

    #[test]
    fn preset_names() {
        assert_eq!("F00".parse::<Preset>().unwrap(), Preset::Factory);
        assert_eq!("U01".parse::<Preset>().unwrap(), Preset::User(1));
        assert_eq!("U3".parse::<Preset>().unwrap(), Preset::User(3));
        assert_eq!(Preset::User(2).to_string(), "U02");
        assert!("U00".parse::<Preset>().is_err());
        assert!("U".parse::<Preset>().is_err());
        assert!("X01".parse::<Preset>().is_err());
        assert!("U999".parse::<Preset>().is_err());
    }

    #[test]
    fn step_direction_from_delta() {
        assert_eq!(StepDirection::from_delta(5), StepDirection::Up);
        assert_eq!(StepDirection::from_delta(0), StepDirection::Up);
        assert_eq!(StepDirection::from_delta(-1), StepDirection::Down);
        assert_eq!(StepDirection::Up.wire_value(), 0);
        assert_eq!(StepDirection::Down.wire_value(), 1);
    }
}
