//! Room configuration.
//!
//! Every component receives its part of a [`RoomConfig`] at construction time.
//! Nothing here is global and nothing is reloaded while the room is running.

use crate::error::{Result, RoomError};
use crate::types::{InputSource, MixerBus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Minimum spacing the mixer's serial bridge tolerates between frames
pub const MIN_COMMAND_SPACING: Duration = Duration::from_millis(20);

/// Complete description of one room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    pub projector: ProjectorConfig,
    pub mixer: MixerConfig,

    /// Relay endpoints by name (e.g. `"shelly1"`)
    #[serde(default)]
    pub relays: BTreeMap<String, RelayConfig>,

    /// Which relay channel drives what
    pub channels: ChannelAssignments,

    #[serde(default)]
    pub sequence: SequenceConfig,
}

impl RoomConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: RoomConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Check cross references and value ranges
    pub fn validate(&self) -> Result<()> {
        if self.projector.host.trim().is_empty() {
            return Err(RoomError::Config("projector host is empty".to_string()));
        }
        self.mixer.validate()?;
        self.sequence.validate()?;

        let channels = [
            ("projector_mains", &self.channels.projector_mains),
            ("mixer_mains", &self.channels.mixer_mains),
            ("screen_down", &self.channels.screen_down),
            ("screen_up", &self.channels.screen_up),
        ];
        for (role, channel) in channels {
            if let Some(channel) = channel {
                if !self.relays.contains_key(&channel.relay) {
                    return Err(RoomError::Config(format!(
                        "{} refers to unknown relay '{}'",
                        role, channel.relay
                    )));
                }
            }
        }

        if self.channels.projector_mains.is_none() {
            return Err(RoomError::Config("projector_mains channel is required".to_string()));
        }

        Ok(())
    }
}

/// Projector endpoint and protocol tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectorConfig {
    pub host: String,

    #[serde(default = "default_projector_port")]
    pub port: u16,

    /// Needed only when the projector announces authentication
    #[serde(default)]
    pub password: Option<String>,

    /// Connect and per-line read timeout
    #[serde(default = "default_projector_timeout_s")]
    pub timeout_s: f64,

    /// Additional attempts after the first one fails
    #[serde(default = "default_projector_retries")]
    pub retries: u32,

    /// Send a bare CR right after connecting; some firmwares only emit the
    /// banner after receiving input
    #[serde(default = "default_true")]
    pub nudge_banner: bool,

    /// Protocol code of each input source
    #[serde(default = "default_input_map")]
    pub input_map: BTreeMap<InputSource, String>,
}

impl ProjectorConfig {
    /// Config with defaults for everything but the host
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_projector_port(),
            password: None,
            timeout_s: default_projector_timeout_s(),
            retries: default_projector_retries(),
            nudge_banner: true,
            input_map: default_input_map(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        secs(self.timeout_s)
    }
}

/// Mixer endpoint, link tuning and bus layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixerConfig {
    pub host: String,

    #[serde(default = "default_mixer_port")]
    pub port: u16,

    /// Device address on the serial bus, 1..=254
    #[serde(default = "default_mixer_address")]
    pub address: u8,

    /// Minimum time between two frames; values below 20 ms are raised
    #[serde(default = "default_min_spacing_ms")]
    pub min_spacing_ms: u64,

    /// Connect timeout and base for the default reply timeout
    #[serde(default = "default_mixer_timeout_s")]
    pub timeout_s: f64,

    /// The serial bridge may echo a frame before the device reply
    #[serde(default)]
    pub expect_echo: bool,

    /// Accept gain replies whose high byte is garbage by using the low byte
    #[serde(default)]
    pub lenient_gain_decode: bool,

    /// Named buses
    #[serde(default = "default_buses")]
    pub buses: BTreeMap<String, MixerBus>,

    /// Input channels touched by `mute_all`
    #[serde(default = "default_input_in_use")]
    pub input_in_use: BTreeMap<u8, bool>,

    /// Output channels touched by `mute_all`
    #[serde(default = "default_output_in_use")]
    pub output_in_use: BTreeMap<u8, bool>,
}

impl MixerConfig {
    /// Config with defaults for everything but the host
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_mixer_port(),
            address: default_mixer_address(),
            min_spacing_ms: default_min_spacing_ms(),
            timeout_s: default_mixer_timeout_s(),
            expect_echo: false,
            lenient_gain_decode: false,
            buses: default_buses(),
            input_in_use: default_input_in_use(),
            output_in_use: default_output_in_use(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        secs(self.timeout_s)
    }

    /// Configured spacing, never below [`MIN_COMMAND_SPACING`]
    pub fn min_spacing(&self) -> Duration {
        Duration::from_millis(self.min_spacing_ms).max(MIN_COMMAND_SPACING)
    }

    /// Reply timeout used when a call does not pass its own
    pub fn default_reply_timeout(&self) -> Duration {
        self.timeout().max(Duration::from_secs(2))
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(RoomError::Config("mixer host is empty".to_string()));
        }
        if !(1..=254).contains(&self.address) {
            return Err(RoomError::Config(format!(
                "mixer address {} outside 1..=254",
                self.address
            )));
        }
        Ok(())
    }
}

/// Relay endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// e.g. `http://192.168.1.10`
    pub base_url: String,

    #[serde(default = "default_relay_timeout_s")]
    pub timeout_s: f64,
}

impl RelayConfig {
    pub fn timeout(&self) -> Duration {
        secs(self.timeout_s)
    }
}

/// One channel on a named relay endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayChannelRef {
    pub relay: String,
    pub channel: u8,
}

/// Relay channels the room scenes drive
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelAssignments {
    pub projector_mains: Option<RelayChannelRef>,
    #[serde(default)]
    pub mixer_mains: Option<RelayChannelRef>,
    #[serde(default)]
    pub screen_down: Option<RelayChannelRef>,
    #[serde(default)]
    pub screen_up: Option<RelayChannelRef>,
}

/// Timing of the power sequences and scenes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceConfig {
    /// Wait after mains on before talking to the projector
    #[serde(default = "default_nic_warmup_s")]
    pub nic_warmup_s: f64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Poll after power on until the projector reports `On`
    #[serde(default)]
    pub wait_for_on: bool,

    #[serde(default = "default_power_on_budget_s")]
    pub power_on_budget_s: f64,

    #[serde(default = "default_power_off_budget_s")]
    pub power_off_budget_s: f64,

    /// Wait after mixer mains on before talking to the mixer
    #[serde(default = "default_mixer_warmup_s")]
    pub mixer_warmup_s: f64,

    #[serde(default = "default_screen_pulse_ms")]
    pub screen_pulse_ms: u64,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            nic_warmup_s: default_nic_warmup_s(),
            poll_interval_ms: default_poll_interval_ms(),
            wait_for_on: false,
            power_on_budget_s: default_power_on_budget_s(),
            power_off_budget_s: default_power_off_budget_s(),
            mixer_warmup_s: default_mixer_warmup_s(),
            screen_pulse_ms: default_screen_pulse_ms(),
        }
    }
}

impl SequenceConfig {
    pub fn nic_warmup(&self) -> Duration {
        secs(self.nic_warmup_s)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn power_on_budget(&self) -> Duration {
        secs(self.power_on_budget_s)
    }

    pub fn power_off_budget(&self) -> Duration {
        secs(self.power_off_budget_s)
    }

    pub fn mixer_warmup(&self) -> Duration {
        secs(self.mixer_warmup_s)
    }

    pub fn screen_pulse(&self) -> Duration {
        Duration::from_millis(self.screen_pulse_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(RoomError::Config("sequence poll_interval_ms must be above 0".to_string()));
        }
        Ok(())
    }
}

/// Seconds from configuration; negative or NaN becomes zero
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

fn default_true() -> bool {
    true
}

fn default_projector_port() -> u16 {
    4352
}

fn default_projector_timeout_s() -> f64 {
    8.0
}

fn default_projector_retries() -> u32 {
    4
}

fn default_input_map() -> BTreeMap<InputSource, String> {
    BTreeMap::from([
        (InputSource::Computer1, "11".to_string()),
        (InputSource::Computer2, "12".to_string()),
        (InputSource::Hdmi1, "32".to_string()),
        (InputSource::Hdmi2, "33".to_string()),
        (InputSource::HdBaseT, "56".to_string()),
    ])
}

fn default_mixer_port() -> u16 {
    4196
}

fn default_mixer_address() -> u8 {
    3
}

fn default_min_spacing_ms() -> u64 {
    50
}

fn default_mixer_timeout_s() -> f64 {
    3.0
}

fn default_buses() -> BTreeMap<String, MixerBus> {
    BTreeMap::from([
        ("in_a".to_string(), MixerBus::input(0)),
        ("out0".to_string(), MixerBus::output(0)),
        ("out1".to_string(), MixerBus::output(1)),
        ("out2".to_string(), MixerBus::output(2)),
        ("out3".to_string(), MixerBus::output(3)),
    ])
}

fn default_input_in_use() -> BTreeMap<u8, bool> {
    (0..4).map(|ch| (ch, ch == 0)).collect()
}

fn default_output_in_use() -> BTreeMap<u8, bool> {
    (0..8).map(|ch| (ch, ch == 0 || ch == 4)).collect()
}

fn default_relay_timeout_s() -> f64 {
    5.0
}

fn default_nic_warmup_s() -> f64 {
    12.0
}

fn default_poll_interval_ms() -> u64 {
    1500
}

fn default_power_on_budget_s() -> f64 {
    120.0
}

fn default_power_off_budget_s() -> f64 {
    90.0
}

fn default_mixer_warmup_s() -> f64 {
    6.0
}

fn default_screen_pulse_ms() -> u64 {
    800
}
