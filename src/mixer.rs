use crate::config::MixerConfig;
use crate::connection::{Connector, MixerConnection, ReplyOptions};
use crate::db_table::{self, MAX_DB, MIN_DB};
use crate::error::{Result, RoomError};
use crate::protocol::MixerCommand;
use crate::types::{BusLevel, MixerBus, Preset, StepDirection};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::Mutex;

/// Reply timeout of the gain query
const GAIN_QUERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Reply timeout of the mute and preset queries
const SHORT_QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Client for the DSP mixer
///
/// All calls go through one mutex around the connection, so frame pacing and
/// reply association never see two writers. Façade operations that need more
/// than one frame hold the lock for the whole operation.
pub struct MixerLink {
    conn: Mutex<MixerConnection>,
    buses: BTreeMap<String, MixerBus>,
    input_in_use: BTreeMap<u8, bool>,
    output_in_use: BTreeMap<u8, bool>,
    lenient_gain_decode: bool,
}

impl MixerLink {
    /// Link to the configured TCP bridge
    pub fn new(config: &MixerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_connection(config, MixerConnection::new(config)))
    }

    /// Link over a custom transport
    pub fn with_connector(config: &MixerConfig, connector: Box<dyn Connector>) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_connection(
            config,
            MixerConnection::with_connector(config, connector),
        ))
    }

    fn from_connection(config: &MixerConfig, conn: MixerConnection) -> Self {
        Self {
            conn: Mutex::new(conn),
            buses: config.buses.clone(),
            input_in_use: config.input_in_use.clone(),
            output_in_use: config.output_in_use.clone(),
            lenient_gain_decode: config.lenient_gain_decode,
        }
    }

    /// Release the connection; the next call reopens it
    pub async fn close(&self) {
        self.conn.lock().await.close();
    }

    /// Names of the configured buses
    pub fn bus_names(&self) -> impl Iterator<Item = &str> {
        self.buses.keys().map(String::as_str)
    }

    /// Look up a bus by name
    pub fn resolve(&self, bus: &str) -> Result<MixerBus> {
        self.buses
            .get(bus)
            .copied()
            .ok_or_else(|| RoomError::InvalidArgument(format!("unknown bus: {}", bus)))
    }

    // ========== Raw operations ==========

    /// Step the gain of one channel by one device step
    pub async fn set_gain(&self, is_output: bool, channel: u8, direction: StepDirection) -> Result<()> {
        let mut conn = self.conn.lock().await;
        set_gain(&mut conn, is_output, channel, direction).await
    }

    pub async fn set_mute(&self, is_output: bool, channel: u8, mute: bool) -> Result<()> {
        let mut conn = self.conn.lock().await;
        set_mute(&mut conn, is_output, channel, mute).await
    }

    /// Query mute; a device that does not answer counts as unmuted
    pub async fn get_mute(&self, is_output: bool, channel: u8) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let reply = conn
            .send_command(
                MixerCommand::GetMute,
                [u8::from(is_output), channel, 0],
                ReplyOptions::with_timeout(SHORT_QUERY_TIMEOUT),
            )
            .await;

        match reply {
            Ok(Some(bytes)) => Ok(bytes.first().is_some_and(|&b| b != 0)),
            Ok(None) => Ok(false),
            Err(e) if e.is_timeout() => {
                tracing::warn!("No mute reply for {} channel {}", bus_kind(is_output), channel);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn recall_preset(&self, preset: Preset) -> Result<()> {
        let (d1, d2) = preset.wire_values();
        tracing::info!("Recalling mixer preset {}", preset);
        let mut conn = self.conn.lock().await;
        conn.send_command(MixerCommand::LoadPreset, [d1, d2, 0], ReplyOptions::none())
            .await?;
        Ok(())
    }

    /// Index of the active preset
    pub async fn get_preset(&self) -> Result<u8> {
        let mut conn = self.conn.lock().await;
        let reply = conn
            .send_command(
                MixerCommand::GetPreset,
                [0, 0, 0],
                ReplyOptions::with_timeout(SHORT_QUERY_TIMEOUT),
            )
            .await?;
        Ok(reply.and_then(|bytes| bytes.first().copied()).unwrap_or(0))
    }

    pub async fn set_input_volume_db(&self, channel: u8, db: f64) -> Result<()> {
        let mut conn = self.conn.lock().await;
        set_volume_db(&mut conn, MixerCommand::InputVolume, channel, db).await
    }

    pub async fn set_output_volume_db(&self, channel: u8, db: f64) -> Result<()> {
        let mut conn = self.conn.lock().await;
        set_volume_db(&mut conn, MixerCommand::OutputVolume, channel, db).await
    }

    /// Read the gain of one channel in dB; a timed out query is repeated once
    pub async fn get_gain_db(&self, is_output: bool, channel: u8) -> Result<f64> {
        let mut conn = self.conn.lock().await;
        self.get_gain_db_locked(&mut conn, is_output, channel).await
    }

    async fn get_gain_db_locked(&self, conn: &mut MixerConnection, is_output: bool, channel: u8) -> Result<f64> {
        let data = [u8::from(is_output), channel, 0];
        let options = ReplyOptions::with_timeout(GAIN_QUERY_TIMEOUT);

        let reply = match conn.send_command(MixerCommand::GetGain, data, options).await {
            Err(e) if e.is_timeout() => {
                tracing::warn!(
                    "Gain query for {} channel {} timed out, retrying",
                    bus_kind(is_output),
                    channel
                );
                conn.send_command(MixerCommand::GetGain, data, options).await?
            }
            other => other?,
        };

        let bytes = reply.unwrap_or_default();
        let (hi, lo) = match bytes.as_slice() {
            [hi, lo, ..] => (*hi, *lo),
            _ => {
                return Err(RoomError::Protocol(format!(
                    "gain reply of {} bytes",
                    bytes.len()
                )))
            }
        };

        decode_gain(hi, lo, self.lenient_gain_decode)
    }

    // ========== Bus-level operations ==========

    /// Mute or unmute every channel flagged in use; other channels are left alone
    ///
    /// All channels are attempted; the first failure is returned.
    pub async fn mute_all(&self, on: bool) -> Result<()> {
        let targets: Vec<(bool, u8)> = in_use(&self.input_in_use)
            .map(|ch| (false, ch))
            .chain(in_use(&self.output_in_use).map(|ch| (true, ch)))
            .collect();

        tracing::info!("Mixer {} {} channels", if on { "muting" } else { "unmuting" }, targets.len());

        let mut conn = self.conn.lock().await;
        let mut first_error = None;
        for (is_output, channel) in targets {
            if let Err(e) = set_mute(&mut conn, is_output, channel, on).await {
                tracing::error!("Mute of {} channel {} failed: {}", bus_kind(is_output), channel, e);
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Step a bus by one dB and return the expected new level
    ///
    /// The device applies the step itself; the returned value is computed from
    /// the level read before the step, not read back.
    pub async fn apply_gain_delta(&self, bus: &str, direction: StepDirection) -> Result<f64> {
        let MixerBus { is_output, channel } = self.resolve(bus)?;

        let mut conn = self.conn.lock().await;
        let current = self.get_gain_db_locked(&mut conn, is_output, channel).await?;
        let next = (current + direction.step_db()).clamp(MIN_DB, MAX_DB);
        set_gain(&mut conn, is_output, channel, direction).await?;

        tracing::info!("Bus {} gain {:.1} -> {:.1} dB", bus, current, next);
        Ok(next)
    }

    /// Volume and gain share one register on this mixer
    pub async fn apply_volume_delta(&self, bus: &str, direction: StepDirection) -> Result<f64> {
        self.apply_gain_delta(bus, direction).await
    }

    /// Recall a preset by name (`"F00"`, `"U01"`, ...)
    pub async fn recall(&self, preset: &str) -> Result<()> {
        let preset: Preset = preset.parse()?;
        self.recall_preset(preset).await
    }

    /// Read every configured bus
    pub async fn read_levels(&self) -> Result<BTreeMap<String, BusLevel>> {
        let mut conn = self.conn.lock().await;
        let mut levels = BTreeMap::new();

        for (name, bus) in &self.buses {
            let db = self.get_gain_db_locked(&mut conn, bus.is_output, bus.channel).await?;
            levels.insert(name.clone(), BusLevel { gain: db, volume: db });
        }

        Ok(levels)
    }
}

async fn set_gain(conn: &mut MixerConnection, is_output: bool, channel: u8, direction: StepDirection) -> Result<()> {
    conn.send_command(
        MixerCommand::Gain,
        [u8::from(is_output), channel, direction.wire_value()],
        ReplyOptions::none(),
    )
    .await?;
    Ok(())
}

async fn set_mute(conn: &mut MixerConnection, is_output: bool, channel: u8, mute: bool) -> Result<()> {
    conn.send_command(
        MixerCommand::Mute,
        [u8::from(is_output), channel, u8::from(mute)],
        ReplyOptions::none(),
    )
    .await?;
    Ok(())
}

async fn set_volume_db(conn: &mut MixerConnection, command: MixerCommand, channel: u8, db: f64) -> Result<()> {
    let [hi, lo] = db_table::db_to_code(db).to_be_bytes();
    tracing::debug!("Volume channel {} -> {:.1} dB (code {:02X}{:02X})", channel, db, hi, lo);
    conn.send_command(command, [channel, hi, lo], ReplyOptions::none())
        .await?;
    Ok(())
}

/// Decode a two-byte gain reply
///
/// `(0, 0)` reads as 0 dB. A code above the table is either rejected or, with
/// `lenient`, taken from the low byte alone.
pub fn decode_gain(hi: u8, lo: u8, lenient: bool) -> Result<f64> {
    if hi == 0 && lo == 0 {
        return Ok(0.0);
    }

    let mut code = i32::from(u16::from_be_bytes([hi, lo]));
    if code > db_table::MAX_CODE {
        if !lenient {
            return Err(RoomError::OutOfRange(code));
        }
        tracing::debug!("Gain code {} out of range, using low byte {}", code, lo);
        code = i32::from(lo);
    }

    db_table::code_to_db(db_table::clamp_code(code))
}

fn in_use(map: &BTreeMap<u8, bool>) -> impl Iterator<Item = u8> + '_ {
    map.iter().filter(|(_, used)| **used).map(|(ch, _)| *ch)
}

fn bus_kind(is_output: bool) -> &'static str {
    if is_output {
        "output"
    } else {
        "input"
    }
}
