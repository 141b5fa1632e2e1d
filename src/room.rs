use crate::config::{RelayChannelRef, RoomConfig, SequenceConfig};
use crate::error::{Result, RoomError};
use crate::mixer::MixerLink;
use crate::projector::{ProjectorControl, ProjectorLink};
use crate::relay::{HttpRelay, RelayChannel, RelayControl};
use crate::sequencer::{PowerSequencer, SequenceKind, SequenceReport, SequenceTiming, StepOutcome};
use crate::status::{StatusBoard, StatusReceiver, StatusSink};
use crate::types::InputSource;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Devices a [`Room`] is assembled from
pub struct RoomParts {
    pub projector: Arc<dyn ProjectorControl>,
    pub mixer: Arc<MixerLink>,
    pub projector_mains: RelayChannel,
    pub mixer_mains: Option<RelayChannel>,
    pub screen_down: Option<RelayChannel>,
    pub screen_up: Option<RelayChannel>,
    pub sequence: SequenceConfig,
}

/// Interface for controlling a room
///
/// A `Room` owns the projector, the mixer and the relays of one room and
/// offers the scenes built on top of them: starting audio, starting the
/// projector with the screen lowered, and shutting everything down.
#[derive(Clone)]
pub struct Room {
    projector: Arc<dyn ProjectorControl>,
    mixer: Arc<MixerLink>,
    sequencer: Arc<PowerSequencer>,
    board: Arc<StatusBoard>,
    projector_mains: RelayChannel,
    mixer_mains: Option<RelayChannel>,
    screen_down: Option<RelayChannel>,
    screen_up: Option<RelayChannel>,
    mixer_warmup: Duration,
    screen_pulse: Duration,
}

impl Room {
    /// Build the production room: TCP projector and mixer links, HTTP relays
    pub fn from_config(config: RoomConfig) -> Result<Self> {
        config.validate()?;

        let mut relays: BTreeMap<String, Arc<dyn RelayControl>> = BTreeMap::new();
        for (name, relay) in &config.relays {
            relays.insert(name.clone(), Arc::new(HttpRelay::new(relay)?));
        }

        let channel = |r: &Option<RelayChannelRef>| -> Result<Option<RelayChannel>> {
            r.as_ref()
                .map(|r| {
                    relays
                        .get(&r.relay)
                        .map(|relay| RelayChannel::new(relay.clone(), r.channel))
                        .ok_or_else(|| RoomError::Config(format!("unknown relay '{}'", r.relay)))
                })
                .transpose()
        };

        let projector_mains = channel(&config.channels.projector_mains)?
            .ok_or_else(|| RoomError::Config("projector_mains channel is required".to_string()))?;

        tracing::info!(
            "Room: projector {}, mixer {}, {} relay endpoint(s)",
            config.projector.addr(),
            config.mixer.addr(),
            relays.len()
        );

        Ok(Self::with_parts(RoomParts {
            projector: Arc::new(ProjectorLink::new(&config.projector)),
            mixer: Arc::new(MixerLink::new(&config.mixer)?),
            projector_mains,
            mixer_mains: channel(&config.channels.mixer_mains)?,
            screen_down: channel(&config.channels.screen_down)?,
            screen_up: channel(&config.channels.screen_up)?,
            sequence: config.sequence,
        }))
    }

    pub fn with_parts(parts: RoomParts) -> Self {
        let board = Arc::new(StatusBoard::new());
        let sequencer = Arc::new(PowerSequencer::new(
            parts.projector.clone(),
            parts.projector_mains.relay().clone(),
            parts.projector_mains.channel(),
            board.clone(),
            SequenceTiming::from(&parts.sequence),
        ));

        Self {
            projector: parts.projector,
            mixer: parts.mixer,
            sequencer,
            board,
            projector_mains: parts.projector_mains,
            mixer_mains: parts.mixer_mains,
            screen_down: parts.screen_down,
            screen_up: parts.screen_up,
            mixer_warmup: parts.sequence.mixer_warmup(),
            screen_pulse: parts.sequence.screen_pulse(),
        }
    }

    pub fn mixer(&self) -> &MixerLink {
        &self.mixer
    }

    pub fn projector(&self) -> &Arc<dyn ProjectorControl> {
        &self.projector
    }

    pub fn sequencer(&self) -> &Arc<PowerSequencer> {
        &self.sequencer
    }

    /// Latest status message
    pub fn status(&self) -> String {
        self.board.latest()
    }

    /// Subscribe to status messages
    pub fn subscribe_status(&self) -> StatusReceiver {
        self.board.subscribe()
    }

    /// Start a projector power sequence in the background
    pub fn power_projector(&self, on: bool) -> JoinHandle<SequenceReport> {
        let kind = if on { SequenceKind::PowerOn } else { SequenceKind::PowerOff };
        self.sequencer.spawn(kind)
    }

    pub async fn set_input(&self, source: InputSource) -> Result<bool> {
        self.projector.set_input(source).await
    }

    pub async fn lower_screen(&self) -> bool {
        self.pulse(self.screen_down.as_ref(), "lowering screen").await
    }

    pub async fn raise_screen(&self) -> bool {
        self.pulse(self.screen_up.as_ref(), "raising screen").await
    }

    /// Mixer mains on, wait for the mixer to boot, unmute
    pub async fn start_audio(&self) -> Result<()> {
        if let Some(mains) = &self.mixer_mains {
            self.board.publish("Audio: switching mixer on");
            if !mains.set(true).await {
                self.board.publish("Audio: mixer relay did not switch");
            }
            sleep(self.mixer_warmup).await;
        }

        self.mixer.mute_all(false).await?;
        self.board.publish("Audio: ready");
        Ok(())
    }

    /// Audio, screen down, projector on, input selected
    ///
    /// Returns the power-on report with the scene's own steps appended. The
    /// sequencer slot is held from the first step to the last; if another
    /// sequence holds it, no device is touched.
    pub async fn start_projector(&self, source: InputSource) -> SequenceReport {
        let Some(slot) = self.sequencer.claim() else {
            return self.sequencer.rejected(SequenceKind::PowerOn);
        };

        let audio = match self.start_audio().await {
            Ok(()) => StepOutcome::ok("audio"),
            Err(e) => {
                self.board.publish(&format!("Audio: {}", e));
                StepOutcome::failed("audio", e.to_string())
            }
        };
        let screen = self.screen_step("screen_down", self.screen_down.as_ref(), "lowering screen").await;

        let mut report = self.sequencer.power_on_in(&slot).await;
        report.steps.insert(0, audio);
        report.steps.insert(1, screen);

        let input = match self.projector.set_input(source).await {
            Ok(true) => {
                self.board.publish(&format!("Projector: input {}", source));
                StepOutcome::ok("set_input")
            }
            Ok(false) => StepOutcome::failed("set_input", format!("projector refused input {}", source)),
            Err(e) => StepOutcome::failed("set_input", e.to_string()),
        };
        log_step(&input);
        report.steps.push(input);
        report
    }

    /// Projector off, mute, screen up, mains off
    ///
    /// Runs under the sequencer slot like [`start_projector`](Self::start_projector);
    /// nothing runs if another sequence is busy.
    pub async fn shutdown(&self) -> SequenceReport {
        let Some(slot) = self.sequencer.claim() else {
            return self.sequencer.rejected(SequenceKind::PowerOff);
        };
        let mut report = self.sequencer.power_off_in(&slot).await;

        let mute = match self.mixer.mute_all(true).await {
            Ok(()) => StepOutcome::ok("mute_all"),
            Err(e) => StepOutcome::failed("mute_all", e.to_string()),
        };
        log_step(&mute);
        report.steps.push(mute);

        let screen = self.screen_step("screen_up", self.screen_up.as_ref(), "raising screen").await;
        report.steps.push(screen);

        let projector_mains = if self.projector_mains.set(false).await {
            StepOutcome::ok("projector_mains_off")
        } else {
            StepOutcome::failed("projector_mains_off", "relay did not switch")
        };
        log_step(&projector_mains);
        report.steps.push(projector_mains);

        if let Some(mains) = &self.mixer_mains {
            let mixer_mains = if mains.set(false).await {
                StepOutcome::ok("mixer_mains_off")
            } else {
                StepOutcome::failed("mixer_mains_off", "relay did not switch")
            };
            log_step(&mixer_mains);
            report.steps.push(mixer_mains);
        }

        self.board.publish("Room: shut down");
        report
    }

    async fn screen_step(&self, step: &'static str, channel: Option<&RelayChannel>, what: &str) -> StepOutcome {
        let outcome = if channel.is_none() || self.pulse(channel, what).await {
            StepOutcome::ok(step)
        } else {
            StepOutcome::failed(step, "relay did not switch")
        };
        log_step(&outcome);
        outcome
    }

    async fn pulse(&self, channel: Option<&RelayChannel>, what: &str) -> bool {
        let Some(channel) = channel else {
            tracing::debug!("No relay configured for {}", what);
            return false;
        };
        self.board.publish(&format!("Screen: {}", what));
        channel.pulse(self.screen_pulse).await
    }
}

fn log_step(outcome: &StepOutcome) {
    match &outcome.result {
        Ok(()) => tracing::info!("Room step {}: ok", outcome.step),
        Err(message) => tracing::warn!("Room step {}: {}", outcome.step, message),
    }
}
