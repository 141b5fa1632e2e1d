//! Projector power sequences.
//!
//! Powering a projector on means switching its mains relay, waiting for its
//! network interface to come up and only then sending the power command.
//! Powering off means sending the command and watching the lamp cool down.
//! Neither sequence ever fails as a whole: every step produces a
//! [`StepOutcome`] and the caller gets a [`SequenceReport`].

use crate::config::SequenceConfig;
use crate::projector::ProjectorControl;
use crate::relay::RelayControl;
use crate::status::StatusSink;
use crate::types::PowerState;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout_at, Instant};
use uuid::Uuid;

/// Delays and budgets of the power sequences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceTiming {
    pub nic_warmup: Duration,
    pub poll_interval: Duration,
    pub wait_for_on: bool,
    pub power_on_budget: Duration,
    pub power_off_budget: Duration,
}

impl From<&SequenceConfig> for SequenceTiming {
    fn from(config: &SequenceConfig) -> Self {
        Self {
            nic_warmup: config.nic_warmup(),
            poll_interval: config.poll_interval(),
            wait_for_on: config.wait_for_on,
            power_on_budget: config.power_on_budget(),
            power_off_budget: config.power_off_budget(),
        }
    }
}

impl Default for SequenceTiming {
    fn default() -> Self {
        Self::from(&SequenceConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceKind {
    PowerOn,
    PowerOff,
}

impl fmt::Display for SequenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceKind::PowerOn => write!(f, "power on"),
            SequenceKind::PowerOff => write!(f, "power off"),
        }
    }
}

/// Result of one step of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub step: &'static str,
    pub result: Result<(), String>,
}

impl StepOutcome {
    pub(crate) fn ok(step: &'static str) -> Self {
        Self { step, result: Ok(()) }
    }

    pub(crate) fn failed(step: &'static str, message: impl Into<String>) -> Self {
        Self {
            step,
            result: Err(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Everything that happened during one run
#[derive(Debug, Clone, Serialize)]
pub struct SequenceReport {
    pub run_id: Uuid,
    pub kind: SequenceKind,
    pub steps: Vec<StepOutcome>,
    /// Last power state observed while polling
    pub final_state: Option<PowerState>,
    /// `Some(true)` when polling reached the target state, `None` when no poll ran
    pub converged: Option<bool>,
    /// Another run held the slot, nothing was done
    pub rejected: bool,
}

impl SequenceReport {
    fn new(kind: SequenceKind) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            kind,
            steps: Vec::new(),
            final_state: None,
            converged: None,
            rejected: false,
        }
    }

    /// No step failed and polling, if any, converged
    pub fn succeeded(&self) -> bool {
        !self.rejected && self.steps.iter().all(StepOutcome::is_ok) && self.converged != Some(false)
    }

    pub fn step(&self, name: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.step == name)
    }
}

/// Exclusive right to run a sequence, released on drop
///
/// Room scenes hold one for their whole duration so that nothing else
/// touches the projector or its mains in between.
pub struct SequenceSlot<'a> {
    _guard: MutexGuard<'a, ()>,
}

/// Runs power sequences for one projector, one at a time
pub struct PowerSequencer {
    projector: Arc<dyn ProjectorControl>,
    relay: Arc<dyn RelayControl>,
    mains_channel: u8,
    sink: Arc<dyn StatusSink>,
    timing: SequenceTiming,
    slot: Mutex<()>,
}

impl PowerSequencer {
    pub fn new(
        projector: Arc<dyn ProjectorControl>,
        relay: Arc<dyn RelayControl>,
        mains_channel: u8,
        sink: Arc<dyn StatusSink>,
        timing: SequenceTiming,
    ) -> Self {
        Self {
            projector,
            relay,
            mains_channel,
            sink,
            timing,
            slot: Mutex::new(()),
        }
    }

    pub fn timing(&self) -> &SequenceTiming {
        &self.timing
    }

    /// Whether a run currently holds the slot
    pub fn is_running(&self) -> bool {
        self.slot.try_lock().is_err()
    }

    /// Start a run in the background
    pub fn spawn(self: &Arc<Self>, kind: SequenceKind) -> JoinHandle<SequenceReport> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(kind).await })
    }

    pub async fn run(&self, kind: SequenceKind) -> SequenceReport {
        match kind {
            SequenceKind::PowerOn => self.power_on().await,
            SequenceKind::PowerOff => self.power_off().await,
        }
    }

    /// Take the slot, or `None` while another run holds it
    pub fn claim(&self) -> Option<SequenceSlot<'_>> {
        self.slot.try_lock().ok().map(|guard| SequenceSlot { _guard: guard })
    }

    /// Report for a run turned away because the slot was taken
    pub fn rejected(&self, kind: SequenceKind) -> SequenceReport {
        let mut report = SequenceReport::new(kind);
        tracing::warn!("{} rejected: another sequence is running", kind);
        self.status("Projector: sequence already running");
        report.rejected = true;
        report
    }

    /// Mains on, warm-up, power command, then optionally wait for `On`
    pub async fn power_on(&self) -> SequenceReport {
        match self.claim() {
            Some(slot) => self.power_on_in(&slot).await,
            None => self.rejected(SequenceKind::PowerOn),
        }
    }

    /// [`power_on`](Self::power_on) for a caller already holding the slot
    pub async fn power_on_in(&self, _slot: &SequenceSlot<'_>) -> SequenceReport {
        let mut report = SequenceReport::new(SequenceKind::PowerOn);
        tracing::info!("Power on sequence {} started", report.run_id);

        self.status("Projector: switching mains on");
        let outcome = if self.relay.set_relay(self.mains_channel, true).await {
            StepOutcome::ok("mains_on")
        } else {
            StepOutcome::failed("mains_on", "relay did not switch")
        };
        self.record(&mut report, outcome);

        self.status(&format!(
            "Projector: waiting {}s for the network",
            self.timing.nic_warmup.as_secs()
        ));
        sleep(self.timing.nic_warmup).await;

        self.status("Projector: sending power on");
        let outcome = match self.projector.power(true).await {
            Ok(true) => StepOutcome::ok("power_command"),
            Ok(false) => StepOutcome::failed("power_command", "projector refused power on"),
            Err(e) => StepOutcome::failed("power_command", e.to_string()),
        };
        self.record(&mut report, outcome);

        if self.timing.wait_for_on {
            self.poll_until(&mut report, PowerState::On, self.timing.power_on_budget)
                .await;
        }

        self.finish(&report);
        report
    }

    /// Power command, then wait for `Standby`
    pub async fn power_off(&self) -> SequenceReport {
        match self.claim() {
            Some(slot) => self.power_off_in(&slot).await,
            None => self.rejected(SequenceKind::PowerOff),
        }
    }

    /// [`power_off`](Self::power_off) for a caller already holding the slot
    pub async fn power_off_in(&self, _slot: &SequenceSlot<'_>) -> SequenceReport {
        let mut report = SequenceReport::new(SequenceKind::PowerOff);
        tracing::info!("Power off sequence {} started", report.run_id);

        self.status("Projector: sending power off");
        let outcome = match self.projector.power(false).await {
            Ok(true) => StepOutcome::ok("power_command"),
            Ok(false) => StepOutcome::failed("power_command", "projector refused power off"),
            Err(e) => StepOutcome::failed("power_command", e.to_string()),
        };
        self.record(&mut report, outcome);

        self.poll_until(&mut report, PowerState::Standby, self.timing.power_off_budget)
            .await;

        self.finish(&report);
        report
    }

    /// Poll the power state until `target` or until `budget` has passed
    ///
    /// Each query is cut off at the budget end and the last sleep is
    /// shortened, so the poll never overruns the budget.
    async fn poll_until(&self, report: &mut SequenceReport, target: PowerState, budget: Duration) {
        let end = Instant::now() + budget;
        let mut converged = false;

        while Instant::now() < end {
            match timeout_at(end, self.projector.power_state()).await {
                Ok(Ok(state)) => {
                    report.final_state = Some(state);
                    self.status(&format!("Projector: {}", state));
                    if state == target {
                        converged = true;
                        break;
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!("Power state query failed: {}", e);
                    self.status(&format!("Projector: state unavailable ({})", e));
                }
                Err(_) => break,
            }

            sleep_until((Instant::now() + self.timing.poll_interval).min(end)).await;
        }

        report.converged = Some(converged);
        let outcome = if converged {
            StepOutcome::ok("wait_state")
        } else {
            StepOutcome::failed(
                "wait_state",
                format!("no {} within {}s", target, budget.as_secs()),
            )
        };
        self.record(report, outcome);
    }

    fn record(&self, report: &mut SequenceReport, outcome: StepOutcome) {
        match &outcome.result {
            Ok(()) => tracing::info!("{} step {}: ok", report.kind, outcome.step),
            Err(message) => {
                tracing::warn!("{} step {}: {}", report.kind, outcome.step, message);
                self.status(&format!("Projector: {} failed: {}", outcome.step, message));
            }
        }
        report.steps.push(outcome);
    }

    fn finish(&self, report: &SequenceReport) {
        let message = match (report.kind, report.converged) {
            (_, Some(false)) => "Projector: timed out waiting for state".to_string(),
            (SequenceKind::PowerOn, _) => "Projector: power on sequence done".to_string(),
            (SequenceKind::PowerOff, _) => "Projector: off".to_string(),
        };
        self.status(&message);
        tracing::info!("{} sequence {} finished", report.kind, report.run_id);
    }

    fn status(&self, message: &str) {
        self.sink.publish(message);
    }
}
