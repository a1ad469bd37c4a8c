//! Adaptive Performance Controller
//!
//! A single task owns the dials. Every write (pipeline observations,
//! periodic ticks and operator commands) arrives over one channel and is
//! applied in order, and every read is a snapshot taken from a `watch`
//! channel, so readers never see a half-applied update.

pub mod parameters;

pub use parameters::{Dial, Dials, DerivedMultipliers, ParameterSnapshot, DIAL_MAX, DIAL_MIN};

use crate::config::ControllerSettings;
use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

const COMMAND_QUEUE: usize = 1024;

/// One processed (or failed) chunk as seen by the controller
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub latency_ms: f64,
    pub target_ms: f64,
    /// `None` for failed chunks
    pub confidence: Option<f64>,
}

/// What a reactive evaluation did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    /// Latency and/or confidence rules fired
    Reactive {
        speed_lowered: bool,
        pattern_raised: bool,
    },
    /// Neither rule fired; dials were perturbed
    Perturbed,
}

/// Controller state machine, independent of the task that drives it
pub struct ControllerState {
    dials: Dials,
    revision: u64,
    window: VecDeque<Observation>,
    settings: ControllerSettings,
    rng: StdRng,
}

impl ControllerState {
    pub fn new(settings: ControllerSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            dials: Dials::from(&settings.initial),
            revision: 0,
            window: VecDeque::with_capacity(settings.observation_window),
            settings,
            rng,
        }
    }

    pub fn snapshot(&self) -> ParameterSnapshot {
        ParameterSnapshot::new(self.dials, self.revision)
    }

    /// Record an observation and re-evaluate
    pub fn observe(&mut self, observation: Observation) -> Adjustment {
        if self.window.len() >= self.settings.observation_window.max(1) {
            self.window.pop_front();
        }
        self.window.push_back(observation);
        self.evaluate()
    }

    /// Reactive evaluation over the recent window
    ///
    /// Average latency over target lowers processing speed by one step;
    /// average confidence over target raises pattern recognition by one step.
    /// When neither holds, every dial takes a bounded random step.
    pub fn evaluate(&mut self) -> Adjustment {
        let step = self.settings.adjustment_step;

        let latency_over = self
            .mean(|o| Some(o.latency_ms / o.target_ms.max(f64::EPSILON)))
            .is_some_and(|ratio| ratio > 1.0);
        let confidence_high = self
            .mean(|o| o.confidence)
            .is_some_and(|c| c > self.settings.confidence_target);

        let adjustment = if latency_over || confidence_high {
            if latency_over {
                self.dials.nudge(Dial::ProcessingSpeed, -step);
            }
            if confidence_high {
                self.dials.nudge(Dial::PatternRecognition, step);
            }
            Adjustment::Reactive {
                speed_lowered: latency_over,
                pattern_raised: confidence_high,
            }
        } else {
            let amplitude = self.settings.jitter_amplitude.abs();
            if amplitude > 0.0 {
                for dial in Dial::ALL {
                    let delta = self.rng.gen_range(-amplitude..=amplitude);
                    self.dials.nudge(dial, delta);
                }
            }
            Adjustment::Perturbed
        };

        self.revision += 1;
        trace!(?adjustment, revision = self.revision, "Controller evaluated");
        adjustment
    }

    /// Explicit operator update
    pub fn set(&mut self, dial: Dial, value: f64) -> Result<ParameterSnapshot> {
        self.dials.set_checked(dial, value)?;
        self.revision += 1;
        info!(dial = %dial, value, revision = self.revision, "Parameter set by operator");
        Ok(self.snapshot())
    }

    fn mean(&self, f: impl Fn(&Observation) -> Option<f64>) -> Option<f64> {
        let values: Vec<f64> = self.window.iter().filter_map(f).collect();
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }
}

enum ControllerCommand {
    Observe(Observation),
    Tick,
    Set {
        dial: Dial,
        value: f64,
        reply: oneshot::Sender<Result<ParameterSnapshot>>,
    },
}

/// Cloneable handle to the controller task
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<ControllerCommand>,
    snapshot: watch::Receiver<ParameterSnapshot>,
}

impl ControllerHandle {
    /// Spawn the controller task
    pub fn spawn(settings: ControllerSettings) -> (Self, JoinHandle<()>) {
        let state = ControllerState::new(settings);
        let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot());
        let (commands, rx) = mpsc::channel(COMMAND_QUEUE);

        let task = tokio::spawn(run(state, rx, snapshot_tx));
        (
            Self {
                commands,
                snapshot: snapshot_rx,
            },
            task,
        )
    }

    /// Current parameters
    pub fn snapshot(&self) -> ParameterSnapshot {
        *self.snapshot.borrow()
    }

    /// Receiver that changes whenever the parameters do
    pub fn watch(&self) -> watch::Receiver<ParameterSnapshot> {
        self.snapshot.clone()
    }

    pub async fn observe(&self, observation: Observation) -> Result<()> {
        self.commands
            .send(ControllerCommand::Observe(observation))
            .await
            .map_err(|_| Error::Shutdown("controller".to_string()))
    }

    /// Run a periodic evaluation
    pub async fn tick(&self) -> Result<()> {
        self.commands
            .send(ControllerCommand::Tick)
            .await
            .map_err(|_| Error::Shutdown("controller".to_string()))
    }

    /// Set one dial; rejects values outside [0, 100]
    pub async fn set(&self, dial: Dial, value: f64) -> Result<ParameterSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(ControllerCommand::Set { dial, value, reply })
            .await
            .map_err(|_| Error::Shutdown("controller".to_string()))?;
        rx.await
            .map_err(|_| Error::Shutdown("controller".to_string()))?
    }
}

async fn run(
    mut state: ControllerState,
    mut commands: mpsc::Receiver<ControllerCommand>,
    snapshot: watch::Sender<ParameterSnapshot>,
) {
    debug!("Controller task started");
    while let Some(command) = commands.recv().await {
        match command {
            ControllerCommand::Observe(observation) => {
                state.observe(observation);
            }
            ControllerCommand::Tick => {
                state.evaluate();
            }
            ControllerCommand::Set { dial, value, reply } => {
                let result = state.set(dial, value);
                if result.is_ok() {
                    snapshot.send_replace(state.snapshot());
                }
                let _ = reply.send(result);
                continue;
            }
        }
        snapshot.send_replace(state.snapshot());
    }
    debug!("Controller task stopped");
}
