//! Fixed-step simulation loop.
//!
//! ```text
//! Uninitialized --initialize--> Ready --step--> Running <--pause/resume--> Paused
//! (any state) --stop--> Stopped
//! ```

use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::config::{ErrorPolicy, PublishPolicy, SimulationConfig};
use crate::error::{CallbackError, Hook, Result, SimError};
use crate::integrator::{self, InitializeCallback, StepHooks};
use crate::schema::AttributeSchema;
use crate::snapshot::SnapshotBuffer;
use crate::store::ParticleStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Uninitialized,
    Ready,
    Running,
    Paused,
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of one `step()` call
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StepReport {
    pub steps_run: u32,
    /// Whole steps discarded by the per-call step cap.
    pub steps_dropped: u64,
    /// Wall time left in the accumulator, in seconds.
    pub accumulator: f64,
}

type Command = Box<dyn FnOnce(&mut ParticleStore) -> std::result::Result<(), CallbackError> + Send>;

/// Queues one-shot edits to the store from any thread.
///
/// Commands run at the start of the next `step`/`step_once` call, outside of
/// any fixed step.
#[derive(Clone)]
pub struct CommandSender {
    sender: Sender<Command>,
}

impl CommandSender {
    /// Returns `false` once the simulation has been dropped.
    pub fn send<F>(&self, command: F) -> bool
    where
        F: FnOnce(&mut ParticleStore) -> std::result::Result<(), CallbackError> + Send + 'static,
    {
        self.sender.send(Box::new(command)).is_ok()
    }
}

pub struct SimulationBuilder {
    config: SimulationConfig,
    schema: AttributeSchema,
    initialize: Option<InitializeCallback>,
    hooks: StepHooks,
    snapshots: Option<Arc<SnapshotBuffer>>,
}

impl SimulationBuilder {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            schema: AttributeSchema::new(),
            initialize: None,
            hooks: StepHooks::new(),
            snapshots: None,
        }
    }

    pub fn schema(mut self, schema: AttributeSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn on_initialize<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&mut ParticleStore) -> std::result::Result<(), CallbackError> + Send + 'static,
    {
        self.initialize = Some(Box::new(callback));
        self
    }

    pub fn on_presolve<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&mut ParticleStore, f32) -> std::result::Result<(), CallbackError> + Send + 'static,
    {
        self.hooks = self.hooks.with_presolve(callback);
        self
    }

    pub fn on_postsolve<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&mut ParticleStore, f32) -> std::result::Result<(), CallbackError> + Send + 'static,
    {
        self.hooks = self.hooks.with_postsolve(callback);
        self
    }

    /// Publish into an existing buffer, e.g. one shared with a render thread.
    pub fn snapshot_buffer(mut self, buffer: Arc<SnapshotBuffer>) -> Self {
        self.snapshots = Some(buffer);
        self
    }

    pub fn build(self) -> Result<SimulationLoop> {
        self.config.validate()?;
        let store = ParticleStore::from_config(self.schema, &self.config)?;
        let (sender, commands) = mpsc::channel();

        Ok(SimulationLoop {
            config: self.config,
            state: LoopState::Uninitialized,
            store: Some(store),
            initialize: self.initialize,
            hooks: self.hooks,
            accumulator: 0.0,
            time: 0.0,
            step_count: 0,
            snapshots: self.snapshots.unwrap_or_default(),
            commands,
            sender,
        })
    }
}

pub struct SimulationLoop {
    config: SimulationConfig,
    state: LoopState,
    store: Option<ParticleStore>,
    initialize: Option<InitializeCallback>,
    hooks: StepHooks,
    accumulator: f64,
    time: f64,
    step_count: u64,
    snapshots: Arc<SnapshotBuffer>,
    commands: Receiver<Command>,
    sender: Sender<Command>,
}

impl SimulationLoop {
    pub fn builder(config: SimulationConfig) -> SimulationBuilder {
        SimulationBuilder::new(config)
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn fixed_dt(&self) -> f32 {
        self.config.fixed_dt
    }

    /// Simulated seconds elapsed.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    pub fn accumulator(&self) -> f64 {
        self.accumulator
    }

    pub fn store(&self) -> Result<&ParticleStore> {
        self.store
            .as_ref()
            .ok_or_else(|| SimError::InvalidState("the simulation has been stopped".to_string()))
    }

    /// Direct access for host edits between steps.
    pub fn store_mut(&mut self) -> Result<&mut ParticleStore> {
        self.store
            .as_mut()
            .ok_or_else(|| SimError::InvalidState("the simulation has been stopped".to_string()))
    }

    pub fn snapshot_buffer(&self) -> Arc<SnapshotBuffer> {
        Arc::clone(&self.snapshots)
    }

    pub fn command_sender(&self) -> CommandSender {
        CommandSender {
            sender: self.sender.clone(),
        }
    }

    /// Run the initialize callback and publish the initial state.
    pub fn initialize(&mut self) -> Result<()> {
        if self.state != LoopState::Uninitialized {
            return Err(self.not_allowed("initialize"));
        }

        let callback = self.initialize.take();
        let store = self.store_mut()?;
        let outcome = match callback {
            Some(callback) => callback(store).map_err(|e| SimError::callback(Hook::Initialize, e)),
            None => Ok(()),
        };
        if let Err(err) = outcome {
            error!("initialization failed: {}", err);
            self.stop();
            return Err(err);
        }

        let store = self.store_mut()?;
        store.consolidate();
        let count = store.len();
        self.publish();
        self.state = LoopState::Ready;
        info!("simulation initialized with {} particles", count);
        Ok(())
    }

    /// Advance by `wall_dt` seconds of wall time.
    ///
    /// Runs `floor(accumulator / fixed_dt)` fixed steps, at most
    /// `max_steps_per_call`; whole steps beyond the cap are discarded.
    /// Initializes the simulation first if needed. Does nothing while paused.
    pub fn step(&mut self, wall_dt: f64) -> Result<StepReport> {
        match self.state {
            LoopState::Stopped => return Err(self.not_allowed("step")),
            LoopState::Uninitialized => self.initialize()?,
            LoopState::Paused => {
                return Ok(StepReport {
                    accumulator: self.accumulator,
                    ..StepReport::default()
                })
            }
            LoopState::Ready | LoopState::Running => {}
        }

        self.run_commands()?;
        self.state = LoopState::Running;

        if wall_dt.is_finite() && wall_dt > 0.0 {
            self.accumulator += wall_dt;
        }
        let dt = f64::from(self.config.fixed_dt);
        let available = (self.accumulator / dt).floor() as u64;
        let steps = available.min(u64::from(self.config.max_steps_per_call));
        let dropped = available - steps;
        self.accumulator -= (steps + dropped) as f64 * dt;
        if self.accumulator >= dt {
            // `available` saturated; keep only the fractional remainder.
            self.accumulator = self.accumulator.rem_euclid(dt);
        }
        if dropped > 0 {
            warn!(
                "simulation fell behind, dropping {} steps ({:.3}s)",
                dropped,
                dropped as f64 * dt
            );
        }

        let mut report = StepReport {
            steps_run: 0,
            steps_dropped: dropped,
            accumulator: self.accumulator,
        };
        for _ in 0..steps {
            self.run_fixed_step()?;
            report.steps_run += 1;
        }
        if report.steps_run > 0 && self.config.publish_policy == PublishPolicy::EveryCall {
            self.publish();
        }

        debug!(
            "stepped {} times, t={:.3}, accumulator={:.5}",
            report.steps_run, self.time, self.accumulator
        );
        Ok(report)
    }

    /// Run exactly one fixed step, ignoring the accumulator.
    ///
    /// Allowed while paused for frame-by-frame stepping.
    pub fn step_once(&mut self) -> Result<()> {
        match self.state {
            LoopState::Stopped => return Err(self.not_allowed("step_once")),
            LoopState::Uninitialized => self.initialize()?,
            LoopState::Ready => self.state = LoopState::Running,
            LoopState::Running | LoopState::Paused => {}
        }

        self.run_commands()?;
        self.run_fixed_step()?;
        if self.config.publish_policy == PublishPolicy::EveryCall {
            self.publish();
        }
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        match self.state {
            LoopState::Ready | LoopState::Running => {
                if self.config.reset_accumulator_on_pause {
                    self.accumulator = 0.0;
                }
                self.state = LoopState::Paused;
                info!("simulation paused at t={:.3}", self.time);
                Ok(())
            }
            LoopState::Paused => Ok(()),
            LoopState::Uninitialized | LoopState::Stopped => Err(self.not_allowed("pause")),
        }
    }

    pub fn resume(&mut self) -> Result<()> {
        match self.state {
            LoopState::Paused => {
                self.state = LoopState::Running;
                info!("simulation resumed at t={:.3}", self.time);
                Ok(())
            }
            LoopState::Ready | LoopState::Running => Ok(()),
            LoopState::Uninitialized | LoopState::Stopped => Err(self.not_allowed("resume")),
        }
    }

    /// Destroy the store and refuse further steps. Published snapshots stay
    /// readable; the snapshot buffer is marked closed.
    pub fn stop(&mut self) {
        if self.state == LoopState::Stopped {
            return;
        }
        self.state = LoopState::Stopped;
        self.store = None;
        self.snapshots.close();
        info!(
            "simulation stopped after {} steps (t={:.3})",
            self.step_count, self.time
        );
    }

    fn run_fixed_step(&mut self) -> Result<()> {
        let dt = self.config.fixed_dt;
        let Some(store) = self.store.as_mut() else {
            return Err(SimError::InvalidState("the simulation has been stopped".to_string()));
        };

        if let Err(err) = integrator::step(store, &mut self.hooks, dt) {
            return Err(self.fail(err));
        }
        self.time += f64::from(dt);
        self.step_count += 1;

        if self.config.publish_policy == PublishPolicy::EveryStep {
            self.publish();
        }
        Ok(())
    }

    fn run_commands(&mut self) -> Result<()> {
        let Some(store) = self.store.as_mut() else {
            return Ok(());
        };

        let mut outcome = Ok(());
        while let Ok(command) = self.commands.try_recv() {
            if let Err(e) = command(store) {
                outcome = Err(SimError::callback(Hook::Command, e));
                break;
            }
        }
        store.consolidate();
        outcome.map_err(|err| self.fail(err))
    }

    /// Apply the error policy to a failed step. Never retries.
    fn fail(&mut self, err: SimError) -> SimError {
        error!("step {} failed: {}", self.step_count + 1, err);
        if err.is_fatal() || self.config.error_policy == ErrorPolicy::Stop {
            self.stop();
        } else {
            self.accumulator = 0.0;
        }
        err
    }

    fn publish(&self) {
        if let Some(store) = &self.store {
            self.snapshots
                .publish(store, self.time, self.config.particle_display);
        }
    }

    fn not_allowed(&self, operation: &str) -> SimError {
        SimError::InvalidState(format!("cannot {} while {}", operation, self.state))
    }
}

impl Drop for SimulationLoop {
    fn drop(&mut self) {
        self.snapshots.close();
    }
}
