//! Drives a simulation on its own thread from wall-clock time.
//!
//! The viewer never touches the store; it sends [`Control`] messages and
//! reads snapshots from the shared buffer.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{info, warn};
use psim_core::{CommandSender, LoopState, SimError, SimulationLoop, SnapshotBuffer};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Control {
    Play,
    Pause,
    StepOnce,
    /// Scale applied to elapsed wall time.
    SetSpeed(f32),
    Shutdown,
}

/// Last known state of the simulation thread
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerStatus {
    pub state: LoopState,
    pub time: f64,
    pub step_count: u64,
    pub particles: usize,
    pub steps_dropped: u64,
    pub error: Option<String>,
}

impl RunnerStatus {
    fn of(sim: &SimulationLoop) -> Self {
        Self {
            state: sim.state(),
            time: sim.time(),
            step_count: sim.step_count(),
            particles: sim.store().map(|store| store.len()).unwrap_or(0),
            steps_dropped: 0,
            error: None,
        }
    }
}

pub struct SimulationRunner {
    controls: Sender<Control>,
    commands: CommandSender,
    snapshots: Arc<SnapshotBuffer>,
    status: Arc<Mutex<RunnerStatus>>,
    thread: Option<JoinHandle<()>>,
}

impl SimulationRunner {
    /// Initialize `sim` on the calling thread, then hand it to a worker that
    /// ticks it every `tick`. The simulation starts paused.
    pub fn spawn(mut sim: SimulationLoop, tick: Duration) -> psim_core::Result<Self> {
        sim.initialize()?;
        sim.pause()?;

        let (controls, receiver) = mpsc::channel();
        let commands = sim.command_sender();
        let snapshots = sim.snapshot_buffer();
        let status = Arc::new(Mutex::new(RunnerStatus::of(&sim)));

        let worker_status = Arc::clone(&status);
        let thread = thread::Builder::new()
            .name("psim-simulation".to_string())
            .spawn(move || run(sim, receiver, worker_status, tick))
            .map_err(|e| {
                SimError::InvalidState(format!("cannot spawn simulation thread: {}", e))
            })?;

        Ok(Self {
            controls,
            commands,
            snapshots,
            status,
            thread: Some(thread),
        })
    }

    /// Returns `false` once the worker has exited.
    pub fn send(&self, control: Control) -> bool {
        self.controls.send(control).is_ok()
    }

    pub fn commands(&self) -> &CommandSender {
        &self.commands
    }

    pub fn snapshots(&self) -> &Arc<SnapshotBuffer> {
        &self.snapshots
    }

    pub fn status(&self) -> RunnerStatus {
        self.status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Drop for SimulationRunner {
    fn drop(&mut self) {
        let _ = self.controls.send(Control::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("simulation thread panicked");
            }
        }
    }
}

fn run(
    mut sim: SimulationLoop,
    controls: Receiver<Control>,
    status: Arc<Mutex<RunnerStatus>>,
    tick: Duration,
) {
    let mut pacer = Pacer::new();
    let mut speed = 1.0_f64;
    let mut dropped_total = 0;

    loop {
        let wall_dt = pacer.begin_tick();

        let mut step_once = false;
        loop {
            let control = match controls.try_recv() {
                Ok(control) => control,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => Control::Shutdown,
            };
            let outcome = match control {
                Control::Play => sim.resume(),
                Control::Pause => sim.pause(),
                Control::StepOnce => {
                    step_once = true;
                    Ok(())
                }
                Control::SetSpeed(value) => {
                    speed = f64::from(value.max(0.0));
                    Ok(())
                }
                Control::Shutdown => {
                    sim.stop();
                    publish_status(&status, &sim, dropped_total, None);
                    return;
                }
            };
            if let Err(e) = outcome {
                warn!("ignoring {:?}: {}", control, e);
            }
        }

        let outcome = if step_once {
            sim.step_once()
        } else {
            sim.step(wall_dt * speed).map(|report| {
                dropped_total += report.steps_dropped;
            })
        };

        let failure = outcome.err().map(|e| e.to_string());
        publish_status(&status, &sim, dropped_total, failure);

        if sim.state() == LoopState::Stopped {
            info!("simulation thread exiting");
            // Keep the final status readable but stop ticking.
            let _ = controls.recv();
            return;
        }

        pacer.end_tick(tick);
    }
}

fn publish_status(
    status: &Mutex<RunnerStatus>,
    sim: &SimulationLoop,
    steps_dropped: u64,
    failure: Option<String>,
) {
    let mut status = status.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    // The most recent failure stays visible until a newer one replaces it.
    let error = failure.or_else(|| status.error.clone());
    *status = RunnerStatus {
        steps_dropped,
        error,
        ..RunnerStatus::of(sim)
    };
}

/// Sleeps out the remainder of a tick, then spins for the last stretch.
struct Pacer {
    started: Instant,
}

impl Pacer {
    fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Wall time since the previous tick started, in seconds.
    fn begin_tick(&mut self) -> f64 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.started).as_secs_f64();
        self.started = now;
        elapsed
    }

    fn end_tick(&self, tick: Duration) {
        const ACCURACY: Duration = Duration::from_micros(100);
        let elapsed = self.started.elapsed();
        if let Some(remaining) = tick.checked_sub(elapsed + ACCURACY) {
            thread::sleep(remaining);
            while self.started.elapsed() < tick {
                thread::yield_now();
            }
        }
    }
}
