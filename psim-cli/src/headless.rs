//! Runs a demo without a window, feeding a fixed wall-clock delta per frame.

use glam::Vec2;
use log::{debug, info};
use psim_core::{Result, SimulationLoop, Snapshot};

#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessSummary {
    pub frames: u32,
    pub steps: u64,
    pub steps_dropped: u64,
    pub time: f64,
    pub particles: usize,
    pub centroid: Vec2,
    /// Largest distance of any particle from the centroid.
    pub spread: f32,
}

impl HeadlessSummary {
    fn from_snapshot(frames: u32, steps: u64, steps_dropped: u64, snapshot: &Snapshot) -> Self {
        let positions = snapshot.positions();
        let centroid = if positions.is_empty() {
            Vec2::ZERO
        } else {
            positions.iter().copied().sum::<Vec2>() / positions.len() as f32
        };
        let spread = positions
            .iter()
            .map(|p| p.distance(centroid))
            .fold(0.0, f32::max);

        Self {
            frames,
            steps,
            steps_dropped,
            time: snapshot.time(),
            particles: snapshot.count(),
            centroid,
            spread,
        }
    }
}

/// Step `sim` for `frames` frames at `framerate` frames per second.
///
/// The summary is read back from the snapshot buffer, the same way a
/// renderer would see the final state.
pub fn run(mut sim: SimulationLoop, frames: u32, framerate: u32) -> Result<HeadlessSummary> {
    let wall_dt = 1.0 / f64::from(framerate.max(1));
    let snapshots = sim.snapshot_buffer();
    sim.initialize()?;

    let mut steps_dropped = 0;
    let log_every = framerate.max(1);
    for frame in 1..=frames {
        let report = sim.step(wall_dt)?;
        steps_dropped += report.steps_dropped;
        debug!("frame {}: {} steps", frame, report.steps_run);

        if frame % log_every == 0 {
            if let Some(snapshot) = snapshots.read() {
                info!(
                    "frame {} t={:.2}s particles={}",
                    frame,
                    snapshot.time(),
                    snapshot.count()
                );
            }
        }
    }

    let steps = sim.step_count();
    let snapshot = snapshots.read().unwrap_or_default();
    sim.stop();
    Ok(HeadlessSummary::from_snapshot(frames, steps, steps_dropped, &snapshot))
}
