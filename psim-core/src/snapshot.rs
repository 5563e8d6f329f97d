//! Double-buffered handoff of renderable state.
//!
//! The producer fills a back snapshot it owns exclusively, then swaps it with
//! the front one. The only shared step is the swap of two `Arc`s under a
//! mutex, so neither side waits on the other copying data. A consumer keeps
//! its `Arc<Snapshot>` for as long as it wants; the producer allocates a
//! fresh back buffer when the old one is still held.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use glam::{Vec2, Vec4};
use serde::{Deserialize, Serialize};

use crate::store::ParticleStore;

/// How the renderer draws each particle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticleDisplay {
    Point,
    Circle,
    #[default]
    Disc,
}

/// Immutable copy of the columns a renderer needs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    generation_id: u64,
    time: f64,
    display: ParticleDisplay,
    positions: Vec<Vec2>,
    sizes: Vec<f32>,
    colors: Vec<Vec4>,
}

impl Snapshot {
    /// Increments by one on every publish, starting at 1.
    pub fn generation_id(&self) -> u64 {
        self.generation_id
    }

    /// Simulated time the snapshot was taken at.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn display(&self) -> ParticleDisplay {
        self.display
    }

    pub fn count(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[Vec2] {
        &self.positions
    }

    pub fn sizes(&self) -> &[f32] {
        &self.sizes
    }

    pub fn colors(&self) -> &[Vec4] {
        &self.colors
    }

    fn fill_from(&mut self, store: &ParticleStore, generation_id: u64, time: f64, display: ParticleDisplay) {
        self.generation_id = generation_id;
        self.time = time;
        self.display = display;
        self.positions.clear();
        self.positions.extend_from_slice(store.positions());
        self.sizes.clear();
        self.sizes.extend_from_slice(store.sizes());
        self.colors.clear();
        self.colors.extend_from_slice(store.colors());
    }
}

#[derive(Debug, Default)]
pub struct SnapshotBuffer {
    front: Mutex<Option<Arc<Snapshot>>>,
    back: Mutex<Option<Arc<Snapshot>>>,
    published: AtomicU64,
    closed: AtomicBool,
}

impl SnapshotBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the renderable columns of `store` and make them the latest
    /// snapshot. Returns the new generation id.
    ///
    /// Only one producer may publish into a buffer.
    pub fn publish(&self, store: &ParticleStore, time: f64, display: ParticleDisplay) -> u64 {
        let generation_id = self.published.load(Ordering::Acquire) + 1;

        let recycled = lock(&self.back).take().and_then(|arc| Arc::try_unwrap(arc).ok());
        let mut snapshot = recycled.unwrap_or_default();
        snapshot.fill_from(store, generation_id, time, display);

        let previous = lock(&self.front).replace(Arc::new(snapshot));
        // Counted only once readable, so `read()` is never behind `generation()`.
        self.published.store(generation_id, Ordering::Release);
        *lock(&self.back) = previous;
        generation_id
    }

    /// Most recently published snapshot, or `None` before the first publish.
    pub fn read(&self) -> Option<Arc<Snapshot>> {
        lock(&self.front).clone()
    }

    /// The latest snapshot if its generation is newer than `seen`.
    pub fn read_newer(&self, seen: u64) -> Option<Arc<Snapshot>> {
        self.read().filter(|snapshot| snapshot.generation_id > seen)
    }

    /// Number of snapshots published so far.
    pub fn generation(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    /// Mark the producer as gone. Published data stays readable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // The guarded data is a plain `Option<Arc<_>>`; a panic elsewhere cannot
    // leave it half-written.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
