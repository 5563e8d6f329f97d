//! Snapshot publication and cross-thread handoff

use std::sync::Arc;
use std::thread;

use glam::{Vec2, Vec4};
use psim_core::{
    ParticleDisplay, ParticleInit, ParticleStore, PublishPolicy, SimulationConfig, SimulationLoop,
    Snapshot, SnapshotBuffer,
};

#[test]
fn test_read_before_publish_is_empty() {
    let buffer = SnapshotBuffer::new();
    assert!(buffer.read().is_none());
    assert_eq!(buffer.generation(), 0);
    assert!(!buffer.is_closed());
}

#[test]
fn test_read_returns_latest_publish() {
    let buffer = SnapshotBuffer::new();
    let mut store = ParticleStore::default();
    let h = store
        .add(ParticleInit::at(Vec2::ZERO).with_size(2.0).with_color(Vec4::X))
        .unwrap();

    for i in 1..=5 {
        store.get_mut(h).unwrap().set_position(Vec2::splat(i as f32));
        let generation = buffer.publish(&store, i as f64, ParticleDisplay::Circle);
        assert_eq!(generation, i);
    }

    let snapshot = buffer.read().unwrap();
    assert_eq!(snapshot.generation_id(), 5);
    assert_eq!(snapshot.time(), 5.0);
    assert_eq!(snapshot.count(), 1);
    assert_eq!(snapshot.positions(), &[Vec2::splat(5.0)]);
    assert_eq!(snapshot.sizes(), &[2.0]);
    assert_eq!(snapshot.colors(), &[Vec4::X]);
    assert_eq!(snapshot.display(), ParticleDisplay::Circle);
}

#[test]
fn test_read_newer_detects_new_frames() {
    let buffer = SnapshotBuffer::new();
    let store = ParticleStore::default();

    buffer.publish(&store, 0.0, ParticleDisplay::Disc);
    let first = buffer.read_newer(0).unwrap();
    assert!(buffer.read_newer(first.generation_id()).is_none());

    buffer.publish(&store, 0.0, ParticleDisplay::Disc);
    assert_eq!(buffer.read_newer(first.generation_id()).unwrap().generation_id(), 2);
}

#[test]
fn test_snapshot_outlives_store() {
    let buffer = SnapshotBuffer::new();
    let snapshot = {
        let mut store = ParticleStore::default();
        store.add_many(3, ParticleInit::at(Vec2::ONE)).unwrap();
        buffer.publish(&store, 0.0, ParticleDisplay::Point);
        buffer.read().unwrap()
    };
    assert_eq!(snapshot.count(), 3);
}

#[test]
fn test_loop_publishes_initial_state_and_each_call() {
    let mut sim = SimulationLoop::builder(SimulationConfig::default().with_fixed_dt(0.25))
        .on_initialize(|store| {
            store.add(ParticleInit::default())?;
            Ok(())
        })
        .build()
        .unwrap();
    let buffer = sim.snapshot_buffer();

    sim.initialize().unwrap();
    assert_eq!(buffer.generation(), 1);
    assert_eq!(buffer.read().unwrap().count(), 1);

    // Three steps in one call publish once
    sim.step(0.75).unwrap();
    assert_eq!(buffer.generation(), 2);

    // No step, no publish
    sim.step(0.1).unwrap();
    assert_eq!(buffer.generation(), 2);
}

#[test]
fn test_every_step_publish_policy() {
    let config = SimulationConfig {
        publish_policy: PublishPolicy::EveryStep,
        ..SimulationConfig::default().with_fixed_dt(0.25)
    };
    let mut sim = SimulationLoop::builder(config).build().unwrap();
    let buffer = sim.snapshot_buffer();

    sim.step(0.75).unwrap();
    // Initial state plus one per fixed step
    assert_eq!(buffer.generation(), 4);
    assert_eq!(buffer.read().unwrap().time(), 0.75);
}

#[test]
fn test_shared_buffer_is_used_by_loop() {
    let buffer = Arc::new(SnapshotBuffer::new());
    let mut sim = SimulationLoop::builder(SimulationConfig::default())
        .snapshot_buffer(Arc::clone(&buffer))
        .build()
        .unwrap();
    sim.initialize().unwrap();
    assert!(buffer.read().is_some());

    drop(sim);
    assert!(buffer.is_closed());
}

#[test]
fn test_consumer_never_sees_mixed_snapshot() {
    // Every particle of publish N sits at x == N, so a torn read would show
    // positions from two different publishes.
    const PARTICLES: usize = 256;
    const PUBLISHES: u64 = 500;

    let buffer = Arc::new(SnapshotBuffer::new());
    let producer_buffer = Arc::clone(&buffer);

    let producer = thread::spawn(move || {
        let mut store = ParticleStore::default();
        store.add_many(PARTICLES, ParticleInit::default()).unwrap();
        for n in 1..=PUBLISHES {
            for p in store.positions_mut() {
                *p = Vec2::new(n as f32, 0.0);
            }
            producer_buffer.publish(&store, n as f64, ParticleDisplay::Disc);
        }
        producer_buffer.close();
    });

    let mut last_seen = 0;
    while !buffer.is_closed() {
        if let Some(snapshot) = buffer.read() {
            assert!(snapshot.generation_id() >= last_seen, "generations went backwards");
            assert_consistent(&snapshot, PARTICLES);
            last_seen = snapshot.generation_id();
        }
        thread::yield_now();
    }
    producer.join().unwrap();

    let last = buffer.read().unwrap();
    assert_consistent(&last, PARTICLES);
    assert_eq!(last.generation_id(), PUBLISHES);
}

fn assert_consistent(snapshot: &Snapshot, particles: usize) {
    let n = snapshot.generation_id();
    assert_eq!(snapshot.count(), particles);
    assert_eq!(snapshot.time(), n as f64);
    assert!(snapshot.positions().iter().all(|p| p.x == n as f32));
}

#[test]
fn test_generation_is_never_ahead_of_read() {
    const PUBLISHES: u64 = 2000;

    let buffer = Arc::new(SnapshotBuffer::new());
    let producer_buffer = Arc::clone(&buffer);

    let producer = thread::spawn(move || {
        let mut store = ParticleStore::default();
        store.add(ParticleInit::default()).unwrap();
        for n in 1..=PUBLISHES {
            producer_buffer.publish(&store, n as f64, ParticleDisplay::Disc);
        }
        producer_buffer.close();
    });

    while !buffer.is_closed() {
        let generation = buffer.generation();
        if generation > 0 {
            let snapshot = buffer.read().unwrap();
            assert!(
                snapshot.generation_id() >= generation,
                "generation {} counted before it was readable (read {})",
                generation,
                snapshot.generation_id()
            );
        }
        thread::yield_now();
    }
    producer.join().unwrap();
    assert_eq!(buffer.generation(), PUBLISHES);
}
