//! Determinism tests - the same callbacks produce identical trajectories

use glam::Vec2;
use psim_core::tests::test_helpers::{approx_eq_f32, attractor_simulation, first_particle_distance};
use psim_core::{ParticleInit, SimulationConfig, SimulationLoop};

#[test]
fn test_attractor_distance_decreases_monotonically() {
    let mut sim = attractor_simulation(0.01);
    sim.initialize().unwrap();

    let mut distances = Vec::new();
    for _ in 0..100 {
        sim.step_once().unwrap();
        distances.push(first_particle_distance(&sim));
    }

    // The first postsolve force is integrated on the second step
    assert!(approx_eq_f32(distances[0], 30.0, 1e-6));
    for pair in distances.windows(2) {
        assert!(
            pair[1] < pair[0],
            "distance increased from {} to {}",
            pair[0],
            pair[1]
        );
    }
    // x(t) ~ 30 cos(t) at t ~ 0.99
    assert!(distances[99] > 15.0 && distances[99] < 18.0);
}

#[test]
fn test_wall_clock_cadence_does_not_change_result() {
    // 100 fixed steps fed as one big call per frame vs. many small ones
    let config = SimulationConfig::default()
        .with_fixed_dt(0.015625)
        .with_max_steps_per_call(100);

    let mut coarse = attractor_with(config.clone());
    let mut fine = attractor_with(config);

    coarse.step(100.0 * 0.015625).unwrap();
    for _ in 0..400 {
        fine.step(0.25 * 0.015625).unwrap();
    }

    assert_eq!(coarse.step_count(), 100);
    assert_eq!(fine.step_count(), 100);
    assert_eq!(
        coarse.store().unwrap().positions(),
        fine.store().unwrap().positions()
    );
}

#[test]
fn test_multiple_runs_determinism() {
    let run = || {
        let mut sim = SimulationLoop::builder(SimulationConfig::default().with_fixed_dt(0.01))
            .on_initialize(|store| {
                for i in 0..16 {
                    let angle = i as f32 * 0.4;
                    store.add(
                        ParticleInit::at(Vec2::from_angle(angle) * (5.0 + i as f32))
                            .with_mass(1.0 + i as f32 * 0.1),
                    )?;
                }
                Ok(())
            })
            .on_postsolve(|store, _| {
                store.for_each_mut(|mut p| {
                    let r = p.position();
                    let mass = p.mass();
                    p.add_force(-r * 50.0 * mass / r.length_squared().max(1e-3));
                });
                Ok(())
            })
            .build()
            .unwrap();
        for _ in 0..500 {
            sim.step_once().unwrap();
        }
        sim.store().unwrap().positions().to_vec()
    };

    let results: Vec<_> = (0..3).map(|_| run()).collect();
    for i in 1..results.len() {
        assert_eq!(results[0], results[i], "run {} should match run 0", i);
    }
}

fn attractor_with(config: SimulationConfig) -> SimulationLoop {
    SimulationLoop::builder(config)
        .on_initialize(|store| {
            store.add(ParticleInit::at(Vec2::new(30.0, 0.0)))?;
            Ok(())
        })
        .on_postsolve(|store, _| {
            store.for_each_mut(|mut p| {
                let position = p.position();
                p.add_force(-position);
            });
            Ok(())
        })
        .build()
        .unwrap()
}
