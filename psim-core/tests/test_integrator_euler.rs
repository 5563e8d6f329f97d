//! Semi-implicit Euler integration and hook ordering

use std::sync::{Arc, Mutex};

use glam::Vec2;
use psim_core::tests::test_helpers::approx_eq_vec2;
use psim_core::{step, ParticleInit, ParticleStore, SimulationConfig, SimulationLoop, StepHooks};

const DT: f32 = 1.0 / 64.0;

#[test]
fn test_single_step_matches_semi_implicit_euler() {
    let position = Vec2::new(1.0, -2.0);
    let velocity = Vec2::new(0.5, 3.0);
    let force = Vec2::new(4.0, -8.0);

    let mut sim = SimulationLoop::builder(SimulationConfig::default().with_fixed_dt(DT))
        .on_initialize(move |store| {
            store.add(ParticleInit::at(position).with_velocity(velocity))?;
            Ok(())
        })
        .on_presolve(move |store, _dt| {
            store.for_each_mut(|mut p| p.add_force(force));
            Ok(())
        })
        .build()
        .unwrap();

    let report = sim.step(f64::from(DT)).unwrap();
    assert_eq!(report.steps_run, 1);

    // velocity_after = v + f * dt, position_after = x + velocity_after * dt
    let expected_velocity = velocity + force * DT;
    let expected_position = position + expected_velocity * DT;

    let store = sim.store().unwrap();
    let h = store.handles()[0];
    let p = store.get(h).unwrap();
    assert!(approx_eq_vec2(p.velocity(), expected_velocity, 1e-6));
    assert!(approx_eq_vec2(p.position(), expected_position, 1e-6));
}

#[test]
fn test_force_is_divided_by_mass() {
    let mut store = ParticleStore::default();
    let h = store.add(ParticleInit::default().with_mass(4.0)).unwrap();
    let mut hooks = StepHooks::new().with_presolve(|store, _dt| {
        store.forces_mut()[0] = Vec2::new(8.0, 0.0);
        Ok(())
    });

    step(&mut store, &mut hooks, 0.5).unwrap();

    // a = F / m = 2, v = a * dt = 1, x = v * dt = 0.5
    let p = store.get(h).unwrap();
    assert!(approx_eq_vec2(p.velocity(), Vec2::new(1.0, 0.0), 1e-6));
    assert!(approx_eq_vec2(p.position(), Vec2::new(0.5, 0.0), 1e-6));
}

#[test]
fn test_uniform_mass_when_mass_column_disabled() {
    let config = SimulationConfig {
        mass_attribute_enabled: false,
        uniform_mass: 2.0,
        fixed_dt: 0.5,
        ..SimulationConfig::default()
    };
    let mut sim = SimulationLoop::builder(config)
        .on_initialize(|store| {
            store.add(ParticleInit::default())?;
            Ok(())
        })
        .on_presolve(|store, _| {
            store.forces_mut()[0] = Vec2::new(0.0, 4.0);
            Ok(())
        })
        .build()
        .unwrap();

    sim.step_once().unwrap();
    let velocity = sim.store().unwrap().velocities()[0];
    assert!(approx_eq_vec2(velocity, Vec2::new(0.0, 1.0), 1e-6));
}

#[test]
fn test_force_is_zero_when_presolve_runs() {
    let observed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&observed);

    let mut sim = SimulationLoop::builder(SimulationConfig::default().with_fixed_dt(DT))
        .on_initialize(|store| {
            store.add_many(3, ParticleInit::default().with_force(Vec2::ONE))?;
            Ok(())
        })
        .on_presolve(move |store, _| {
            let all_zero = store.forces().iter().all(|f| *f == Vec2::ZERO);
            sink.lock().unwrap().push(all_zero);
            store.for_each_mut(|mut p| p.add_force(Vec2::new(5.0, 5.0)));
            Ok(())
        })
        .on_postsolve(|store, _| {
            store.for_each_mut(|mut p| p.add_force(Vec2::new(-1.0, 2.0)));
            Ok(())
        })
        .build()
        .unwrap();

    for _ in 0..20 {
        sim.step_once().unwrap();
    }

    let observed = observed.lock().unwrap();
    assert_eq!(observed.len(), 20);
    assert!(observed.iter().all(|zero| *zero));
}

#[test]
fn test_postsolve_force_applies_on_next_step() {
    let mut store = ParticleStore::default();
    let h = store.add(ParticleInit::default()).unwrap();
    let mut hooks = StepHooks::new().with_postsolve(|store, _dt| {
        store.forces_mut()[0] += Vec2::new(2.0, 0.0);
        Ok(())
    });

    // First step: nothing accumulated yet
    step(&mut store, &mut hooks, 0.5).unwrap();
    assert_eq!(store.get(h).unwrap().velocity(), Vec2::ZERO);

    // Second step integrates the force left by the first postsolve
    step(&mut store, &mut hooks, 0.5).unwrap();
    assert!(approx_eq_vec2(
        store.get(h).unwrap().velocity(),
        Vec2::new(1.0, 0.0),
        1e-6
    ));
}

#[test]
fn test_presolve_runs_before_postsolve() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let pre = Arc::clone(&order);
    let post = Arc::clone(&order);

    let mut sim = SimulationLoop::builder(SimulationConfig::default().with_fixed_dt(DT))
        .on_presolve(move |_, _| {
            pre.lock().unwrap().push("presolve");
            Ok(())
        })
        .on_postsolve(move |_, _| {
            post.lock().unwrap().push("postsolve");
            Ok(())
        })
        .build()
        .unwrap();

    sim.step(f64::from(DT) * 2.0).unwrap();
    assert_eq!(
        *order.lock().unwrap(),
        vec!["presolve", "postsolve", "presolve", "postsolve"]
    );
}

#[test]
fn test_callback_receives_fixed_dt() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let mut sim = SimulationLoop::builder(SimulationConfig::default().with_fixed_dt(0.25))
        .on_presolve(move |_, dt| {
            sink.lock().unwrap().push(dt);
            Ok(())
        })
        .build()
        .unwrap();

    sim.step(0.8).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![0.25, 0.25, 0.25]);
}

#[test]
fn test_constant_presolve_force_is_not_accumulated_across_steps() {
    let mut store = ParticleStore::default();
    let h = store.add(ParticleInit::default().with_mass(2.0)).unwrap();
    let mut hooks = StepHooks::new().with_presolve(|store, _| {
        store.for_each_mut(|mut p| p.add_force(Vec2::new(4.0, 0.0)));
        Ok(())
    });

    // v_n = n * F * dt / m = n * 4 * 0.5 / 2
    for n in 1..=5 {
        step(&mut store, &mut hooks, 0.5).unwrap();
        let velocity = store.get(h).unwrap().velocity();
        assert!(
            approx_eq_vec2(velocity, Vec2::new(n as f32, 0.0), 1e-6),
            "step {}: velocity {:?}",
            n,
            velocity
        );
    }
}

#[test]
fn test_presolve_and_postsolve_forces_count_once() {
    let mut store = ParticleStore::default();
    let h = store.add(ParticleInit::default()).unwrap();
    let mut hooks = StepHooks::new()
        .with_presolve(|store, _| {
            store.for_each_mut(|mut p| p.add_force(Vec2::X));
            Ok(())
        })
        .with_postsolve(|store, _| {
            store.for_each_mut(|mut p| p.add_force(Vec2::Y));
            Ok(())
        });

    // Presolve applies on its own step, postsolve on the following one.
    let mut velocities = Vec::new();
    for _ in 0..4 {
        step(&mut store, &mut hooks, 1.0).unwrap();
        velocities.push(store.get(h).unwrap().velocity());
    }
    assert_eq!(
        velocities,
        vec![
            Vec2::new(1.0, 0.0),
            Vec2::new(2.0, 1.0),
            Vec2::new(3.0, 2.0),
            Vec2::new(4.0, 3.0),
        ]
    );
}
