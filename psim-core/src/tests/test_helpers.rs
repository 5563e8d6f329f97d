//! Test helper utilities for psim tests

use std::collections::HashSet;

use glam::Vec2;

use crate::config::SimulationConfig;
use crate::simulation::SimulationLoop;
use crate::store::{ParticleInit, ParticleStore};

/// Check if two f32 values are approximately equal within tolerance
pub fn approx_eq_f32(a: f32, b: f32, tol: f32) -> bool {
    (a - b).abs() <= tol
}

/// Check if two f64 values are approximately equal within tolerance
pub fn approx_eq_f64(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() <= tol
}

/// Check if two vectors are approximately equal component-wise
pub fn approx_eq_vec2(a: Vec2, b: Vec2, tol: f32) -> bool {
    approx_eq_f32(a.x, b.x, tol) && approx_eq_f32(a.y, b.y, tol)
}

/// Describe the first broken store invariant, if any:
/// columns of unequal length, or a handle that does not map back to its slot.
pub fn store_inconsistency(store: &ParticleStore) -> Option<String> {
    let lengths = store.column_lengths();
    if lengths.iter().any(|&len| len != store.len()) {
        return Some(format!("column lengths differ: {:?}", lengths));
    }

    let mut seen = HashSet::new();
    for (slot, handle) in store.handles().iter().enumerate() {
        if !seen.insert(*handle) {
            return Some(format!("handle {} appears twice", handle));
        }
        match store.slot_of(*handle) {
            Ok(found) if found == slot => {}
            Ok(found) => {
                return Some(format!("handle {} at slot {} resolves to {}", handle, slot, found))
            }
            Err(e) => return Some(format!("handle {} at slot {}: {}", handle, slot, e)),
        }
    }

    if store.sizes().iter().any(|&size| !(size > 0.0)) {
        return Some("non-positive particle size".to_string());
    }
    None
}

/// Single particle at (30, 0) pulled toward the origin by `force -= position`
/// applied in postsolve.
pub fn attractor_simulation(fixed_dt: f32) -> SimulationLoop {
    SimulationLoop::builder(SimulationConfig::default().with_fixed_dt(fixed_dt))
        .on_initialize(|store| {
            store.add(ParticleInit::at(Vec2::new(30.0, 0.0)))?;
            Ok(())
        })
        .on_postsolve(|store, _dt| {
            store.for_each_mut(|mut p| {
                let position = p.position();
                *p.force_mut() -= position;
            });
            Ok(())
        })
        .build()
        .expect("default attractor configuration is valid")
}

/// Distance of the first particle from the origin.
pub fn first_particle_distance(sim: &SimulationLoop) -> f32 {
    sim.store()
        .ok()
        .and_then(|store| store.positions().first().copied())
        .map(Vec2::length)
        .unwrap_or(f32::NAN)
}
