//! Built-in scenes shipped with the `psim` binary.

use std::f32::consts::TAU;

use clap::ValueEnum;
use glam::{Vec2, Vec4};
use psim_core::{
    AttributeDecl, AttributeSchema, CallbackError, ParticleInit, ParticleStore, Result,
    SimulationBuilder, SimulationConfig,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const ORBIT_PARTICLES: usize = 1000;
const ORBIT_CENTRAL_MASS: f32 = 50.0;
const ORBIT_MIN_RADIUS: f32 = 2.0;
const ORBIT_MAX_RADIUS: f32 = 30.0;
/// Squared distance at which the orbit colour gradient saturates.
const ORBIT_COLOR_RANGE: f32 = 500.0;
const NEAR_COLOR: Vec4 = Vec4::new(1.0, 0.25, 0.2, 1.0);
const FAR_COLOR: Vec4 = Vec4::new(0.2, 0.85, 1.0, 1.0);

const BOUNCE_PARTICLES: usize = 60;
const BOUNCE_HALF_EXTENT: Vec2 = Vec2::new(40.0, 25.0);
const BOUNCE_GRAVITY: Vec2 = Vec2::new(0.0, -9.81);
const BOUNCE_RESTITUTION: f32 = 0.8;
const BOUNCE_FLOOR_FRICTION: f32 = 0.95;
/// Below this speed a particle resting on the floor is respawned.
const BOUNCE_SLEEP_SPEED: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Demo {
    /// One particle pulled toward the origin by a spring
    Attractor,
    /// A disc of particles circling a heavy central body
    Orbit,
    /// Balls bouncing inside a box under gravity
    Bounce,
}

impl Demo {
    pub const ALL: [Demo; 3] = [Demo::Attractor, Demo::Orbit, Demo::Bounce];

    pub fn name(&self) -> &'static str {
        match self {
            Demo::Attractor => "attractor",
            Demo::Orbit => "orbit",
            Demo::Bounce => "bounce",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Demo::Attractor => "one particle pulled toward the origin by a spring force",
            Demo::Orbit => "1000 particles orbiting a heavy central body",
            Demo::Bounce => "balls bouncing in a box, respawned once they come to rest",
        }
    }

    /// Half of the world-space width the viewer should frame.
    pub fn view_extent(&self) -> f32 {
        match self {
            Demo::Attractor => 35.0,
            Demo::Orbit => 35.0,
            Demo::Bounce => BOUNCE_HALF_EXTENT.x + 2.0,
        }
    }

    /// Wire the demo's callbacks onto a fresh builder.
    pub fn builder(&self, config: SimulationConfig, seed: u64) -> Result<SimulationBuilder> {
        match self {
            Demo::Attractor => Ok(attractor(config)),
            Demo::Orbit => Ok(orbit(config, seed)),
            Demo::Bounce => bounce(config, seed),
        }
    }
}

fn attractor(config: SimulationConfig) -> SimulationBuilder {
    SimulationBuilder::new(config)
        .on_initialize(|store| {
            store.add(
                ParticleInit::at(Vec2::new(30.0, 0.0))
                    .with_size(1.5)
                    .with_color(FAR_COLOR),
            )?;
            Ok(())
        })
        .on_postsolve(|store, _| {
            store.for_each_mut(|mut p| {
                let position = p.position();
                *p.force_mut() -= position;
            });
            Ok(())
        })
}

fn orbit(config: SimulationConfig, seed: u64) -> SimulationBuilder {
    SimulationBuilder::new(config)
        .on_initialize(move |store| {
            let mut rng = StdRng::seed_from_u64(seed);
            store.reserve(ORBIT_PARTICLES + 1)?;

            // The central body is fixed in place by postsolve.
            let mut centre = ParticleInit::at(Vec2::ZERO)
                .with_size(2.0)
                .with_color(Vec4::new(1.0, 0.9, 0.4, 1.0));
            if store.has_mass_column() {
                centre = centre.with_mass(ORBIT_CENTRAL_MASS);
            }
            store.add(centre)?;

            for _ in 0..ORBIT_PARTICLES {
                let radius = rng.gen_range(ORBIT_MIN_RADIUS..ORBIT_MAX_RADIUS);
                let angle = rng.gen_range(0.0..TAU);
                let mass: f32 = rng.gen_range(1.0..3.0);
                let position = Vec2::from_angle(angle) * radius;
                let speed = (ORBIT_CENTRAL_MASS / radius).sqrt();

                let mut init = ParticleInit::at(position)
                    .with_velocity(position.perp().normalize() * speed)
                    .with_size(0.1 * mass)
                    .with_color(orbit_color(position));
                if store.has_mass_column() {
                    init = init.with_mass(mass);
                }
                store.add(init)?;
            }
            Ok(())
        })
        .on_postsolve(|store, _| {
            orbit_postsolve(store);
            Ok(())
        })
}

fn orbit_postsolve(store: &mut ParticleStore) {
    let uniform = store.uniform_mass();
    let masses: Vec<f32> = match store.masses() {
        Some(masses) => masses.to_vec(),
        None => vec![uniform; store.len()],
    };
    let positions = store.positions().to_vec();

    for (slot, position) in positions.iter().enumerate().skip(1) {
        // Softened so particles passing through the core do not explode.
        let squared = position.length_squared().max(ORBIT_MIN_RADIUS * ORBIT_MIN_RADIUS);
        let pull = -*position * (ORBIT_CENTRAL_MASS * masses[slot] / (squared * squared.sqrt()));
        store.forces_mut()[slot] += pull;
        store.colors_mut()[slot] = orbit_color(*position);
    }

    if let Some(centre) = store.positions_mut().first_mut() {
        *centre = Vec2::ZERO;
    }
    if let Some(centre) = store.velocities_mut().first_mut() {
        *centre = Vec2::ZERO;
    }
}

fn orbit_color(position: Vec2) -> Vec4 {
    let t = (position.length_squared() / ORBIT_COLOR_RANGE).clamp(0.0, 1.0);
    NEAR_COLOR.lerp(FAR_COLOR, t)
}

fn bounce(config: SimulationConfig, seed: u64) -> Result<SimulationBuilder> {
    let schema = AttributeSchema::new().with(AttributeDecl::scalar("bounces", 0.0))?;
    let mut rng = StdRng::seed_from_u64(seed);

    Ok(SimulationBuilder::new(config)
        .schema(schema)
        .on_initialize({
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
            move |store| {
                for _ in 0..BOUNCE_PARTICLES {
                    store.add(bounce_particle(&mut rng))?;
                }
                Ok(())
            }
        })
        .on_presolve(|store, _| {
            let uniform = store.uniform_mass();
            let masses = store.masses().map(<[f32]>::to_vec);
            for (slot, force) in store.forces_mut().iter_mut().enumerate() {
                let mass = masses.as_ref().map_or(uniform, |m| m[slot]);
                *force += BOUNCE_GRAVITY * mass;
            }
            Ok(())
        })
        .on_postsolve(move |store, _| bounce_postsolve(store, &mut rng)))
}

fn bounce_particle(rng: &mut StdRng) -> ParticleInit {
    let size = rng.gen_range(0.6..1.6);
    let position = Vec2::new(
        rng.gen_range(-BOUNCE_HALF_EXTENT.x + size..BOUNCE_HALF_EXTENT.x - size),
        rng.gen_range(0.0..BOUNCE_HALF_EXTENT.y - size),
    );
    let velocity = Vec2::from_angle(rng.gen_range(0.0..TAU)) * rng.gen_range(2.0..12.0);
    ParticleInit::at(position)
        .with_velocity(velocity)
        .with_size(size)
        .with_color(bounce_color(0.0))
}

fn bounce_color(bounces: f32) -> Vec4 {
    NEAR_COLOR.lerp(FAR_COLOR, (bounces / 10.0).min(1.0))
}

fn bounce_postsolve(
    store: &mut ParticleStore,
    rng: &mut StdRng,
) -> std::result::Result<(), CallbackError> {
    let mut respawn = 0;

    store.try_for_each_mut(|mut particle| -> std::result::Result<(), CallbackError> {
        let radius = particle.size();
        let min = -BOUNCE_HALF_EXTENT + Vec2::splat(radius);
        let max = BOUNCE_HALF_EXTENT - Vec2::splat(radius);
        let mut position = particle.position();
        let mut velocity = particle.velocity();
        let mut hit = false;

        for axis in 0..2 {
            if position[axis] < min[axis] {
                position[axis] = min[axis];
                velocity[axis] = -velocity[axis] * BOUNCE_RESTITUTION;
                if axis == 1 {
                    velocity.x *= BOUNCE_FLOOR_FRICTION;
                }
                hit = true;
            } else if position[axis] > max[axis] {
                position[axis] = max[axis];
                velocity[axis] = -velocity[axis] * BOUNCE_RESTITUTION;
                hit = true;
            }
        }

        particle.set_position(position);
        particle.set_velocity(velocity);
        if hit {
            let bounces = particle.scalar("bounces")? + 1.0;
            particle.set_scalar("bounces", bounces)?;
            particle.set_color(bounce_color(bounces));
        }

        let resting = position.y <= min.y + f32::EPSILON;
        if resting && velocity.length() < BOUNCE_SLEEP_SPEED {
            particle.despawn();
            respawn += 1;
        }
        Ok(())
    })?;

    for _ in 0..respawn {
        store.add(bounce_particle(rng))?;
    }
    Ok(())
}
