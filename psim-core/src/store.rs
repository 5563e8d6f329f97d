//! Struct-of-arrays particle storage.
//!
//! Every attribute lives in its own column and all columns always have the
//! same length. Particles are addressed through [`Handle`]s, which go
//! through an indirection table so they survive the swap-with-last
//! compaction used on removal. Raw slot indices do not.
//!
//! Removal is deferred: [`ParticleStore::remove`] only queues the handle and
//! [`ParticleStore::consolidate`] compacts the columns. The simulation loop
//! consolidates after the initialize callback, after host commands and at the
//! end of every fixed step, so a callback iterating the store never sees rows
//! move under it.

use std::fmt;

use glam::{Vec2, Vec4};

use crate::config::SimulationConfig;
use crate::error::{Result, SimError};
use crate::schema::{AttributeDecl, AttributeKind, AttributeSchema, AttributeValue};

/// Stable identifier of a particle.
///
/// The index part may be recycled after removal; the generation part makes a
/// recycled handle distinct from every handle previously issued for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy)]
struct HandleEntry {
    generation: u32,
    slot: Option<u32>,
}

/// Initial attribute values for a new particle
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleInit {
    pub position: Vec2,
    pub velocity: Vec2,
    pub force: Vec2,
    pub size: f32,
    pub color: Vec4,
    /// `None` uses the default mass of 1.0.
    pub mass: Option<f32>,
    pub attributes: Vec<(String, AttributeValue)>,
}

impl Default for ParticleInit {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            force: Vec2::ZERO,
            size: 1.0,
            color: Vec4::ONE,
            mass: None,
            attributes: Vec::new(),
        }
    }
}

impl ParticleInit {
    pub fn at(position: Vec2) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    pub fn with_velocity(mut self, velocity: Vec2) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_force(mut self, force: Vec2) -> Self {
        self.force = force;
        self
    }

    pub fn with_size(mut self, size: f32) -> Self {
        self.size = size;
        self
    }

    pub fn with_color(mut self, color: Vec4) -> Self {
        self.color = color;
        self
    }

    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = Some(mass);
        self
    }

    pub fn with_scalar(mut self, name: impl Into<String>, value: f32) -> Self {
        self.attributes.push((name.into(), AttributeValue::Scalar(value)));
        self
    }

    pub fn with_vector(mut self, name: impl Into<String>, value: Vec2) -> Self {
        self.attributes.push((name.into(), AttributeValue::Vector(value)));
        self
    }
}

#[derive(Debug, Clone)]
enum Column {
    Scalar(Vec<f32>),
    Vector(Vec<Vec2>),
}

impl Column {
    fn for_kind(kind: AttributeKind, capacity: usize) -> Self {
        match kind {
            AttributeKind::Scalar => Column::Scalar(Vec::with_capacity(capacity)),
            AttributeKind::Vector => Column::Vector(Vec::with_capacity(capacity)),
        }
    }

    fn len(&self) -> usize {
        match self {
            Column::Scalar(values) => values.len(),
            Column::Vector(values) => values.len(),
        }
    }

    fn try_reserve(&mut self, additional: usize) -> Result<()> {
        match self {
            Column::Scalar(values) => values.try_reserve(additional)?,
            Column::Vector(values) => values.try_reserve(additional)?,
        }
        Ok(())
    }

    fn push(&mut self, value: AttributeValue) {
        match (self, value) {
            (Column::Scalar(values), AttributeValue::Scalar(v)) => values.push(v),
            (Column::Vector(values), AttributeValue::Vector(v)) => values.push(v),
            // Values are resolved against the schema before reaching here.
            _ => unreachable!("attribute value does not match its column"),
        }
    }

    fn swap_remove(&mut self, slot: usize) {
        match self {
            Column::Scalar(values) => {
                values.swap_remove(slot);
            }
            Column::Vector(values) => {
                values.swap_remove(slot);
            }
        }
    }
}

/// Particle found by [`ParticleStore::neighbours`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbour {
    pub handle: Handle,
    pub squared_distance: f32,
}

impl Neighbour {
    pub fn distance(&self) -> f32 {
        self.squared_distance.sqrt()
    }
}

#[derive(Debug, Clone)]
pub struct ParticleStore {
    schema: AttributeSchema,

    positions: Vec<Vec2>,
    velocities: Vec<Vec2>,
    forces: Vec<Vec2>,
    // Force written outside presolve, integrated on the next step.
    carried_forces: Vec<Vec2>,
    sizes: Vec<f32>,
    colors: Vec<Vec4>,
    masses: Option<Vec<f32>>,
    extras: Vec<Column>,
    owners: Vec<Handle>,

    uniform_mass: f32,
    entries: Vec<HandleEntry>,
    free_entries: Vec<u32>,
    pending_removals: Vec<Handle>,
}

impl Default for ParticleStore {
    fn default() -> Self {
        Self::new(AttributeSchema::new())
    }
}

impl ParticleStore {
    /// Empty store with a per-particle mass column and no preallocation.
    pub fn new(schema: AttributeSchema) -> Self {
        let extras = schema
            .attributes()
            .iter()
            .map(|decl| Column::for_kind(decl.kind(), 0))
            .collect();

        Self {
            schema,
            positions: Vec::new(),
            velocities: Vec::new(),
            forces: Vec::new(),
            carried_forces: Vec::new(),
            sizes: Vec::new(),
            colors: Vec::new(),
            masses: Some(Vec::new()),
            extras,
            owners: Vec::new(),
            uniform_mass: 1.0,
            entries: Vec::new(),
            free_entries: Vec::new(),
            pending_removals: Vec::new(),
        }
    }

    pub fn from_config(schema: AttributeSchema, config: &SimulationConfig) -> Result<Self> {
        let mut store = Self::new(schema);
        store.uniform_mass = config.uniform_mass;
        if !config.mass_attribute_enabled {
            store.masses = None;
        }
        store.reserve(config.initial_capacity)?;
        Ok(store)
    }

    pub fn schema(&self) -> &AttributeSchema {
        &self.schema
    }

    /// Add an extra attribute column. Only allowed while the store is empty.
    pub fn declare_attribute(&mut self, decl: AttributeDecl) -> Result<()> {
        if !self.is_empty() {
            return Err(SimError::schema(format!(
                "cannot declare attribute '{}' once particles exist",
                decl.name
            )));
        }
        let kind = decl.kind();
        self.schema.declare(decl)?;
        self.extras.push(Column::for_kind(kind, self.positions.capacity()));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.positions.capacity()
    }

    pub fn has_mass_column(&self) -> bool {
        self.masses.is_some()
    }

    pub fn uniform_mass(&self) -> f32 {
        self.uniform_mass
    }

    /// Make room for `additional` more particles in every column.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        self.positions.try_reserve(additional)?;
        self.velocities.try_reserve(additional)?;
        self.forces.try_reserve(additional)?;
        self.carried_forces.try_reserve(additional)?;
        self.sizes.try_reserve(additional)?;
        self.colors.try_reserve(additional)?;
        if let Some(masses) = &mut self.masses {
            masses.try_reserve(additional)?;
        }
        for column in &mut self.extras {
            column.try_reserve(additional)?;
        }
        self.owners.try_reserve(additional)?;
        Ok(())
    }

    pub fn add(&mut self, init: ParticleInit) -> Result<Handle> {
        let extras = self.validate_init(&init)?;
        self.reserve(1)?;
        Ok(self.push_row(&init, extras))
    }

    /// Add `count` copies of `init`, returning the handles in creation order.
    pub fn add_many(&mut self, count: usize, init: ParticleInit) -> Result<Vec<Handle>> {
        let extras = self.validate_init(&init)?;
        self.reserve(count)?;
        let mut handles = Vec::new();
        handles.try_reserve(count)?;
        for _ in 0..count {
            handles.push(self.push_row(&init, extras.clone()));
        }
        Ok(handles)
    }

    fn validate_init(&self, init: &ParticleInit) -> Result<Vec<AttributeValue>> {
        check_size(init.size)?;
        if let Some(mass) = init.mass {
            if self.masses.is_none() {
                return Err(SimError::schema(
                    "per-particle mass is disabled for this simulation",
                ));
            }
            check_mass(mass)?;
        }
        self.schema.resolve(&init.attributes)
    }

    fn push_row(&mut self, init: &ParticleInit, extras: Vec<AttributeValue>) -> Handle {
        let slot = self.owners.len() as u32;
        let handle = match self.free_entries.pop() {
            Some(index) => {
                let entry = &mut self.entries[index as usize];
                entry.slot = Some(slot);
                Handle {
                    index,
                    generation: entry.generation,
                }
            }
            None => {
                let index = self.entries.len() as u32;
                self.entries.push(HandleEntry {
                    generation: 0,
                    slot: Some(slot),
                });
                Handle {
                    index,
                    generation: 0,
                }
            }
        };

        self.positions.push(init.position);
        self.velocities.push(init.velocity);
        self.forces.push(init.force);
        self.carried_forces.push(Vec2::ZERO);
        self.sizes.push(init.size);
        self.colors.push(init.color);
        if let Some(masses) = &mut self.masses {
            masses.push(init.mass.unwrap_or(1.0));
        }
        for (column, value) in self.extras.iter_mut().zip(extras) {
            column.push(value);
        }
        self.owners.push(handle);
        handle
    }

    /// Queue a particle for removal at the next consolidation.
    ///
    /// The particle stays readable through its handle until then. Removing a
    /// particle that is already queued is a no-op.
    pub fn remove(&mut self, handle: Handle) -> Result<()> {
        self.slot_of(handle)?;
        if !self.pending_removals.contains(&handle) {
            self.pending_removals.push(handle);
        }
        Ok(())
    }

    pub fn is_pending_removal(&self, handle: Handle) -> bool {
        self.pending_removals.contains(&handle)
    }

    pub fn pending_removals(&self) -> usize {
        self.pending_removals.len()
    }

    /// Apply every queued removal, returning how many particles were removed.
    ///
    /// Invalidates slot indices held elsewhere; handles stay valid.
    pub fn consolidate(&mut self) -> usize {
        let pending = std::mem::take(&mut self.pending_removals);
        let mut removed = 0;
        for handle in pending {
            if let Ok(slot) = self.slot_of(handle) {
                self.swap_remove_slot(slot);
                removed += 1;
            }
        }
        removed
    }

    fn swap_remove_slot(&mut self, slot: usize) {
        let removed = self.owners.swap_remove(slot);
        self.positions.swap_remove(slot);
        self.velocities.swap_remove(slot);
        self.forces.swap_remove(slot);
        self.carried_forces.swap_remove(slot);
        self.sizes.swap_remove(slot);
        self.colors.swap_remove(slot);
        if let Some(masses) = &mut self.masses {
            masses.swap_remove(slot);
        }
        for column in &mut self.extras {
            column.swap_remove(slot);
        }

        let entry = &mut self.entries[removed.index as usize];
        entry.slot = None;
        entry.generation = entry.generation.wrapping_add(1);
        self.free_entries.push(removed.index);

        if let Some(moved) = self.owners.get(slot) {
            self.entries[moved.index as usize].slot = Some(slot as u32);
        }
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.slot_of(handle).is_ok()
    }

    /// Current storage slot of a particle.
    pub fn slot_of(&self, handle: Handle) -> Result<usize> {
        self.entries
            .get(handle.index as usize)
            .filter(|entry| entry.generation == handle.generation)
            .and_then(|entry| entry.slot)
            .map(|slot| slot as usize)
            .ok_or(SimError::InvalidHandle(handle))
    }

    pub fn handle_at(&self, slot: usize) -> Option<Handle> {
        self.owners.get(slot).copied()
    }

    /// Live handles in slot order.
    pub fn handles(&self) -> &[Handle] {
        &self.owners
    }

    pub fn get(&self, handle: Handle) -> Result<ParticleRef<'_>> {
        let slot = self.slot_of(handle)?;
        Ok(ParticleRef { store: self, slot })
    }

    pub fn get_mut(&mut self, handle: Handle) -> Result<ParticleMut<'_>> {
        let slot = self.slot_of(handle)?;
        Ok(ParticleMut { store: self, slot })
    }

    /// Visit every live particle in slot order.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(ParticleRef<'_>),
    {
        for slot in 0..self.len() {
            f(ParticleRef { store: self, slot });
        }
    }

    /// Visit every live particle mutably in slot order.
    ///
    /// Slot order changes after removals and must not carry meaning.
    pub fn for_each_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(ParticleMut<'_>),
    {
        for slot in 0..self.len() {
            f(ParticleMut { store: self, slot });
        }
    }

    /// Like [`for_each_mut`](Self::for_each_mut), stopping at the first error.
    pub fn try_for_each_mut<E, F>(&mut self, mut f: F) -> std::result::Result<(), E>
    where
        F: FnMut(ParticleMut<'_>) -> std::result::Result<(), E>,
    {
        for slot in 0..self.len() {
            f(ParticleMut { store: self, slot })?;
        }
        Ok(())
    }

    pub fn positions(&self) -> &[Vec2] {
        &self.positions
    }

    pub fn positions_mut(&mut self) -> &mut [Vec2] {
        &mut self.positions
    }

    pub fn velocities(&self) -> &[Vec2] {
        &self.velocities
    }

    pub fn velocities_mut(&mut self) -> &mut [Vec2] {
        &mut self.velocities
    }

    pub fn forces(&self) -> &[Vec2] {
        &self.forces
    }

    pub fn forces_mut(&mut self) -> &mut [Vec2] {
        &mut self.forces
    }

    pub fn sizes(&self) -> &[f32] {
        &self.sizes
    }

    pub fn colors(&self) -> &[Vec4] {
        &self.colors
    }

    pub fn colors_mut(&mut self) -> &mut [Vec4] {
        &mut self.colors
    }

    /// `None` when the per-particle mass column is disabled.
    pub fn masses(&self) -> Option<&[f32]> {
        self.masses.as_deref()
    }

    pub fn scalar_column(&self, name: &str) -> Result<&[f32]> {
        let idx = self.schema.lookup(name, AttributeKind::Scalar)?;
        match &self.extras[idx] {
            Column::Scalar(values) => Ok(values),
            Column::Vector(_) => Err(kind_mismatch(name)),
        }
    }

    pub fn scalar_column_mut(&mut self, name: &str) -> Result<&mut [f32]> {
        let idx = self.schema.lookup(name, AttributeKind::Scalar)?;
        match &mut self.extras[idx] {
            Column::Scalar(values) => Ok(values),
            Column::Vector(_) => Err(kind_mismatch(name)),
        }
    }

    pub fn vector_column(&self, name: &str) -> Result<&[Vec2]> {
        let idx = self.schema.lookup(name, AttributeKind::Vector)?;
        match &self.extras[idx] {
            Column::Vector(values) => Ok(values),
            Column::Scalar(_) => Err(kind_mismatch(name)),
        }
    }

    pub fn vector_column_mut(&mut self, name: &str) -> Result<&mut [Vec2]> {
        let idx = self.schema.lookup(name, AttributeKind::Vector)?;
        match &mut self.extras[idx] {
            Column::Vector(values) => Ok(values),
            Column::Scalar(_) => Err(kind_mismatch(name)),
        }
    }

    /// Length of every column, built-in columns first.
    pub fn column_lengths(&self) -> Vec<usize> {
        let mut lengths = vec![
            self.owners.len(),
            self.positions.len(),
            self.velocities.len(),
            self.forces.len(),
            self.carried_forces.len(),
            self.sizes.len(),
            self.colors.len(),
        ];
        if let Some(masses) = &self.masses {
            lengths.push(masses.len());
        }
        lengths.extend(self.extras.iter().map(Column::len));
        lengths
    }

    /// Particles within `radius` of `point`, at most `count` of them.
    ///
    /// When fewer than all matches are requested the nearest ones are kept.
    /// `sorted` orders the result by ascending distance; otherwise matches
    /// come back in slot order.
    pub fn neighbours(
        &self,
        point: Vec2,
        count: Option<usize>,
        radius: Option<f32>,
        sorted: bool,
    ) -> Vec<Neighbour> {
        let limit = count.unwrap_or(usize::MAX);
        let max_squared = match radius {
            Some(r) if r < 0.0 => return Vec::new(),
            Some(r) => r * r,
            None => f32::INFINITY,
        };
        if limit == 0 {
            return Vec::new();
        }

        let mut found: Vec<Neighbour> = self
            .positions
            .iter()
            .zip(&self.owners)
            .filter_map(|(position, handle)| {
                let squared_distance = position.distance_squared(point);
                (squared_distance <= max_squared).then_some(Neighbour {
                    handle: *handle,
                    squared_distance,
                })
            })
            .collect();

        if found.len() > limit {
            found.sort_by(|a, b| a.squared_distance.total_cmp(&b.squared_distance));
            found.truncate(limit);
            if !sorted {
                let order = |n: &Neighbour| self.slot_of(n.handle).unwrap_or(usize::MAX);
                found.sort_by_key(order);
            }
        } else if sorted {
            found.sort_by(|a, b| a.squared_distance.total_cmp(&b.squared_distance));
        }
        found
    }

    /// Move forces accumulated since the last step out of the way so the
    /// accumulator starts the step at zero.
    pub(crate) fn begin_step(&mut self) {
        std::mem::swap(&mut self.forces, &mut self.carried_forces);
        self.forces.fill(Vec2::ZERO);
    }

    /// Semi-implicit Euler update over all particles.
    ///
    /// Both force columns are cleared afterwards; only forces written after
    /// this point carry into the next step.
    pub(crate) fn integrate(&mut self, dt: f32) {
        let uniform_inv_mass = 1.0 / self.uniform_mass;
        for slot in 0..self.positions.len() {
            let inv_mass = match &self.masses {
                Some(masses) => 1.0 / masses[slot],
                None => uniform_inv_mass,
            };
            let force = self.forces[slot] + self.carried_forces[slot];
            self.velocities[slot] += force * inv_mass * dt;
            self.positions[slot] += self.velocities[slot] * dt;
        }
        self.forces.fill(Vec2::ZERO);
        self.carried_forces.fill(Vec2::ZERO);
    }
}

fn kind_mismatch(name: &str) -> SimError {
    SimError::schema(format!("attribute '{}' has the wrong kind", name))
}

fn check_size(size: f32) -> Result<()> {
    if size.is_finite() && size > 0.0 {
        Ok(())
    } else {
        Err(SimError::attribute("size", format!("must be positive, got {}", size)))
    }
}

fn check_mass(mass: f32) -> Result<()> {
    if mass.is_finite() && mass > 0.0 {
        Ok(())
    } else {
        Err(SimError::attribute("mass", format!("must be positive, got {}", mass)))
    }
}

macro_rules! particle_getters {
    () => {
        pub fn slot(&self) -> usize {
            self.slot
        }

        pub fn handle(&self) -> Handle {
            self.store.owners[self.slot]
        }

        pub fn position(&self) -> Vec2 {
            self.store.positions[self.slot]
        }

        pub fn velocity(&self) -> Vec2 {
            self.store.velocities[self.slot]
        }

        /// Force accumulated so far in the current step.
        pub fn force(&self) -> Vec2 {
            self.store.forces[self.slot]
        }

        pub fn size(&self) -> f32 {
            self.store.sizes[self.slot]
        }

        pub fn color(&self) -> Vec4 {
            self.store.colors[self.slot]
        }

        pub fn mass(&self) -> f32 {
            match &self.store.masses {
                Some(masses) => masses[self.slot],
                None => self.store.uniform_mass,
            }
        }

        pub fn scalar(&self, name: &str) -> Result<f32> {
            Ok(self.store.scalar_column(name)?[self.slot])
        }

        pub fn vector(&self, name: &str) -> Result<Vec2> {
            Ok(self.store.vector_column(name)?[self.slot])
        }

        pub fn is_pending_removal(&self) -> bool {
            self.store.is_pending_removal(self.handle())
        }
    };
}

/// Read-only view of one particle row
#[derive(Clone, Copy)]
pub struct ParticleRef<'a> {
    store: &'a ParticleStore,
    slot: usize,
}

impl<'a> ParticleRef<'a> {
    particle_getters!();
}

impl fmt::Debug for ParticleRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("handle", &self.handle())
            .field("position", &self.position())
            .field("velocity", &self.velocity())
            .field("size", &self.size())
            .finish()
    }
}

/// Mutable view of one particle row
pub struct ParticleMut<'a> {
    store: &'a mut ParticleStore,
    slot: usize,
}

impl<'a> ParticleMut<'a> {
    particle_getters!();

    pub fn position_mut(&mut self) -> &mut Vec2 {
        &mut self.store.positions[self.slot]
    }

    pub fn velocity_mut(&mut self) -> &mut Vec2 {
        &mut self.store.velocities[self.slot]
    }

    pub fn force_mut(&mut self) -> &mut Vec2 {
        &mut self.store.forces[self.slot]
    }

    pub fn set_position(&mut self, position: Vec2) {
        self.store.positions[self.slot] = position;
    }

    pub fn set_velocity(&mut self, velocity: Vec2) {
        self.store.velocities[self.slot] = velocity;
    }

    pub fn add_force(&mut self, force: Vec2) {
        self.store.forces[self.slot] += force;
    }

    pub fn set_color(&mut self, color: Vec4) {
        self.store.colors[self.slot] = color;
    }

    pub fn set_size(&mut self, size: f32) -> Result<()> {
        check_size(size)?;
        self.store.sizes[self.slot] = size;
        Ok(())
    }

    pub fn set_mass(&mut self, mass: f32) -> Result<()> {
        check_mass(mass)?;
        match &mut self.store.masses {
            Some(masses) => {
                masses[self.slot] = mass;
                Ok(())
            }
            None => Err(SimError::schema(
                "per-particle mass is disabled for this simulation",
            )),
        }
    }

    pub fn set_scalar(&mut self, name: &str, value: f32) -> Result<()> {
        let slot = self.slot;
        self.store.scalar_column_mut(name)?[slot] = value;
        Ok(())
    }

    pub fn set_vector(&mut self, name: &str, value: Vec2) -> Result<()> {
        let slot = self.slot;
        self.store.vector_column_mut(name)?[slot] = value;
        Ok(())
    }

    /// Queue this particle for removal at the next consolidation.
    pub fn despawn(&mut self) {
        let handle = self.handle();
        if !self.store.pending_removals.contains(&handle) {
            self.store.pending_removals.push(handle);
        }
    }
}
