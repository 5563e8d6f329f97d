use crate::error::{CallbackError, Hook, Result, SimError};
use crate::store::ParticleStore;

/// Runs once before the first step to populate the store.
pub type InitializeCallback =
    Box<dyn FnOnce(&mut ParticleStore) -> std::result::Result<(), CallbackError> + Send>;

/// Runs on every fixed step with the step duration.
pub type StepCallback =
    Box<dyn FnMut(&mut ParticleStore, f32) -> std::result::Result<(), CallbackError> + Send>;

/// Callbacks invoked around the integration of each fixed step
#[derive(Default)]
pub struct StepHooks {
    pub presolve: Option<StepCallback>,
    pub postsolve: Option<StepCallback>,
}

impl StepHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_presolve<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&mut ParticleStore, f32) -> std::result::Result<(), CallbackError> + Send + 'static,
    {
        self.presolve = Some(Box::new(callback));
        self
    }

    pub fn with_postsolve<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&mut ParticleStore, f32) -> std::result::Result<(), CallbackError> + Send + 'static,
    {
        self.postsolve = Some(Box::new(callback));
        self
    }
}

/// Step the simulation forward by dt using semi-implicit Euler integration
///
/// 1. The force accumulator is cleared. Forces written since the previous
///    step (postsolve, host edits) are carried into this step's update.
/// 2. Presolve runs and may add forces that apply immediately.
/// 3. `v += F / m * dt`, then `x += v * dt` with the updated velocity.
/// 4. Postsolve runs. Forces it adds apply on the next step.
/// 5. Queued removals are applied.
///
/// A callback error aborts the step and leaves the store as the callback
/// left it; queued removals stay queued.
pub fn step(store: &mut ParticleStore, hooks: &mut StepHooks, dt: f32) -> Result<()> {
    store.begin_step();

    if let Some(presolve) = hooks.presolve.as_mut() {
        presolve(store, dt).map_err(|e| SimError::callback(Hook::Presolve, e))?;
    }

    store.integrate(dt);

    if let Some(postsolve) = hooks.postsolve.as_mut() {
        postsolve(store, dt).map_err(|e| SimError::callback(Hook::Postsolve, e))?;
    }

    store.consolidate();
    Ok(())
}
