pub mod config;
pub mod error;
pub mod integrator;
pub mod schema;
pub mod simulation;
pub mod snapshot;
pub mod store;

pub use config::{ConfigError, ErrorPolicy, PublishPolicy, SimulationConfig};
pub use error::{CallbackError, Hook, Result, SimError};
pub use integrator::{step, InitializeCallback, StepCallback, StepHooks};
pub use schema::{AttributeDecl, AttributeKind, AttributeSchema, AttributeValue};
pub use simulation::{CommandSender, LoopState, SimulationBuilder, SimulationLoop, StepReport};
pub use snapshot::{ParticleDisplay, Snapshot, SnapshotBuffer};
pub use store::{Handle, Neighbour, ParticleInit, ParticleMut, ParticleRef, ParticleStore};

// Test helpers module (public for integration tests)
// Always compiled - integration tests are separate crates and need access
pub mod tests;
