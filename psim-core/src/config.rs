//! Simulation configuration

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::snapshot::ParticleDisplay;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(String),

    #[error("config validation error: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// What the loop does after a callback reports an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Transition to `Stopped`.
    #[default]
    Stop,
    /// Abandon the rest of the current call and keep the loop running.
    Continue,
}

/// When snapshots are published
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishPolicy {
    /// Once per `step()` call that ran at least one fixed step.
    #[default]
    EveryCall,
    /// After every completed fixed step.
    EveryStep,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seconds of simulated time per fixed step.
    pub fixed_dt: f32,
    /// Upper bound on fixed steps run by a single `step()` call.
    pub max_steps_per_call: u32,
    /// Number of particles preallocated in every column.
    pub initial_capacity: usize,
    /// Store a per-particle mass column. When disabled every particle
    /// weighs `uniform_mass`.
    pub mass_attribute_enabled: bool,
    pub uniform_mass: f32,
    /// Drop accumulated wall time when pausing.
    pub reset_accumulator_on_pause: bool,
    pub error_policy: ErrorPolicy,
    pub publish_policy: PublishPolicy,
    pub particle_display: ParticleDisplay,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            fixed_dt: 0.02,
            max_steps_per_call: 8,
            initial_capacity: 512,
            mass_attribute_enabled: true,
            uniform_mass: 1.0,
            reset_accumulator_on_pause: true,
            error_policy: ErrorPolicy::Stop,
            publish_policy: PublishPolicy::EveryCall,
            particle_display: ParticleDisplay::Disc,
        }
    }
}

impl SimulationConfig {
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !self.fixed_dt.is_finite() || self.fixed_dt <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "fixed_dt must be a positive number of seconds, got {}",
                self.fixed_dt
            )));
        }
        if self.max_steps_per_call == 0 {
            return Err(ConfigError::Validation(
                "max_steps_per_call must be at least 1".to_string(),
            ));
        }
        if !self.uniform_mass.is_finite() || self.uniform_mass <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "uniform_mass must be positive, got {}",
                self.uniform_mass
            )));
        }
        Ok(())
    }

    pub fn with_fixed_dt(mut self, fixed_dt: f32) -> Self {
        self.fixed_dt = fixed_dt;
        self
    }

    pub fn with_max_steps_per_call(mut self, max_steps: u32) -> Self {
        self.max_steps_per_call = max_steps;
        self
    }
}
