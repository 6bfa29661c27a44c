//! Configuration for flood-count analysis.
//!
//! Configuration is loaded with precedence: Env vars > Config file > Defaults
//!
//! # Example config file (floodmap.toml)
//! ```toml
//! entity_kind = "element"
//! variables = 2
//! layout = "single"
//!
//! [threshold]
//! mode = "at-least"
//! threshold = 0.5
//! connecting_threshold = 0.4
//!
//! [[outputs]]
//! name = "grains"
//! mode = "unique-region"
//! target = "elemental"
//!
//! [avrami]
//! file = "avrami.csv"
//! equilibrium_fraction = 0.3
//! ```

mod defaults;

pub use defaults::*;

use crate::classify::ThresholdRule;
use crate::error::ConfigError;
use crate::model::{EntityKind, MapIndex};
use crate::query::{ColoringBinding, ColoringMode, VariableKind};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// How tracked variables map onto independent maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MapLayout {
    /// One map per variable; map `m` classifies variable `m`.
    #[default]
    PerVariable,
    /// A single map shared by all variables. Features of different
    /// variables stay separate even when adjacent.
    Single,
}

/// Main configuration for a flood counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodConfig {
    /// Entity kind classified by this counter
    pub entity_kind: EntityKind,
    /// Number of field values carried by every entity
    pub variables: usize,
    /// Variable-to-map layout
    pub layout: MapLayout,
    /// Activity predicate
    pub threshold: ThresholdRule,
    /// Auxiliary coloring outputs, validated at construction
    pub outputs: Vec<ColoringOutput>,
    /// Avrami table output (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avrami: Option<AvramiConfig>,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            entity_kind: EntityKind::Node,
            variables: DEFAULT_VARIABLES,
            layout: MapLayout::PerVariable,
            threshold: ThresholdRule::default(),
            outputs: Vec::new(),
            avrami: None,
        }
    }
}

/// A named auxiliary output and its coloring strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColoringOutput {
    pub name: String,
    #[serde(default)]
    pub mode: ColoringMode,
    pub target: VariableKind,
}

/// Avrami kinetics table configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvramiConfig {
    /// Destination of the `timestep,time,log_time,avrami` table
    pub file: PathBuf,
    /// Equilibrium fraction of the second phase (required)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equilibrium_fraction: Option<f64>,
}

impl AvramiConfig {
    /// The validated equilibrium fraction.
    pub fn equilibrium(&self) -> Result<f64, ConfigError> {
        let fraction = self
            .equilibrium_fraction
            .ok_or(ConfigError::MissingEquilibriumFraction)?;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(ConfigError::InvalidEquilibriumFraction(fraction));
        }
        Ok(fraction)
    }
}

impl FloodConfig {
    /// Load configuration with precedence: Env > File > Defaults, then validate.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(FloodConfig::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split(ENV_NESTING_SEPARATOR));

        let config: FloodConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document over the defaults, without consulting the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: FloodConfig = Figment::new()
            .merge(Serialized::defaults(FloodConfig::default()))
            .merge(Toml::string(raw))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Number of independent maps produced by this layout.
    pub fn map_count(&self) -> usize {
        match self.layout {
            MapLayout::PerVariable => self.variables,
            MapLayout::Single => 1,
        }
    }

    pub fn maps(&self) -> impl Iterator<Item = MapIndex> {
        (0..self.map_count() as u32).map(MapIndex)
    }

    /// Setup-time validation. Every violation here is fatal before any pass.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.variables == 0 {
            return Err(ConfigError::InvalidLayout(
                "at least one tracked variable is required".to_string(),
            ));
        }
        self.threshold.validate()?;

        if let Some(avrami) = &self.avrami {
            avrami.equilibrium()?;
        }

        let mut names = HashSet::new();
        for output in &self.outputs {
            if !names.insert(output.name.as_str()) {
                return Err(ConfigError::DuplicateOutput(output.name.clone()));
            }
            ColoringBinding::validate(output.mode, output.target, self.entity_kind)?;
        }
        Ok(())
    }

    pub fn with_threshold(mut self, threshold: ThresholdRule) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_entity_kind(mut self, kind: EntityKind) -> Self {
        self.entity_kind = kind;
        self
    }

    pub fn with_variables(mut self, variables: usize, layout: MapLayout) -> Self {
        self.variables = variables;
        self.layout = layout;
        self
    }

    pub fn with_output(mut self, name: &str, mode: ColoringMode, target: VariableKind) -> Self {
        self.outputs.push(ColoringOutput {
            name: name.to_string(),
            mode,
            target,
        });
        self
    }

    pub fn with_avrami(mut self, file: impl Into<PathBuf>, equilibrium_fraction: Option<f64>) -> Self {
        self.avrami = Some(AvramiConfig {
            file: file.into(),
            equilibrium_fraction,
        });
        self
    }
}
