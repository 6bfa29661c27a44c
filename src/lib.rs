//! # Floodmap
//!
//! Distributed feature flood counting: connected-component analysis of a
//! thresholded field over a domain-decomposed mesh.
//!
//! A pass classifies every entity on every partition, labels local
//! components, reconciles labels across partition boundaries in synchronized
//! rounds, and folds the result into a registry of regions whose ids and
//! statistics do not depend on how the mesh was split. Queries always read
//! the last pass that completed; a failed pass publishes nothing.
//!
//! ```no_run
//! use floodmap_rs::{FloodConfig, FloodCounter, PassInputs};
//! use floodmap_rs::mesh::{Assignment, GlobalMesh};
//! use floodmap_rs::model::EntityKind;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mesh = GlobalMesh::new(EntityKind::Node);
//! let counter = FloodCounter::new(FloodConfig::default())?;
//! let views = mesh.decompose(4, Assignment::Blocks)?;
//! let report = counter.execute(&views, PassInputs::new(mesh.total_volume()))?;
//! println!("{} regions", report.region_count);
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod config;
pub mod dsu;
pub mod error;
pub mod fabric;
pub mod mesh;
pub mod metrics;
pub mod model;
pub mod partitioned;
pub mod query;
pub mod reconcile;
pub mod registry;
pub mod scan;
pub mod test_support;

pub use classify::{ThresholdRule, UndefinedField};
pub use config::{FloodConfig, MapLayout};
pub use error::{ConfigError, FloodError, Result, UndefinedValue};
pub use model::{Entity, EntityId, EntityKind, MapIndex, PartitionId, RegionId};
pub use query::{
    ColoringBinding, ColoringMode, FeatureQuery, FeatureSnapshot, RegionSelector, RegionStat,
    VariableKind,
};

use metrics::{AggregateMetrics, AvramiLog};
use mesh::PartitionMesh;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};

/// Scalar inputs of one pass supplied by the host simulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassInputs {
    pub mesh_volume: f64,
    pub timestep: u64,
    pub time: f64,
}

impl PassInputs {
    pub fn new(mesh_volume: f64) -> Self {
        Self {
            mesh_volume,
            timestep: 0,
            time: 0.0,
        }
    }

    pub fn at(mut self, timestep: u64, time: f64) -> Self {
        self.timestep = timestep;
        self.time = time;
        self
    }
}

/// Summary of a completed pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub timestep: u64,
    pub region_count: usize,
    /// Reconciliation rounds, including the final quiet one.
    pub rounds: u32,
    pub merges: usize,
    /// Field values that were NaN or infinite and classified inactive.
    pub undefined_values: Vec<UndefinedField>,
    pub volume_fraction: f64,
    pub avrami: Option<std::result::Result<f64, UndefinedValue>>,
}

/// Main API for feature flood counting.
pub struct FloodCounter {
    config: FloodConfig,
    bindings: BTreeMap<String, ColoringBinding>,
    equilibrium: Option<f64>,
    snapshot: RwLock<Option<Arc<FeatureSnapshot>>>,
    avrami_log: Mutex<Option<AvramiLog>>,
}

impl FloodCounter {
    /// Validate `config` and bind its configured outputs.
    pub fn new(config: FloodConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;

        let mut bindings = BTreeMap::new();
        for output in &config.outputs {
            let binding = ColoringBinding::bind(output.mode, output.target, config.entity_kind)?;
            bindings.insert(output.name.clone(), binding);
        }

        let (equilibrium, avrami_log) = match &config.avrami {
            Some(avrami) => (Some(avrami.equilibrium()?), Some(AvramiLog::new(&avrami.file))),
            None => (None, None),
        };

        Ok(Self {
            config,
            bindings,
            equilibrium,
            snapshot: RwLock::new(None),
            avrami_log: Mutex::new(avrami_log),
        })
    }

    pub fn config(&self) -> &FloodConfig {
        &self.config
    }

    /// Validate an ad-hoc coloring request against this counter's detection kind.
    pub fn bind_coloring(
        &self,
        mode: ColoringMode,
        target: VariableKind,
    ) -> std::result::Result<ColoringBinding, ConfigError> {
        ColoringBinding::bind(mode, target, self.config.entity_kind)
    }

    /// Binding of a configured output.
    pub fn binding(&self, name: &str) -> Option<ColoringBinding> {
        self.bindings.get(name).copied()
    }

    /// Run one analysis pass and publish it on success.
    ///
    /// On failure the previously published snapshot stays in place.
    #[instrument(skip_all, fields(timestep = inputs.timestep))]
    pub fn execute(&self, partitions: &[PartitionMesh], inputs: PassInputs) -> Result<PassReport> {
        let output = partitioned::run_pass(&self.config, partitions)?;
        let metrics = AggregateMetrics::compute(&output.registry, inputs.mesh_volume, self.equilibrium)?;

        if let (Some(log), Some(avrami)) = (self.avrami_log.lock().as_mut(), metrics.avrami) {
            log.record(inputs.timestep, inputs.time, avrami)?;
        }

        let report = PassReport {
            timestep: inputs.timestep,
            region_count: output.registry.region_count(),
            rounds: output.rounds,
            merges: output.merges,
            undefined_values: output.undefined,
            volume_fraction: metrics.volume_fraction,
            avrami: metrics.avrami,
        };

        *self.snapshot.write() = Some(Arc::new(FeatureSnapshot {
            registry: output.registry,
            metrics,
            timestep: inputs.timestep,
            time: inputs.time,
        }));
        info!(
            regions = report.region_count,
            volume_fraction = report.volume_fraction,
            "pass published"
        );
        Ok(report)
    }

    /// Read handle on the last published pass.
    pub fn query(&self) -> Result<FeatureQuery> {
        self.snapshot
            .read()
            .clone()
            .map(FeatureQuery::new)
            .ok_or(FloodError::NotFinalized)
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshot.read().is_some()
    }
}
