//! # Query Interface
//!
//! Read-only lookups over the last published pass. A [`FeatureQuery`] holds
//! its own reference to the snapshot, so a pass published while queries are
//! in flight never changes what those queries see.
//!
//! Coloring modes are a closed enum consumed by one lookup function; the
//! mode/target/detection combination is checked once, when a
//! [`ColoringBinding`] is created.

use crate::config::UNASSIGNED_VALUE;
use crate::error::{ConfigError, FloodError, Result, UndefinedValue};
use crate::metrics::AggregateMetrics;
use crate::model::{EntityId, EntityKind, MapIndex, RegionId};
use crate::registry::{MapRegions, Region, RegionRegistry};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// What an auxiliary output reports for each entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ColoringMode {
    /// Canonical region id of the entity's region.
    #[default]
    UniqueRegion,
    /// Variable index that colors the entity's region.
    VariableColoring,
    /// Member count of the entity's region (elemental only).
    ActiveBounds,
    /// Region id at the region's centroid element (elemental only).
    Centroid,
}

impl fmt::Display for ColoringMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColoringMode::UniqueRegion => "UNIQUE_REGION",
            ColoringMode::VariableColoring => "VARIABLE_COLORING",
            ColoringMode::ActiveBounds => "ACTIVE_BOUNDS",
            ColoringMode::Centroid => "CENTROID",
        };
        f.write_str(name)
    }
}

/// Kind of the auxiliary variable receiving the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VariableKind {
    Nodal,
    Elemental,
}

impl VariableKind {
    pub fn entity_kind(self) -> EntityKind {
        match self {
            VariableKind::Nodal => EntityKind::Node,
            VariableKind::Elemental => EntityKind::Element,
        }
    }
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableKind::Nodal => f.write_str("nodal"),
            VariableKind::Elemental => f.write_str("elemental"),
        }
    }
}

/// A coloring mode that passed setup validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColoringBinding {
    mode: ColoringMode,
    target: VariableKind,
}

impl ColoringBinding {
    /// Check that `mode` can be evaluated for a `target` output when features
    /// are detected on `detection` entities.
    pub fn validate(
        mode: ColoringMode,
        target: VariableKind,
        detection: EntityKind,
    ) -> std::result::Result<(), ConfigError> {
        let reject = |reason: &'static str| -> std::result::Result<(), ConfigError> {
            Err(ConfigError::IncompatibleColoring {
                mode,
                target,
                detection,
                reason,
            })
        };
        match mode {
            ColoringMode::UniqueRegion | ColoringMode::VariableColoring => {
                if target.entity_kind() != detection {
                    return reject("output kind must match the detected entity kind");
                }
            }
            ColoringMode::ActiveBounds | ColoringMode::Centroid => {
                if target == VariableKind::Nodal {
                    return reject("mode is only defined for elemental outputs");
                }
                if detection != EntityKind::Element {
                    return reject("mode requires elemental feature detection");
                }
            }
        }
        Ok(())
    }

    pub fn bind(
        mode: ColoringMode,
        target: VariableKind,
        detection: EntityKind,
    ) -> std::result::Result<Self, ConfigError> {
        Self::validate(mode, target, detection)?;
        Ok(Self { mode, target })
    }

    pub fn mode(&self) -> ColoringMode {
        self.mode
    }

    pub fn target(&self) -> VariableKind {
        self.target
    }
}

/// Everything a finalized pass publishes.
#[derive(Debug, Clone)]
pub struct FeatureSnapshot {
    pub registry: RegionRegistry,
    pub metrics: AggregateMetrics,
    pub timestep: u64,
    pub time: f64,
}

/// Which region an aggregate lookup refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionSelector {
    Id(MapIndex, RegionId),
    /// The region containing an entity.
    Entity(MapIndex, EntityId),
}

/// Scalar statistic of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionStat {
    Volume,
    EntityCount,
    PartitionCount,
}

/// Read handle on one published snapshot.
#[derive(Debug, Clone)]
pub struct FeatureQuery {
    snapshot: Arc<FeatureSnapshot>,
}

impl FeatureQuery {
    pub fn new(snapshot: Arc<FeatureSnapshot>) -> Self {
        Self { snapshot }
    }

    fn map(&self, map: MapIndex) -> Result<&MapRegions> {
        self.snapshot.registry.map(map)
    }

    /// Per-entity coloring value.
    ///
    /// Entities in no region yield `-1` (`0` for `ACTIVE_BOUNDS`).
    pub fn entity_value(
        &self,
        binding: &ColoringBinding,
        entity: EntityId,
        map: MapIndex,
    ) -> Result<f64> {
        let region = self.map(map)?.region_of(entity);
        let value = match (binding.mode, region) {
            (ColoringMode::ActiveBounds, None) => 0.0,
            (_, None) => UNASSIGNED_VALUE,
            (ColoringMode::UniqueRegion, Some(region)) => region.id.0 as f64,
            (ColoringMode::VariableColoring, Some(region)) => region.variable as f64,
            (ColoringMode::ActiveBounds, Some(region)) => region.entity_count() as f64,
            (ColoringMode::Centroid, Some(region)) => {
                if region.centroid_entity == entity {
                    region.id.0 as f64
                } else {
                    UNASSIGNED_VALUE
                }
            }
        };
        Ok(value)
    }

    /// Members of the entity's region; empty when the entity is in none.
    pub fn region_members(&self, entity: EntityId, map: MapIndex) -> Result<&[EntityId]> {
        Ok(self
            .map(map)?
            .region_of(entity)
            .map(|region| region.members.as_slice())
            .unwrap_or(&[]))
    }

    pub fn region(&self, map: MapIndex, id: RegionId) -> Result<&Region> {
        self.map(map)?
            .region(id)
            .ok_or(FloodError::UnknownRegion { map, region: id })
    }

    /// Regions of one map, ascending by id.
    pub fn regions(&self, map: MapIndex) -> Result<impl Iterator<Item = &Region>> {
        Ok(self.map(map)?.regions())
    }

    /// One statistic of the selected region. An entity selector whose entity
    /// is in no region yields `-1`.
    pub fn region_aggregate(&self, selector: RegionSelector, stat: RegionStat) -> Result<f64> {
        let region = match selector {
            RegionSelector::Id(map, id) => self.region(map, id)?,
            RegionSelector::Entity(map, entity) => match self.map(map)?.region_of(entity) {
                Some(region) => region,
                None => return Ok(UNASSIGNED_VALUE),
            },
        };
        Ok(match stat {
            RegionStat::Volume => region.volume,
            RegionStat::EntityCount => region.entity_count() as f64,
            RegionStat::PartitionCount => region.partitions.len() as f64,
        })
    }

    pub fn region_count(&self) -> usize {
        self.snapshot.registry.region_count()
    }

    pub fn volume_fraction(&self) -> f64 {
        self.snapshot.metrics.volume_fraction
    }

    /// `None` when Avrami analysis is not configured.
    pub fn avrami(&self) -> Option<std::result::Result<f64, UndefinedValue>> {
        self.snapshot.metrics.avrami
    }

    pub fn metrics(&self) -> &AggregateMetrics {
        &self.snapshot.metrics
    }

    pub fn timestep(&self) -> u64 {
        self.snapshot.timestep
    }

    pub fn time(&self) -> f64 {
        self.snapshot.time
    }
}
