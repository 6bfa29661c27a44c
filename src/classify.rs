//! # Entity Classifier
//!
//! Applies the configured threshold rule to every entity a partition holds
//! (owned and ghost alike) and produces one active mask per map.
//!
//! Comparisons are inclusive at the threshold and depend only on the entity's
//! own values, so an entity shared by several partitions is classified the
//! same way on each of them.

use crate::config::{FloodConfig, MapLayout, DEFAULT_THRESHOLD};
use crate::error::{ConfigError, FloodError, Result};
use crate::mesh::PartitionMesh;
use crate::model::{EntityId, MapIndex};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Activity predicate on a single field value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum ThresholdRule {
    /// Seed when `value >= threshold`; connect when `value >= connecting_threshold`.
    AtLeast {
        threshold: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        connecting_threshold: Option<f64>,
    },
    /// Active (and seed) when `lower <= value <= upper`.
    Band { lower: f64, upper: f64 },
}

impl Default for ThresholdRule {
    fn default() -> Self {
        ThresholdRule::AtLeast {
            threshold: DEFAULT_THRESHOLD,
            connecting_threshold: None,
        }
    }
}

/// Classification of one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// NaN or infinite input.
    Undefined,
    Inactive,
    /// Joins a feature but cannot start one.
    Connecting,
    Seed,
}

impl Level {
    pub fn is_active(self) -> bool {
        matches!(self, Level::Connecting | Level::Seed)
    }
}

impl ThresholdRule {
    pub fn at_least(threshold: f64) -> Self {
        ThresholdRule::AtLeast {
            threshold,
            connecting_threshold: None,
        }
    }

    pub fn with_connecting(threshold: f64, connecting_threshold: f64) -> Self {
        ThresholdRule::AtLeast {
            threshold,
            connecting_threshold: Some(connecting_threshold),
        }
    }

    pub fn band(lower: f64, upper: f64) -> Self {
        ThresholdRule::Band { lower, upper }
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        match *self {
            ThresholdRule::AtLeast {
                threshold,
                connecting_threshold,
            } => {
                if !threshold.is_finite() {
                    return Err(ConfigError::InvalidThreshold(format!(
                        "threshold {threshold} is not finite"
                    )));
                }
                if let Some(connecting) = connecting_threshold {
                    if !connecting.is_finite() {
                        return Err(ConfigError::InvalidThreshold(format!(
                            "connecting threshold {connecting} is not finite"
                        )));
                    }
                    if connecting > threshold {
                        return Err(ConfigError::InvalidThreshold(format!(
                            "connecting threshold {connecting} exceeds threshold {threshold}"
                        )));
                    }
                }
                Ok(())
            }
            ThresholdRule::Band { lower, upper } => {
                if !lower.is_finite() || !upper.is_finite() {
                    return Err(ConfigError::InvalidThreshold(format!(
                        "band [{lower}, {upper}] is not finite"
                    )));
                }
                if lower > upper {
                    return Err(ConfigError::InvalidThreshold(format!(
                        "band lower bound {lower} exceeds upper bound {upper}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Classify one value. Both bounds are inclusive.
    #[inline]
    pub fn level(&self, value: f64) -> Level {
        if !value.is_finite() {
            return Level::Undefined;
        }
        match *self {
            ThresholdRule::AtLeast {
                threshold,
                connecting_threshold,
            } => {
                if value >= threshold {
                    Level::Seed
                } else if value >= connecting_threshold.unwrap_or(threshold) {
                    Level::Connecting
                } else {
                    Level::Inactive
                }
            }
            ThresholdRule::Band { lower, upper } => {
                if value >= lower && value <= upper {
                    Level::Seed
                } else {
                    Level::Inactive
                }
            }
        }
    }
}

/// An entity that passed classification for one map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveEntry {
    /// Variable responsible for activity (the coloring variable).
    pub variable: u32,
    pub seed: bool,
}

/// Active entities of one map. Absent entities are inactive.
#[derive(Debug, Clone, Default)]
pub struct ActiveMask {
    entries: FxHashMap<EntityId, ActiveEntry>,
}

impl ActiveMask {
    pub fn get(&self, entity: EntityId) -> Option<ActiveEntry> {
        self.entries.get(&entity).copied()
    }

    pub fn is_active(&self, entity: EntityId) -> bool {
        self.entries.contains_key(&entity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Active entity ids in ascending order.
    pub fn sorted_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn insert(&mut self, entity: EntityId, entry: ActiveEntry) {
        self.entries.insert(entity, entry);
    }
}

/// A NaN/Inf field value encountered during classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UndefinedField {
    pub entity: EntityId,
    pub variable: u32,
}

/// Output of classifying one partition.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub masks: Vec<ActiveMask>,
    /// Undefined values on entities this partition owns, ascending.
    pub undefined: Vec<UndefinedField>,
}

impl Classification {
    pub fn mask(&self, map: MapIndex) -> &ActiveMask {
        &self.masks[map.index()]
    }
}

/// Classify every entity held by `mesh` for every map of `config`.
///
/// Undefined values make the affected variable inactive; they are reported
/// only by the owning partition so each one is surfaced exactly once.
pub fn classify(mesh: &PartitionMesh, config: &FloodConfig) -> Result<Classification> {
    let map_count = config.map_count();
    let mut masks = vec![ActiveMask::default(); map_count];
    let mut undefined = Vec::new();

    for entity in mesh.entities() {
        if entity.values.len() != config.variables {
            return Err(FloodError::MalformedInput {
                partition: mesh.partition(),
                message: format!(
                    "entity {} carries {} values, expected {}",
                    entity.id,
                    entity.values.len(),
                    config.variables
                ),
            });
        }

        let owned = entity.is_owned_by(mesh.partition());
        let levels = entity
            .values
            .iter()
            .map(|&value| config.threshold.level(value));

        match config.layout {
            MapLayout::PerVariable => {
                for (variable, level) in levels.enumerate() {
                    if level == Level::Undefined && owned {
                        undefined.push(UndefinedField {
                            entity: entity.id,
                            variable: variable as u32,
                        });
                    }
                    if level.is_active() {
                        masks[variable].insert(
                            entity.id,
                            ActiveEntry {
                                variable: variable as u32,
                                seed: level == Level::Seed,
                            },
                        );
                    }
                }
            }
            MapLayout::Single => {
                let mut chosen = None;
                for (variable, level) in levels.enumerate() {
                    if level == Level::Undefined && owned {
                        undefined.push(UndefinedField {
                            entity: entity.id,
                            variable: variable as u32,
                        });
                    }
                    // Lowest-index active variable colors the entity.
                    if chosen.is_none() && level.is_active() {
                        chosen = Some(ActiveEntry {
                            variable: variable as u32,
                            seed: level == Level::Seed,
                        });
                    }
                }
                if let Some(entry) = chosen {
                    masks[0].insert(entity.id, entry);
                }
            }
        }
    }

    for (map, mask) in masks.iter().enumerate() {
        if mask.is_empty() {
            continue;
        }
        debug!(partition = %mesh.partition(), map, active = mask.len(), "map classified");
    }

    undefined.sort_unstable();
    if !undefined.is_empty() {
        warn!(
            partition = %mesh.partition(),
            count = undefined.len(),
            first = %undefined[0].entity,
            "undefined field values classified as inactive"
        );
    }

    Ok(Classification { masks, undefined })
}
