//! # Data Model
//!
//! Identifiers and entity records shared by every stage of an analysis pass.
//! All ids are compact `Copy` newtypes so they can key hash maps and travel
//! across the partition fabric without allocation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Globally resolvable entity identifier (node or element id).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// Mesh partition identifier. Partitions of one pass are numbered `0..n`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct PartitionId(pub u32);

impl PartitionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Selects an independent field/threshold configuration.
/// Regions under different map indices never merge.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct MapIndex(pub u32);

impl MapIndex {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for MapIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M{}", self.0)
    }
}

/// Provisional, partition-local component label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalLabel(pub u32);

impl fmt::Display for LocalLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// A provisional label qualified by the partition that issued it.
///
/// Keys from different partitions are distinct even when the raw labels
/// coincide; keys from different maps never compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelKey {
    pub map: MapIndex,
    pub partition: PartitionId,
    pub label: LocalLabel,
}

impl LabelKey {
    pub fn new(map: MapIndex, partition: PartitionId, label: LocalLabel) -> Self {
        Self {
            map,
            partition,
            label,
        }
    }
}

impl fmt::Display for LabelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.map, self.partition, self.label)
    }
}

/// Canonical region identifier: the smallest entity id among the members.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct RegionId(pub u64);

impl RegionId {
    pub fn from_min_member(entity: EntityId) -> Self {
        RegionId(entity.0)
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// Which mesh entities a detection pass classifies. One kind per pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    #[default]
    Node,
    Element,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Node => write!(f, "nodal"),
            EntityKind::Element => write!(f, "elemental"),
        }
    }
}

/// Spatial point attached to an entity (node position or element centroid).
pub type Point = [f64; 3];

/// One entity as seen by a partition, owned or ghosted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    /// Partition that owns this entity. Ghost copies carry the foreign owner.
    pub owner: PartitionId,
    /// One value per tracked variable.
    pub values: Vec<f64>,
    /// Volume (or area) weight contributed to a region, supplied by the FE layer.
    pub volume: f64,
    #[serde(default)]
    pub position: Option<Point>,
}

impl Entity {
    pub fn new(id: EntityId, owner: PartitionId, values: Vec<f64>, volume: f64) -> Self {
        Self {
            id,
            owner,
            values,
            volume,
            position: None,
        }
    }

    pub fn with_position(mut self, position: Point) -> Self {
        self.position = Some(position);
        self
    }

    pub fn is_owned_by(&self, partition: PartitionId) -> bool {
        self.owner == partition
    }
}
