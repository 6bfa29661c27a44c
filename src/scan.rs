//! # Local Flood Scanner
//!
//! Connected-component labeling of one partition's active entities.
//! Traversal is an explicit-queue BFS so stack depth stays bounded on large
//! meshes. Labels are dense (`0..n`) and meaningful only within the partition.

use crate::classify::ActiveMask;
use crate::mesh::PartitionMesh;
use crate::model::{EntityId, LocalLabel, MapIndex};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

/// One partition-local connected component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalComponent {
    pub label: LocalLabel,
    /// Coloring variable shared by every member.
    pub variable: u32,
    /// Members in ascending id order (owned and ghost).
    pub members: Vec<EntityId>,
    pub min_entity: EntityId,
    /// True when any member reached the seed threshold.
    pub seeded: bool,
}

/// Provisional labels of one map on one partition.
#[derive(Debug, Clone, Default)]
pub struct LocalLabels {
    pub map: MapIndex,
    components: Vec<LocalComponent>,
    by_entity: FxHashMap<EntityId, LocalLabel>,
}

impl LocalLabels {
    pub fn label_of(&self, entity: EntityId) -> Option<LocalLabel> {
        self.by_entity.get(&entity).copied()
    }

    pub fn component(&self, label: LocalLabel) -> &LocalComponent {
        &self.components[label.0 as usize]
    }

    pub fn components(&self) -> &[LocalComponent] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

/// Label every active entity of `mask` reachable through `mesh` adjacency.
///
/// Two active neighbours join only when their coloring variables match.
pub fn flood(mesh: &PartitionMesh, mask: &ActiveMask, map: MapIndex) -> LocalLabels {
    let mut labels = LocalLabels {
        map,
        components: Vec::new(),
        by_entity: FxHashMap::default(),
    };
    let mut queue = VecDeque::new();

    for start in mask.sorted_ids() {
        if labels.by_entity.contains_key(&start) {
            continue;
        }
        let Some(start_entry) = mask.get(start) else {
            continue;
        };

        let label = LocalLabel(labels.components.len() as u32);
        let mut members = Vec::new();
        let mut seeded = false;

        labels.by_entity.insert(start, label);
        queue.push_back(start);

        while let Some(current) = queue.pop_front() {
            members.push(current);
            if let Some(entry) = mask.get(current) {
                seeded |= entry.seed;
            }
            for &neighbor in mesh.neighbors(current) {
                if labels.by_entity.contains_key(&neighbor) {
                    continue;
                }
                match mask.get(neighbor) {
                    Some(entry) if entry.variable == start_entry.variable => {
                        labels.by_entity.insert(neighbor, label);
                        queue.push_back(neighbor);
                    }
                    _ => {}
                }
            }
        }

        members.sort_unstable();
        labels.components.push(LocalComponent {
            label,
            variable: start_entry.variable,
            min_entity: members[0],
            members,
            seeded,
        });
    }

    labels
}
