//! # Partition Views
//!
//! A [`PartitionMesh`] is everything one worker may read during a pass: its
//! owned entities, a ghost layer of foreign entities, local adjacency, and for
//! every shared entity the set of other partitions that also hold a copy.
//!
//! [`GlobalMesh::decompose`] produces consistent views from an undivided mesh
//! with a one-entity ghost halo. It stands in for the external partitioner.
//!
//! ```text
//!        owned(P0)        |        owned(P1)
//!   a ─── b ─── c ─── [d] | [c] ─── d ─── e
//!                  ghost ─┘ └─ ghost
//! ```

use crate::error::{FloodError, Result};
use crate::model::{Entity, EntityId, EntityKind, PartitionId, Point};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHasher};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

/// One partition's read-only view of the mesh for a pass.
#[derive(Debug, Clone)]
pub struct PartitionMesh {
    partition: PartitionId,
    kind: EntityKind,
    entities: FxHashMap<EntityId, Entity>,
    adjacency: FxHashMap<EntityId, Vec<EntityId>>,
    /// Other partitions holding a copy of the entity (sorted, excludes self).
    sharers: FxHashMap<EntityId, Vec<PartitionId>>,
}

impl PartitionMesh {
    pub fn new(partition: PartitionId, kind: EntityKind) -> Self {
        Self {
            partition,
            kind,
            entities: FxHashMap::default(),
            adjacency: FxHashMap::default(),
            sharers: FxHashMap::default(),
        }
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Add an owned or ghost entity. Replaces any previous copy.
    pub fn add_entity(&mut self, entity: Entity) {
        self.entities.insert(entity.id, entity);
    }

    /// Record an undirected edge between two held entities.
    pub fn connect(&mut self, a: EntityId, b: EntityId) {
        if a == b {
            return;
        }
        let forward = self.adjacency.entry(a).or_default();
        if !forward.contains(&b) {
            forward.push(b);
        }
        let backward = self.adjacency.entry(b).or_default();
        if !backward.contains(&a) {
            backward.push(a);
        }
    }

    /// Declare that `peer` also holds a copy of `entity`.
    pub fn share(&mut self, entity: EntityId, peer: PartitionId) {
        let sharers = self.sharers.entry(entity).or_default();
        if let Err(pos) = sharers.binary_search(&peer) {
            sharers.insert(pos, peer);
        }
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn owned(&self) -> impl Iterator<Item = &Entity> {
        let partition = self.partition;
        self.entities
            .values()
            .filter(move |entity| entity.is_owned_by(partition))
    }

    /// Held entity ids in ascending order.
    pub fn sorted_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.entities.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn neighbors(&self, id: EntityId) -> &[EntityId] {
        self.adjacency.get(&id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn sharers(&self, id: EntityId) -> &[PartitionId] {
        self.sharers.get(&id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Partitions this one shares at least one entity with.
    pub fn neighbor_partitions(&self) -> BTreeSet<PartitionId> {
        self.sharers.values().flatten().copied().collect()
    }

    /// Entities this partition believes it shares with `peer`, ascending.
    pub fn shared_with(&self, peer: PartitionId) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .sharers
            .iter()
            .filter(|(_, sharers)| sharers.contains(&peer))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// `(entity, owner)` for every entity shared with `peer`, ascending.
    pub fn shared_ownership(&self, peer: PartitionId) -> Vec<(EntityId, PartitionId)> {
        self.shared_with(peer)
            .into_iter()
            .filter_map(|id| self.entities.get(&id).map(|entity| (id, entity.owner)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Local structural checks. Cross-partition agreement is verified by the
    /// reconciler's handshake, not here.
    pub fn validate(&self, expected_kind: EntityKind) -> Result<()> {
        let malformed = |message: String| FloodError::MalformedInput {
            partition: self.partition,
            message,
        };

        if self.kind != expected_kind {
            return Err(malformed(format!(
                "partition holds {} entities, counter detects {} features",
                self.kind, expected_kind
            )));
        }
        for entity in self.entities.values() {
            if !entity.volume.is_finite() || entity.volume < 0.0 {
                return Err(malformed(format!(
                    "entity {} has invalid volume {}",
                    entity.id, entity.volume
                )));
            }
            if !entity.is_owned_by(self.partition) && !self.sharers(entity.id).contains(&entity.owner)
            {
                return Err(malformed(format!(
                    "ghost {} is not shared with its owner {}",
                    entity.id, entity.owner
                )));
            }
        }
        for (id, neighbors) in &self.adjacency {
            for endpoint in std::iter::once(id).chain(neighbors.iter()) {
                if !self.entities.contains_key(endpoint) {
                    return Err(malformed(format!("edge endpoint {endpoint} is not held")));
                }
            }
        }
        for (id, sharers) in &self.sharers {
            if !self.entities.contains_key(id) {
                return Err(malformed(format!("shared entity {id} is not held")));
            }
            if sharers.contains(&self.partition) {
                return Err(malformed(format!("entity {id} lists its own partition as sharer")));
            }
        }
        Ok(())
    }
}

/// Field data of one entity in an undivided mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshEntity {
    pub id: EntityId,
    pub values: Vec<f64>,
    #[serde(default = "unit_volume")]
    pub volume: f64,
    #[serde(default)]
    pub position: Option<Point>,
}

fn unit_volume() -> f64 {
    1.0
}

/// On-disk form of a [`GlobalMesh`] (JSON in the CLI).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshFile {
    #[serde(default)]
    pub kind: EntityKind,
    pub entities: Vec<MeshEntity>,
    #[serde(default)]
    pub edges: Vec<(EntityId, EntityId)>,
}

/// Ownership rule used to split a [`GlobalMesh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Assignment {
    /// Contiguous runs of ascending ids of near-equal size.
    #[default]
    Blocks,
    /// Round-robin over ascending ids.
    Stripes,
    /// `FxHasher(id) % parts`.
    Hashed,
}

impl std::str::FromStr for Assignment {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "blocks" => Ok(Assignment::Blocks),
            "stripes" => Ok(Assignment::Stripes),
            "hashed" => Ok(Assignment::Hashed),
            other => Err(format!("unknown assignment: {other}")),
        }
    }
}

/// An undivided mesh: entities plus undirected adjacency.
#[derive(Debug, Clone, Default)]
pub struct GlobalMesh {
    kind: EntityKind,
    entities: BTreeMap<EntityId, MeshEntity>,
    adjacency: BTreeMap<EntityId, BTreeSet<EntityId>>,
}

impl GlobalMesh {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            entities: BTreeMap::new(),
            adjacency: BTreeMap::new(),
        }
    }

    pub fn from_file(file: MeshFile) -> Result<Self> {
        let mut mesh = Self::new(file.kind);
        for entity in file.entities {
            mesh.add_entity(entity);
        }
        for (a, b) in file.edges {
            mesh.connect(a, b)?;
        }
        Ok(mesh)
    }

    pub fn to_file(&self) -> MeshFile {
        let mut edges = Vec::new();
        for (a, neighbors) in &self.adjacency {
            for b in neighbors.range(*a..) {
                if a != b {
                    edges.push((*a, *b));
                }
            }
        }
        MeshFile {
            kind: self.kind,
            entities: self.entities.values().cloned().collect(),
            edges,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn add_entity(&mut self, entity: MeshEntity) {
        self.entities.insert(entity.id, entity);
    }

    pub fn connect(&mut self, a: EntityId, b: EntityId) -> Result<()> {
        for id in [a, b] {
            if !self.entities.contains_key(&id) {
                return Err(FloodError::InvalidMesh(format!(
                    "edge {a}-{b} references unknown entity {id}"
                )));
            }
        }
        if a != b {
            self.adjacency.entry(a).or_default().insert(b);
            self.adjacency.entry(b).or_default().insert(a);
        }
        Ok(())
    }

    pub fn entity(&self, id: EntityId) -> Option<&MeshEntity> {
        self.entities.get(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &MeshEntity> {
        self.entities.values()
    }

    pub fn neighbors(&self, id: EntityId) -> impl Iterator<Item = EntityId> + '_ {
        self.adjacency.get(&id).into_iter().flatten().copied()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Sum of entity volumes, in ascending id order.
    pub fn total_volume(&self) -> f64 {
        self.entities.values().map(|entity| entity.volume).sum()
    }

    /// Owner of every entity under `assignment`.
    pub fn owners(&self, parts: usize, assignment: Assignment) -> BTreeMap<EntityId, PartitionId> {
        let total = self.entities.len();
        self.entities
            .keys()
            .enumerate()
            .map(|(position, id)| {
                let part = match assignment {
                    Assignment::Blocks => position * parts / total.max(1),
                    Assignment::Stripes => position % parts,
                    Assignment::Hashed => {
                        let mut hasher = FxHasher::default();
                        id.hash(&mut hasher);
                        (hasher.finish() as usize) % parts
                    }
                };
                (*id, PartitionId(part as u32))
            })
            .collect()
    }

    /// Split into `parts` views using a built-in ownership rule.
    pub fn decompose(&self, parts: usize, assignment: Assignment) -> Result<Vec<PartitionMesh>> {
        if parts == 0 {
            return Err(FloodError::InvalidMesh(
                "cannot decompose into zero partitions".to_string(),
            ));
        }
        let owners = self.owners(parts, assignment);
        self.decompose_with(parts, &owners)
    }

    /// Split into `parts` views using explicit ownership.
    ///
    /// An entity is held by its owner and by every partition owning one of its
    /// neighbours; all holders list each other as sharers.
    pub fn decompose_with(
        &self,
        parts: usize,
        owners: &BTreeMap<EntityId, PartitionId>,
    ) -> Result<Vec<PartitionMesh>> {
        let mut holders: BTreeMap<EntityId, BTreeSet<PartitionId>> = BTreeMap::new();
        for id in self.entities.keys() {
            let owner = *owners
                .get(id)
                .ok_or_else(|| FloodError::InvalidMesh(format!("entity {id} has no owner")))?;
            if owner.index() >= parts {
                return Err(FloodError::InvalidMesh(format!(
                    "entity {id} assigned to {owner} outside 0..{parts}"
                )));
            }
            let mut held_by = BTreeSet::from([owner]);
            for neighbor in self.neighbors(*id) {
                if let Some(neighbor_owner) = owners.get(&neighbor) {
                    held_by.insert(*neighbor_owner);
                }
            }
            holders.insert(*id, held_by);
        }

        let mut held: Vec<Vec<EntityId>> = vec![Vec::new(); parts];
        for (id, held_by) in &holders {
            for partition in held_by {
                held[partition.index()].push(*id);
            }
        }

        let views = held
            .into_par_iter()
            .enumerate()
            .map(|(index, ids)| {
                let partition = PartitionId(index as u32);
                let mut view = PartitionMesh::new(partition, self.kind);
                for id in &ids {
                    let source = &self.entities[id];
                    view.add_entity(Entity {
                        id: *id,
                        owner: owners[id],
                        values: source.values.clone(),
                        volume: source.volume,
                        position: source.position,
                    });
                    for peer in &holders[id] {
                        if *peer != partition {
                            view.share(*id, *peer);
                        }
                    }
                }
                for id in &ids {
                    for neighbor in self.neighbors(*id) {
                        if holders[&neighbor].contains(&partition) {
                            view.connect(*id, neighbor);
                        }
                    }
                }
                view
            })
            .collect();
        Ok(views)
    }
}
