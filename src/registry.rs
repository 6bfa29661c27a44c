//! # Global Region Registry
//!
//! Folds per-partition contributions into final regions after
//! reconciliation. Each owned entity is contributed exactly once, by its
//! owner, keyed by the canonical region id the reconciler converged on.
//!
//! Aggregation always walks members in ascending entity id so floating-point
//! sums do not depend on how the mesh was split.

use crate::error::{FloodError, Result};
use crate::model::{EntityId, EntityKind, MapIndex, PartitionId, Point, RegionId};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// One owned member reported by its owner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemberContribution {
    pub entity: EntityId,
    pub volume: f64,
    pub position: Option<Point>,
}

/// Owned members of one local component, keyed by canonical region.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionContribution {
    pub map: MapIndex,
    pub region: RegionId,
    pub variable: u32,
    /// Whether the local component reached the seed threshold anywhere.
    pub seeded: bool,
    pub partition: PartitionId,
    pub members: Vec<MemberContribution>,
}

/// Axis-aligned extents of a region's member coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: Point,
    pub max: Point,
}

/// A finalized feature.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub id: RegionId,
    pub map: MapIndex,
    pub variable: u32,
    /// Member entities, ascending.
    pub members: Vec<EntityId>,
    pub volume: f64,
    /// Partitions that own at least one member.
    pub partitions: BTreeSet<PartitionId>,
    /// Volume-weighted centroid, when every member has coordinates.
    pub centroid: Option<Point>,
    pub bounds: Option<Bounds>,
    /// Member closest to the centroid (smallest member without coordinates).
    pub centroid_entity: EntityId,
}

impl Region {
    pub fn entity_count(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.members.binary_search(&entity).is_ok()
    }
}

#[derive(Debug, Default)]
struct PendingRegion {
    variable: u32,
    seeded: bool,
    partitions: BTreeSet<PartitionId>,
    members: Vec<MemberContribution>,
}

/// Accumulates contributions for one pass.
#[derive(Debug)]
pub struct RegistryBuilder {
    kind: EntityKind,
    pending: Vec<BTreeMap<RegionId, PendingRegion>>,
    /// Owner that contributed each (map, entity).
    contributed: Vec<FxHashMap<EntityId, PartitionId>>,
}

impl RegistryBuilder {
    pub fn new(kind: EntityKind, map_count: usize) -> Self {
        Self {
            kind,
            pending: (0..map_count).map(|_| BTreeMap::new()).collect(),
            contributed: (0..map_count).map(|_| FxHashMap::default()).collect(),
        }
    }

    pub fn add(&mut self, contribution: RegionContribution) -> Result<()> {
        let map = contribution.map.index();
        if map >= self.pending.len() {
            return Err(FloodError::UnknownMap(contribution.map));
        }

        for member in &contribution.members {
            if let Some(first) = self.contributed[map].insert(member.entity, contribution.partition)
            {
                if first != contribution.partition {
                    return Err(FloodError::DuplicateOwner {
                        entity: member.entity,
                        first,
                        second: contribution.partition,
                    });
                }
            }
        }

        let pending = self.pending[map].entry(contribution.region).or_default();
        if pending.members.is_empty() && pending.partitions.is_empty() {
            pending.variable = contribution.variable;
        }
        pending.seeded |= contribution.seeded;
        if !contribution.members.is_empty() {
            pending.partitions.insert(contribution.partition);
        }
        pending.members.extend(contribution.members);
        Ok(())
    }

    /// Build the immutable registry. Components without any seed member
    /// are discarded here, once their global extent is known.
    pub fn finalize(self) -> RegionRegistry {
        let mut maps = Vec::with_capacity(self.pending.len());
        let mut discarded = 0usize;

        for (index, pending_map) in self.pending.into_iter().enumerate() {
            let map = MapIndex(index as u32);
            let mut regions = BTreeMap::new();
            let mut entity_region = FxHashMap::default();

            for (id, mut pending) in pending_map {
                if pending.members.is_empty() {
                    continue;
                }
                if !pending.seeded {
                    debug!(%map, region = %id, size = pending.members.len(), "discarding unseeded component");
                    discarded += 1;
                    continue;
                }
                pending.members.sort_unstable_by_key(|m| m.entity);
                let region = build_region(map, id, pending);
                for member in &region.members {
                    entity_region.insert(*member, region.id);
                }
                regions.insert(id, region);
            }
            maps.push(MapRegions {
                regions,
                entity_region,
            });
        }

        if discarded > 0 {
            warn!(discarded, "connected components without a seed entity were discarded");
        }
        RegionRegistry {
            kind: self.kind,
            maps,
        }
    }
}

fn build_region(map: MapIndex, id: RegionId, pending: PendingRegion) -> Region {
    let members: Vec<EntityId> = pending.members.iter().map(|m| m.entity).collect();
    let volume: f64 = pending.members.iter().map(|m| m.volume).sum();

    let positions: Option<Vec<(EntityId, f64, Point)>> = pending
        .members
        .iter()
        .map(|m| m.position.map(|p| (m.entity, m.volume, p)))
        .collect();

    let (centroid, bounds, centroid_entity) = match positions {
        Some(points) if !points.is_empty() => {
            let centroid = weighted_centroid(&points);
            let bounds = points.iter().fold(
                Bounds {
                    min: [f64::INFINITY; 3],
                    max: [f64::NEG_INFINITY; 3],
                },
                |mut acc, (_, _, p)| {
                    for axis in 0..3 {
                        acc.min[axis] = acc.min[axis].min(p[axis]);
                        acc.max[axis] = acc.max[axis].max(p[axis]);
                    }
                    acc
                },
            );
            (Some(centroid), Some(bounds), closest_member(&points, centroid))
        }
        _ => (None, None, members[0]),
    };

    Region {
        id,
        map,
        variable: pending.variable,
        members,
        volume,
        partitions: pending.partitions,
        centroid,
        bounds,
        centroid_entity,
    }
}

/// Volume-weighted mean; falls back to the plain mean when all weights are zero.
fn weighted_centroid(points: &[(EntityId, f64, Point)]) -> Point {
    let total: f64 = points.iter().map(|(_, w, _)| *w).sum();
    let (weights, total): (Vec<f64>, f64) = if total > 0.0 {
        (points.iter().map(|(_, w, _)| *w).collect(), total)
    } else {
        (vec![1.0; points.len()], points.len() as f64)
    };

    let mut centroid = [0.0; 3];
    for ((_, _, p), w) in points.iter().zip(&weights) {
        for axis in 0..3 {
            centroid[axis] += w * p[axis];
        }
    }
    centroid.map(|c| c / total)
}

/// Member nearest `target`; ties go to the smaller id (points are ascending).
fn closest_member(points: &[(EntityId, f64, Point)], target: Point) -> EntityId {
    let mut best = points[0].0;
    let mut best_distance = f64::INFINITY;
    for (entity, _, p) in points {
        let distance: f64 = (0..3).map(|axis| (p[axis] - target[axis]).powi(2)).sum();
        if distance < best_distance {
            best = *entity;
            best_distance = distance;
        }
    }
    best
}

/// Regions of one map.
#[derive(Debug, Clone, Default)]
pub struct MapRegions {
    regions: BTreeMap<RegionId, Region>,
    entity_region: FxHashMap<EntityId, RegionId>,
}

impl MapRegions {
    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(&id)
    }

    /// Region containing `entity`, if the entity is active in this map.
    pub fn region_of(&self, entity: EntityId) -> Option<&Region> {
        self.entity_region
            .get(&entity)
            .and_then(|id| self.regions.get(id))
    }

    /// Regions in ascending id order.
    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Sum of region volumes in ascending region id order.
    pub fn total_volume(&self) -> f64 {
        self.regions.values().map(|r| r.volume).sum()
    }
}

/// Immutable result of one finalized pass.
#[derive(Debug, Clone)]
pub struct RegionRegistry {
    kind: EntityKind,
    maps: Vec<MapRegions>,
}

impl RegionRegistry {
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn map_count(&self) -> usize {
        self.maps.len()
    }

    pub fn map(&self, map: MapIndex) -> Result<&MapRegions> {
        self.maps.get(map.index()).ok_or(FloodError::UnknownMap(map))
    }

    pub fn maps(&self) -> impl Iterator<Item = (MapIndex, &MapRegions)> {
        self.maps
            .iter()
            .enumerate()
            .map(|(index, regions)| (MapIndex(index as u32), regions))
    }

    pub fn region_count(&self) -> usize {
        self.maps.iter().map(MapRegions::len).sum()
    }

    /// Volume of every region of every map, in map then region order.
    pub fn total_volume(&self) -> f64 {
        self.maps.iter().map(MapRegions::total_volume).sum()
    }
}
