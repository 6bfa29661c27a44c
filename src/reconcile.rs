//! # Boundary Reconciler
//!
//! Unifies provisional labels that belong to the same feature but were
//! assigned independently on different partitions.
//!
//! ## Protocol
//!
//! 1. **Handshake.** Every partition tells every other partition which
//!    entities it believes they share and who owns each. Any disagreement
//!    is a broken partitioning input and aborts the pass.
//! 2. **Rounds.** Each partition announces, for every active shared entity,
//!    `(map, entity, local label, class minimum)` to the partitions sharing
//!    it. The receiver unions its own label with the sender's label key and
//!    lowers the class minimum. A partition reports *changed* when a union
//!    joined two sets or a minimum dropped.
//! 3. **Vote.** An OR-reduction of *changed* over all partitions ends the
//!    round. The first round nobody changes is the last.
//!
//! Minima only decrease and the label set is finite, so the rounds
//! terminate; on convergence every label of a connected feature carries the
//! feature's smallest entity id on every partition.

use crate::dsu::LabelDsu;
use crate::error::{FloodError, Result};
use crate::fabric::{Endpoint, Payload, Phase};
use crate::mesh::PartitionMesh;
use crate::model::{EntityId, LabelKey, LocalLabel, MapIndex, PartitionId};
use crate::scan::LocalLabels;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, instrument};

/// One boundary announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BoundaryLabel {
    pub map: MapIndex,
    pub entity: EntityId,
    /// Sender's provisional label for `entity`.
    pub label: LocalLabel,
    /// Coloring variable of the sender's component.
    pub variable: u32,
    /// Smallest entity id the sender currently knows in that label's class.
    pub class_min: EntityId,
}

/// Counters from one partition's reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Rounds executed, including the final quiet round.
    pub rounds: u32,
    /// Unions that joined two distinct sets.
    pub merges: usize,
    /// Boundary announcements sent.
    pub announcements: usize,
}

/// Converged label classes of one partition.
#[derive(Debug)]
pub struct ReconciledLabels {
    partition: PartitionId,
    dsu: LabelDsu,
    pub stats: ReconcileStats,
}

impl ReconciledLabels {
    /// Canonical entity id of a local label's feature.
    pub fn canonical(&mut self, map: MapIndex, label: LocalLabel) -> Option<EntityId> {
        self.dsu
            .class_min(LabelKey::new(map, self.partition, label))
    }
}

/// Per-partition reconciliation state.
pub struct Reconciler<'a> {
    mesh: &'a PartitionMesh,
    labels: &'a [LocalLabels],
    dsu: LabelDsu,
    neighbors: BTreeSet<PartitionId>,
    /// Active shared entities per peer, ascending by (map, entity).
    outbound: BTreeMap<PartitionId, Vec<(MapIndex, EntityId, LocalLabel)>>,
}

impl<'a> Reconciler<'a> {
    pub fn new(mesh: &'a PartitionMesh, labels: &'a [LocalLabels]) -> Self {
        let partition = mesh.partition();
        let mut dsu = LabelDsu::new();
        for map_labels in labels {
            for component in map_labels.components() {
                dsu.add_label(
                    LabelKey::new(map_labels.map, partition, component.label),
                    component.min_entity,
                );
            }
        }

        let neighbors = mesh.neighbor_partitions();
        let mut outbound = BTreeMap::new();
        for peer in &neighbors {
            let shared = mesh.shared_with(*peer);
            let mut entries = Vec::new();
            for map_labels in labels {
                for entity in &shared {
                    if let Some(label) = map_labels.label_of(*entity) {
                        entries.push((map_labels.map, *entity, label));
                    }
                }
            }
            entries.sort_unstable();
            outbound.insert(*peer, entries);
        }

        Self {
            mesh,
            labels,
            dsu,
            neighbors,
            outbound,
        }
    }

    pub fn neighbors(&self) -> &BTreeSet<PartitionId> {
        &self.neighbors
    }

    /// Verify that every pair of partitions agrees on what they share.
    pub fn handshake(&self, endpoint: &mut Endpoint) -> Result<()> {
        let others = endpoint.others();
        let outgoing = others
            .iter()
            .map(|peer| (*peer, Payload::Shared(self.mesh.shared_ownership(*peer))))
            .collect();
        let received = endpoint.exchange(Phase::Handshake, 0, outgoing, &others)?;

        for (peer, payload) in received {
            let Payload::Shared(theirs) = payload else {
                return Err(self.protocol_error(peer, "handshake carried no shared list"));
            };
            let ours = self.mesh.shared_ownership(peer);
            if theirs == ours {
                continue;
            }
            let ours_set: BTreeSet<_> = ours.iter().map(|(id, _)| *id).collect();
            let theirs_set: BTreeSet<_> = theirs.iter().map(|(id, _)| *id).collect();
            let detail = match ours_set.symmetric_difference(&theirs_set).next() {
                Some(entity) if ours_set.contains(entity) => {
                    format!("{entity} is shared here but absent from the peer's view")
                }
                Some(entity) => {
                    format!("{entity} is shared by the peer but absent from this view")
                }
                None => match ours.iter().zip(&theirs).find(|(a, b)| a != b) {
                    Some(((entity, mine), (_, peers))) => {
                        format!("{entity} is owned by {mine} here but by {peers} on the peer")
                    }
                    None => "shared lists differ".to_string(),
                },
            };
            return Err(self.consistency(peer, detail));
        }
        Ok(())
    }

    /// Run exchange/union rounds until no partition changes.
    #[instrument(skip_all, fields(partition = %self.mesh.partition()), level = "debug")]
    pub fn run(mut self, endpoint: &mut Endpoint) -> Result<ReconciledLabels> {
        let partition = self.mesh.partition();
        let mut stats = ReconcileStats::default();
        let mut round = 0u32;

        loop {
            let mut outgoing = BTreeMap::new();
            for (peer, entries) in &self.outbound {
                let mut announcements = Vec::with_capacity(entries.len());
                for &(map, entity, label) in entries {
                    let variable = self.labels[map.index()].component(label).variable;
                    let class_min = self
                        .dsu
                        .class_min(LabelKey::new(map, partition, label))
                        .unwrap_or(entity);
                    announcements.push(BoundaryLabel {
                        map,
                        entity,
                        label,
                        variable,
                        class_min,
                    });
                }
                stats.announcements += announcements.len();
                outgoing.insert(*peer, Payload::Labels(announcements));
            }

            let incoming = endpoint.exchange(Phase::Labels, round, outgoing, &self.neighbors)?;

            let mut changed = false;
            for (peer, payload) in incoming {
                let Payload::Labels(announcements) = payload else {
                    return Err(self.protocol_error(peer, "label round carried no labels"));
                };
                if round == 0 {
                    self.verify_announced_set(peer, &announcements)?;
                }
                for announcement in announcements {
                    let local = self.local_key(peer, &announcement)?;
                    let foreign = LabelKey::new(announcement.map, peer, announcement.label);
                    let outcome = self.dsu.union(local, foreign, announcement.class_min);
                    if outcome.merged {
                        stats.merges += 1;
                    }
                    changed |= outcome.changed();
                }
            }

            let any = endpoint.all_reduce_any(round, changed)?;
            stats.rounds = round + 1;
            debug!(
                round,
                changed,
                any,
                sets = self.dsu.set_count(),
                labels = self.dsu.len(),
                "reconciliation round complete"
            );
            if !any {
                break;
            }
            round += 1;
        }

        Ok(ReconciledLabels {
            partition,
            dsu: self.dsu,
            stats,
        })
    }

    /// Round 0: the peer must announce exactly the active entities we share.
    fn verify_announced_set(&self, peer: PartitionId, announcements: &[BoundaryLabel]) -> Result<()> {
        let theirs: BTreeSet<(MapIndex, EntityId)> =
            announcements.iter().map(|a| (a.map, a.entity)).collect();
        let ours: BTreeSet<(MapIndex, EntityId)> = self
            .outbound
            .get(&peer)
            .map(|entries| entries.iter().map(|(map, entity, _)| (*map, *entity)).collect())
            .unwrap_or_default();
        if let Some((map, entity)) = ours.symmetric_difference(&theirs).next() {
            return Err(self.consistency(
                peer,
                format!("ghost classification of {entity} in {map} differs between partitions"),
            ));
        }
        Ok(())
    }

    fn local_key(&self, peer: PartitionId, announcement: &BoundaryLabel) -> Result<LabelKey> {
        let entity = announcement.entity;
        if !self.mesh.contains(entity) {
            return Err(self.consistency(peer, format!("announced entity {entity} is not held here")));
        }
        if !self.mesh.sharers(entity).contains(&peer) {
            return Err(self.consistency(peer, format!("{entity} is not shared with the announcer")));
        }
        let labels = self
            .labels
            .get(announcement.map.index())
            .ok_or_else(|| self.consistency(peer, format!("unknown map {}", announcement.map)))?;
        let label = labels.label_of(entity).ok_or_else(|| {
            self.consistency(peer, format!("{entity} is active on the peer but not here"))
        })?;
        if labels.component(label).variable != announcement.variable {
            return Err(self.consistency(
                peer,
                format!("{entity} is colored by a different variable on the peer"),
            ));
        }
        Ok(LabelKey::new(announcement.map, self.mesh.partition(), label))
    }

    fn consistency(&self, peer: PartitionId, message: String) -> FloodError {
        FloodError::Consistency {
            partition: self.mesh.partition(),
            peer,
            message,
        }
    }

    fn protocol_error(&self, peer: PartitionId, message: &str) -> FloodError {
        FloodError::Communication {
            partition: self.mesh.partition(),
            message: format!("{message} (from {peer})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::config::FloodConfig;
    use crate::fabric::Fabric;
    use crate::mesh::{Assignment, GlobalMesh, MeshEntity};
    use crate::model::EntityKind;
    use crate::scan::flood;

    fn line(values: &[f64]) -> GlobalMesh {
        let mut mesh = GlobalMesh::new(EntityKind::Node);
        for (id, value) in values.iter().enumerate() {
            mesh.add_entity(MeshEntity {
                id: EntityId(id as u64),
                values: vec![*value],
                volume: 1.0,
                position: None,
            });
        }
        for id in 1..values.len() as u64 {
            mesh.connect(EntityId(id - 1), EntityId(id)).unwrap();
        }
        mesh
    }

    /// Reconcile every view on its own thread; returns each partition's
    /// canonical id per local label, or the error it hit.
    fn reconcile_all(views: Vec<PartitionMesh>) -> Vec<Result<Vec<EntityId>>> {
        let config = FloodConfig::default();
        let endpoints = Fabric::connect(views.len());
        std::thread::scope(|scope| {
            let handles: Vec<_> = views
                .iter()
                .zip(endpoints)
                .map(|(mesh, mut endpoint)| {
                    let config = &config;
                    scope.spawn(move || -> Result<Vec<EntityId>> {
                        let classification = classify(mesh, config)?;
                        let labels = vec![flood(mesh, classification.mask(MapIndex(0)), MapIndex(0))];
                        let reconciler = Reconciler::new(mesh, &labels);
                        let outcome = reconciler
                            .handshake(&mut endpoint)
                            .and_then(|_| reconciler.run(&mut endpoint));
                        let mut reconciled = match outcome {
                            Ok(reconciled) => reconciled,
                            Err(e) => {
                                endpoint.abort(&e.to_string());
                                return Err(e);
                            }
                        };
                        endpoint.finish();
                        Ok(labels[0]
                            .components()
                            .iter()
                            .filter_map(|c| reconciled.canonical(MapIndex(0), c.label))
                            .collect())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    #[test]
    fn feature_across_four_partitions_gets_one_minimum() {
        let mesh = line(&[1.0; 16]);
        let views = mesh.decompose(4, Assignment::Blocks).unwrap();
        for result in reconcile_all(views) {
            assert_eq!(result.unwrap(), vec![EntityId(0)]);
        }
    }

    #[test]
    fn separate_features_keep_their_own_minimum() {
        let mesh = line(&[1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 0.0, 1.0]);
        let views = mesh.decompose(2, Assignment::Blocks).unwrap();
        let results: Vec<Vec<EntityId>> = reconcile_all(views)
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(results[0], vec![EntityId(0), EntityId(3)]);
        assert_eq!(results[1], vec![EntityId(3), EntityId(7)]);
    }

    #[test]
    fn stripes_need_several_rounds_but_converge() {
        let mesh = line(&[1.0; 12]);
        let views = mesh.decompose(3, Assignment::Stripes).unwrap();
        for result in reconcile_all(views) {
            let canonical = result.unwrap();
            assert!(canonical.iter().all(|id| *id == EntityId(0)));
        }
    }

    #[test]
    fn asymmetric_sharing_is_a_consistency_error() {
        let mesh = line(&[1.0; 6]);
        let mut views = mesh.decompose(2, Assignment::Blocks).unwrap();
        // P0 forgets that P1 holds entity 3.
        let mut broken = PartitionMesh::new(PartitionId(0), EntityKind::Node);
        for entity in views[0].entities() {
            broken.add_entity(entity.clone());
        }
        for id in views[0].sorted_ids() {
            for neighbor in views[0].neighbors(id) {
                broken.connect(id, *neighbor);
            }
        }
        broken.share(EntityId(2), PartitionId(1));
        views[0] = broken;

        let results = reconcile_all(views);
        assert!(results.iter().any(|r| matches!(r, Err(FloodError::Consistency { .. }))));
        assert!(results.iter().all(|r| r.is_err()));
    }

    #[test]
    fn mismatched_ghost_value_is_a_consistency_error() {
        let mesh = line(&[1.0; 6]);
        let mut views = mesh.decompose(2, Assignment::Blocks).unwrap();
        // P1's ghost copy of entity 2 is inactive while P0 owns it active.
        let mut ghost = views[1].entity(EntityId(2)).unwrap().clone();
        ghost.values = vec![0.0];
        views[1].add_entity(ghost);

        let results = reconcile_all(views);
        for result in results {
            assert!(matches!(result, Err(FloodError::Consistency { .. })));
        }
    }

    #[test]
    fn disputed_owner_is_a_consistency_error() {
        let mesh = line(&[1.0; 6]);
        let mut views = mesh.decompose(2, Assignment::Blocks).unwrap();
        // Each side believes the other owns entity 2.
        for (view, owner) in views.iter_mut().zip([PartitionId(1), PartitionId(0)]) {
            let mut copy = view.entity(EntityId(2)).unwrap().clone();
            copy.owner = owner;
            view.add_entity(copy);
        }

        let results = reconcile_all(views);
        assert!(results.iter().any(|r| matches!(r, Err(FloodError::Consistency { .. }))));
        assert!(results.iter().all(|r| r.is_err()));
    }
}
