//! # Partitioned Pass Driver
//!
//! Runs one analysis pass with one worker thread per partition. Workers own
//! their view exclusively; all coordination goes through the fabric.
//!
//! ## Architecture
//!
//! ```text
//!   Partition 0        Partition 1        Partition N
//!   classify           classify           classify
//!   flood              flood              flood
//!      │                  │                  │
//!      └──── handshake / label rounds / vote (fabric) ────┘
//!      │                  │                  │
//!   contributions      contributions      contributions
//!           └───────────────┬──────────────────┘
//!                  ┌────────▼────────┐
//!                  │ RegistryBuilder │
//!                  └─────────────────┘
//! ```

use crate::classify::{classify, UndefinedField};
use crate::config::FloodConfig;
use crate::error::{FloodError, Result};
use crate::fabric::{Endpoint, Fabric};
use crate::mesh::PartitionMesh;
use crate::model::{PartitionId, RegionId};
use crate::reconcile::{ReconcileStats, Reconciler};
use crate::registry::{MemberContribution, RegionContribution, RegionRegistry, RegistryBuilder};
use crate::scan::{flood, LocalLabels};
use tracing::{debug, info, instrument, warn};

/// What one partition hands back after reconciliation.
#[derive(Debug, Clone)]
pub struct PartitionOutput {
    pub partition: PartitionId,
    pub contributions: Vec<RegionContribution>,
    pub undefined: Vec<UndefinedField>,
    pub stats: ReconcileStats,
}

/// Pipeline for a single partition.
pub struct PartitionWorker<'a> {
    config: &'a FloodConfig,
    mesh: &'a PartitionMesh,
}

impl<'a> PartitionWorker<'a> {
    pub fn new(config: &'a FloodConfig, mesh: &'a PartitionMesh) -> Self {
        Self { config, mesh }
    }

    /// Classify, scan, reconcile, and collect owned contributions.
    #[instrument(skip_all, fields(partition = %self.mesh.partition()), level = "debug")]
    pub fn run(&self, endpoint: &mut Endpoint) -> Result<PartitionOutput> {
        self.mesh.validate(self.config.entity_kind)?;
        let classification = classify(self.mesh, self.config)?;

        let labels: Vec<LocalLabels> = self
            .config
            .maps()
            .map(|map| flood(self.mesh, classification.mask(map), map))
            .collect();
        debug!(
            components = labels.iter().map(LocalLabels::len).sum::<usize>(),
            "local flood complete"
        );

        let reconciler = Reconciler::new(self.mesh, &labels);
        reconciler.handshake(endpoint)?;
        let mut reconciled = reconciler.run(endpoint)?;

        let partition = self.mesh.partition();
        let mut contributions = Vec::new();
        for map_labels in &labels {
            for component in map_labels.components() {
                let canonical = reconciled
                    .canonical(map_labels.map, component.label)
                    .unwrap_or(component.min_entity);
                let members = component
                    .members
                    .iter()
                    .filter_map(|id| self.mesh.entity(*id))
                    .filter(|entity| entity.is_owned_by(partition))
                    .map(|entity| MemberContribution {
                        entity: entity.id,
                        volume: entity.volume,
                        position: entity.position,
                    })
                    .collect();
                contributions.push(RegionContribution {
                    map: map_labels.map,
                    region: RegionId::from_min_member(canonical),
                    variable: component.variable,
                    seeded: component.seeded,
                    partition,
                    members,
                });
            }
        }

        Ok(PartitionOutput {
            partition,
            contributions,
            undefined: classification.undefined,
            stats: reconciled.stats,
        })
    }
}

/// Result of a successful pass, before metrics.
#[derive(Debug, Clone)]
pub struct PassOutput {
    pub registry: RegionRegistry,
    /// Undefined field values, ascending by entity.
    pub undefined: Vec<UndefinedField>,
    pub rounds: u32,
    pub merges: usize,
}

/// Run one pass over `partitions`, which must be indexed `0..n`.
///
/// On any worker failure the root-cause error is returned; peers that only
/// observed the abort are not reported.
#[instrument(skip_all, fields(partitions = partitions.len()))]
pub fn run_pass(config: &FloodConfig, partitions: &[PartitionMesh]) -> Result<PassOutput> {
    if partitions.is_empty() {
        return Err(FloodError::InvalidMesh("no partitions supplied".to_string()));
    }
    for (index, mesh) in partitions.iter().enumerate() {
        if mesh.partition() != PartitionId(index as u32) {
            return Err(FloodError::MalformedInput {
                partition: mesh.partition(),
                message: format!("supplied at position {index}; partitions must be numbered 0..n"),
            });
        }
    }

    let endpoints = Fabric::connect(partitions.len());
    let results: Vec<Result<PartitionOutput>> = std::thread::scope(|scope| {
        let handles: Vec<_> = partitions
            .iter()
            .zip(endpoints)
            .map(|(mesh, mut endpoint)| {
                scope.spawn(move || {
                    let worker = PartitionWorker::new(config, mesh);
                    match worker.run(&mut endpoint) {
                        Ok(output) => {
                            endpoint.finish();
                            Ok(output)
                        }
                        Err(e) => {
                            endpoint.abort(&e.to_string());
                            Err(e)
                        }
                    }
                })
            })
            .collect();

        handles
            .into_iter()
            .enumerate()
            .map(|(index, handle)| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(FloodError::WorkerPanicked(PartitionId(index as u32))))
            })
            .collect()
    });

    let mut outputs = Vec::with_capacity(results.len());
    let mut root_cause: Option<FloodError> = None;
    for result in results {
        match result {
            Ok(output) => outputs.push(output),
            Err(e) => {
                let replace = match &root_cause {
                    None => true,
                    Some(current) => current.is_peer_abort() && !e.is_peer_abort(),
                };
                if replace {
                    root_cause = Some(e);
                }
            }
        }
    }
    if let Some(e) = root_cause {
        warn!(error = %e, "analysis pass aborted");
        return Err(e);
    }

    let mut builder = RegistryBuilder::new(config.entity_kind, config.map_count());
    let mut undefined = Vec::new();
    let mut rounds = 0;
    let mut merges = 0;
    for output in outputs {
        rounds = rounds.max(output.stats.rounds);
        merges += output.stats.merges;
        undefined.extend(output.undefined);
        for contribution in output.contributions {
            builder.add(contribution)?;
        }
    }
    undefined.sort_unstable();

    let registry = builder.finalize();
    info!(
        regions = registry.region_count(),
        rounds,
        merges,
        "analysis pass finalized"
    );
    Ok(PassOutput {
        registry,
        undefined,
        rounds,
        merges,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{Assignment, GlobalMesh, MeshEntity};
    use crate::model::{EntityId, EntityKind, MapIndex};

    fn ring(n: u64) -> GlobalMesh {
        let mut mesh = GlobalMesh::new(EntityKind::Node);
        for id in 0..n {
            mesh.add_entity(MeshEntity {
                id: EntityId(id),
                values: vec![1.0],
                volume: 0.5,
                position: None,
            });
        }
        for id in 0..n {
            mesh.connect(EntityId(id), EntityId((id + 1) % n)).unwrap();
        }
        mesh
    }

    #[test]
    fn ring_reconciles_into_one_region() {
        let mesh = ring(24);
        let views = mesh.decompose(4, Assignment::Blocks).unwrap();
        let output = run_pass(&FloodConfig::default(), &views).unwrap();

        let regions = output.registry.map(MapIndex(0)).unwrap();
        assert_eq!(regions.len(), 1);
        let region = regions.regions().next().unwrap();
        assert_eq!(region.id, RegionId(0));
        assert_eq!(region.volume, 12.0);
        assert_eq!(region.partitions.len(), 4);
        assert!(output.rounds >= 2);
    }

    #[test]
    fn partitions_out_of_order_are_malformed() {
        let mesh = ring(8);
        let mut views = mesh.decompose(2, Assignment::Blocks).unwrap();
        views.swap(0, 1);
        assert!(matches!(
            run_pass(&FloodConfig::default(), &views),
            Err(FloodError::MalformedInput { .. })
        ));
    }

    #[test]
    fn malformed_partition_reports_root_cause() {
        let mesh = ring(8);
        let mut views = mesh.decompose(2, Assignment::Blocks).unwrap();
        let mut entity = views[1].entity(EntityId(6)).unwrap().clone();
        entity.values = vec![1.0, 2.0];
        views[1].add_entity(entity);

        let err = run_pass(&FloodConfig::default(), &views).unwrap_err();
        assert!(matches!(
            err,
            FloodError::MalformedInput {
                partition: PartitionId(1),
                ..
            }
        ));
    }

    #[test]
    fn empty_partition_list_is_rejected() {
        assert!(run_pass(&FloodConfig::default(), &[]).is_err());
    }
}
