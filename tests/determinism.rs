//! Region ids, membership and volumes must not depend on how the mesh is split.

use floodmap_rs::mesh::{Assignment, GlobalMesh};
use floodmap_rs::test_support::{grid_mesh, random_field_grid};
use floodmap_rs::{EntityId, EntityKind, FloodConfig, FloodCounter, MapLayout, PassInputs, RegionId};

/// Everything about a pass that must be partition-independent.
#[derive(Debug, PartialEq)]
struct Fingerprint {
    regions: Vec<(u32, RegionId, u32, Vec<EntityId>, u64, EntityId)>,
    volume_fraction_bits: u64,
}

fn fingerprint(
    config: &FloodConfig,
    mesh: &GlobalMesh,
    parts: usize,
    assignment: Assignment,
) -> anyhow::Result<Fingerprint> {
    let counter = FloodCounter::new(config.clone())?;
    let report = counter.execute(&mesh.decompose(parts, assignment)?, PassInputs::new(mesh.total_volume()))?;
    let query = counter.query()?;

    let mut regions = Vec::new();
    for map in config.maps() {
        for region in query.regions(map)? {
            regions.push((
                map.0,
                region.id,
                region.variable,
                region.members.clone(),
                region.volume.to_bits(),
                region.centroid_entity,
            ));
        }
    }
    Ok(Fingerprint {
        regions,
        volume_fraction_bits: report.volume_fraction.to_bits(),
    })
}

fn assert_partition_independent(config: &FloodConfig, mesh: &GlobalMesh) -> anyhow::Result<()> {
    let baseline = fingerprint(config, mesh, 1, Assignment::Blocks)?;
    assert!(!baseline.regions.is_empty());
    for assignment in [Assignment::Blocks, Assignment::Stripes, Assignment::Hashed] {
        for parts in [2, 4, 8] {
            let split = fingerprint(config, mesh, parts, assignment)?;
            assert_eq!(split, baseline, "{parts} partitions, {assignment:?}");
        }
    }
    Ok(())
}

#[test]
fn random_field_is_partition_independent() -> anyhow::Result<()> {
    let mesh = random_field_grid(24, 1, EntityKind::Node, 7);
    assert_partition_independent(&FloodConfig::default(), &mesh)
}

#[test]
fn multi_variable_layouts_are_partition_independent() -> anyhow::Result<()> {
    let mesh = random_field_grid(16, 3, EntityKind::Element, 11);
    let base = FloodConfig::default().with_entity_kind(EntityKind::Element);
    assert_partition_independent(&base.clone().with_variables(3, MapLayout::PerVariable), &mesh)?;
    assert_partition_independent(&base.with_variables(3, MapLayout::Single), &mesh)
}

#[test]
fn feature_spanning_every_partition_merges_into_one() -> anyhow::Result<()> {
    // A serpentine path through a fully active grid touches every stripe.
    let mesh = grid_mesh(12, 12, EntityKind::Node, |_, _| vec![1.0]);
    let counter = FloodCounter::new(FloodConfig::default())?;
    let report = counter.execute(&mesh.decompose(8, Assignment::Stripes)?, PassInputs::new(144.0))?;

    assert_eq!(report.region_count, 1);
    let query = counter.query()?;
    let region = query.region(floodmap_rs::MapIndex(0), RegionId(0))?;
    assert_eq!(region.volume, 144.0);
    assert_eq!(region.partitions.len(), 8);
    assert_eq!(report.volume_fraction, 1.0);
    Ok(())
}

#[test]
fn rerunning_a_pass_is_idempotent() -> anyhow::Result<()> {
    let mesh = random_field_grid(20, 1, EntityKind::Node, 3);
    let config = FloodConfig::default();
    let views = mesh.decompose(4, Assignment::Hashed)?;
    let counter = FloodCounter::new(config)?;

    let first = counter.execute(&views, PassInputs::new(mesh.total_volume()))?;
    let first_regions: Vec<_> = counter
        .query()?
        .regions(floodmap_rs::MapIndex(0))?
        .cloned()
        .collect();
    let second = counter.execute(&views, PassInputs::new(mesh.total_volume()).at(1, 1.0))?;
    let second_regions: Vec<_> = counter
        .query()?
        .regions(floodmap_rs::MapIndex(0))?
        .cloned()
        .collect();

    assert_eq!(first.region_count, second.region_count);
    assert_eq!(first.volume_fraction, second.volume_fraction);
    assert_eq!(first_regions, second_regions);
    Ok(())
}
