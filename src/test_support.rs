//! Mesh fixtures shared by unit tests, integration tests and benches.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::DEFAULT_THRESHOLD;
use crate::mesh::{GlobalMesh, MeshEntity};
use crate::model::{EntityId, EntityKind};

/// Id of the grid cell at column `x`, row `y`.
pub fn grid_id(nx: u64, x: u64, y: u64) -> EntityId {
    EntityId(y * nx + x)
}

/// `nx` × `ny` grid with 4-neighbour adjacency, unit volumes and positions
/// at the cell coordinates. `field(x, y)` supplies each entity's values.
pub fn grid_mesh<F>(nx: u64, ny: u64, kind: EntityKind, field: F) -> GlobalMesh
where
    F: Fn(u64, u64) -> Vec<f64>,
{
    let mut mesh = GlobalMesh::new(kind);
    for y in 0..ny {
        for x in 0..nx {
            mesh.add_entity(MeshEntity {
                id: grid_id(nx, x, y),
                values: field(x, y),
                volume: 1.0,
                position: Some([x as f64, y as f64, 0.0]),
            });
        }
    }
    for y in 0..ny {
        for x in 0..nx {
            let id = grid_id(nx, x, y);
            if x + 1 < nx {
                mesh.connect(id, grid_id(nx, x + 1, y))
                    .expect("grid neighbour exists");
            }
            if y + 1 < ny {
                mesh.connect(id, grid_id(nx, x, y + 1))
                    .expect("grid neighbour exists");
            }
        }
    }
    mesh
}

/// Cells of the 12-entity blob in [`two_blob_grid`]; its smallest id is 11.
pub fn large_blob(x: u64, y: u64) -> bool {
    (1..=4).contains(&x) && (1..=3).contains(&y)
}

/// Cells of the 7-entity blob in [`two_blob_grid`]; its smallest id is 65.
pub fn small_blob(x: u64, y: u64) -> bool {
    ((5..=8).contains(&x) && y == 6) || ((5..=7).contains(&x) && y == 7)
}

/// 10 × 10 nodal grid with two disjoint active blobs of 12 and 7 entities.
pub fn two_blob_grid() -> GlobalMesh {
    grid_mesh(10, 10, EntityKind::Node, |x, y| {
        if large_blob(x, y) || small_blob(x, y) {
            vec![1.0]
        } else {
            vec![0.0]
        }
    })
}

/// Random field over an `n` × `n` grid with `variables` values per entity.
/// About one value in ten sits exactly on the default threshold.
pub fn random_field_grid(n: u64, variables: usize, kind: EntityKind, seed: u64) -> GlobalMesh {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut values = Vec::with_capacity((n * n) as usize);
    for _ in 0..n * n {
        let entity: Vec<f64> = (0..variables)
            .map(|_| {
                if rng.random_range(0..10) == 0 {
                    DEFAULT_THRESHOLD
                } else {
                    rng.random_range(0.0..1.0)
                }
            })
            .collect();
        values.push(entity);
    }
    grid_mesh(n, n, kind, |x, y| values[(y * n + x) as usize].clone())
}
