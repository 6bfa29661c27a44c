use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use floodmap_rs::config::default_partition_count;
use floodmap_rs::mesh::{Assignment, GlobalMesh, MeshFile};
use floodmap_rs::{FloodConfig, FloodCounter, PassInputs};
use tracing_subscriber::EnvFilter;

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn load_mesh(path: &str) -> anyhow::Result<GlobalMesh> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading mesh {path}"))?;
    let file: MeshFile = serde_json::from_str(&raw).with_context(|| format!("parsing mesh {path}"))?;
    Ok(GlobalMesh::from_file(file)?)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mesh_path = parse_arg("--mesh").context("--mesh <mesh.json> is required")?;
    let config_path = parse_arg("--config").map(PathBuf::from);
    let partitions: usize = match parse_arg("--partitions") {
        Some(value) => value.parse()?,
        None => default_partition_count(),
    };
    let assignment: Assignment = parse_arg("--assignment")
        .unwrap_or_else(|| "blocks".to_string())
        .parse()
        .map_err(anyhow::Error::msg)?;
    let timestep: u64 = parse_arg("--timestep")
        .unwrap_or_else(|| "0".to_string())
        .parse()?;
    let time: f64 = parse_arg("--time")
        .unwrap_or_else(|| "0".to_string())
        .parse()?;

    let config = FloodConfig::load(config_path.as_deref())?;
    let mesh = load_mesh(&mesh_path)?;
    let mesh_volume = match parse_arg("--mesh-volume") {
        Some(value) => value.parse()?,
        None => mesh.total_volume(),
    };

    let counter = FloodCounter::new(config)?;
    let views = mesh.decompose(partitions, assignment)?;
    let report = counter.execute(&views, PassInputs::new(mesh_volume).at(timestep, time))?;
    let query = counter.query()?;

    for map in counter.config().maps() {
        for region in query.regions(map)? {
            println!(
                "{} {} variable={} entities={} volume={} partitions={}",
                map,
                region.id,
                region.variable,
                region.entity_count(),
                region.volume,
                region.partitions.len()
            );
        }
    }
    println!(
        "regions={} rounds={} volume_fraction={}",
        report.region_count, report.rounds, report.volume_fraction
    );
    match report.avrami {
        Some(Ok(value)) => println!("avrami={value}"),
        Some(Err(reason)) => println!("avrami=undefined ({reason})"),
        None => {}
    }
    if !report.undefined_values.is_empty() {
        println!("undefined_values={}", report.undefined_values.len());
    }
    Ok(())
}
