//! Avrami table export across several passes.

use floodmap_rs::mesh::Assignment;
use floodmap_rs::metrics::avrami_value;
use floodmap_rs::test_support::two_blob_grid;
use floodmap_rs::{ConfigError, FloodConfig, FloodCounter, PassInputs, UndefinedValue};
use tempfile::tempdir;

fn rows(path: &std::path::Path) -> anyhow::Result<Vec<Vec<String>>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .map(|line| line.split(',').map(str::to_string).collect())
        .collect())
}

#[test]
fn table_has_one_header_and_one_row_per_later_pass() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("avrami.csv");
    let mesh = two_blob_grid();
    let views = mesh.decompose(2, Assignment::Blocks)?;
    let counter = FloodCounter::new(FloodConfig::default().with_avrami(&path, Some(0.3)))?;

    // Timestep 0 only writes the header.
    counter.execute(&views, PassInputs::new(100.0))?;
    assert_eq!(rows(&path)?.len(), 1);

    // Fraction 0.19 at t=1, then 0.38 (above equilibrium) at t=2.5.
    counter.execute(&views, PassInputs::new(100.0).at(1, 1.0))?;
    let report = counter.execute(&views, PassInputs::new(50.0).at(2, 2.5))?;
    assert!(matches!(
        report.avrami,
        Some(Err(UndefinedValue::AtOrAboveEquilibrium { .. }))
    ));

    let table = rows(&path)?;
    assert_eq!(table.len(), 3);
    assert_eq!(table[0], vec!["timestep", "time", "log_time", "avrami"]);

    let expected = avrami_value(0.19, 0.3).map_err(anyhow::Error::msg)?;
    assert_eq!(table[1][..3], ["1", "1", "0"]);
    assert!((table[1][3].parse::<f64>()? - expected).abs() < 1e-12);

    assert_eq!(table[2][0], "2");
    assert_eq!(table[2][1], "2.5");
    assert!((table[2][2].parse::<f64>()? - 2.5f64.ln()).abs() < 1e-12);
    assert_eq!(table[2][3], "undefined");
    Ok(())
}

#[test]
fn non_positive_time_has_undefined_log_time() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("avrami.csv");
    let mesh = two_blob_grid();
    let views = mesh.decompose(1, Assignment::Blocks)?;
    let counter = FloodCounter::new(FloodConfig::default().with_avrami(&path, Some(0.3)))?;

    counter.execute(&views, PassInputs::new(100.0))?;
    counter.execute(&views, PassInputs::new(100.0).at(1, 0.0))?;

    let table = rows(&path)?;
    assert_eq!(table.len(), 2);
    assert_eq!(table[1][..3], ["1", "0", "undefined"]);
    Ok(())
}

#[test]
fn restarting_at_timestep_zero_truncates() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("avrami.csv");
    let mesh = two_blob_grid();
    let views = mesh.decompose(1, Assignment::Blocks)?;

    let counter = FloodCounter::new(FloodConfig::default().with_avrami(&path, Some(0.3)))?;
    counter.execute(&views, PassInputs::new(100.0))?;
    counter.execute(&views, PassInputs::new(100.0).at(1, 1.0))?;

    let restarted = FloodCounter::new(FloodConfig::default().with_avrami(&path, Some(0.3)))?;
    restarted.execute(&views, PassInputs::new(100.0))?;

    let table = rows(&path)?;
    assert_eq!(table.len(), 1);
    assert_eq!(table[0][0], "timestep");
    Ok(())
}

#[test]
fn failed_pass_writes_no_row() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("avrami.csv");
    let mesh = two_blob_grid();
    let views = mesh.decompose(2, Assignment::Stripes)?;
    let counter = FloodCounter::new(FloodConfig::default().with_avrami(&path, Some(0.3)))?;

    counter.execute(&views, PassInputs::new(100.0))?;
    assert!(counter.execute(&views, PassInputs::new(-1.0).at(1, 1.0)).is_err());
    assert_eq!(rows(&path)?.len(), 1);
    counter.execute(&views, PassInputs::new(100.0).at(2, 2.0))?;
    assert_eq!(rows(&path)?.len(), 2);
    Ok(())
}

#[test]
fn avrami_without_equilibrium_is_rejected_at_setup() {
    let config = FloodConfig::default().with_avrami("unused.csv", None);
    assert!(matches!(
        FloodCounter::new(config),
        Err(ConfigError::MissingEquilibriumFraction)
    ));
}

#[test]
fn fraction_equal_to_equilibrium_is_undefined() {
    assert!(matches!(
        avrami_value(0.3, 0.3),
        Err(UndefinedValue::AtOrAboveEquilibrium { .. })
    ));
}
