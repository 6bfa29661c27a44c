//! # Aggregate Metrics
//!
//! Volume fraction and Avrami kinetics derived from a finalized registry,
//! plus the `timestep,time,log_time,avrami` table writer.

use crate::config::{AVRAMI_HEADER, UNDEFINED_CELL};
use crate::error::{ConfigError, UndefinedValue};
use crate::model::MapIndex;
use crate::registry::RegionRegistry;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Scalars derived from one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateMetrics {
    /// Sum of all region volumes across maps.
    pub total_volume: f64,
    pub mesh_volume: f64,
    pub volume_fraction: f64,
    pub per_map_fraction: Vec<(MapIndex, f64)>,
    /// Present only when Avrami analysis is configured.
    pub avrami: Option<Result<f64, UndefinedValue>>,
}

impl AggregateMetrics {
    pub fn compute(
        registry: &RegionRegistry,
        mesh_volume: f64,
        equilibrium: Option<f64>,
    ) -> Result<Self, ConfigError> {
        let total_volume = registry.total_volume();
        let volume_fraction = volume_fraction(total_volume, mesh_volume)?;
        let per_map_fraction = registry
            .maps()
            .map(|(map, regions)| (map, regions.total_volume() / mesh_volume))
            .collect();
        let avrami = equilibrium.map(|eq| avrami_value(volume_fraction, eq));

        Ok(Self {
            total_volume,
            mesh_volume,
            volume_fraction,
            per_map_fraction,
            avrami,
        })
    }
}

/// `feature_volume / mesh_volume`; the mesh volume must be positive and finite.
pub fn volume_fraction(feature_volume: f64, mesh_volume: f64) -> Result<f64, ConfigError> {
    if !mesh_volume.is_finite() || mesh_volume <= 0.0 {
        return Err(ConfigError::InvalidMeshVolume(mesh_volume));
    }
    Ok(feature_volume / mesh_volume)
}

/// `ln(ln(1 / (1 - fraction / equilibrium)))`.
pub fn avrami_value(fraction: f64, equilibrium: f64) -> Result<f64, UndefinedValue> {
    if !fraction.is_finite() || !equilibrium.is_finite() {
        return Err(UndefinedValue::NonFinite);
    }
    if equilibrium <= 0.0 {
        return Err(UndefinedValue::NonPositiveEquilibrium(equilibrium));
    }
    if fraction >= equilibrium {
        return Err(UndefinedValue::AtOrAboveEquilibrium {
            fraction,
            equilibrium,
        });
    }
    let inner = 1.0 / (1.0 - fraction / equilibrium);
    let log_inner = inner.ln();
    if log_inner <= 0.0 {
        return Err(UndefinedValue::NonPositiveLogArgument(log_inner));
    }
    let value = log_inner.ln();
    if !value.is_finite() {
        return Err(UndefinedValue::NonFinite);
    }
    Ok(value)
}

/// `ln(time)`, undefined for non-positive times.
pub fn log_time(time: f64) -> Result<f64, UndefinedValue> {
    if !time.is_finite() {
        return Err(UndefinedValue::NonFinite);
    }
    if time <= 0.0 {
        return Err(UndefinedValue::NonPositiveLogArgument(time));
    }
    Ok(time.ln())
}

/// Appending writer for the Avrami table.
#[derive(Debug)]
pub struct AvramiLog {
    path: PathBuf,
}

impl AvramiLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Timestep 0 truncates the file and writes only the header; every later
    /// timestep appends one data row.
    pub fn record(
        &mut self,
        timestep: u64,
        time: f64,
        avrami: Result<f64, UndefinedValue>,
    ) -> std::io::Result<()> {
        if timestep == 0 {
            let mut writer = BufWriter::new(File::create(&self.path)?);
            writeln!(writer, "{}", AVRAMI_HEADER.join(","))?;
            writer.flush()?;
            debug!(path = %self.path.display(), "avrami header written");
            return Ok(());
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        writeln!(
            writer,
            "{},{},{},{}",
            timestep,
            time,
            cell(log_time(time)),
            cell(avrami)
        )?;
        writer.flush()?;
        debug!(path = %self.path.display(), timestep, "avrami row written");
        Ok(())
    }
}

fn cell(value: Result<f64, UndefinedValue>) -> String {
    match value {
        Ok(v) => v.to_string(),
        Err(_) => UNDEFINED_CELL.to_string(),
    }
}
