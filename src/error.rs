//! # Error Types
//!
//! Three families of failure, matching how far they propagate:
//!
//! - [`ConfigError`]: rejected before any analysis pass runs (or, for per-pass
//!   scalar inputs such as the mesh volume, before the pass publishes anything).
//! - [`FloodError`]: aborts the current pass. The previously published snapshot,
//!   if any, stays queryable.
//! - [`UndefinedValue`]: a numeric edge condition reported in place of a NaN/Inf.

use crate::model::{EntityId, EntityKind, MapIndex, PartitionId, RegionId};
use crate::query::{ColoringMode, VariableKind};
use thiserror::Error;

/// Setup-time configuration errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Coloring mode cannot be evaluated for this target/detection pairing.
    #[error("{mode} coloring is not available for {target} outputs with {detection} feature detection: {reason}")]
    IncompatibleColoring {
        mode: ColoringMode,
        target: VariableKind,
        detection: EntityKind,
        reason: &'static str,
    },

    /// Avrami output requested without an equilibrium fraction.
    #[error("an equilibrium fraction of the second phase is required for Avrami analysis")]
    MissingEquilibriumFraction,

    /// Equilibrium fraction outside (0, 1].
    #[error("equilibrium fraction must lie in (0, 1], got {0}")]
    InvalidEquilibriumFraction(f64),

    /// Malformed threshold rule.
    #[error("invalid threshold rule: {0}")]
    InvalidThreshold(String),

    /// Total mesh volume unusable as a divisor.
    #[error("mesh volume must be positive and finite, got {0}")]
    InvalidMeshVolume(f64),

    /// Fewer than one tracked variable, or similar shape problems.
    #[error("invalid map layout: {0}")]
    InvalidLayout(String),

    /// Named output declared twice.
    #[error("duplicate coloring output name: {0}")]
    DuplicateOutput(String),

    /// Figment failed to extract the configuration.
    #[error("failed to load configuration: {0}")]
    Load(String),
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        ConfigError::Load(e.to_string())
    }
}

/// Errors raised while running or querying an analysis pass.
#[derive(Error, Debug)]
pub enum FloodError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Input shape problems detected on one partition.
    #[error("malformed input on partition {partition}: {message}")]
    MalformedInput {
        partition: PartitionId,
        message: String,
    },

    /// The global mesh description is unusable for decomposition.
    #[error("invalid mesh: {0}")]
    InvalidMesh(String),

    /// Ghost metadata or ghost classification disagrees between two partitions.
    #[error("inconsistent partitioning between {partition} and {peer}: {message}")]
    Consistency {
        partition: PartitionId,
        peer: PartitionId,
        message: String,
    },

    /// An entity was claimed by more than one owning partition.
    #[error("entity {entity} is owned by both {first} and {second}")]
    DuplicateOwner {
        entity: EntityId,
        first: PartitionId,
        second: PartitionId,
    },

    /// A peer aborted the pass; the root cause is reported by that peer.
    #[error("partition {partition} observed abort from {peer}: {reason}")]
    PeerAborted {
        partition: PartitionId,
        peer: PartitionId,
        reason: String,
    },

    /// The message fabric disconnected underneath a partition.
    #[error("communication failure on partition {partition}: {message}")]
    Communication {
        partition: PartitionId,
        message: String,
    },

    #[error("partition worker {0} panicked")]
    WorkerPanicked(PartitionId),

    /// A query was issued before any pass completed.
    #[error("no analysis pass has been finalized")]
    NotFinalized,

    #[error("unknown map index {0}")]
    UnknownMap(MapIndex),

    #[error("unknown region {region} in {map}")]
    UnknownRegion { map: MapIndex, region: RegionId },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FloodError {
    /// True for the echo a peer reports after another partition aborted.
    pub fn is_peer_abort(&self) -> bool {
        matches!(self, FloodError::PeerAborted { .. })
    }
}

/// Why a derived scalar could not be computed.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum UndefinedValue {
    #[error("volume fraction {fraction} is at or above the equilibrium fraction {equilibrium}")]
    AtOrAboveEquilibrium { fraction: f64, equilibrium: f64 },

    #[error("logarithm argument {0} is not positive")]
    NonPositiveLogArgument(f64),

    #[error("equilibrium fraction {0} is not positive")]
    NonPositiveEquilibrium(f64),

    #[error("result is not finite")]
    NonFinite,
}

pub type Result<T> = std::result::Result<T, FloodError>;
