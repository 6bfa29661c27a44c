//! Default constants for floodmap configuration.
//!
//! All magic numbers are centralized here with documentation.

// =============================================================================
// Classification Defaults
// =============================================================================

/// Default seed threshold for `at-least` classification.
/// Order parameters in phase-field runs sit in [0, 1]; 0.5 splits the phases.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Default number of tracked field variables per entity.
pub const DEFAULT_VARIABLES: usize = 1;

// =============================================================================
// Configuration Loading
// =============================================================================

/// Environment variable prefix, e.g. `FLOODMAP_THRESHOLD__THRESHOLD=0.4`.
pub const ENV_PREFIX: &str = "FLOODMAP_";

/// Separator for nested keys in environment variables.
pub const ENV_NESTING_SEPARATOR: &str = "__";

// =============================================================================
// Partitioning Defaults
// =============================================================================

/// Default number of synthetic partitions when not specified.
/// Uses number of CPU cores, falling back to 4.
pub fn default_partition_count() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}

// =============================================================================
// Query / Export Defaults
// =============================================================================

/// Value reported for entities that belong to no region.
pub const UNASSIGNED_VALUE: f64 = -1.0;

/// Header row of the Avrami table.
pub const AVRAMI_HEADER: [&str; 4] = ["timestep", "time", "log_time", "avrami"];

/// Literal written into the Avrami table for undefined values.
pub const UNDEFINED_CELL: &str = "undefined";
