//! Setup-time configuration loading and validation.

use std::io::Write;

use floodmap_rs::{
    ColoringMode, ConfigError, EntityKind, FloodConfig, FloodCounter, MapLayout, ThresholdRule,
    VariableKind,
};
use tempfile::NamedTempFile;

#[test]
fn toml_file_configures_outputs_and_avrami() -> anyhow::Result<()> {
    let mut file = NamedTempFile::new()?;
    writeln!(
        file,
        r#"
        entity_kind = "element"
        variables = 2
        layout = "single"

        [threshold]
        mode = "at-least"
        threshold = 0.6
        connecting_threshold = 0.4

        [[outputs]]
        name = "grains"
        mode = "unique-region"
        target = "elemental"

        [[outputs]]
        name = "centers"
        mode = "centroid"
        target = "elemental"

        [avrami]
        file = "avrami.csv"
        equilibrium_fraction = 0.3
        "#
    )?;

    let config = FloodConfig::load(Some(file.path()))?;
    assert_eq!(config.entity_kind, EntityKind::Element);
    assert_eq!(config.layout, MapLayout::Single);
    assert_eq!(config.map_count(), 1);
    assert_eq!(config.threshold, ThresholdRule::with_connecting(0.6, 0.4));
    assert_eq!(config.outputs.len(), 2);

    let counter = FloodCounter::new(config)?;
    assert_eq!(
        counter.binding("centers").map(|b| b.mode()),
        Some(ColoringMode::Centroid)
    );
    Ok(())
}

#[test]
fn nodal_output_against_elemental_detection_is_rejected() {
    let err = FloodConfig::from_toml_str(
        r#"
        entity_kind = "element"

        [[outputs]]
        name = "grains"
        mode = "unique-region"
        target = "nodal"
        "#,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        ConfigError::IncompatibleColoring {
            mode: ColoringMode::UniqueRegion,
            target: VariableKind::Nodal,
            detection: EntityKind::Element,
            ..
        }
    ));
}

#[test]
fn elemental_only_modes_reject_nodal_targets() {
    for mode in [ColoringMode::Centroid, ColoringMode::ActiveBounds] {
        let config = FloodConfig::default()
            .with_entity_kind(EntityKind::Element)
            .with_output("out", mode, VariableKind::Nodal);
        assert!(matches!(
            FloodCounter::new(config),
            Err(ConfigError::IncompatibleColoring { .. })
        ));
    }
}

#[test]
fn inverted_band_is_rejected() {
    let config = FloodConfig::default().with_threshold(ThresholdRule::band(0.8, 0.2));
    assert!(matches!(
        FloodCounter::new(config),
        Err(ConfigError::InvalidThreshold(_))
    ));
}

#[test]
fn connecting_threshold_above_seed_is_rejected() {
    let config = FloodConfig::default().with_threshold(ThresholdRule::with_connecting(0.4, 0.6));
    assert!(FloodCounter::new(config).is_err());
}

#[test]
fn zero_variables_is_rejected() {
    let config = FloodConfig::default().with_variables(0, MapLayout::PerVariable);
    assert!(matches!(
        FloodCounter::new(config),
        Err(ConfigError::InvalidLayout(_))
    ));
}

#[test]
fn malformed_toml_is_a_load_error() {
    assert!(matches!(
        FloodConfig::from_toml_str("variables = \"many\""),
        Err(ConfigError::Load(_))
    ));
}
