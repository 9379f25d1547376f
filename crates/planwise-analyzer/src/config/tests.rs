use super::*;
use indoc::indoc;
use pretty_assertions::assert_eq;

#[test]
fn test_defaults() {
    let config = AdvisorConfig::default();
    assert_eq!(config.stats_divergence_threshold, 0.5);
    assert_eq!(config.nested_loop_cost_threshold, 1000.0);
    assert!(config.is_rule_enabled("MISSING_INDEX_001"));
    assert!(config.validate().is_ok());
}

#[test]
fn test_partial_table_keeps_defaults() {
    let config = AdvisorConfig::from_toml_str(indoc! {r#"
        nested_loop_cost_threshold = 250.0
        disabled_rules = ["unused_index_001"]
    "#})
    .unwrap();

    assert_eq!(config.nested_loop_cost_threshold, 250.0);
    assert_eq!(config.impact_majority_share, 0.5);
    assert!(!config.is_rule_enabled("UNUSED_INDEX_001"));
}

#[test]
fn test_out_of_range_share_is_rejected() {
    let err = AdvisorConfig::from_toml_str("impact_majority_share = 1.5").unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Invalid {
            field: "impact_majority_share",
            ..
        }
    ));
}

#[test]
fn test_floor_above_majority_is_rejected() {
    let err = AdvisorConfig::from_toml_str(indoc! {"
        impact_floor_share = 0.6
        impact_majority_share = 0.4
    "})
    .unwrap_err();
    assert!(err.to_string().contains("impact_floor_share"));
}

#[test]
fn test_malformed_toml() {
    let err = AdvisorConfig::from_toml_str("impact_floor_share = ").unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)));
}

#[test]
fn test_builders_clamp() {
    let config = AdvisorConfig::new()
        .with_stats_divergence_threshold(3.0)
        .with_nested_loop_cost_threshold(-5.0)
        .with_impact_shares(0.9, 0.6);
    assert_eq!(config.stats_divergence_threshold, 1.0);
    assert_eq!(config.nested_loop_cost_threshold, 0.0);
    assert_eq!(config.impact_floor_share, 0.6);
    assert!(config.validate().is_ok());
}
