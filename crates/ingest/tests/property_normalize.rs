// Property-based tests for column normalization.
// CI: 256 cases (default). Soak: PROPTEST_CASES=10000 cargo test --release

use proptest::prelude::*;
use rawsync_ingest::normalize::{default_rules, ColumnNormalizer, NormalizeRule};
use rawsync_ingest::RecordSet;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn config_256() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(256),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// Column names biased towards the prefixes and rename sources the default
/// rules care about.
fn arb_column() -> impl Strategy<Value = String> {
    prop_oneof![
        2 => r"[a-z_]{1,12}",
        1 => r"[a-z]{1,8}".prop_map(|s| format!("department_{s}")),
        1 => r"[a-z]{1,8}".prop_map(|s| format!("department_department_{s}")),
        1 => prop::sample::select(vec![
            "employee_id".to_string(),
            "ad_id".to_string(),
            "user_id".to_string(),
            "id".to_string(),
            "department_".to_string(),
        ]),
    ]
}

fn arb_entity() -> impl Strategy<Value = String> {
    prop::sample::select(vec![
        "department".to_string(),
        "employee".to_string(),
        "ads_click".to_string(),
        "revenue_from_ads".to_string(),
        "number_of_clicks_weekly".to_string(),
        "site".to_string(),
        "unrouted".to_string(),
    ])
}

fn record_set(columns: Vec<String>) -> RecordSet {
    RecordSet::new(columns)
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config_256())]

    #[test]
    fn column_normalization_is_idempotent(column in arb_column(), entity in arb_entity()) {
        let normalizer = ColumnNormalizer::with_defaults().unwrap();
        let once = normalizer.normalize_column(&column, &entity);
        let twice = normalizer.normalize_column(&once, &entity);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn record_set_normalization_is_idempotent(
        columns in prop::collection::vec(arb_column(), 1..8),
        entity in arb_entity(),
    ) {
        let normalizer = ColumnNormalizer::with_defaults().unwrap();
        if let Ok(once) = normalizer.normalize(&record_set(columns), &entity) {
            let twice = normalizer.normalize(&once, &entity).unwrap();
            prop_assert_eq!(once.columns(), twice.columns());
        }
    }

    #[test]
    fn normalized_names_are_never_empty(column in arb_column(), entity in arb_entity()) {
        let normalizer = ColumnNormalizer::with_defaults().unwrap();
        prop_assert!(!normalizer.normalize_column(&column, &entity).is_empty());
    }

    #[test]
    fn unmatched_entities_pass_columns_through(columns in prop::collection::vec(arb_column(), 1..8)) {
        let normalizer = ColumnNormalizer::new(&[NormalizeRule::new("employee").strip("department_")]).unwrap();
        let input = record_set(columns);
        let output = normalizer.normalize(&input, "unrouted").unwrap();
        prop_assert_eq!(input.columns(), output.columns());
    }
}

#[test]
fn default_rules_validate() {
    assert!(ColumnNormalizer::new(&default_rules()).is_ok());
}
