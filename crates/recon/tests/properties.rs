// Property-based tests for classification, normalization and correlation.
// CI: 256 cases (default). Soak: PROPTEST_CASES=10000 cargo test --release

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use ledgerlink_recon::compare::{compare, Comparison, ComparisonRule};
use ledgerlink_recon::keytype::{classify_key, KeyType};
use ledgerlink_recon::{
    normalize, run, AttributeMapping, EntityId, MatchStatus, MemorySource, ReconMetadata,
    Relation, RunContext, System, Value,
};

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

fn config_64() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(64),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// Mostly numeric, sometimes text, sometimes null.
fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        3 => r"-?[0-9]{1,6}(\.[0-9]{1,2})?".prop_map(Value::from),
        1 => r"[a-zA-Z ]{0,15}".prop_map(Value::from),
        1 => Just(Value::Null),
    ]
}

fn arb_rule() -> impl Strategy<Value = ComparisonRule> {
    prop_oneof![
        Just(ComparisonRule::Exact),
        Just(ComparisonRule::Normalized),
        Just(ComparisonRule::DateOnly),
        (0.0..100.0f64).prop_map(|epsilon| ComparisonRule::NumericTolerance { epsilon }),
    ]
}

fn arb_mapping() -> impl Strategy<Value = AttributeMapping> {
    (
        prop::sample::select(vec!["sales", "SALES", "crm"]),
        prop::sample::select(vec!["invoice", "Invoice", "order"]),
        prop::bool::ANY,
        prop::sample::select(vec!["id", "amount", " amount", "owner", "note"]),
        prop::sample::select(vec!["id", "amt", "owner_id", "did", "note"]),
        prop::bool::ANY,
        prop::bool::weighted(0.8),
    )
        .prop_map(|(domain, entity, is_a, logical, attr, is_key, is_active)| AttributeMapping {
            domain: domain.into(),
            entity: entity.into(),
            system: if is_a { System::A } else { System::B },
            logical_name: logical.into(),
            attribute_name: attr.into(),
            is_key,
            is_active,
            reconciliation_type: None,
        })
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum KeyCategory {
    Both,
    AOnly,
    BOnly,
}

/// Unique keys, each assigned to A, B or both, with either identical or
/// independently drawn attribute values.
fn arb_dataset(
    max_keys: usize,
) -> impl Strategy<Value = (Relation, Relation, Vec<(String, KeyCategory, bool)>)> {
    proptest::collection::btree_set(r"[A-Za-z0-9]{1,8}", 1..=max_keys)
        .prop_flat_map(|keys| {
            let n = keys.len();
            let rows = proptest::collection::vec(
                (0u32..3, arb_value(), arb_value(), arb_value(), arb_value(), prop::bool::ANY),
                n,
            );
            (Just(keys.into_iter().collect::<Vec<_>>()), rows)
        })
        .prop_map(|(keys, rows)| {
            let mut a = Relation::new(&["id", "amount", "label"]);
            let mut b = Relation::new(&["id", "amt", "label"]);
            let mut categories = Vec::new();
            for (key, (cat, aa, al, ba, bl, same)) in keys.into_iter().zip(rows) {
                let cat = match cat {
                    0 => KeyCategory::Both,
                    1 => KeyCategory::AOnly,
                    _ => KeyCategory::BOnly,
                };
                let (ba, bl) = if same { (aa.clone(), al.clone()) } else { (ba, bl) };
                if cat != KeyCategory::BOnly {
                    a.push(vec![Value::from(key.as_str()), aa, al]);
                }
                if cat != KeyCategory::AOnly {
                    b.push(vec![Value::from(key.as_str()), ba, bl]);
                }
                categories.push((key, cat, same));
            }
            (a, b, categories)
        })
}

fn mapping(system: System, logical: &str, attr: &str, is_key: bool) -> AttributeMapping {
    AttributeMapping {
        domain: "sales".into(),
        entity: "invoice".into(),
        system,
        logical_name: logical.into(),
        attribute_name: attr.into(),
        is_key,
        is_active: true,
        reconciliation_type: None,
    }
}

fn invoice_metadata() -> ReconMetadata {
    let mut metadata = ReconMetadata::default();
    metadata.settings.parallelism = Some(2);
    metadata.mappings = vec![
        mapping(System::A, "id", "id", true),
        mapping(System::B, "id", "id", true),
        mapping(System::A, "amount", "amount", false),
        mapping(System::B, "amount", "amt", false),
        mapping(System::A, "label", "label", false),
        mapping(System::B, "label", "label", false),
    ];
    metadata
}

fn ctx() -> RunContext {
    RunContext::with_id("prop-run", Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap())
}

// ---------------------------------------------------------------------------
// Key-type classification
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config_256())]

    #[test]
    fn classify_key_is_case_insensitive(name in r"[A-Za-z_]{0,16}") {
        prop_assert_eq!(classify_key(&name), classify_key(&name.to_ascii_uppercase()));
        prop_assert_eq!(classify_key(&name), classify_key(&name.to_ascii_lowercase()));
    }

    #[test]
    fn only_reserved_names_are_shaped(name in r"[a-z_]{0,16}") {
        let expected = match name.as_str() {
            "owner_id" | "owner_type_id" => KeyType::Owner,
            "address_id" => KeyType::Address,
            "did" => KeyType::OpaqueId,
            _ => KeyType::Generic,
        };
        prop_assert_eq!(classify_key(&name), expected);
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config_256())]

    #[test]
    fn normalize_is_deterministic(rows in proptest::collection::vec(arb_mapping(), 0..24)) {
        prop_assert_eq!(normalize(&rows), normalize(&rows));
    }

    #[test]
    fn normalized_rows_are_paired_and_unique(rows in proptest::collection::vec(arb_mapping(), 0..24)) {
        let out = normalize(&rows);
        let mut seen = BTreeMap::new();
        for m in &out.mappings {
            prop_assert!(!m.attribute_a.is_empty());
            prop_assert!(!m.attribute_b.is_empty());
            prop_assert_eq!(m.key_type, classify_key(&m.attribute_b));
            let previous = seen.insert((m.entity.clone(), m.logical_name.clone()), ());
            prop_assert!(previous.is_none(), "duplicate group {}.{}", m.entity, m.logical_name);
        }
    }

    #[test]
    fn inactive_rows_never_contribute(rows in proptest::collection::vec(arb_mapping(), 0..24)) {
        let active: Vec<AttributeMapping> = rows.iter().filter(|r| r.is_active).cloned().collect();
        prop_assert_eq!(normalize(&rows).mappings, normalize(&active).mappings);
    }
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config_256())]

    #[test]
    fn null_against_null_is_equal(rule in arb_rule()) {
        prop_assert_eq!(compare(&Value::Null, &Value::Null, rule), Comparison::Equal);
    }

    #[test]
    fn one_sided_null_is_a_mismatch(v in arb_value(), rule in arb_rule()) {
        prop_assume!(!v.is_null());
        prop_assert_eq!(compare(&v, &Value::Null, rule), Comparison::Mismatch);
        prop_assert_eq!(compare(&Value::Null, &v, rule), Comparison::Mismatch);
    }

    #[test]
    fn every_rule_is_reflexive(v in arb_value(), rule in arb_rule()) {
        prop_assert_eq!(compare(&v, &v, rule), Comparison::Equal);
    }

    #[test]
    fn comparison_is_symmetric(x in arb_value(), y in arb_value(), rule in arb_rule()) {
        prop_assert_eq!(compare(&x, &y, rule), compare(&y, &x, rule));
    }
}

// ---------------------------------------------------------------------------
// End to end
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config_64())]

    #[test]
    fn every_key_lands_in_exactly_one_record((a, b, categories) in arb_dataset(12)) {
        let id = EntityId::new("sales", "invoice");
        let mut source = MemorySource::new();
        source.insert(id.clone(), System::A, a);
        source.insert(id.clone(), System::B, b);

        let report = run(&invoice_metadata(), &source, &ctx()).unwrap();
        prop_assert_eq!(report.failed().count(), 0);
        prop_assert_eq!(report.ledger.len(), categories.len());

        for r in &report.ledger.records {
            prop_assert!(r.is_consistent(), "inconsistent record {:?}", r);
        }

        for (key, cat, same) in &categories {
            let hits: Vec<_> = report
                .ledger
                .records
                .iter()
                .filter(|r| r.key_a.as_deref() == Some(key.as_str()) || r.key_b.as_deref() == Some(key.as_str()))
                .collect();
            prop_assert_eq!(hits.len(), 1, "key {} appears {} times", key, hits.len());
            let status = hits[0].match_status;
            match cat {
                KeyCategory::AOnly => prop_assert_eq!(status, MatchStatus::MissingInB),
                KeyCategory::BOnly => prop_assert_eq!(status, MatchStatus::MissingInA),
                KeyCategory::Both if *same => prop_assert_eq!(status, MatchStatus::Matched),
                KeyCategory::Both => prop_assert!(
                    status == MatchStatus::Matched || status == MatchStatus::Mismatch
                ),
            }
        }

        let s = &report.summary;
        prop_assert_eq!(
            s.matched + s.mismatched + s.missing_in_a + s.missing_in_b,
            s.total_records
        );
    }

    #[test]
    fn identical_sides_match_completely((a, _, _) in arb_dataset(12)) {
        prop_assume!(!a.is_empty());
        let id = EntityId::new("sales", "invoice");
        let mut b = a.clone();
        b.columns = vec!["id".into(), "amt".into(), "label".into()];
        let mut source = MemorySource::new();
        source.insert(id.clone(), System::A, a.clone());
        source.insert(id, System::B, b);

        let report = run(&invoice_metadata(), &source, &ctx()).unwrap();
        prop_assert_eq!(report.ledger.len(), a.len());
        prop_assert!(report
            .ledger
            .records
            .iter()
            .all(|r| r.match_status == MatchStatus::Matched && r.mismatch_count == 0));
    }
}
