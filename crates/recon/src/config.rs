use std::collections::{BTreeSet, HashSet};

use serde::Deserialize;

use crate::error::ReconError;
use crate::model::{AttributeMapping, ComparisonKind, EntityId, ReconciliationTypeRule};

// ---------------------------------------------------------------------------
// Top-level metadata
// ---------------------------------------------------------------------------

/// Everything a run is driven by: settings, reconciliation-type reference
/// data, the entity registry and the raw attribute mappings.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconMetadata {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub reconciliation_types: Vec<ReconciliationTypeRule>,
    #[serde(default)]
    pub entities: Vec<EntityRegistration>,
    #[serde(default)]
    pub mappings: Vec<AttributeMapping>,
}

impl Default for ReconMetadata {
    fn default() -> Self {
        let settings = Settings::default();
        let builtin = ReconciliationTypeRule::new(&settings.default_reconciliation_type, ComparisonKind::Exact);
        Self {
            settings,
            reconciliation_types: vec![builtin],
            entities: Vec::new(),
            mappings: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Label stamped into `source_system` / `target_system` for system A.
    pub system_a: String,
    pub system_b: String,
    /// Used by entities and attributes that do not name a type.
    pub default_reconciliation_type: String,
    /// Tolerance for `numeric_tolerance` rules without their own epsilon.
    pub numeric_epsilon: f64,
    /// Maximum concurrent entity tasks. Defaults to available parallelism.
    pub parallelism: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            system_a: "A".into(),
            system_b: "B".into(),
            default_reconciliation_type: "exact".into(),
            numeric_epsilon: 0.01,
            parallelism: None,
        }
    }
}

impl Settings {
    pub fn effective_parallelism(&self) -> usize {
        self.parallelism.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

// ---------------------------------------------------------------------------
// Entity registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct EntityRegistration {
    pub domain: String,
    pub entity: String,
    #[serde(default)]
    pub reconciliation_type: Option<String>,
}

/// A registered entity with its reconciliation type name resolved to a
/// string (not yet validated against the rule table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredEntity {
    pub id: EntityId,
    pub reconciliation_type: String,
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ReconMetadata {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let mut metadata: ReconMetadata =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        if metadata.reconciliation_types.is_empty() {
            let name = metadata.settings.default_reconciliation_type.clone();
            metadata
                .reconciliation_types
                .push(ReconciliationTypeRule::new(&name, ComparisonKind::Exact));
        }
        metadata.validate()?;
        Ok(metadata)
    }

    /// Global checks. Failures here abort the whole run; entity-scoped
    /// problems, including malformed mapping rows, are left to
    /// normalization and planning so siblings keep running.
    pub fn validate(&self) -> Result<(), ReconError> {
        let s = &self.settings;
        if !s.numeric_epsilon.is_finite() || s.numeric_epsilon < 0.0 {
            return Err(ReconError::ConfigValidation(format!(
                "numeric_epsilon must be a non-negative number, got {}",
                s.numeric_epsilon
            )));
        }
        if s.parallelism == Some(0) {
            return Err(ReconError::ConfigValidation(
                "parallelism must be at least 1".into(),
            ));
        }
        if s.system_a.trim().is_empty() || s.system_b.trim().is_empty() {
            return Err(ReconError::ConfigValidation(
                "system labels must not be empty".into(),
            ));
        }

        let mut names = HashSet::new();
        for rule in &self.reconciliation_types {
            if rule.name.trim().is_empty() {
                return Err(ReconError::ConfigValidation(
                    "reconciliation type with empty name".into(),
                ));
            }
            if !names.insert(rule.name.as_str()) {
                return Err(ReconError::ConfigValidation(format!(
                    "reconciliation type '{}' defined more than once",
                    rule.name
                )));
            }
            if let Some(eps) = rule.epsilon {
                if !eps.is_finite() || eps < 0.0 {
                    return Err(ReconError::ConfigValidation(format!(
                        "reconciliation type '{}': epsilon must be a non-negative number",
                        rule.name
                    )));
                }
            }
        }
        if !names.contains(s.default_reconciliation_type.as_str()) {
            return Err(ReconError::ConfigValidation(format!(
                "default reconciliation type '{}' is not defined",
                s.default_reconciliation_type
            )));
        }

        let mut registered = HashSet::new();
        for reg in &self.entities {
            if reg.domain.trim().is_empty() || reg.entity.trim().is_empty() {
                return Err(ReconError::ConfigValidation(
                    "entity registration with empty domain or entity".into(),
                ));
            }
            let id = EntityId::new(&reg.domain, &reg.entity);
            if !registered.insert(id.clone()) {
                return Err(ReconError::ConfigValidation(format!(
                    "entity {id} registered more than once"
                )));
            }
        }

        Ok(())
    }

    pub fn rule(&self, name: &str) -> Option<&ReconciliationTypeRule> {
        self.reconciliation_types.iter().find(|r| r.name == name)
    }

    /// Entities to reconcile, in run order.
    ///
    /// Explicit `[[entities]]` win. Without them every (domain, entity) that
    /// appears in the mapping rows is registered, active or not, so an
    /// entity whose mappings were all deactivated still surfaces as a fault.
    pub fn registry(&self) -> Vec<RegisteredEntity> {
        let default_type = &self.settings.default_reconciliation_type;
        if !self.entities.is_empty() {
            return self
                .entities
                .iter()
                .map(|reg| RegisteredEntity {
                    id: EntityId::new(&reg.domain, &reg.entity),
                    reconciliation_type: reg
                        .reconciliation_type
                        .clone()
                        .unwrap_or_else(|| default_type.clone()),
                })
                .collect();
        }

        let ids: BTreeSet<EntityId> = self
            .mappings
            .iter()
            .filter(|m| !m.domain.trim().is_empty() && !m.entity.trim().is_empty())
            .map(AttributeMapping::entity_id)
            .collect();
        ids.into_iter()
            .map(|id| RegisteredEntity {
                id,
                reconciliation_type: default_type.clone(),
            })
            .collect()
    }
}

/// Parse attribute-mapping metadata kept as a CSV reference dataset with
/// headers `domain,entity,system,logical_name,attribute_name,is_key,is_active,reconciliation_type`.
pub fn mappings_from_csv(csv_data: &str) -> Result<Vec<AttributeMapping>, ReconError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(csv_data.as_bytes());

    reader
        .deserialize()
        .enumerate()
        .map(|(i, row)| {
            row.map_err(|e| ReconError::ConfigParse(format!("mapping row {}: {e}", i + 1)))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Direction, JoinType, System};

    const VALID: &str = r#"
[settings]
system_a = "bos"
system_b = "crm"
default_reconciliation_type = "standard"
numeric_epsilon = 0.05
parallelism = 2

[[reconciliation_types]]
name = "standard"
comparison = "exact"

[[reconciliation_types]]
name = "money"
comparison = "numeric_tolerance"
join_type = "left"
direction = "one_way"
include_missing_in_a = false
match_priority = 10
epsilon = 0.5

[[entities]]
domain = "sales"
entity = "invoice"
reconciliation_type = "money"

[[mappings]]
domain = "sales"
entity = "invoice"
system = "A"
logical_name = "id"
attribute_name = "invoice_id"
is_key = true

[[mappings]]
domain = "sales"
entity = "invoice"
system = "b"
logical_name = "id"
attribute_name = "inv_no"
is_key = true
"#;

    #[test]
    fn parse_valid() {
        let md = ReconMetadata::from_toml(VALID).unwrap();
        assert_eq!(md.settings.system_a, "bos");
        assert_eq!(md.settings.numeric_epsilon, 0.05);
        assert_eq!(md.settings.effective_parallelism(), 2);
        assert_eq!(md.reconciliation_types.len(), 2);

        let money = md.rule("money").unwrap();
        assert_eq!(money.comparison, ComparisonKind::NumericTolerance);
        assert_eq!(money.join_type, JoinType::Left);
        assert_eq!(money.direction, Direction::OneWay);
        assert!(!money.include_missing_in_a);
        assert!(money.include_missing_in_b);
        assert_eq!(money.match_priority, 10);

        let standard = md.rule("standard").unwrap();
        assert_eq!(standard.join_type, JoinType::FullOuter);
        assert_eq!(standard.match_priority, 100);

        assert_eq!(md.mappings.len(), 2);
        assert_eq!(md.mappings[1].system, System::B);
        assert!(md.mappings[0].is_active);
    }

    #[test]
    fn explicit_registry() {
        let md = ReconMetadata::from_toml(VALID).unwrap();
        let reg = md.registry();
        assert_eq!(reg.len(), 1);
        assert_eq!(reg[0].id, EntityId::new("SALES", "invoice"));
        assert_eq!(reg[0].reconciliation_type, "money");
    }

    #[test]
    fn derived_registry_includes_inactive_entities() {
        let input = r#"
[[mappings]]
domain = "crm"
entity = "contact"
system = "A"
logical_name = "id"
attribute_name = "id"
is_key = true
is_active = false

[[mappings]]
domain = "billing"
entity = "account"
system = "A"
logical_name = "id"
attribute_name = "id"
is_key = true
"#;
        let md = ReconMetadata::from_toml(input).unwrap();
        let reg = md.registry();
        let ids: Vec<String> = reg.iter().map(|r| r.id.to_string()).collect();
        assert_eq!(ids, vec!["BILLING.account", "CRM.contact"]);
        assert!(reg.iter().all(|r| r.reconciliation_type == "exact"));
        // built-in default type injected
        assert!(md.rule("exact").is_some());
    }

    #[test]
    fn blank_mapping_rows_are_not_global_errors() {
        let data = "\
domain,entity,system,logical_name,attribute_name,is_key,is_active,reconciliation_type
d,good,A,id,id,true,true,
d,good,B,id,id,true,true,
d,bad,A,note,note,false,true,
d,bad,B,note,,false,false,
,,A,id,id,true,true,
";
        let mut md = ReconMetadata::default();
        md.mappings = mappings_from_csv(data).unwrap();
        assert!(md.validate().is_ok());
        let ids: Vec<String> = md.registry().iter().map(|r| r.id.to_string()).collect();
        assert_eq!(ids, vec!["D.bad", "D.good"]);
    }

    #[test]
    fn reject_missing_default_type() {
        let input = r#"
[settings]
default_reconciliation_type = "nope"

[[reconciliation_types]]
name = "exact"
"#;
        let err = ReconMetadata::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("'nope' is not defined"));
    }

    #[test]
    fn reject_duplicate_type() {
        let input = r#"
[[reconciliation_types]]
name = "exact"

[[reconciliation_types]]
name = "exact"
comparison = "normalized"
"#;
        let err = ReconMetadata::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("defined more than once"));
    }

    #[test]
    fn reject_negative_epsilon() {
        let err = ReconMetadata::from_toml("[settings]\nnumeric_epsilon = -1.0\n").unwrap_err();
        assert!(err.to_string().contains("numeric_epsilon"));
    }

    #[test]
    fn reject_zero_parallelism() {
        let err = ReconMetadata::from_toml("[settings]\nparallelism = 0\n").unwrap_err();
        assert!(err.to_string().contains("parallelism"));
    }

    #[test]
    fn reject_duplicate_registration() {
        let input = r#"
[[entities]]
domain = "sales"
entity = "invoice"

[[entities]]
domain = "SALES"
entity = "Invoice"
"#;
        let err = ReconMetadata::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("registered more than once"));
    }

    #[test]
    fn reject_bad_system() {
        let input = r#"
[[mappings]]
domain = "sales"
entity = "invoice"
system = "C"
logical_name = "id"
attribute_name = "id"
"#;
        assert!(matches!(
            ReconMetadata::from_toml(input),
            Err(ReconError::ConfigParse(_))
        ));
    }

    #[test]
    fn reject_unknown_comparison() {
        let input = r#"
[[reconciliation_types]]
name = "exact"
comparison = "fuzzy"
"#;
        assert!(ReconMetadata::from_toml(input).is_err());
    }

    #[test]
    fn csv_mappings() {
        let data = "\
domain,entity,system,logical_name,attribute_name,is_key,is_active,reconciliation_type
sales,invoice,A,id,invoice_id,true,true,
sales,invoice,B,id,inv_no,true,true,
sales,invoice,A,amount,amount,false,true,money
sales,invoice,B,amount,total,false,false,
";
        let rows = mappings_from_csv(data).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].reconciliation_type, None);
        assert_eq!(rows[2].reconciliation_type.as_deref(), Some("money"));
        assert!(!rows[3].is_active);
        assert_eq!(rows[1].system, System::B);
    }

    #[test]
    fn csv_mappings_bad_bool() {
        let data = "\
domain,entity,system,logical_name,attribute_name,is_key,is_active,reconciliation_type
sales,invoice,A,id,invoice_id,yes,true,
";
        let err = mappings_from_csv(data).unwrap_err();
        assert!(err.to_string().contains("mapping row 1"));
    }
}
