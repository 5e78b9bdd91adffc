//! Planning phase: metadata in, explicit join/comparison IR out. No I/O.
//!
//! The executor in [`crate::engine`] consumes an [`EntityPlan`]; nothing in
//! here ever builds a query string from metadata.

use log::debug;
use serde::Serialize;

use crate::compare::ComparisonRule;
use crate::config::ReconMetadata;
use crate::error::{FaultCause, ReconError};
use crate::keytype::KeyType;
use crate::model::{EntityId, NormalizedMapping, ReconciliationTypeRule};
use crate::normalize::{normalize, Normalization};

// ---------------------------------------------------------------------------
// Join IR
// ---------------------------------------------------------------------------

/// `a.column_a = b.column_b`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinPredicate {
    pub column_a: String,
    pub column_b: String,
    pub key_type: KeyType,
}

/// Conjunction of equality predicates correlating an A record with its B
/// counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinPlan {
    pub predicates: Vec<JoinPredicate>,
}

impl JoinPlan {
    /// Human-readable form for diagnostics, e.g. `a.id = b.id AND a.owner = b.owner_id`.
    pub fn describe(&self) -> String {
        self.predicates
            .iter()
            .map(|p| format!("a.{} = b.{}", p.column_a, p.column_b))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

/// Build the join predicate set from an entity's normalized rows.
///
/// Key rows are taken in `attribute_a` order. OWNER, ADDRESS and OPAQUE_ID
/// keys bind to the fixed B columns `owner_id`, `address_id` and `did`;
/// GENERIC keys bind to their mapped B attribute.
pub fn build_join_plan(
    entity: &EntityId,
    rows: &[&NormalizedMapping],
) -> Result<JoinPlan, ReconError> {
    let mut keys: Vec<&NormalizedMapping> = rows.iter().copied().filter(|m| m.is_key).collect();
    if keys.is_empty() {
        return Err(ReconError::configuration(entity, FaultCause::NoKeyPredicates));
    }
    keys.sort_by(|x, y| {
        x.attribute_a
            .cmp(&y.attribute_a)
            .then_with(|| x.attribute_b.cmp(&y.attribute_b))
    });

    let predicates = keys
        .into_iter()
        .map(|m| JoinPredicate {
            column_a: m.attribute_a.clone(),
            column_b: m.key_type.join_target(&m.attribute_b).to_string(),
            key_type: m.key_type,
        })
        .collect();

    Ok(JoinPlan { predicates })
}

// ---------------------------------------------------------------------------
// Comparison IR
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeRule {
    pub attribute_a: String,
    pub attribute_b: String,
    pub rule: ComparisonRule,
}

/// Non-key attributes to compare, in normalized order.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ComparisonPlan {
    pub rules: Vec<AttributeRule>,
}

// ---------------------------------------------------------------------------
// Entity + run plans
// ---------------------------------------------------------------------------

/// Everything one entity task needs. Owned, so tasks share nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityPlan {
    pub entity: EntityId,
    pub rule: ReconciliationTypeRule,
    pub join: JoinPlan,
    pub comparison: ComparisonPlan,
    pub system_a: String,
    pub system_b: String,
}

#[derive(Debug, Clone)]
pub struct PlannedEntity {
    pub entity: EntityId,
    pub plan: Result<EntityPlan, ReconError>,
}

#[derive(Debug, Clone)]
pub struct RunPlan {
    pub normalization: Normalization,
    pub entities: Vec<PlannedEntity>,
    pub parallelism: usize,
}

impl RunPlan {
    pub fn entity(&self, id: &EntityId) -> Option<&PlannedEntity> {
        self.entities.iter().find(|e| &e.entity == id)
    }

    /// Narrow the run, e.g. to reconcile a single entity.
    pub fn retain(&mut self, mut keep: impl FnMut(&EntityId) -> bool) {
        self.entities.retain(|e| keep(&e.entity));
    }
}

/// Normalize the mappings once and plan every registered entity. Entity
/// faults are kept per entity; they never fail the whole plan.
pub fn plan_run(metadata: &ReconMetadata) -> RunPlan {
    let normalization = normalize(&metadata.mappings);
    let entities = metadata
        .registry()
        .into_iter()
        .map(|reg| PlannedEntity {
            plan: plan_entity(&reg.id, &reg.reconciliation_type, &normalization, metadata),
            entity: reg.id,
        })
        .collect();

    RunPlan {
        normalization,
        entities,
        parallelism: metadata.settings.effective_parallelism(),
    }
}

pub fn plan_entity(
    entity: &EntityId,
    reconciliation_type: &str,
    normalization: &Normalization,
    metadata: &ReconMetadata,
) -> Result<EntityPlan, ReconError> {
    let rule = lookup(entity, reconciliation_type, metadata)?;
    let rows = normalization.for_entity(entity)?;
    let join = build_join_plan(entity, &rows)?;
    debug!("{entity}: join on {}", join.describe());

    let mut comparison = ComparisonPlan::default();
    for m in rows.iter().filter(|m| !m.is_key) {
        let governing = governing_rule(entity, m, rule, metadata)?;
        let epsilon = governing.epsilon.unwrap_or(metadata.settings.numeric_epsilon);
        comparison.rules.push(AttributeRule {
            attribute_a: m.attribute_a.clone(),
            attribute_b: m.attribute_b.clone(),
            rule: ComparisonRule::resolve(governing.comparison, epsilon),
        });
    }

    Ok(EntityPlan {
        entity: entity.clone(),
        rule: rule.clone(),
        join,
        comparison,
        system_a: metadata.settings.system_a.clone(),
        system_b: metadata.settings.system_b.clone(),
    })
}

fn lookup<'m>(
    entity: &EntityId,
    name: &str,
    metadata: &'m ReconMetadata,
) -> Result<&'m ReconciliationTypeRule, ReconError> {
    metadata.rule(name).ok_or_else(|| {
        ReconError::configuration(entity, FaultCause::UnknownReconciliationType(name.to_string()))
    })
}

/// The rule governing one attribute: the type declared on either side with
/// the lowest `match_priority` (A wins ties), else the entity's type.
fn governing_rule<'m>(
    entity: &EntityId,
    mapping: &NormalizedMapping,
    entity_rule: &'m ReconciliationTypeRule,
    metadata: &'m ReconMetadata,
) -> Result<&'m ReconciliationTypeRule, ReconError> {
    let mut best: Option<&ReconciliationTypeRule> = None;
    for name in [&mapping.type_a, &mapping.type_b].into_iter().flatten() {
        let candidate = lookup(entity, name, metadata)?;
        if best.map_or(true, |b| candidate.match_priority < b.match_priority) {
            best = Some(candidate);
        }
    }
    Ok(best.unwrap_or(entity_rule))
}
