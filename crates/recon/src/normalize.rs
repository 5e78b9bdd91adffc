use std::collections::BTreeMap;

use log::warn;

use crate::error::{FaultCause, ReconError, ReconWarning};
use crate::keytype::classify_key;
use crate::model::{AttributeMapping, EntityId, NormalizedMapping, System};

/// Output of [`normalize`]: the canonical mapping table plus everything an
/// operator should review. Derived and disposable; rebuilt on every run.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalization {
    pub mappings: Vec<NormalizedMapping>,
    pub warnings: Vec<ReconWarning>,
    /// First key fault per entity: a blank key row or a key group that
    /// lost one of its sides.
    key_faults: BTreeMap<EntityId, FaultCause>,
}

#[derive(Default)]
struct Group<'a> {
    a: Option<&'a AttributeMapping>,
    b: Option<&'a AttributeMapping>,
}

/// Pivot active A/B mapping rows sharing a logical attribute into one row
/// per (entity, logical attribute).
///
/// Output is ordered by (domain, entity, logical name), so identical input
/// always produces identical output.
pub fn normalize(rows: &[AttributeMapping]) -> Normalization {
    let mut groups: BTreeMap<(EntityId, String), Group<'_>> = BTreeMap::new();
    let mut warnings = Vec::new();
    let mut key_faults = BTreeMap::new();

    for row in rows.iter().filter(|r| r.is_active) {
        if row.domain.trim().is_empty() || row.entity.trim().is_empty() {
            warn!("mapping row without domain or entity skipped");
            continue;
        }
        let entity = row.entity_id();
        let logical_name = row.logical_name.trim().to_string();
        if logical_name.is_empty() || row.attribute_name.trim().is_empty() {
            if row.is_key {
                key_faults
                    .entry(entity.clone())
                    .or_insert_with(|| FaultCause::IncompleteKey {
                        logical_name: logical_name.clone(),
                        system: row.system,
                    });
            }
            warnings.push(ReconWarning::IncompleteMapping {
                entity,
                logical_name,
                system: row.system,
            });
            continue;
        }
        let group = groups
            .entry((entity.clone(), logical_name.clone()))
            .or_default();
        let slot = match row.system {
            System::A => &mut group.a,
            System::B => &mut group.b,
        };
        if slot.is_some() {
            warnings.push(ReconWarning::DuplicateMapping {
                entity,
                logical_name,
                system: row.system,
            });
            continue;
        }
        *slot = Some(row);
    }

    let mut mappings = Vec::new();

    for ((entity, logical_name), group) in groups {
        let (a, b) = match (group.a, group.b) {
            (Some(a), Some(b)) => (a, b),
            (Some(only), None) | (None, Some(only)) => {
                if only.is_key {
                    key_faults
                        .entry(entity.clone())
                        .or_insert_with(|| FaultCause::UnpairedKey {
                            logical_name: logical_name.clone(),
                            present_on: only.system,
                        });
                }
                warnings.push(ReconWarning::MappingDropped {
                    entity,
                    logical_name,
                    missing: only.system.other(),
                });
                continue;
            }
            (None, None) => continue,
        };

        if a.is_key != b.is_key {
            warnings.push(ReconWarning::KeyDeclaration {
                entity: entity.clone(),
                logical_name: logical_name.clone(),
                keyed_on: if a.is_key { System::A } else { System::B },
            });
        }

        let attribute_b = b.attribute_name.trim().to_string();
        mappings.push(NormalizedMapping {
            key_type: classify_key(&attribute_b),
            entity,
            logical_name,
            attribute_a: a.attribute_name.trim().to_string(),
            attribute_b,
            is_key: a.is_key || b.is_key,
            type_a: declared_type(a),
            type_b: declared_type(b),
        });
    }

    for w in &warnings {
        warn!("{w}");
    }

    Normalization {
        mappings,
        warnings,
        key_faults,
    }
}

fn declared_type(row: &AttributeMapping) -> Option<String> {
    row.reconciliation_type
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

impl Normalization {
    /// The entity's slice of the mapping table, in normalized order.
    ///
    /// Fails when the entity cannot be correlated: a key row is incomplete,
    /// a key attribute lost one of its sides, or no active key mapping
    /// survived.
    pub fn for_entity(&self, entity: &EntityId) -> Result<Vec<&NormalizedMapping>, ReconError> {
        if let Some(cause) = self.key_faults.get(entity) {
            return Err(ReconError::configuration(entity, cause.clone()));
        }

        let rows: Vec<&NormalizedMapping> = self
            .mappings
            .iter()
            .filter(|m| &m.entity == entity)
            .collect();

        if !rows.iter().any(|m| m.is_key) {
            return Err(ReconError::configuration(entity, FaultCause::NoActiveKeyMappings));
        }
        Ok(rows)
    }

    pub fn warnings_for<'a>(
        &'a self,
        entity: &'a EntityId,
    ) -> impl Iterator<Item = &'a ReconWarning> + 'a {
        self.warnings.iter().filter(move |w| w.entity() == entity)
    }
}
