use std::fmt;

use thiserror::Error;

use crate::model::{EntityId, System};

/// Why an entity's metadata cannot be reconciled. Never retried: the
/// metadata has to be fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultCause {
    /// No active mapping row for the entity is marked as key.
    NoActiveKeyMappings,
    /// The join builder was handed an empty key set.
    NoKeyPredicates,
    /// A key attribute exists on one system only.
    UnpairedKey { logical_name: String, present_on: System },
    /// An active key mapping row has a blank logical or attribute name.
    IncompleteKey { logical_name: String, system: System },
    /// An entity or attribute names a reconciliation type that is not defined.
    UnknownReconciliationType(String),
}

impl fmt::Display for FaultCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoActiveKeyMappings => write!(f, "no active key mappings"),
            Self::NoKeyPredicates => write!(f, "no key predicates to correlate on"),
            Self::UnpairedKey { logical_name, present_on } => write!(
                f,
                "key attribute '{logical_name}' is only mapped on system {present_on}"
            ),
            Self::IncompleteKey { logical_name, system } => write!(
                f,
                "key mapping '{logical_name}' on system {system} has a blank name"
            ),
            Self::UnknownReconciliationType(name) => {
                write!(f, "unknown reconciliation type '{name}'")
            }
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ReconError {
    /// TOML / CSV metadata could not be deserialized.
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// Metadata deserialized but is globally inconsistent.
    #[error("config validation error: {0}")]
    ConfigValidation(String),

    /// Fatal configuration fault scoped to one entity.
    #[error("{entity}: configuration fault: {cause}")]
    Configuration { entity: EntityId, cause: FaultCause },

    /// Staged relation missing or unreadable.
    #[error("{entity}: data access fault on system {system}: {message}")]
    DataAccess {
        entity: EntityId,
        system: System,
        message: String,
    },

    /// An entity task panicked; only that entity is failed.
    #[error("{entity}: reconciliation task panicked")]
    TaskPanicked { entity: EntityId },

    #[error("IO error: {0}")]
    Io(String),
}

impl ReconError {
    pub fn configuration(entity: &EntityId, cause: FaultCause) -> Self {
        Self::Configuration {
            entity: entity.clone(),
            cause,
        }
    }

    pub fn data_access(entity: &EntityId, system: System, message: impl Into<String>) -> Self {
        Self::DataAccess {
            entity: entity.clone(),
            system,
            message: message.into(),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// The entity this error is scoped to, if any.
    pub fn entity(&self) -> Option<&EntityId> {
        match self {
            Self::Configuration { entity, .. }
            | Self::DataAccess { entity, .. }
            | Self::TaskPanicked { entity } => Some(entity),
            _ => None,
        }
    }
}

/// Non-fatal findings from normalization. They reduce comparison coverage
/// but never stop a run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconWarning {
    /// A mapping group had no row for one of the systems and was dropped.
    MappingDropped {
        entity: EntityId,
        logical_name: String,
        missing: System,
    },
    /// One system marks the attribute as key, the other does not.
    KeyDeclaration {
        entity: EntityId,
        logical_name: String,
        keyed_on: System,
    },
    /// An active row with a blank logical or attribute name was skipped.
    IncompleteMapping {
        entity: EntityId,
        logical_name: String,
        system: System,
    },
    /// More than one active row for the same system; the first was kept.
    DuplicateMapping {
        entity: EntityId,
        logical_name: String,
        system: System,
    },
}

impl ReconWarning {
    pub fn entity(&self) -> &EntityId {
        match self {
            Self::MappingDropped { entity, .. }
            | Self::KeyDeclaration { entity, .. }
            | Self::IncompleteMapping { entity, .. }
            | Self::DuplicateMapping { entity, .. } => entity,
        }
    }
}

impl fmt::Display for ReconWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MappingDropped { entity, logical_name, missing } => write!(
                f,
                "{entity}: mapping '{logical_name}' dropped, no attribute on system {missing}"
            ),
            Self::KeyDeclaration { entity, logical_name, keyed_on } => write!(
                f,
                "{entity}: '{logical_name}' is declared key on system {keyed_on} only, treating as key"
            ),
            Self::IncompleteMapping { entity, logical_name, system } => write!(
                f,
                "{entity}: mapping '{logical_name}' on system {system} has a blank name, row skipped"
            ),
            Self::DuplicateMapping { entity, logical_name, system } => write!(
                f,
                "{entity}: '{logical_name}' mapped more than once on system {system}, first row kept"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_fault_names_entity() {
        let entity = EntityId::new("sales", "Invoice");
        let err = ReconError::configuration(&entity, FaultCause::NoActiveKeyMappings);
        assert_eq!(err.to_string(), "SALES.invoice: configuration fault: no active key mappings");
        assert!(err.is_configuration());
        assert_eq!(err.entity(), Some(&entity));
    }

    #[test]
    fn parse_errors_have_no_entity() {
        let err = ReconError::ConfigParse("bad".into());
        assert!(err.entity().is_none());
        assert!(!err.is_configuration());
    }
}
