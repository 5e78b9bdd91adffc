//! `ledgerlink-recon`: metadata-driven reconciliation of two systems.
//!
//! Pure engine crate: receives attribute-mapping metadata and a source of
//! staged relations, returns a value-free unified ledger. No CLI.
//!
//! A run has two phases. [`plan::plan_run`] normalizes the mappings and
//! builds join/comparison IR per entity without touching data;
//! [`engine::execute`] fetches the staged relations and reconciles each
//! entity on its own worker.

pub mod classify;
pub mod compare;
pub mod config;
pub mod engine;
pub mod error;
pub mod keytype;
pub mod ledger;
pub mod matcher;
pub mod model;
pub mod normalize;
pub mod plan;
pub mod relation;
pub mod summary;

pub use config::ReconMetadata;
pub use engine::{execute, reconcile_entity, run, RunContext};
pub use error::{FaultCause, ReconError, ReconWarning};
pub use keytype::{classify_key, KeyType};
pub use ledger::UnifiedLedger;
pub use model::{AttributeMapping, EntityId, MatchStatus, ReconciliationRecord, System, Value};
pub use normalize::normalize;
pub use plan::plan_run;
pub use relation::{CsvSource, MemorySource, Relation, RelationSource};
pub use summary::{RunReport, RunStatus};
