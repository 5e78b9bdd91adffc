use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{ReconError, ReconWarning};
use crate::ledger::UnifiedLedger;
use crate::model::{EntityId, MatchStatus, ReconciliationRecord};

/// Every registered entity reconciled.
pub const EXIT_SUCCESS: u8 = 0;
/// Some entities failed; the ledger holds the others.
pub const EXIT_PARTIAL: u8 = 3;
/// No entity reconciled.
pub const EXIT_FAILED: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn from_outcomes(outcomes: &[EntityOutcome]) -> Self {
        let failed = outcomes.iter().filter(|o| !o.succeeded()).count();
        if failed == 0 {
            Self::Success
        } else if failed < outcomes.len() {
            Self::Partial
        } else {
            Self::Failed
        }
    }

    pub fn exit_code(self) -> u8 {
        match self {
            Self::Success => EXIT_SUCCESS,
            Self::Partial => EXIT_PARTIAL,
            Self::Failed => EXIT_FAILED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Configuration,
    DataAccess,
    Other,
}

impl From<&ReconError> for FaultKind {
    fn from(err: &ReconError) -> Self {
        match err {
            ReconError::Configuration { .. } => Self::Configuration,
            ReconError::DataAccess { .. } => Self::DataAccess,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntityResult {
    Succeeded { records: usize },
    Failed { kind: FaultKind, cause: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityOutcome {
    pub entity: EntityId,
    pub result: EntityResult,
    pub warnings: Vec<ReconWarning>,
}

impl EntityOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.result, EntityResult::Succeeded { .. })
    }

    pub fn failure(entity: EntityId, err: &ReconError, warnings: Vec<ReconWarning>) -> Self {
        Self {
            entity,
            result: EntityResult::Failed {
                kind: err.into(),
                cause: err.to_string(),
            },
            warnings,
        }
    }
}

/// Record counts per match status.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerSummary {
    pub total_records: usize,
    pub matched: usize,
    pub mismatched: usize,
    pub missing_in_a: usize,
    pub missing_in_b: usize,
    /// Mismatch occurrences per attribute name.
    pub mismatch_columns: BTreeMap<String, usize>,
}

pub fn compute_summary(records: &[ReconciliationRecord]) -> LedgerSummary {
    let mut summary = LedgerSummary {
        total_records: records.len(),
        ..LedgerSummary::default()
    };

    for r in records {
        match r.match_status {
            MatchStatus::Matched => summary.matched += 1,
            MatchStatus::Mismatch => summary.mismatched += 1,
            MatchStatus::MissingInA => summary.missing_in_a += 1,
            MatchStatus::MissingInB => summary.missing_in_b += 1,
        }
        for col in &r.mismatch_columns {
            *summary.mismatch_columns.entry(col.clone()).or_insert(0) += 1;
        }
    }

    summary
}

/// Result of one run: identity, outcome per entity, and the ledger holding
/// only the successfully reconciled entities' rows.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub load_timestamp: DateTime<Utc>,
    pub status: RunStatus,
    pub summary: LedgerSummary,
    pub outcomes: Vec<EntityOutcome>,
    /// Every normalization warning, including those of unregistered entities.
    pub warnings: Vec<ReconWarning>,
    pub ledger: UnifiedLedger,
}

impl RunReport {
    pub fn exit_code(&self) -> u8 {
        self.status.exit_code()
    }

    pub fn failed(&self) -> impl Iterator<Item = &EntityOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }

    /// Operator summary: succeeded, failed and warned entities.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "run {} ({}): {:?}, {} record(s)",
            self.run_id,
            self.load_timestamp.to_rfc3339(),
            self.status,
            self.summary.total_records
        );
        let _ = writeln!(
            out,
            "  matched={} mismatch={} missing_in_a={} missing_in_b={}",
            self.summary.matched,
            self.summary.mismatched,
            self.summary.missing_in_a,
            self.summary.missing_in_b
        );
        for o in &self.outcomes {
            match &o.result {
                EntityResult::Succeeded { records } => {
                    let _ = writeln!(out, "  ok     {} ({records} record(s))", o.entity);
                }
                EntityResult::Failed { cause, .. } => {
                    let _ = writeln!(out, "  FAILED {}: {cause}", o.entity);
                }
            }
            for w in &o.warnings {
                let _ = writeln!(out, "  warn   {w}");
            }
        }
        out
    }
}
