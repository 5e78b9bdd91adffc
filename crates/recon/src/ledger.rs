use std::io;

use serde::Serialize;

use crate::error::ReconError;
use crate::model::{EntityId, ReconciliationRecord};

/// Column order of the unified ledger. Downstream dashboards depend on it.
pub const LEDGER_COLUMNS: [&str; 12] = [
    "domain",
    "entity",
    "source_system",
    "target_system",
    "key_a",
    "key_b",
    "match_status",
    "mismatch_columns",
    "mismatch_count",
    "reconciliation_type",
    "run_id",
    "load_timestamp",
];

/// Separator for `mismatch_columns` in flat (CSV) output.
pub const MISMATCH_SEPARATOR: &str = ";";

/// All reconciliation records of one run, across entities.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UnifiedLedger {
    pub records: Vec<ReconciliationRecord>,
}

impl UnifiedLedger {
    /// Concatenate per-entity record sets as-is. Order across entities is
    /// the order given and carries no meaning.
    pub fn aggregate<I>(sets: I) -> Self
    where
        I: IntoIterator<Item = Vec<ReconciliationRecord>>,
    {
        Self {
            records: sets.into_iter().flatten().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn for_entity<'a>(
        &'a self,
        entity: &'a EntityId,
    ) -> impl Iterator<Item = &'a ReconciliationRecord> + 'a {
        self.records
            .iter()
            .filter(move |r| r.domain == entity.domain && r.entity == entity.entity)
    }

    /// Header + one line per record, in [`LEDGER_COLUMNS`] order.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<(), ReconError> {
        let mut w = csv::Writer::from_writer(writer);
        let io_err = |e: csv::Error| ReconError::Io(e.to_string());

        w.write_record(LEDGER_COLUMNS).map_err(io_err)?;
        for r in &self.records {
            let count = r.mismatch_count.to_string();
            let status = r.match_status.to_string();
            let columns = r.mismatch_columns.join(MISMATCH_SEPARATOR);
            let timestamp = r.load_timestamp.to_rfc3339();
            w.write_record([
                r.domain.as_str(),
                r.entity.as_str(),
                r.source_system.as_str(),
                r.target_system.as_str(),
                r.key_a.as_deref().unwrap_or(""),
                r.key_b.as_deref().unwrap_or(""),
                status.as_str(),
                columns.as_str(),
                count.as_str(),
                r.reconciliation_type.as_str(),
                r.run_id.as_str(),
                timestamp.as_str(),
            ])
            .map_err(io_err)?;
        }
        w.flush().map_err(|e| ReconError::Io(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, ReconError> {
        serde_json::to_string_pretty(self).map_err(|e| ReconError::Io(e.to_string()))
    }
}
