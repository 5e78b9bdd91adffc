//! Staged relations and the collaborator that supplies them.
//!
//! Staging (extract, type, clean) is owned elsewhere; the engine only needs
//! "give me the A or B relation for this entity".

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::ReconError;
use crate::model::{EntityId, System, Value};

/// A typed, column-named relation. Rows are positional against `columns`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Relation {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Relation {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row; short rows are padded with nulls.
    pub fn push(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    pub fn with_row(mut self, row: Vec<Value>) -> Self {
        self.push(row);
        self
    }

    /// Case-insensitive column lookup.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Supplies staged relations. Implementations are shared by concurrent
/// entity tasks and must be read-only.
pub trait RelationSource: Send + Sync {
    fn fetch(&self, entity: &EntityId, system: System) -> Result<Relation, ReconError>;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemorySource {
    relations: HashMap<(EntityId, System), Relation>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity: EntityId, system: System, relation: Relation) {
        self.relations.insert((entity, system), relation);
    }
}

impl RelationSource for MemorySource {
    fn fetch(&self, entity: &EntityId, system: System) -> Result<Relation, ReconError> {
        self.relations
            .get(&(entity.clone(), system))
            .cloned()
            .ok_or_else(|| ReconError::data_access(entity, system, "staged relation not found"))
    }
}

// ---------------------------------------------------------------------------
// CSV directory
// ---------------------------------------------------------------------------

/// Reads `<dir>/<domain>__<entity>__<a|b>.csv` (all lowercase).
#[derive(Debug, Clone)]
pub struct CsvSource {
    base_dir: PathBuf,
}

impl CsvSource {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn path_for(&self, entity: &EntityId, system: System) -> PathBuf {
        self.base_dir.join(format!(
            "{}__{}__{}.csv",
            entity.domain.to_lowercase(),
            entity.entity,
            system.suffix()
        ))
    }
}

impl RelationSource for CsvSource {
    fn fetch(&self, entity: &EntityId, system: System) -> Result<Relation, ReconError> {
        let path = self.path_for(entity, system);
        let data = std::fs::read_to_string(&path).map_err(|e| {
            ReconError::data_access(entity, system, format!("cannot read {}: {e}", path.display()))
        })?;
        load_csv_relation(&data)
            .map_err(|e| ReconError::data_access(entity, system, format!("{}: {e}", path.display())))
    }
}

/// Parse CSV with a header row. Empty cells become nulls, everything else
/// text; typed comparison rules parse on demand.
pub fn load_csv_relation(csv_data: &str) -> Result<Relation, ReconError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(csv_data.as_bytes());

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| ReconError::Io(e.to_string()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut relation = Relation {
        columns,
        rows: Vec::new(),
    };

    for record in reader.records() {
        let record = record.map_err(|e| ReconError::Io(e.to_string()))?;
        let row = record
            .iter()
            .map(|cell| {
                if cell.is_empty() {
                    Value::Null
                } else {
                    Value::Text(cell.to_string())
                }
            })
            .collect();
        relation.push(row);
    }

    Ok(relation)
}
