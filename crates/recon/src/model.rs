use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::compare::MismatchSet;
use crate::keytype::KeyType;

// ---------------------------------------------------------------------------
// Systems + entities
// ---------------------------------------------------------------------------

/// The two reconciled systems: A is the canonical business-object system,
/// B the operational CRM-like system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum System {
    #[serde(alias = "a")]
    A,
    #[serde(alias = "b")]
    B,
}

impl System {
    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    /// Lowercase tag used in file names.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
        }
    }
}

impl fmt::Display for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}

/// Canonical (domain, entity) identity. Domain is upper-cased, entity
/// lower-cased, both trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityId {
    pub domain: String,
    pub entity: String,
}

impl EntityId {
    pub fn new(domain: &str, entity: &str) -> Self {
        Self {
            domain: domain.trim().to_uppercase(),
            entity: entity.trim().to_lowercase(),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.entity)
    }
}

// ---------------------------------------------------------------------------
// Mapping metadata
// ---------------------------------------------------------------------------

/// One raw row of attribute-mapping metadata: one attribute of one system.
///
/// `logical_name` is the pairing identity assigned by the metadata author;
/// rows of A and B sharing it describe the same logical attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeMapping {
    pub domain: String,
    pub entity: String,
    pub system: System,
    pub logical_name: String,
    pub attribute_name: String,
    #[serde(default)]
    pub is_key: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub reconciliation_type: Option<String>,
}

impl AttributeMapping {
    pub fn entity_id(&self) -> EntityId {
        EntityId::new(&self.domain, &self.entity)
    }
}

/// One logical attribute of one entity with both system-side names resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedMapping {
    pub entity: EntityId,
    pub logical_name: String,
    pub attribute_a: String,
    pub attribute_b: String,
    pub is_key: bool,
    pub key_type: KeyType,
    /// Declared comparison type per side, resolved against the rule table
    /// at planning time.
    pub type_a: Option<String>,
    pub type_b: Option<String>,
}

// ---------------------------------------------------------------------------
// Reconciliation types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonKind {
    #[default]
    Exact,
    Normalized,
    DateOnly,
    NumericTolerance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    Left,
    #[default]
    FullOuter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    OneWay,
    #[default]
    BothWays,
}

/// Reference data describing how one reconciliation type correlates and
/// compares. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationTypeRule {
    pub name: String,
    #[serde(default)]
    pub comparison: ComparisonKind,
    #[serde(default)]
    pub join_type: JoinType,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default = "default_true")]
    pub include_missing_in_a: bool,
    #[serde(default = "default_true")]
    pub include_missing_in_b: bool,
    /// Lower wins when two rules could govern one attribute.
    #[serde(default = "default_priority")]
    pub match_priority: i32,
    /// Overrides `settings.numeric_epsilon` for `numeric_tolerance`.
    #[serde(default)]
    pub epsilon: Option<f64>,
}

impl ReconciliationTypeRule {
    pub fn new(name: &str, comparison: ComparisonKind) -> Self {
        Self {
            name: name.to_string(),
            comparison,
            join_type: JoinType::default(),
            direction: Direction::default(),
            include_missing_in_a: true,
            include_missing_in_b: true,
            match_priority: default_priority(),
            epsilon: None,
        }
    }

    /// Rows present only in B survive a LEFT join only as dropped rows.
    pub fn emits_missing_in_a(&self) -> bool {
        self.join_type == JoinType::FullOuter && self.include_missing_in_a
    }

    pub fn emits_missing_in_b(&self) -> bool {
        self.include_missing_in_b
    }
}

fn default_true() -> bool {
    true
}

fn default_priority() -> i32 {
    100
}

// ---------------------------------------------------------------------------
// Staged values
// ---------------------------------------------------------------------------

/// A typed cell from a staged relation. Read transiently by the comparator
/// and the key extractor; never copied into output.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Canonical text form. Null renders empty.
    pub fn render(&self) -> Cow<'_, str> {
        match self {
            Self::Null => Cow::Borrowed(""),
            Self::Text(s) => Cow::Borrowed(s.as_str()),
            Self::Int(i) => Cow::Owned(i.to_string()),
            Self::Float(x) => Cow::Owned(x.to_string()),
            Self::Bool(b) => Cow::Borrowed(if *b { "true" } else { "false" }),
            Self::Date(d) => Cow::Owned(d.format("%Y-%m-%d").to_string()),
            Self::DateTime(dt) => Cow::Owned(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(x) => Some(*x).filter(|x| x.is_finite()),
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|x| x.is_finite()),
            _ => None,
        }
    }

    /// Exact decimal reading for tolerance checks. Text is parsed as
    /// written; floats go through their shortest round-trip rendering.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Int(i) => Some(Decimal::from(*i)),
            Self::Float(x) => x.is_finite().then(|| parse_decimal(&x.to_string())).flatten(),
            Self::Text(s) => parse_decimal(s.trim()),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(d) => Some(*d),
            Self::DateTime(dt) => Some(dt.date()),
            Self::Text(s) => parse_date_part(s.trim()),
            _ => None,
        }
    }
}

pub(crate) fn parse_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

fn parse_date_part(s: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Self::Date(d)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Matched,
    Mismatch,
    MissingInA,
    MissingInB,
}

impl MatchStatus {
    pub const ALL: [MatchStatus; 4] = [
        Self::Matched,
        Self::Mismatch,
        Self::MissingInA,
        Self::MissingInB,
    ];
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Matched => write!(f, "MATCHED"),
            Self::Mismatch => write!(f, "MISMATCH"),
            Self::MissingInA => write!(f, "MISSING_IN_A"),
            Self::MissingInB => write!(f, "MISSING_IN_B"),
        }
    }
}

/// One ledger row. Carries attribute names and key renderings only, never
/// attribute values. Field order is the downstream column contract.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationRecord {
    pub domain: String,
    pub entity: String,
    pub source_system: String,
    pub target_system: String,
    pub key_a: Option<String>,
    pub key_b: Option<String>,
    pub match_status: MatchStatus,
    pub mismatch_columns: Vec<String>,
    pub mismatch_count: usize,
    pub reconciliation_type: String,
    pub run_id: String,
    pub load_timestamp: DateTime<Utc>,
}

impl ReconciliationRecord {
    /// Build a ledger row. `mismatch_count` is derived from `mismatches`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        entity: &EntityId,
        source_system: &str,
        target_system: &str,
        key_a: Option<String>,
        key_b: Option<String>,
        match_status: MatchStatus,
        mismatches: MismatchSet,
        reconciliation_type: &str,
        run_id: &str,
        load_timestamp: DateTime<Utc>,
    ) -> Self {
        let mismatch_columns = mismatches.into_vec();
        Self {
            domain: entity.domain.clone(),
            entity: entity.entity.clone(),
            source_system: source_system.to_string(),
            target_system: target_system.to_string(),
            key_a,
            key_b,
            match_status,
            mismatch_count: mismatch_columns.len(),
            mismatch_columns,
            reconciliation_type: reconciliation_type.to_string(),
            run_id: run_id.to_string(),
            load_timestamp,
        }
    }

    /// Checks the count, status and key-presence invariants of a ledger row.
    pub fn is_consistent(&self) -> bool {
        let count_ok = self.mismatch_count == self.mismatch_columns.len();
        let mismatch_ok = (self.mismatch_count > 0) == (self.match_status == MatchStatus::Mismatch);
        let keys_ok = match self.match_status {
            MatchStatus::MissingInA => self.key_a.is_none() && self.key_b.is_some(),
            MatchStatus::MissingInB => self.key_a.is_some() && self.key_b.is_none(),
            MatchStatus::Matched | MatchStatus::Mismatch => {
                self.key_a.is_some() && self.key_b.is_some()
            }
        };
        count_ok && mismatch_ok && keys_ok
    }
}
