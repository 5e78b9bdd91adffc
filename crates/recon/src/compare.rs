//! Null-aware attribute comparison and mismatch detection.
//!
//! Values are borrowed for the duration of one comparison. Only attribute
//! names leave this module.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::model::{parse_decimal, ComparisonKind, Value};
use crate::plan::ComparisonPlan;

/// A comparison kind with its parameters resolved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComparisonRule {
    Exact,
    /// Trim + case-fold.
    Normalized,
    /// Date component only.
    DateOnly,
    NumericTolerance { epsilon: f64 },
}

impl ComparisonRule {
    pub fn resolve(kind: ComparisonKind, epsilon: f64) -> Self {
        match kind {
            ComparisonKind::Exact => Self::Exact,
            ComparisonKind::Normalized => Self::Normalized,
            ComparisonKind::DateOnly => Self::DateOnly,
            ComparisonKind::NumericTolerance => Self::NumericTolerance { epsilon },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    Mismatch,
}

/// Three-valued comparison: null/null is equal, exactly one null is a
/// mismatch, otherwise the rule decides.
pub fn compare(a: &Value, b: &Value, rule: ComparisonRule) -> Comparison {
    let equal = match (a.is_null(), b.is_null()) {
        (true, true) => true,
        (true, false) | (false, true) => false,
        (false, false) => values_equal(a, b, rule),
    };
    if equal {
        Comparison::Equal
    } else {
        Comparison::Mismatch
    }
}

fn values_equal(a: &Value, b: &Value, rule: ComparisonRule) -> bool {
    match rule {
        ComparisonRule::Exact => exact(a, b),
        ComparisonRule::Normalized => {
            let (a, b) = (a.render(), b.render());
            a.trim().to_lowercase() == b.trim().to_lowercase()
        }
        ComparisonRule::DateOnly => match (a.as_date(), b.as_date()) {
            (Some(da), Some(db)) => da == db,
            _ => exact(a, b),
        },
        ComparisonRule::NumericTolerance { epsilon } => {
            match (a.as_decimal(), b.as_decimal(), tolerance(epsilon)) {
                (Some(x), Some(y), Some(eps)) => x.checked_sub(y).is_some_and(|d| d.abs() <= eps),
                _ => exact(a, b),
            }
        }
    }
}

/// Epsilon as the decimal it was written as, so the bound is inclusive
/// exactly at `epsilon`.
fn tolerance(epsilon: f64) -> Option<Decimal> {
    if !epsilon.is_finite() {
        return None;
    }
    parse_decimal(&epsilon.to_string())
}

fn exact(a: &Value, b: &Value) -> bool {
    a == b || a.render().as_bytes() == b.render().as_bytes()
}

/// Insertion-ordered set of attribute names that disagree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MismatchSet(Vec<String>);

impl MismatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the name was already present.
    pub fn insert(&mut self, name: &str) -> bool {
        if self.contains(name) {
            return false;
        }
        self.0.push(name.to_string());
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

/// Compare one correlated pair of rows under `plan`. `value_a`/`value_b`
/// give access to a row's cell by plan position.
pub fn detect_mismatches<'v>(
    plan: &ComparisonPlan,
    value_a: impl Fn(usize) -> &'v Value,
    value_b: impl Fn(usize) -> &'v Value,
) -> MismatchSet {
    let mut set = MismatchSet::new();
    for (i, attr) in plan.rules.iter().enumerate() {
        if compare(value_a(i), value_b(i), attr.rule) == Comparison::Mismatch {
            set.insert(&attr.attribute_a);
        }
    }
    set
}
