use std::collections::BTreeMap;

use crate::model::Value;
use crate::relation::Relation;

/// One row of the full outer join, as row indices into A and B.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Correlation {
    pub a: Option<usize>,
    pub b: Option<usize>,
}

/// Full outer equi-join of `a` and `b` on the key columns (positional pairs
/// of `a_keys` / `b_keys`).
///
/// Output order: A rows in order, each followed by its B matches in B
/// order (or alone when unmatched), then the unmatched B rows in order.
/// A null key component never matches anything.
pub fn correlate(a: &Relation, a_keys: &[usize], b: &Relation, b_keys: &[usize]) -> Vec<Correlation> {
    let mut b_index: BTreeMap<Vec<String>, Vec<usize>> = BTreeMap::new();
    for (bi, row) in b.rows.iter().enumerate() {
        if let Some(key) = key_tuple(row, b_keys) {
            b_index.entry(key).or_default().push(bi);
        }
    }

    let mut b_matched = vec![false; b.rows.len()];
    let mut out = Vec::with_capacity(a.rows.len().max(b.rows.len()));

    for (ai, row) in a.rows.iter().enumerate() {
        match key_tuple(row, a_keys).and_then(|k| b_index.get(&k)) {
            Some(hits) => {
                for &bi in hits {
                    b_matched[bi] = true;
                    out.push(Correlation {
                        a: Some(ai),
                        b: Some(bi),
                    });
                }
            }
            None => out.push(Correlation { a: Some(ai), b: None }),
        }
    }

    for (bi, matched) in b_matched.into_iter().enumerate() {
        if !matched {
            out.push(Correlation { a: None, b: Some(bi) });
        }
    }

    out
}

fn key_tuple(row: &[Value], keys: &[usize]) -> Option<Vec<String>> {
    keys.iter()
        .map(|&i| {
            let v = &row[i];
            (!v.is_null()).then(|| v.render().into_owned())
        })
        .collect()
}

/// Ledger rendering of a key: components joined with `|`, nulls empty.
pub fn render_key(row: &[Value], keys: &[usize]) -> String {
    keys.iter()
        .map(|&i| row[i].render())
        .collect::<Vec<_>>()
        .join("|")
}
