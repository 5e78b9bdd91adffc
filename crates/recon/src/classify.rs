use crate::compare::MismatchSet;
use crate::model::MatchStatus;

/// Classify one correlated (or uncorrelated) record.
///
/// Presence is decided before the mismatch set is looked at, so a record is
/// never both missing and mismatched.
pub fn classify_match(a_present: bool, b_present: bool, mismatches: &MismatchSet) -> MatchStatus {
    match (a_present, b_present) {
        (true, false) => MatchStatus::MissingInB,
        (false, true) => MatchStatus::MissingInA,
        (true, true) if mismatches.is_empty() => MatchStatus::Matched,
        (true, true) => MatchStatus::Mismatch,
        (false, false) => {
            debug_assert!(false, "a join row with neither side present");
            MatchStatus::MissingInA
        }
    }
}
