use serde::Serialize;
use std::cmp::Reverse;

use super::CandidateMatch;
use crate::normalization::normalize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchOutcome {
    Matched { external_id: i64 },
    Ambiguous,
    Missing,
}

/// Deterministic choice among search candidates.
///
/// Exact normalized-name hits win; among several, the newest publication year
/// (unknown counts as 0) wins, then the lowest external id. With no exact hit a
/// lone candidate is trusted; anything else is ambiguous.
pub fn pick_best_match(candidates: &[CandidateMatch], original_name: &str) -> MatchOutcome {
    if candidates.is_empty() {
        return MatchOutcome::Missing;
    }

    let wanted = normalize(original_name);
    let exact = candidates
        .iter()
        .filter(|c| normalize(&c.name) == wanted)
        .min_by_key(|c| (Reverse(c.year_published.unwrap_or(0)), c.external_id));

    if let Some(best) = exact {
        return MatchOutcome::Matched {
            external_id: best.external_id,
        };
    }

    match candidates {
        [only] => MatchOutcome::Matched {
            external_id: only.external_id,
        },
        _ => MatchOutcome::Ambiguous,
    }
}
