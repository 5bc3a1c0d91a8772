//! Rule matching logic.
//!
//! Selects which rule, if any, overrides a stub's default response for an
//! incoming request. Matching is exact string equality on a single request
//! facet; no parsing or decoding happens here.

use crate::model::{MatchType, Rule};
use std::time::Duration;

/// Result of evaluating a stub's rules against a request.
#[derive(Debug, PartialEq, Eq)]
pub enum MatchOutcome<'a> {
    /// A rule matched.
    Matched {
        /// Position of the rule in the evaluated slice
        index: usize,
        /// The matched rule
        rule: &'a Rule,
        /// Delay requested by the rule; applied by the caller
        delay: Duration,
    },
    /// No active rule matched.
    NoMatch,
}

/// Find the first active rule matching the request.
///
/// `rules` must already be in evaluation (insertion) order. A later rule that
/// also matches is never selected.
pub fn evaluate<'a>(rules: &'a [Rule], request_query: &str, request_body: &str) -> MatchOutcome<'a> {
    for (index, rule) in rules.iter().enumerate() {
        if !rule.status.is_active() {
            continue;
        }

        if matches_rule(rule, request_query, request_body) {
            return MatchOutcome::Matched {
                index,
                rule,
                delay: Duration::from_millis(rule.delay_time_ms),
            };
        }
    }

    MatchOutcome::NoMatch
}

fn matches_rule(rule: &Rule, request_query: &str, request_body: &str) -> bool {
    match rule.match_type {
        MatchType::QueryParam => request_query == rule.match_rule,
        MatchType::JsonBody => request_body == rule.match_rule,
        MatchType::Unknown(_) => false,
    }
}
