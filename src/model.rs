//! Stub and rule entities.
//!
//! These are the decoded, in-memory forms. Header maps are plain maps here;
//! JSON text only exists at the store and wire boundaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Store-assigned stub identifier.
pub type StubId = i64;

/// Store-assigned rule identifier. Also the rule's evaluation position.
pub type RuleId = i64;

/// Lifecycle status shared by stubs and rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Active,
    Inactive,
    Deleted,
}

impl Status {
    pub fn is_active(self) -> bool {
        self == Status::Active
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::Inactive => "inactive",
            Status::Deleted => "deleted",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which request facet a rule compares against.
///
/// Wire codes 1 and 2 are defined. Every other code, including the reserved
/// code 3, is kept as `Unknown` and never matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum MatchType {
    /// Compare the full raw query string.
    QueryParam,
    /// Compare the raw request body.
    JsonBody,
    /// Any other wire code.
    Unknown(i32),
}

impl MatchType {
    pub const QUERY_PARAM_CODE: i32 = 1;
    pub const JSON_BODY_CODE: i32 = 2;
    pub const RESERVED_CODE: i32 = 3;

    pub fn from_code(code: i32) -> Self {
        match code {
            Self::QUERY_PARAM_CODE => MatchType::QueryParam,
            Self::JSON_BODY_CODE => MatchType::JsonBody,
            other => MatchType::Unknown(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            MatchType::QueryParam => Self::QUERY_PARAM_CODE,
            MatchType::JsonBody => Self::JSON_BODY_CODE,
            MatchType::Unknown(code) => code,
        }
    }

    /// Whether the code is accepted by the wire format (1..=3).
    pub fn is_wire_valid(self) -> bool {
        (Self::QUERY_PARAM_CODE..=Self::RESERVED_CODE).contains(&self.code())
    }
}

impl From<i32> for MatchType {
    fn from(code: i32) -> Self {
        MatchType::from_code(code)
    }
}

impl From<MatchType> for i32 {
    fn from(match_type: MatchType) -> Self {
        match_type.code()
    }
}

/// A response served for a stub or a rule.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseSpec {
    /// Status code as defined (e.g. "200").
    pub status_code: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl ResponseSpec {
    /// Numeric status code, if the stored string is one in 100..=599.
    pub fn numeric_status(&self) -> Option<u16> {
        self.status_code
            .trim()
            .parse::<u16>()
            .ok()
            .filter(|code| (100..=599).contains(code))
    }
}

/// A registered mock endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubDefinition {
    pub id: StubId,
    pub url: String,
    pub default_response: ResponseSpec,
    pub owner: String,
    pub description: String,
    pub metadata: String,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An ordered override attached to one stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub id: RuleId,
    pub interface_id: StubId,
    pub match_type: MatchType,
    pub match_rule: String,
    pub response: ResponseSpec,
    pub delay_time_ms: u64,
    pub description: String,
    pub metadata: String,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stub fields written by an upsert.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewStub {
    pub url: String,
    pub default_response: ResponseSpec,
    pub owner: String,
    pub description: String,
    pub metadata: String,
}

/// Rule fields written by an upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRule {
    pub match_type: MatchType,
    pub match_rule: String,
    pub response: ResponseSpec,
    pub delay_time_ms: u64,
    pub description: String,
    pub metadata: String,
}
