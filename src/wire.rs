//! Boundary record shapes.
//!
//! Field names here are part of the external contract and are consumed and
//! produced as JSON by the transport handlers.

use crate::error::{MockError, MockResult};
use crate::model::{MatchType, NewRule, NewStub, ResponseSpec, Rule, Status, StubDefinition, StubId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Encode a header map into the JSON text stored and sent over the wire.
pub fn encode_headers(headers: &HashMap<String, String>) -> MockResult<String> {
    Ok(serde_json::to_string(headers)?)
}

/// Decode stored or wire header text. Empty text is an empty map.
pub fn decode_headers(text: &str) -> MockResult<HashMap<String, String>> {
    if text.trim().is_empty() {
        return Ok(HashMap::new());
    }
    Ok(serde_json::from_str(text)?)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StatusCodeRepr {
    Text(String),
    Number(i64),
}

fn deserialize_status_code<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match StatusCodeRepr::deserialize(deserializer)? {
        StatusCodeRepr::Text(text) => text,
        StatusCodeRepr::Number(code) => code.to_string(),
    })
}

/// A stub definition as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StubSpec {
    pub url: String,
    #[serde(deserialize_with = "deserialize_status_code")]
    pub response_code: String,
    #[serde(default)]
    pub response_header: HashMap<String, String>,
    #[serde(default)]
    pub response_body: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub meta: String,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

impl StubSpec {
    pub fn to_new_stub(&self) -> NewStub {
        NewStub {
            url: self.url.clone(),
            default_response: ResponseSpec {
                status_code: self.response_code.clone(),
                headers: self.response_header.clone(),
                body: self.response_body.clone(),
            },
            owner: self.owner.clone(),
            description: self.description.clone(),
            metadata: self.meta.clone(),
        }
    }
}

/// A rule as submitted by a caller, and as returned in listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub match_type: i32,
    #[serde(default)]
    pub match_rule: String,
    #[serde(deserialize_with = "deserialize_status_code")]
    pub response_code: String,
    #[serde(default)]
    pub response_header: HashMap<String, String>,
    #[serde(default)]
    pub response_body: String,
    /// Delay in milliseconds.
    #[serde(default)]
    pub delay_time: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub meta: String,
}

impl RuleSpec {
    pub fn to_new_rule(&self) -> MockResult<NewRule> {
        let delay_time_ms = u64::try_from(self.delay_time).map_err(|_| {
            MockError::Validation(format!("delay_time must be >= 0, got {}", self.delay_time))
        })?;
        Ok(NewRule {
            match_type: MatchType::from_code(self.match_type),
            match_rule: self.match_rule.clone(),
            response: ResponseSpec {
                status_code: self.response_code.clone(),
                headers: self.response_header.clone(),
                body: self.response_body.clone(),
            },
            delay_time_ms,
            description: self.description.clone(),
            metadata: self.meta.clone(),
        })
    }
}

impl From<&Rule> for RuleSpec {
    fn from(rule: &Rule) -> Self {
        Self {
            match_type: rule.match_type.code(),
            match_rule: rule.match_rule.clone(),
            response_code: rule.response.status_code.clone(),
            response_header: rule.response.headers.clone(),
            response_body: rule.response.body.clone(),
            delay_time: i64::try_from(rule.delay_time_ms).unwrap_or(i64::MAX),
            description: rule.description.clone(),
            meta: rule.metadata.clone(),
        }
    }
}

/// List query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default, alias = "page_size")]
    pub size: Option<u32>,
}

/// A stored stub as returned in listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StubView {
    pub id: StubId,
    pub url: String,
    pub response_code: String,
    pub response_header: HashMap<String, String>,
    pub response_body: String,
    pub owner: String,
    pub description: String,
    pub meta: String,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub rules: Vec<RuleSpec>,
}

impl StubView {
    pub fn new(stub: &StubDefinition, rules: &[Rule]) -> Self {
        Self {
            id: stub.id,
            url: stub.url.clone(),
            response_code: stub.default_response.status_code.clone(),
            response_header: stub.default_response.headers.clone(),
            response_body: stub.default_response.body.clone(),
            owner: stub.owner.clone(),
            description: stub.description.clone(),
            meta: stub.metadata.clone(),
            status: stub.status,
            created_at: stub.created_at,
            updated_at: stub.updated_at,
            rules: rules.iter().map(RuleSpec::from).collect(),
        }
    }
}

/// Paged listing of active stubs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListResponse {
    pub urls: Vec<StubView>,
    pub total: u64,
    pub current_page: u32,
    pub page_size: u32,
}

/// An inbound request to be dispatched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockRequest {
    pub url: String,
    #[serde(default)]
    pub query_params: String,
    #[serde(default)]
    pub request_body: String,
}

/// A resolved response in wire form; headers are JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockResponse {
    pub response_code: String,
    pub response_header: String,
    pub response_body: String,
}
