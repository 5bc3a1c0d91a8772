//! Persistence contract for stub definitions and their rules.

use crate::error::MockResult;
use crate::model::{NewRule, NewStub, Rule, StubDefinition, StubId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod memory;

pub use memory::InMemoryStubStore;

/// Store-level limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Maximum number of non-deleted rules per stub (unlimited when unset).
    #[serde(default)]
    pub max_rules_per_stub: Option<usize>,
}

/// Listing filter. Empty strings disable a filter; both set means AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StubFilter {
    /// Exact owner match
    pub owner: String,
    /// Case-insensitive substring of url or description
    pub keyword: String,
}

impl StubFilter {
    pub fn new(owner: impl Into<String>, keyword: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            keyword: keyword.into(),
        }
    }

    pub fn matches(&self, stub_owner: &str, url: &str, description: &str) -> bool {
        if !self.owner.is_empty() && self.owner != stub_owner {
            return false;
        }
        if self.keyword.is_empty() {
            return true;
        }
        let keyword = self.keyword.to_lowercase();
        url.to_lowercase().contains(&keyword) || description.to_lowercase().contains(&keyword)
    }
}

/// One page of active stubs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubPage {
    /// Stubs on this page, most recently created first
    pub items: Vec<StubDefinition>,
    /// Matching stubs before pagination
    pub total: u64,
}

/// Storage backend for stubs and rules.
///
/// Implementations must make `upsert` atomic: readers never observe a
/// partially written stub, and a failed write leaves the previous row intact.
/// There is no transaction spanning `upsert` and `upsert_rule`.
#[async_trait]
pub trait StubStore: Send + Sync {
    /// Insert a stub, or overwrite the non-deleted stub with the same url.
    /// Returns the stub's id, which is stable across overwrites.
    async fn upsert(&self, stub: NewStub) -> MockResult<StubId>;

    /// Insert or overwrite a rule keyed by `(interface_id, match_type, match_rule)`.
    async fn upsert_rule(&self, interface_id: StubId, rule: NewRule) -> MockResult<()>;

    async fn find_active_by_url(&self, url: &str) -> MockResult<StubDefinition>;

    async fn find_active_by_id(&self, id: StubId) -> MockResult<StubDefinition>;

    /// Active rules of an active stub in ascending insertion order.
    async fn list_rules_for_stub(&self, interface_id: StubId) -> MockResult<Vec<Rule>>;

    /// Page through active stubs ordered by descending id. `page` is 1-based.
    async fn list_active_stubs(
        &self,
        filter: &StubFilter,
        page: u32,
        page_size: u32,
    ) -> MockResult<StubPage>;

    async fn health_check(&self) -> MockResult<()>;

    fn backend_name(&self) -> &'static str;
}
