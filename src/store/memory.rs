//! In-memory stub store.
//!
//! Both tables live behind a single `tokio::sync::RwLock`, so a URL upsert and
//! the index update it implies are applied together and readers never see a
//! torn row. Rows keep their header maps as JSON text, the same shape a SQL
//! backend would persist, and are decoded when read.
//!
//! State is lost on restart.

use super::{StoreConfig, StubFilter, StubPage, StubStore};
use crate::error::{MockError, MockResult};
use crate::model::{
    MatchType, NewRule, NewStub, ResponseSpec, Rule, RuleId, Status, StubDefinition, StubId,
};
use crate::wire::{decode_headers, encode_headers};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StubRow {
    url: String,
    response_code: String,
    response_header: String,
    response_body: String,
    owner: String,
    description: String,
    meta: String,
    status: Status,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl StubRow {
    fn decode(&self, id: StubId) -> MockResult<StubDefinition> {
        Ok(StubDefinition {
            id,
            url: self.url.clone(),
            default_response: ResponseSpec {
                status_code: self.response_code.clone(),
                headers: decode_headers(&self.response_header)?,
                body: self.response_body.clone(),
            },
            owner: self.owner.clone(),
            description: self.description.clone(),
            metadata: self.meta.clone(),
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Clone)]
struct RuleRow {
    interface_id: StubId,
    match_type: i32,
    match_rule: String,
    resp_code: String,
    resp_header: String,
    resp_body: String,
    delay_time: u64,
    description: String,
    meta: String,
    status: Status,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RuleRow {
    fn decode(&self, id: RuleId) -> MockResult<Rule> {
        Ok(Rule {
            id,
            interface_id: self.interface_id,
            match_type: MatchType::from_code(self.match_type),
            match_rule: self.match_rule.clone(),
            response: ResponseSpec {
                status_code: self.resp_code.clone(),
                headers: decode_headers(&self.resp_header)?,
                body: self.resp_body.clone(),
            },
            delay_time_ms: self.delay_time,
            description: self.description.clone(),
            metadata: self.meta.clone(),
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Natural key of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RuleKey {
    interface_id: StubId,
    match_type: i32,
    match_rule: String,
}

#[derive(Debug, Default)]
struct Tables {
    last_stub_id: StubId,
    last_rule_id: RuleId,
    /// Stub rows keyed by id; iteration order is creation order.
    stubs: BTreeMap<StubId, StubRow>,
    /// Url of every non-deleted stub.
    url_index: HashMap<String, StubId>,
    /// Rule rows keyed by id; iteration order is evaluation order.
    rules: BTreeMap<RuleId, RuleRow>,
    rule_index: HashMap<RuleKey, RuleId>,
}

impl Tables {
    fn next_stub_id(&mut self) -> StubId {
        self.last_stub_id += 1;
        self.last_stub_id
    }

    fn next_rule_id(&mut self) -> RuleId {
        self.last_rule_id += 1;
        self.last_rule_id
    }

    fn live_rule_count(&self, interface_id: StubId) -> usize {
        self.rules
            .values()
            .filter(|row| row.interface_id == interface_id && row.status != Status::Deleted)
            .count()
    }
}

/// In-memory `StubStore`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStubStore {
    config: StoreConfig,
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStubStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }

    /// Change a stub's status.
    ///
    /// Deleting a stub frees its url; a new upsert of that url gets a new id.
    pub async fn set_stub_status(&self, id: StubId, status: Status) -> MockResult<()> {
        let mut tables = self.tables.write().await;
        let tables = &mut *tables;
        let row = tables
            .stubs
            .get_mut(&id)
            .ok_or_else(|| MockError::NotFound(format!("stub {}", id)))?;

        match (row.status, status) {
            (_, Status::Deleted) => {
                if tables.url_index.get(&row.url) == Some(&id) {
                    tables.url_index.remove(&row.url);
                }
            }
            (Status::Deleted, _) => {
                if tables.url_index.contains_key(&row.url) {
                    return Err(MockError::Persistence(format!(
                        "unique constraint violation: url {} is in use",
                        row.url
                    )));
                }
                tables.url_index.insert(row.url.clone(), id);
            }
            _ => {}
        }

        row.status = status;
        row.updated_at = Utc::now();
        Ok(())
    }

    /// Change a rule's status.
    pub async fn set_rule_status(&self, rule_id: RuleId, status: Status) -> MockResult<()> {
        let mut tables = self.tables.write().await;
        let row = tables
            .rules
            .get_mut(&rule_id)
            .ok_or_else(|| MockError::NotFound(format!("rule {}", rule_id)))?;
        row.status = status;
        row.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl StubStore for InMemoryStubStore {
    async fn upsert(&self, stub: NewStub) -> MockResult<StubId> {
        let response_header = encode_headers(&stub.default_response.headers)?;
        let now = Utc::now();

        let mut tables = self.tables.write().await;
        let existing = tables
            .url_index
            .get(&stub.url)
            .and_then(|id| tables.stubs.get(id).map(|row| (*id, row.created_at)));
        let (id, created_at) = match existing {
            Some(found) => found,
            None => (tables.next_stub_id(), now),
        };

        let row = StubRow {
            url: stub.url,
            response_code: stub.default_response.status_code,
            response_header,
            response_body: stub.default_response.body,
            owner: stub.owner,
            description: stub.description,
            meta: stub.metadata,
            status: Status::Active,
            created_at,
            updated_at: now,
        };
        tables.url_index.insert(row.url.clone(), id);
        tables.stubs.insert(id, row);

        Ok(id)
    }

    async fn upsert_rule(&self, interface_id: StubId, rule: NewRule) -> MockResult<()> {
        if !rule.match_type.is_wire_valid() {
            return Err(MockError::Validation(format!(
                "match_type must be between 1 and 3, got {}",
                rule.match_type.code()
            )));
        }
        let resp_header = encode_headers(&rule.response.headers)?;
        let now = Utc::now();

        let mut tables = self.tables.write().await;
        if !tables.stubs.contains_key(&interface_id) {
            return Err(MockError::Persistence(format!(
                "foreign key violation: stub {} does not exist",
                interface_id
            )));
        }

        let key = RuleKey {
            interface_id,
            match_type: rule.match_type.code(),
            match_rule: rule.match_rule.clone(),
        };
        let existing = tables
            .rule_index
            .get(&key)
            .and_then(|id| tables.rules.get(id).map(|row| (*id, row.created_at)));

        let (rule_id, created_at) = match existing {
            Some(found) => found,
            None => {
                if let Some(limit) = self.config.max_rules_per_stub {
                    if tables.live_rule_count(interface_id) >= limit {
                        return Err(MockError::Persistence(format!(
                            "constraint violation: stub {} already has {} rules",
                            interface_id, limit
                        )));
                    }
                }
                (tables.next_rule_id(), now)
            }
        };

        let row = RuleRow {
            interface_id,
            match_type: key.match_type,
            match_rule: rule.match_rule,
            resp_code: rule.response.status_code,
            resp_header,
            resp_body: rule.response.body,
            delay_time: rule.delay_time_ms,
            description: rule.description,
            meta: rule.metadata,
            status: Status::Active,
            created_at,
            updated_at: now,
        };
        tables.rules.insert(rule_id, row);
        tables.rule_index.insert(key, rule_id);

        Ok(())
    }

    async fn find_active_by_url(&self, url: &str) -> MockResult<StubDefinition> {
        let tables = self.tables.read().await;
        tables
            .url_index
            .get(url)
            .and_then(|id| tables.stubs.get(id).map(|row| (*id, row)))
            .filter(|(_, row)| row.status.is_active())
            .map(|(id, row)| row.decode(id))
            .unwrap_or_else(|| Err(MockError::NotFound(format!("no active stub for url {}", url))))
    }

    async fn find_active_by_id(&self, id: StubId) -> MockResult<StubDefinition> {
        let tables = self.tables.read().await;
        tables
            .stubs
            .get(&id)
            .filter(|row| row.status.is_active())
            .map(|row| row.decode(id))
            .unwrap_or_else(|| Err(MockError::NotFound(format!("no active stub with id {}", id))))
    }

    async fn list_rules_for_stub(&self, interface_id: StubId) -> MockResult<Vec<Rule>> {
        let tables = self.tables.read().await;
        let stub_active = tables
            .stubs
            .get(&interface_id)
            .map(|row| row.status.is_active())
            .unwrap_or(false);
        if !stub_active {
            return Ok(Vec::new());
        }

        tables
            .rules
            .iter()
            .filter(|(_, row)| row.interface_id == interface_id && row.status.is_active())
            .map(|(id, row)| row.decode(*id))
            .collect()
    }

    async fn list_active_stubs(
        &self,
        filter: &StubFilter,
        page: u32,
        page_size: u32,
    ) -> MockResult<StubPage> {
        if page == 0 {
            return Err(MockError::Validation("page must be >= 1".to_string()));
        }
        if page_size == 0 {
            return Err(MockError::Validation("page_size must be >= 1".to_string()));
        }

        let tables = self.tables.read().await;
        let matching: Vec<(StubId, &StubRow)> = tables
            .stubs
            .iter()
            .rev()
            .filter(|(_, row)| {
                row.status.is_active() && filter.matches(&row.owner, &row.url, &row.description)
            })
            .map(|(id, row)| (*id, row))
            .collect();

        let offset = (page as usize - 1).saturating_mul(page_size as usize);
        let items = matching
            .iter()
            .skip(offset)
            .take(page_size as usize)
            .map(|(id, row)| row.decode(*id))
            .collect::<MockResult<Vec<_>>>()?;

        Ok(StubPage {
            items,
            total: matching.len() as u64,
        })
    }

    async fn health_check(&self) -> MockResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
