//! Dispatch service.
//!
//! Composes the stub store with the rule matcher: defines stubs, resolves
//! inbound requests to a concrete response and lists what is registered.

use crate::config::GlobalSettings;
use crate::error::{MockError, MockResult};
use crate::matcher::{self, MatchOutcome};
use crate::model::{MatchType, ResponseSpec, RuleId, StubDefinition, StubId};
use crate::store::{StubFilter, StubStore};
use crate::telemetry::Logger;
use crate::wire::{
    encode_headers, ListQuery, ListResponse, MockRequest, MockResponse, RuleSpec, StubSpec,
    StubView,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Cancellation signal supplied by the caller of `resolve`.
///
/// Fires once the paired sender publishes `true`. A dropped sender never
/// fires.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx: Some(rx) }
    }

    /// A new signal and the sender that fires it.
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self::new(rx))
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolves when the signal fires.
    pub async fn cancelled(&mut self) {
        let Some(rx) = self.rx.as_mut() else {
            return std::future::pending().await;
        };
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}

/// Where a resolved response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// The stub's default response
    Default,
    /// A rule override
    Rule { index: usize, rule_id: RuleId },
}

/// The response a request should receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedResponse {
    pub interface_id: StubId,
    pub response: ResponseSpec,
    /// Delay that was waited out before returning
    pub delay_ms: u64,
    pub source: ResponseSource,
}

impl ResolvedResponse {
    fn from_default(stub: StubDefinition) -> Self {
        Self {
            interface_id: stub.id,
            response: stub.default_response,
            delay_ms: 0,
            source: ResponseSource::Default,
        }
    }

    /// Numeric status; falls back to 200 when the stored code is not one.
    pub fn status(&self) -> u16 {
        self.response.numeric_status().unwrap_or(200)
    }

    /// Wire form with headers encoded as JSON text.
    pub fn to_wire(&self) -> MockResult<MockResponse> {
        Ok(MockResponse {
            response_code: self.response.status_code.clone(),
            response_header: encode_headers(&self.response.headers)?,
            response_body: self.response.body.clone(),
        })
    }
}

/// Request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub requests_total: u64,
    /// Answered by a rule
    pub requests_matched: u64,
    /// Answered by the default response
    pub requests_defaulted: u64,
    pub requests_not_found: u64,
}

/// Check a stub definition before anything is written.
pub fn validate_spec(spec: &StubSpec, strict_match_rules: bool) -> MockResult<()> {
    if !spec.url.starts_with('/') {
        return Err(MockError::Validation(
            "url must start with a forward slash (/)".to_string(),
        ));
    }
    validate_status_code(&spec.response_code)
        .map_err(|msg| MockError::Validation(format!("response_code {}", msg)))?;

    for (i, rule) in spec.rules.iter().enumerate() {
        let n = i + 1;
        let match_type = MatchType::from_code(rule.match_type);
        if !match_type.is_wire_valid() {
            return Err(MockError::Validation(format!(
                "invalid match_type in rule {}: must be between 1 and 3",
                n
            )));
        }
        validate_status_code(&rule.response_code).map_err(|msg| {
            MockError::Validation(format!("invalid response_code in rule {}: {}", n, msg))
        })?;
        if rule.delay_time < 0 {
            return Err(MockError::Validation(format!(
                "invalid delay_time in rule {}: must be >= 0",
                n
            )));
        }

        if strict_match_rules {
            match match_type {
                MatchType::QueryParam if !rule.match_rule.contains('=') => {
                    return Err(MockError::Validation(format!(
                        "rule {} has match_type 1 but match_rule is not a query string",
                        n
                    )));
                }
                MatchType::JsonBody
                    if serde_json::from_str::<serde_json::Value>(&rule.match_rule).is_err() =>
                {
                    return Err(MockError::Validation(format!(
                        "rule {} has match_type 2 but match_rule is not valid JSON",
                        n
                    )));
                }
                _ => {}
            }
        }
    }
    Ok(())
}

fn validate_status_code(code: &str) -> Result<(), String> {
    match code.trim().parse::<u16>() {
        Ok(value) if (100..=599).contains(&value) => Ok(()),
        _ => Err(format!("must be a valid HTTP status code (100-599), got {:?}", code)),
    }
}

/// Dispatch service.
///
/// Each call is independent; the store is the only shared state.
pub struct DispatchService {
    store: Arc<dyn StubStore>,
    settings: GlobalSettings,
    logger: Logger,
    requests_total: AtomicU64,
    requests_matched: AtomicU64,
    requests_defaulted: AtomicU64,
    requests_not_found: AtomicU64,
    /// Flipped to `true` on shutdown; aborts pending rule delays.
    shutdown: watch::Sender<bool>,
}

impl DispatchService {
    pub fn new(store: Arc<dyn StubStore>, settings: GlobalSettings, logger: Logger) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            settings,
            logger,
            requests_total: AtomicU64::new(0),
            requests_matched: AtomicU64::new(0),
            requests_defaulted: AtomicU64::new(0),
            requests_not_found: AtomicU64::new(0),
            shutdown,
        }
    }

    pub fn store(&self) -> &Arc<dyn StubStore> {
        &self.store
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_matched: self.requests_matched.load(Ordering::Relaxed),
            requests_defaulted: self.requests_defaulted.load(Ordering::Relaxed),
            requests_not_found: self.requests_not_found.load(Ordering::Relaxed),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Refuse new calls and abort pending rule delays.
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            self.logger
                .scope(|| info!("Dispatch service shutting down"));
        }
    }

    fn ensure_running(&self) -> MockResult<()> {
        if self.is_shut_down() {
            return Err(MockError::ShuttingDown);
        }
        Ok(())
    }

    /// Create or replace a stub by url, then upsert its rules in order.
    ///
    /// Not atomic across the stub and its rules: if a rule upsert fails, the
    /// stub and every rule before the failing one stay committed and the
    /// error is returned.
    pub async fn define(&self, spec: &StubSpec) -> MockResult<StubId> {
        self.ensure_running()?;
        validate_spec(spec, self.settings.strict_match_rules)?;
        let rules = spec
            .rules
            .iter()
            .map(RuleSpec::to_new_rule)
            .collect::<MockResult<Vec<_>>>()?;

        let interface_id = match self.store.upsert(spec.to_new_stub()).await {
            Ok(id) => id,
            Err(err) => {
                self.logger
                    .scope(|| error!(url = %spec.url, error = %err, "Failed to save stub"));
                return Err(err);
            }
        };

        self.logger.scope(|| {
            info!(
                url = %spec.url,
                interface_id,
                owner = %spec.owner,
                rules = rules.len(),
                "Saved stub"
            )
        });

        for (rule_index, rule) in rules.into_iter().enumerate() {
            let match_type = rule.match_type.code();
            if let Err(err) = self.store.upsert_rule(interface_id, rule).await {
                self.logger.scope(|| {
                    error!(
                        rule_index,
                        interface_id,
                        error = %err,
                        "Failed to save rule, earlier rules remain committed"
                    )
                });
                return Err(err);
            }
            self.logger
                .scope(|| debug!(rule_index, interface_id, match_type, "Saved rule"));
        }

        Ok(interface_id)
    }

    /// Resolve a request to the response it should receive.
    ///
    /// When a rule with a delay matches, the delay is waited out before
    /// returning. The wait ends early with `Cancelled` when `cancel` fires or
    /// `ShuttingDown` when the service is shut down.
    pub async fn resolve(
        &self,
        url: &str,
        request_query: &str,
        request_body: &str,
        cancel: &CancelSignal,
    ) -> MockResult<ResolvedResponse> {
        self.ensure_running()?;
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        let stub = match self.store.find_active_by_url(url).await {
            Ok(stub) => stub,
            Err(err) => {
                if matches!(err, MockError::NotFound(_)) {
                    self.requests_not_found.fetch_add(1, Ordering::Relaxed);
                    if self.settings.log_unmatched {
                        self.logger.scope(|| warn!(url = %url, "No active stub for url"));
                    }
                } else {
                    self.logger
                        .scope(|| error!(url = %url, error = %err, "Failed to look up stub"));
                }
                return Err(err);
            }
        };

        let rules = self.store.list_rules_for_stub(stub.id).await?;

        match matcher::evaluate(&rules, request_query, request_body) {
            MatchOutcome::Matched { index, rule, delay } => {
                self.requests_matched.fetch_add(1, Ordering::Relaxed);
                let delay = self.bounded_delay(delay);
                let delay_ms = delay.as_millis() as u64;

                if self.settings.log_matches {
                    self.logger.scope(|| {
                        info!(
                            url = %url,
                            rule_index = index,
                            rule_id = rule.id,
                            delay_ms,
                            "Request matched rule"
                        )
                    });
                }

                if !delay.is_zero() {
                    self.wait(delay, cancel).await?;
                }

                Ok(ResolvedResponse {
                    interface_id: stub.id,
                    response: rule.response.clone(),
                    delay_ms,
                    source: ResponseSource::Rule {
                        index,
                        rule_id: rule.id,
                    },
                })
            }
            MatchOutcome::NoMatch => {
                self.requests_defaulted.fetch_add(1, Ordering::Relaxed);
                if self.settings.log_unmatched {
                    self.logger.scope(|| {
                        info!(
                            url = %url,
                            rules = rules.len(),
                            "No rules matched, using default response"
                        )
                    });
                }
                Ok(ResolvedResponse::from_default(stub))
            }
        }
    }

    /// Resolve a wire request into a wire response.
    pub async fn resolve_request(
        &self,
        request: &MockRequest,
        cancel: &CancelSignal,
    ) -> MockResult<MockResponse> {
        self.resolve(
            &request.url,
            &request.query_params,
            &request.request_body,
            cancel,
        )
        .await?
        .to_wire()
    }

    /// One page of active stubs with their rules.
    pub async fn list(&self, query: &ListQuery) -> MockResult<ListResponse> {
        self.ensure_running()?;
        let page = query.page.filter(|page| *page > 0).unwrap_or(1);
        let page_size = query
            .size
            .filter(|size| *size > 0)
            .unwrap_or(self.settings.default_page_size)
            .min(self.settings.max_page_size);
        let filter = StubFilter::new(
            query.owner.clone().unwrap_or_default(),
            query.keyword.clone().unwrap_or_default(),
        );

        let result = self
            .store
            .list_active_stubs(&filter, page, page_size)
            .await?;

        let mut urls = Vec::with_capacity(result.items.len());
        for stub in &result.items {
            let rules = self.store.list_rules_for_stub(stub.id).await?;
            urls.push(StubView::new(stub, &rules));
        }

        self.logger.scope(|| {
            debug!(
                count = urls.len(),
                total = result.total,
                page,
                page_size,
                "Listed stubs"
            )
        });

        Ok(ListResponse {
            urls,
            total: result.total,
            current_page: page,
            page_size,
        })
    }

    /// Active rules of an active stub, in evaluation order.
    pub async fn rules(&self, interface_id: StubId) -> MockResult<Vec<RuleSpec>> {
        self.ensure_running()?;
        let stub = self.store.find_active_by_id(interface_id).await?;
        let rules = self.store.list_rules_for_stub(stub.id).await?;
        Ok(rules.iter().map(RuleSpec::from).collect())
    }

    fn bounded_delay(&self, delay: Duration) -> Duration {
        match self.settings.max_delay_ms {
            Some(max) => delay.min(Duration::from_millis(max)),
            None => delay,
        }
    }

    async fn wait(&self, delay: Duration, cancel: &CancelSignal) -> MockResult<()> {
        if cancel.is_cancelled() {
            return Err(MockError::Cancelled);
        }
        let mut cancel = cancel.clone();
        let mut shutdown = CancelSignal::new(self.shutdown.subscribe());

        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = cancel.cancelled() => {
                self.logger.scope(|| debug!(delay_ms = delay.as_millis() as u64, "Rule delay cancelled"));
                Err(MockError::Cancelled)
            }
            _ = shutdown.cancelled() => Err(MockError::ShuttingDown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Status;
    use crate::store::{InMemoryStubStore, StoreConfig};
    use std::collections::HashMap;
    use tokio::time::Instant;
    use tokio_test::{assert_err, assert_ok};

    fn service_with(config: StoreConfig, settings: GlobalSettings) -> (DispatchService, Arc<InMemoryStubStore>) {
        let store = Arc::new(InMemoryStubStore::new(config));
        let service = DispatchService::new(store.clone(), settings, Logger::noop());
        (service, store)
    }

    fn service() -> (DispatchService, Arc<InMemoryStubStore>) {
        service_with(StoreConfig::default(), GlobalSettings::default())
    }

    fn rule(match_type: i32, match_rule: &str, code: &str, body: &str, delay_time: i64) -> RuleSpec {
        RuleSpec {
            match_type,
            match_rule: match_rule.to_string(),
            response_code: code.to_string(),
            response_header: HashMap::new(),
            response_body: body.to_string(),
            delay_time,
            description: String::new(),
            meta: String::new(),
        }
    }

    fn stub(url: &str, body: &str, rules: Vec<RuleSpec>) -> StubSpec {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "text/plain".to_string());
        StubSpec {
            url: url.to_string(),
            response_code: "200".to_string(),
            response_header: headers,
            response_body: body.to_string(),
            owner: String::new(),
            description: String::new(),
            meta: String::new(),
            rules,
        }
    }

    fn ping_spec() -> StubSpec {
        serde_json::from_value(serde_json::json!({
            "url": "/ping",
            "response_code": "200",
            "response_header": {"Content-Type": "text/plain"},
            "response_body": "pong",
            "rules": [{
                "match_type": 1,
                "match_rule": "fail=1",
                "response_code": "500",
                "response_body": "err",
                "delay_time": 0
            }]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_ping_end_to_end() {
        let (service, _) = service();
        assert_ok!(service.define(&ping_spec()).await);

        let failed = service
            .resolve("/ping", "fail=1", "", &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(failed.status(), 500);
        assert_eq!(failed.response.body, "err");
        assert!(matches!(failed.source, ResponseSource::Rule { index: 0, .. }));

        let ok = service
            .resolve("/ping", "", "", &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(ok.status(), 200);
        assert_eq!(ok.response.body, "pong");
        assert_eq!(ok.delay_ms, 0);
        assert_eq!(ok.source, ResponseSource::Default);
        assert_eq!(ok.response.headers.get("Content-Type").map(String::as_str), Some("text/plain"));

        let stats = service.stats();
        assert_eq!(stats.requests_total, 2);
        assert_eq!(stats.requests_matched, 1);
        assert_eq!(stats.requests_defaulted, 1);
    }

    #[tokio::test]
    async fn test_redefine_overwrites_default_and_rules_are_additive() {
        let (service, _) = service();
        let first = service
            .define(&stub("/orders", "v1", vec![rule(1, "a=1", "200", "A", 0)]))
            .await
            .unwrap();
        let second = service
            .define(&stub("/orders", "v2", vec![rule(1, "b=1", "200", "B", 0)]))
            .await
            .unwrap();
        assert_eq!(first, second);

        let never = CancelSignal::never();
        let default = service.resolve("/orders", "", "", &never).await.unwrap();
        assert_eq!(default.response.body, "v2");

        // The rule not resent is still there
        let old = service.resolve("/orders", "a=1", "", &never).await.unwrap();
        assert_eq!(old.response.body, "A");
        let new = service.resolve("/orders", "b=1", "", &never).await.unwrap();
        assert_eq!(new.response.body, "B");

        // Resending a rule with the same natural key overwrites it in place
        service
            .define(&stub("/orders", "v3", vec![rule(1, "a=1", "202", "A2", 0)]))
            .await
            .unwrap();
        let rules = service.rules(first).await.unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].response_body, "A2");
        assert_eq!(rules[1].response_body, "B");
    }

    #[tokio::test]
    async fn test_unknown_url_is_not_found() {
        let (service, _) = service();
        let err = service
            .resolve("/missing", "", "", &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, MockError::NotFound(_)));
        assert_eq!(service.stats().requests_not_found, 1);
    }

    #[tokio::test]
    async fn test_zero_rules_returns_default_without_delay() {
        let (service, _) = service();
        service.define(&stub("/plain", "hello", vec![])).await.unwrap();

        let resolved = service
            .resolve("/plain", "anything=1", "body", &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(resolved.response.body, "hello");
        assert_eq!(resolved.delay_ms, 0);
    }

    #[tokio::test]
    async fn test_reserved_match_type_never_matches() {
        let (service, _) = service();
        service
            .define(&stub("/reserved", "default", vec![rule(3, "x=1", "500", "never", 0)]))
            .await
            .unwrap();

        let resolved = service
            .resolve("/reserved", "x=1", "x=1", &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(resolved.response.body, "default");
    }

    #[tokio::test]
    async fn test_body_rule() {
        let (service, _) = service();
        service
            .define(&stub(
                "/users",
                "default",
                vec![rule(2, r#"{"name":"ann"}"#, "201", "created", 0)],
            ))
            .await
            .unwrap();

        let never = CancelSignal::never();
        let hit = service
            .resolve("/users", "", r#"{"name":"ann"}"#, &never)
            .await
            .unwrap();
        assert_eq!(hit.status(), 201);

        let miss = service
            .resolve("/users", "", r#"{"name": "ann"}"#, &never)
            .await
            .unwrap();
        assert_eq!(miss.response.body, "default");
    }

    #[tokio::test]
    async fn test_inactive_stub_and_rule() {
        let (service, store) = service();
        let id = service
            .define(&stub(
                "/toggle",
                "default",
                vec![rule(1, "a=1", "200", "first", 0), rule(1, "a=1&b=2", "200", "second", 0)],
            ))
            .await
            .unwrap();

        let never = CancelSignal::never();
        let rules = store.list_rules_for_stub(id).await.unwrap();
        store.set_rule_status(rules[0].id, Status::Inactive).await.unwrap();

        let resolved = service.resolve("/toggle", "a=1", "", &never).await.unwrap();
        assert_eq!(resolved.response.body, "default");

        store.set_stub_status(id, Status::Inactive).await.unwrap();
        assert!(matches!(
            service.resolve("/toggle", "a=1&b=2", "", &never).await,
            Err(MockError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_stub_and_earlier_rules() {
        let (service, _) = service_with(
            StoreConfig {
                max_rules_per_stub: Some(1),
            },
            GlobalSettings::default(),
        );

        let spec = stub(
            "/partial",
            "default",
            vec![rule(1, "a=1", "200", "kept", 0), rule(1, "b=1", "200", "lost", 0)],
        );
        let err = service.define(&spec).await.unwrap_err();
        assert!(matches!(err, MockError::Persistence(_)));

        let never = CancelSignal::never();
        let default = service.resolve("/partial", "", "", &never).await.unwrap();
        assert_eq!(default.response.body, "default");
        let kept = service.resolve("/partial", "a=1", "", &never).await.unwrap();
        assert_eq!(kept.response.body, "kept");
        let lost = service.resolve("/partial", "b=1", "", &never).await.unwrap();
        assert_eq!(lost.response.body, "default");
    }

    #[tokio::test]
    async fn test_validation_rejects_before_writing() {
        let (service, store) = service();

        let mut bad_url = stub("no-slash", "x", vec![]);
        assert!(matches!(service.define(&bad_url).await, Err(MockError::Validation(_))));
        bad_url.url = String::new();
        assert!(matches!(service.define(&bad_url).await, Err(MockError::Validation(_))));

        let mut bad_code = stub("/code", "x", vec![]);
        bad_code.response_code = "99".to_string();
        assert_err!(service.define(&bad_code).await);

        let bad_match_type = stub("/mt", "x", vec![rule(4, "a=1", "200", "", 0)]);
        assert_err!(service.define(&bad_match_type).await);

        let bad_delay = stub("/delay", "x", vec![rule(1, "a=1", "200", "", -1)]);
        assert_err!(service.define(&bad_delay).await);

        let bad_rule_code = stub("/rc", "x", vec![rule(1, "a=1", "abc", "", 0)]);
        assert_err!(service.define(&bad_rule_code).await);

        let page = store
            .list_active_stubs(&StubFilter::default(), 1, 10)
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn test_strict_match_rules() {
        let settings = GlobalSettings {
            strict_match_rules: true,
            ..GlobalSettings::default()
        };
        let (strict, _) = service_with(StoreConfig::default(), settings);

        let no_equals = stub("/strict", "x", vec![rule(1, "1", "200", "", 0)]);
        assert!(matches!(strict.define(&no_equals).await, Err(MockError::Validation(_))));

        let not_json = stub("/strict", "x", vec![rule(2, "{oops", "200", "", 0)]);
        assert!(matches!(strict.define(&not_json).await, Err(MockError::Validation(_))));

        let fine = stub(
            "/strict",
            "x",
            vec![rule(1, "a=1", "200", "", 0), rule(2, r#"{"a":1}"#, "200", "", 0)],
        );
        assert_ok!(strict.define(&fine).await);

        // Without strict mode the same query rule is accepted and just never
        // matches a multi-parameter query
        let (lenient, _) = service();
        assert_ok!(lenient.define(&stub("/lenient", "x", vec![rule(1, "1", "500", "one", 0)])).await);
        let resolved = lenient
            .resolve("/lenient", "a=1&b=2", "", &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(resolved.response.body, "x");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rule_delay_is_honored() {
        let (service, _) = service();
        service
            .define(&stub("/slow", "fast", vec![rule(1, "slow=1", "200", "slow", 1500)]))
            .await
            .unwrap();

        let started = Instant::now();
        let resolved = service
            .resolve("/slow", "slow=1", "", &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(resolved.response.body, "slow");
        assert_eq!(resolved.delay_ms, 1500);
        assert!(started.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_capped_by_settings() {
        let settings = GlobalSettings {
            max_delay_ms: Some(100),
            ..GlobalSettings::default()
        };
        let (service, _) = service_with(StoreConfig::default(), settings);
        service
            .define(&stub("/slow", "fast", vec![rule(1, "slow=1", "200", "slow", 60_000)]))
            .await
            .unwrap();

        let started = Instant::now();
        let resolved = service
            .resolve("/slow", "slow=1", "", &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(resolved.delay_ms, 100);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_delay() {
        let (service, _) = service();
        service
            .define(&stub("/slow", "fast", vec![rule(1, "slow=1", "200", "slow", 60_000)]))
            .await
            .unwrap();

        let (tx, cancel) = CancelSignal::channel();
        let started = Instant::now();
        let trigger = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
        };

        let (result, ()) = tokio::join!(service.resolve("/slow", "slow=1", "", &cancel), trigger);
        assert!(matches!(result, Err(MockError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_already_cancelled_fails_fast() {
        let (service, _) = service();
        service
            .define(&stub("/slow", "fast", vec![rule(1, "slow=1", "200", "slow", 60_000)]))
            .await
            .unwrap();

        let (tx, cancel) = CancelSignal::channel();
        tx.send(true).unwrap();
        let result = service.resolve("/slow", "slow=1", "", &cancel).await;
        assert!(matches!(result, Err(MockError::Cancelled)));

        // Cancellation only matters when there is a delay to wait out
        let result = service.resolve("/slow", "", "", &cancel).await;
        assert_ok!(result);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_delay_and_refuses_calls() {
        let (service, _) = service();
        service
            .define(&stub("/slow", "fast", vec![rule(1, "slow=1", "200", "slow", 60_000)]))
            .await
            .unwrap();

        let trigger = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            service.shutdown();
        };
        let never = CancelSignal::never();
        let (result, ()) = tokio::join!(service.resolve("/slow", "slow=1", "", &never), trigger);
        assert!(matches!(result, Err(MockError::ShuttingDown)));

        assert!(service.is_shut_down());
        assert!(matches!(
            service.resolve("/slow", "", "", &never).await,
            Err(MockError::ShuttingDown)
        ));
        assert!(matches!(
            service.define(&stub("/new", "x", vec![])).await,
            Err(MockError::ShuttingDown)
        ));
        assert!(matches!(
            service.list(&ListQuery::default()).await,
            Err(MockError::ShuttingDown)
        ));
        assert!(matches!(service.rules(1).await, Err(MockError::ShuttingDown)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_timeout_abandons_delay() {
        let (service, _) = service();
        service
            .define(&stub("/slow", "fast", vec![rule(1, "slow=1", "200", "slow", 60_000)]))
            .await
            .unwrap();

        let started = Instant::now();
        let never = CancelSignal::never();
        let result = tokio::time::timeout(
            Duration::from_millis(200),
            service.resolve("/slow", "slow=1", "", &never),
        )
        .await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(60));

        // The abandoned call leaves the service usable
        let resolved = service.resolve("/slow", "", "", &never).await.unwrap();
        assert_eq!(resolved.response.body, "fast");
    }

    #[tokio::test]
    async fn test_list_second_page_with_rules() {
        let (service, _) = service();
        for i in 0..15 {
            service
                .define(&stub(
                    &format!("/stub/{}", i),
                    "x",
                    vec![rule(1, &format!("n={}", i), "200", "r", 0)],
                ))
                .await
                .unwrap();
        }

        let response = service
            .list(&ListQuery {
                page: Some(2),
                size: Some(10),
                ..ListQuery::default()
            })
            .await
            .unwrap();

        assert_eq!(response.total, 15);
        assert_eq!(response.current_page, 2);
        assert_eq!(response.page_size, 10);
        assert_eq!(response.urls.len(), 5);
        let urls: Vec<&str> = response.urls.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls, vec!["/stub/4", "/stub/3", "/stub/2", "/stub/1", "/stub/0"]);
        assert!(response.urls.windows(2).all(|w| w[0].id > w[1].id));
        assert_eq!(response.urls[0].rules.len(), 1);
        assert_eq!(response.urls[0].rules[0].match_rule, "n=4");
    }

    #[tokio::test]
    async fn test_list_defaults_and_clamps() {
        let settings = GlobalSettings {
            default_page_size: 3,
            max_page_size: 5,
            ..GlobalSettings::default()
        };
        let (service, _) = service_with(StoreConfig::default(), settings);
        for i in 0..8 {
            let mut spec = stub(&format!("/s{}", i), "x", vec![]);
            spec.owner = if i % 2 == 0 { "even" } else { "odd" }.to_string();
            service.define(&spec).await.unwrap();
        }

        let response = service.list(&ListQuery::default()).await.unwrap();
        assert_eq!(response.current_page, 1);
        assert_eq!(response.page_size, 3);
        assert_eq!(response.urls.len(), 3);

        let response = service
            .list(&ListQuery {
                page: Some(0),
                size: Some(50),
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(response.current_page, 1);
        assert_eq!(response.page_size, 5);

        let response = service
            .list(&ListQuery {
                owner: Some("odd".to_string()),
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(response.total, 4);
        assert!(response.urls.iter().all(|s| s.owner == "odd"));
    }

    #[tokio::test]
    async fn test_rules_for_unknown_stub() {
        let (service, _) = service();
        assert!(matches!(service.rules(42).await, Err(MockError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_resolve_request_wire_form() {
        let (service, _) = service();
        service.define(&ping_spec()).await.unwrap();

        let response = service
            .resolve_request(
                &MockRequest {
                    url: "/ping".to_string(),
                    query_params: String::new(),
                    request_body: String::new(),
                },
                &CancelSignal::never(),
            )
            .await
            .unwrap();
        assert_eq!(response.response_code, "200");
        assert_eq!(response.response_body, "pong");
        assert_eq!(response.response_header, r#"{"Content-Type":"text/plain"}"#);
    }

    #[test]
    fn test_status_fallback() {
        let mut resolved = ResolvedResponse {
            interface_id: 1,
            response: ResponseSpec {
                status_code: "not-a-code".to_string(),
                ..ResponseSpec::default()
            },
            delay_ms: 0,
            source: ResponseSource::Default,
        };
        assert_eq!(resolved.status(), 200);

        resolved.response.status_code = "700".to_string();
        assert_eq!(resolved.status(), 200);

        resolved.response.status_code = " 418 ".to_string();
        assert_eq!(resolved.status(), 418);
    }
}
