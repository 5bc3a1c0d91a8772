//! Stub Dispatch Server
//!
//! Stores HTTP stub definitions keyed by url and resolves inbound requests to
//! a canned response. Each stub carries a default response plus an ordered
//! list of override rules; the first active rule whose match rule equals the
//! request's raw query string or raw body wins.
//!
//! # Features
//!
//! - **Stub Store**: Upsert stubs by url, rules by `(stub, match_type, match_rule)`
//! - **Rule Dispatch**: Exact-match rules on query string or body, first match wins
//! - **Latency Simulation**: Per-rule delays, cancellable by the caller
//! - **Listing**: Paged, newest-first listing filtered by owner or keyword
//!
//! # Example Configuration
//!
//! ```yaml
//! settings:
//!   max_delay_ms: 10000
//! stubs:
//!   - url: /ping
//!     response_code: 200
//!     response_header:
//!       Content-Type: text/plain
//!     response_body: pong
//!     rules:
//!       - match_type: 1
//!         match_rule: fail=1
//!         response_code: 500
//!         response_body: err
//!         delay_time: 250
//! ```

pub mod config;
pub mod error;
pub mod matcher;
pub mod model;
pub mod server;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod wire;

pub use config::MockServerConfig;
pub use error::{MockError, MockResult};
pub use server::{Lifecycle, MockServer};
pub use service::{CancelSignal, DispatchService, ResolvedResponse, ResponseSource};
pub use store::{InMemoryStubStore, StubStore};
pub use telemetry::Logger;
