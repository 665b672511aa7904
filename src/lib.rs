//! LexBridge engagement engine
//!
//! Lifecycle state machine for client/provider engagements, the negotiation
//! ledger, capability activation with escalating cooldowns, auto-expiry of
//! unanswered requests, and evidence-gated provider withdrawals.

pub mod activation;
pub mod clock;
pub mod config;
pub mod db;
pub mod earnings;
pub mod engagement;
pub mod error;
pub mod handlers;
pub mod models;
pub mod negotiation;
pub mod routes;
pub mod state;
pub mod store;
pub mod sweeper;
pub mod websocket;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, EngineSettings};
pub use error::{ApiError, EngineError, EngineResult};
pub use state::AppState;
pub use store::{EngagementStore, MemoryStore, PgStore};
