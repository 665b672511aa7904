//! Persistence seam for the engine
//!
//! [`EngagementStore`] is implemented by [`PgStore`] for production and by
//! [`MemoryStore`] for tests and local runs. Every write method is a single
//! atomic read-modify-write: either everything it describes is applied or
//! nothing is.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::activation::{ActivationState, Capability};
use crate::earnings::{Earning, SettlementResult, Withdrawal, WithdrawalStatus};
use crate::engagement::{Engagement, ListEngagementsQuery, StatusHistoryEntry, Transition};
use crate::error::EngineResult;
use crate::negotiation::NegotiationMessage;

/// Everything a single engagement operation writes.
#[derive(Debug, Clone)]
pub struct EngagementWrite {
    pub transition: Transition,
    /// New ledger entry appended with the transition
    pub message: Option<NegotiationMessage>,
    /// Schedule proposal flipped to accepted with the transition
    pub accepted_message: Option<NegotiationMessage>,
    /// Earning created when the transition completes the engagement
    pub earning: Option<Earning>,
}

impl EngagementWrite {
    pub fn new(transition: Transition) -> Self {
        Self {
            transition,
            message: None,
            accepted_message: None,
            earning: None,
        }
    }

    pub fn with_message(mut self, message: NegotiationMessage) -> Self {
        self.message = Some(message);
        self
    }

    pub fn with_accepted_message(mut self, message: NegotiationMessage) -> Self {
        self.accepted_message = Some(message);
        self
    }

    pub fn with_earning(mut self, earning: Option<Earning>) -> Self {
        self.earning = earning;
        self
    }
}

/// Settlement request passed to the store
#[derive(Debug, Clone, Copy)]
pub struct Settlement {
    pub withdrawal_id: Uuid,
    pub status: WithdrawalStatus,
    pub processed_by: Uuid,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait EngagementStore: Send + Sync {
    // ===== Engagements =====

    async fn insert_engagement(
        &self,
        engagement: &Engagement,
        history: &StatusHistoryEntry,
    ) -> EngineResult<()>;

    async fn get_engagement(&self, id: Uuid) -> EngineResult<Option<Engagement>>;

    async fn list_engagements(&self, query: &ListEngagementsQuery) -> EngineResult<Vec<Engagement>>;

    /// Audit trail in commit order
    async fn engagement_history(&self, id: Uuid) -> EngineResult<Vec<StatusHistoryEntry>>;

    /// Apply `write` if the stored row still has `expected_version`, otherwise
    /// fail with `ConcurrentModification` and write nothing.
    async fn commit(&self, write: &EngagementWrite) -> EngineResult<()>;

    /// Pending engagements created before `cutoff`
    async fn stale_pending(&self, cutoff: DateTime<Utc>) -> EngineResult<Vec<Engagement>>;

    /// Apply an expiry keyed on `status = pending` and the transition's
    /// expected version. Returns `false` when the row left `pending` or was
    /// written since it was read.
    async fn expire_if_pending(&self, transition: &Transition) -> EngineResult<bool>;

    async fn completed_for_provider(&self, provider_id: Uuid) -> EngineResult<Vec<Engagement>>;

    // ===== Negotiation ledger =====

    async fn append_message(&self, message: &NegotiationMessage) -> EngineResult<()>;

    async fn get_message(&self, id: Uuid) -> EngineResult<Option<NegotiationMessage>>;

    async fn list_messages(&self, engagement_id: Uuid) -> EngineResult<Vec<NegotiationMessage>>;

    // ===== Activations =====

    async fn get_activation(
        &self,
        provider_id: Uuid,
        capability: Capability,
    ) -> EngineResult<Option<ActivationState>>;

    /// Store `state` if the current row is still at `expected_version`
    /// (a missing row counts as version 0).
    async fn save_activation(&self, state: &ActivationState, expected_version: i64) -> EngineResult<()>;

    // ===== Earnings & withdrawals =====

    async fn list_earnings(&self, provider_id: Uuid) -> EngineResult<Vec<Earning>>;

    async fn list_withdrawals(&self, provider_id: Uuid) -> EngineResult<Vec<Withdrawal>>;

    async fn get_withdrawal(&self, id: Uuid) -> EngineResult<Option<Withdrawal>>;

    /// Re-check the evidence gate, minimum and balance, then insert, all
    /// serialized per provider.
    async fn create_withdrawal(&self, withdrawal: &Withdrawal, minimum: i64) -> EngineResult<()>;

    /// Move a withdrawal to `settlement.status`; completion allocates earnings
    /// FIFO under row locks.
    async fn settle_withdrawal(&self, settlement: Settlement) -> EngineResult<SettlementResult>;
}
