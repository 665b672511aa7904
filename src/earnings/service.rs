//! Earnings service layer

use std::sync::Arc;

use uuid::Uuid;

use super::gate;
use super::ledger;
use super::model::{BalanceSummary, SettlementResult, Withdrawal, WithdrawalEligibility, WithdrawalStatus};
use crate::clock::Clock;
use crate::config::EngineSettings;
use crate::error::{EngineError, EngineResult};
use crate::store::{EngagementStore, Settlement};
use crate::websocket::{DomainEvent, EntityKind, EventBus};

pub struct EarningsService {
    store: Arc<dyn EngagementStore>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    settings: EngineSettings,
}

impl EarningsService {
    pub fn new(
        store: Arc<dyn EngagementStore>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            clock,
            events,
            settings,
        }
    }

    /// Evidence gate for `provider_id`.
    pub async fn can_withdraw(&self, provider_id: Uuid) -> EngineResult<WithdrawalEligibility> {
        let completed = self.store.completed_for_provider(provider_id).await?;
        Ok(gate::eligibility(&completed))
    }

    pub async fn balance(&self, provider_id: Uuid) -> EngineResult<BalanceSummary> {
        let earnings = self.store.list_earnings(provider_id).await?;
        let withdrawals = self.store.list_withdrawals(provider_id).await?;
        Ok(ledger::summarize(&earnings, &withdrawals))
    }

    /// Create a `pending` withdrawal. The store re-runs every check under the
    /// provider lock, so two racing requests cannot overdraw the balance.
    pub async fn request_withdrawal(
        &self,
        provider_id: Uuid,
        amount: i64,
        payout_destination: String,
    ) -> EngineResult<Withdrawal> {
        if payout_destination.trim().is_empty() {
            return Err(EngineError::Validation(
                "Payout destination is required".to_string(),
            ));
        }

        let withdrawal = Withdrawal::new(provider_id, amount, payout_destination, self.clock.now());
        if let Err(e) = self
            .store
            .create_withdrawal(&withdrawal, self.settings.min_withdrawal_amount)
            .await
        {
            tracing::info!(provider_id = %provider_id, amount, error = %e, "Withdrawal refused");
            return Err(e);
        }

        tracing::info!(
            provider_id = %provider_id,
            withdrawal_id = %withdrawal.id,
            amount,
            "Withdrawal requested"
        );
        self.publish(&withdrawal);
        Ok(withdrawal)
    }

    pub async fn list_withdrawals(&self, provider_id: Uuid) -> EngineResult<Vec<Withdrawal>> {
        self.store.list_withdrawals(provider_id).await
    }

    /// Move a withdrawal forward; completion consumes earnings oldest first.
    pub async fn settle_withdrawal(
        &self,
        withdrawal_id: Uuid,
        status: WithdrawalStatus,
        processed_by: Uuid,
    ) -> EngineResult<SettlementResult> {
        let result = self
            .store
            .settle_withdrawal(Settlement {
                withdrawal_id,
                status,
                processed_by,
                at: self.clock.now(),
            })
            .await?;

        if status == WithdrawalStatus::Completed && result.allocated_amount != result.withdrawal.amount {
            tracing::warn!(
                withdrawal_id = %withdrawal_id,
                requested = result.withdrawal.amount,
                allocated = result.allocated_amount,
                "Allocated earnings differ from the withdrawn amount"
            );
        }
        tracing::info!(
            withdrawal_id = %withdrawal_id,
            status = %status,
            allocated_records = result.allocated_earning_ids.len(),
            "Withdrawal settled"
        );
        self.publish(&result.withdrawal);
        Ok(result)
    }

    fn publish(&self, withdrawal: &Withdrawal) {
        self.events.publish(DomainEvent::new(
            EntityKind::Withdrawal,
            withdrawal.id,
            withdrawal.status,
        ));
    }
}
