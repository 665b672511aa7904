//! In-memory store
//!
//! A single lock guards all tables, so every method is serializable.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{EngagementStore, EngagementWrite, Settlement};
use crate::activation::{ActivationState, Capability};
use crate::earnings::{gate, ledger, Earning, SettlementResult, Withdrawal, WithdrawalStatus};
use crate::engagement::{
    Engagement, EngagementStatus, ListEngagementsQuery, StatusHistoryEntry, Transition,
};
use crate::error::{EngineError, EngineResult};
use crate::negotiation::NegotiationMessage;

#[derive(Debug, Default)]
struct Tables {
    engagements: HashMap<Uuid, Engagement>,
    history: Vec<StatusHistoryEntry>,
    messages: Vec<NegotiationMessage>,
    activations: HashMap<(Uuid, Capability), ActivationState>,
    earnings: Vec<Earning>,
    withdrawals: Vec<Withdrawal>,
}

impl Tables {
    fn provider_earnings(&self, provider_id: Uuid) -> Vec<Earning> {
        self.earnings
            .iter()
            .filter(|e| e.provider_id == provider_id)
            .cloned()
            .collect()
    }

    fn provider_withdrawals(&self, provider_id: Uuid) -> Vec<Withdrawal> {
        self.withdrawals
            .iter()
            .filter(|w| w.provider_id == provider_id)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EngagementStore for MemoryStore {
    async fn insert_engagement(
        &self,
        engagement: &Engagement,
        history: &StatusHistoryEntry,
    ) -> EngineResult<()> {
        let mut tables = self.tables.write().await;
        if tables.engagements.contains_key(&engagement.id) {
            return Err(EngineError::Storage(format!(
                "Engagement {} already exists",
                engagement.id
            )));
        }
        tables.engagements.insert(engagement.id, engagement.clone());
        tables.history.push(history.clone());
        Ok(())
    }

    async fn get_engagement(&self, id: Uuid) -> EngineResult<Option<Engagement>> {
        Ok(self.tables.read().await.engagements.get(&id).cloned())
    }

    async fn list_engagements(&self, query: &ListEngagementsQuery) -> EngineResult<Vec<Engagement>> {
        let tables = self.tables.read().await;
        let mut matching: Vec<Engagement> = tables
            .engagements
            .values()
            .filter(|e| query.client_id.map_or(true, |id| e.client_id == id))
            .filter(|e| query.provider_id.map_or(true, |id| e.provider_id == id))
            .filter(|e| query.status.map_or(true, |s| e.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let (limit, offset) = query.window();
        Ok(matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn engagement_history(&self, id: Uuid) -> EngineResult<Vec<StatusHistoryEntry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .history
            .iter()
            .filter(|h| h.engagement_id == id)
            .cloned()
            .collect())
    }

    async fn commit(&self, write: &EngagementWrite) -> EngineResult<()> {
        let mut tables = self.tables.write().await;
        let next = &write.transition.engagement;

        let current = tables
            .engagements
            .get(&next.id)
            .ok_or_else(|| EngineError::NotFound(format!("Engagement {}", next.id)))?;
        if current.version != write.transition.expected_version {
            return Err(EngineError::ConcurrentModification);
        }

        let accepted_index = match &write.accepted_message {
            Some(accepted) => {
                let index = tables
                    .messages
                    .iter()
                    .position(|m| m.id == accepted.id)
                    .ok_or_else(|| EngineError::NotFound(format!("Message {}", accepted.id)))?;
                if tables.messages[index].accepted_at.is_some() {
                    return Err(EngineError::ConcurrentModification);
                }
                Some(index)
            }
            None => None,
        };
        if let Some(earning) = &write.earning {
            if tables
                .earnings
                .iter()
                .any(|e| e.engagement_id == earning.engagement_id)
            {
                return Err(EngineError::ConcurrentModification);
            }
        }

        tables.engagements.insert(next.id, next.clone());
        tables.history.push(write.transition.history.clone());
        if let Some(message) = &write.message {
            tables.messages.push(message.clone());
        }
        if let (Some(index), Some(accepted)) = (accepted_index, &write.accepted_message) {
            tables.messages[index] = accepted.clone();
        }
        if let Some(earning) = &write.earning {
            tables.earnings.push(earning.clone());
        }
        Ok(())
    }

    async fn stale_pending(&self, cutoff: DateTime<Utc>) -> EngineResult<Vec<Engagement>> {
        let tables = self.tables.read().await;
        let mut stale: Vec<Engagement> = tables
            .engagements
            .values()
            .filter(|e| e.status == EngagementStatus::Pending && e.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|e| e.created_at);
        Ok(stale)
    }

    async fn expire_if_pending(&self, transition: &Transition) -> EngineResult<bool> {
        let mut tables = self.tables.write().await;
        let next = &transition.engagement;
        let unchanged = tables.engagements.get(&next.id).map_or(false, |e| {
            e.status == EngagementStatus::Pending && e.version == transition.expected_version
        });
        if !unchanged {
            return Ok(false);
        }
        tables.engagements.insert(next.id, next.clone());
        tables.history.push(transition.history.clone());
        Ok(true)
    }

    async fn completed_for_provider(&self, provider_id: Uuid) -> EngineResult<Vec<Engagement>> {
        let tables = self.tables.read().await;
        Ok(tables
            .engagements
            .values()
            .filter(|e| e.provider_id == provider_id && e.status == EngagementStatus::Completed)
            .cloned()
            .collect())
    }

    async fn append_message(&self, message: &NegotiationMessage) -> EngineResult<()> {
        self.tables.write().await.messages.push(message.clone());
        Ok(())
    }

    async fn get_message(&self, id: Uuid) -> EngineResult<Option<NegotiationMessage>> {
        let tables = self.tables.read().await;
        Ok(tables.messages.iter().find(|m| m.id == id).cloned())
    }

    async fn list_messages(&self, engagement_id: Uuid) -> EngineResult<Vec<NegotiationMessage>> {
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .iter()
            .filter(|m| m.engagement_id == engagement_id)
            .cloned()
            .collect())
    }

    async fn get_activation(
        &self,
        provider_id: Uuid,
        capability: Capability,
    ) -> EngineResult<Option<ActivationState>> {
        let tables = self.tables.read().await;
        Ok(tables.activations.get(&(provider_id, capability)).cloned())
    }

    async fn save_activation(&self, state: &ActivationState, expected_version: i64) -> EngineResult<()> {
        let mut tables = self.tables.write().await;
        let key = (state.provider_id, state.capability);
        let current_version = tables.activations.get(&key).map_or(0, |s| s.version);
        if current_version != expected_version {
            return Err(EngineError::ConcurrentModification);
        }
        tables.activations.insert(key, state.clone());
        Ok(())
    }

    async fn list_earnings(&self, provider_id: Uuid) -> EngineResult<Vec<Earning>> {
        Ok(self.tables.read().await.provider_earnings(provider_id))
    }

    async fn list_withdrawals(&self, provider_id: Uuid) -> EngineResult<Vec<Withdrawal>> {
        Ok(self.tables.read().await.provider_withdrawals(provider_id))
    }

    async fn get_withdrawal(&self, id: Uuid) -> EngineResult<Option<Withdrawal>> {
        let tables = self.tables.read().await;
        Ok(tables.withdrawals.iter().find(|w| w.id == id).cloned())
    }

    async fn create_withdrawal(&self, withdrawal: &Withdrawal, minimum: i64) -> EngineResult<()> {
        let mut tables = self.tables.write().await;
        let provider_id = withdrawal.provider_id;

        let missing = gate::missing_evidence_count(
            tables
                .engagements
                .values()
                .filter(|e| e.provider_id == provider_id),
        );
        let balance = ledger::summarize(
            &tables.provider_earnings(provider_id),
            &tables.provider_withdrawals(provider_id),
        );
        ledger::check_withdrawal(&balance, missing, withdrawal.amount, minimum)?;

        tables.withdrawals.push(withdrawal.clone());
        Ok(())
    }

    async fn settle_withdrawal(&self, settlement: Settlement) -> EngineResult<SettlementResult> {
        let mut tables = self.tables.write().await;

        let index = tables
            .withdrawals
            .iter()
            .position(|w| w.id == settlement.withdrawal_id)
            .ok_or_else(|| {
                EngineError::NotFound(format!("Withdrawal {}", settlement.withdrawal_id))
            })?;
        let current = tables.withdrawals[index].clone();
        ledger::check_settlement(current.status, settlement.status)?;

        let mut allocated_earning_ids = Vec::new();
        let mut allocated_amount = 0;
        if settlement.status == WithdrawalStatus::Completed {
            allocated_earning_ids = ledger::allocate_fifo(
                &tables.provider_earnings(current.provider_id),
                current.amount,
            );
            for earning in tables.earnings.iter_mut() {
                if allocated_earning_ids.contains(&earning.id) {
                    earning.is_withdrawn = true;
                    earning.withdrawal_id = Some(current.id);
                    allocated_amount += earning.amount;
                }
            }
        }

        let withdrawal = &mut tables.withdrawals[index];
        withdrawal.status = settlement.status;
        withdrawal.processed_by = Some(settlement.processed_by);
        withdrawal.processed_at = Some(settlement.at);

        Ok(SettlementResult {
            withdrawal: withdrawal.clone(),
            allocated_earning_ids,
            allocated_amount,
        })
    }
}
