//! Earnings and withdrawal models

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

/// Provider earning produced by one completed engagement
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct Earning {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub engagement_id: Uuid,
    pub amount: i64,
    pub is_withdrawn: bool,
    pub withdrawal_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Earning {
    pub fn new(provider_id: Uuid, engagement_id: Uuid, amount: i64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider_id,
            engagement_id,
            amount,
            is_withdrawn: false,
            withdrawal_id: None,
            created_at: now,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "withdrawal_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Processing,
    Completed,
    Rejected,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Processing => "processing",
            WithdrawalStatus::Completed => "completed",
            WithdrawalStatus::Rejected => "rejected",
        }
    }

    /// Amounts in these states are reserved against the balance.
    pub fn is_outstanding(&self) -> bool {
        matches!(self, WithdrawalStatus::Pending | WithdrawalStatus::Processing)
    }
}

impl std::fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct Withdrawal {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub amount: i64,
    pub payout_destination: String,
    pub status: WithdrawalStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processed_by: Option<Uuid>,
}

impl Withdrawal {
    pub fn new(
        provider_id: Uuid,
        amount: i64,
        payout_destination: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider_id,
            amount,
            payout_destination,
            status: WithdrawalStatus::Pending,
            created_at: now,
            processed_at: None,
            processed_by: None,
        }
    }
}

/// Balance breakdown for one provider
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct BalanceSummary {
    pub total_earnings: i64,
    pub withdrawn_earnings: i64,
    pub outstanding_withdrawals: i64,
    pub available: i64,
}

/// Result of the evidence gate
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct WithdrawalEligibility {
    pub can_withdraw: bool,
    pub missing_evidence_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RequestWithdrawalRequest {
    #[validate(range(min = 1, message = "Amount must be positive"))]
    pub amount: i64,
    #[validate(length(min = 1, max = 255, message = "Payout destination is required"))]
    pub payout_destination: String,
}

#[derive(Debug, Deserialize)]
pub struct SettleWithdrawalRequest {
    pub status: WithdrawalStatus,
    pub processed_by: Uuid,
}

/// Outcome of a settlement
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct SettlementResult {
    pub withdrawal: Withdrawal,
    /// Earnings consumed by this settlement, oldest first
    pub allocated_earning_ids: Vec<Uuid>,
    pub allocated_amount: i64,
}
