//! Balance computation and whole-record FIFO settlement

use uuid::Uuid;

use super::model::{BalanceSummary, Earning, Withdrawal, WithdrawalStatus};
use crate::error::{EngineError, EngineResult};

/// Provider share of an agreed price after the platform fee (basis points).
pub fn net_earning(agreed_price: i64, platform_fee_bps: u32) -> EngineResult<i64> {
    let fee = i128::from(agreed_price) * i128::from(platform_fee_bps) / 10_000;
    i64::try_from(i128::from(agreed_price) - fee).map_err(|_| {
        EngineError::Validation(format!(
            "Earning for price {} with fee {} bps is out of range",
            agreed_price, platform_fee_bps
        ))
    })
}

/// `available = total - withdrawn - pending_or_processing`
pub fn summarize(earnings: &[Earning], withdrawals: &[Withdrawal]) -> BalanceSummary {
    let total_earnings: i64 = earnings.iter().map(|e| e.amount).sum();
    let withdrawn_earnings: i64 = earnings
        .iter()
        .filter(|e| e.is_withdrawn)
        .map(|e| e.amount)
        .sum();
    let outstanding_withdrawals: i64 = withdrawals
        .iter()
        .filter(|w| w.status.is_outstanding())
        .map(|w| w.amount)
        .sum();

    BalanceSummary {
        total_earnings,
        withdrawn_earnings,
        outstanding_withdrawals,
        available: total_earnings - withdrawn_earnings - outstanding_withdrawals,
    }
}

/// Gate a withdrawal request. Evidence is checked first, then the minimum,
/// then the balance.
pub fn check_withdrawal(
    balance: &BalanceSummary,
    missing_evidence: usize,
    amount: i64,
    minimum: i64,
) -> EngineResult<()> {
    if missing_evidence > 0 {
        return Err(EngineError::EvidenceMissing(missing_evidence));
    }
    if amount < minimum {
        return Err(EngineError::BelowMinimumWithdrawal {
            minimum,
            requested: amount,
        });
    }
    if balance.available < amount {
        return Err(EngineError::InsufficientBalance {
            available: balance.available,
            requested: amount,
        });
    }
    Ok(())
}

/// Allowed settlement moves for a withdrawal.
pub fn check_settlement(current: WithdrawalStatus, requested: WithdrawalStatus) -> EngineResult<()> {
    use WithdrawalStatus::*;
    let allowed = matches!(
        (current, requested),
        (Pending, Processing) | (Pending, Completed) | (Pending, Rejected)
            | (Processing, Completed) | (Processing, Rejected)
    );
    if !allowed {
        return Err(EngineError::invalid_transition(
            current,
            &format!("settle as {}", requested),
        ));
    }
    Ok(())
}

/// Pick unwithdrawn earnings oldest first (ties by id), whole records only, until the
/// running remainder drops to zero or below. The last record may overshoot
/// `amount`; records are never split.
pub fn allocate_fifo(earnings: &[Earning], amount: i64) -> Vec<Uuid> {
    let mut candidates: Vec<&Earning> = earnings.iter().filter(|e| !e.is_withdrawn).collect();
    candidates.sort_by_key(|e| (e.created_at, e.id));

    let mut remaining = amount;
    let mut allocated = Vec::new();
    for earning in candidates {
        if remaining <= 0 {
            break;
        }
        allocated.push(earning.id);
        remaining -= earning.amount;
    }
    allocated
}
