//! Meeting evidence gate

use super::model::WithdrawalEligibility;
use crate::engagement::Engagement;

/// Count completed staged engagements that neither carry both proof
/// references nor were verified by an admin.
pub fn missing_evidence_count<'a>(engagements: impl IntoIterator<Item = &'a Engagement>) -> usize {
    engagements
        .into_iter()
        .filter(|e| e.blocks_withdrawal())
        .count()
}

pub fn eligibility<'a>(engagements: impl IntoIterator<Item = &'a Engagement>) -> WithdrawalEligibility {
    let missing = missing_evidence_count(engagements);
    if missing == 0 {
        return WithdrawalEligibility {
            can_withdraw: true,
            missing_evidence_count: 0,
            reason: None,
        };
    }

    WithdrawalEligibility {
        can_withdraw: false,
        missing_evidence_count: missing,
        reason: Some(format!(
            "{} completed engagement(s) need meeting evidence and a signature before funds can be withdrawn",
            missing
        )),
    }
}
