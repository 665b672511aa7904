//! Engagement state machine
//!
//! Every operation here is a pure validator over the current record: it either
//! returns the next record together with the history entry describing the
//! change, or a typed error. Nothing is written until the caller commits the
//! returned [`Transition`], so a rejected operation has no side effect.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::model::{
    Engagement, EngagementProfile, EngagementStatus, PaymentStatus, Stage, StatusHistoryEntry,
    MAX_PRICE,
};
use crate::error::{EngineError, EngineResult};

/// Reason recorded when the sweeper closes an unanswered request.
pub const AUTO_EXPIRY_REASON: &str = "No response from provider within the allowed time";

/// A validated change ready to be committed.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Version the stored row must still carry for the write to apply
    pub expected_version: i64,
    pub engagement: Engagement,
    pub history: StatusHistoryEntry,
}

impl Engagement {
    fn ensure_open(&self, action: &str) -> EngineResult<()> {
        if self.status.is_terminal() {
            return Err(EngineError::invalid_transition(self.status, action));
        }
        Ok(())
    }

    pub fn ensure_party(&self, actor_id: Uuid) -> EngineResult<()> {
        if !self.is_party(actor_id) {
            return Err(EngineError::Forbidden(format!(
                "{} is not a party to engagement {}",
                actor_id, self.display_code
            )));
        }
        Ok(())
    }

    /// Opening entry of the audit trail for a freshly created record.
    pub fn creation_entry(&self) -> StatusHistoryEntry {
        StatusHistoryEntry {
            id: Uuid::new_v4(),
            engagement_id: self.id,
            status: self.status,
            stage: self.stage,
            agreed_price: self.agreed_price,
            notes: Some("Engagement requested".to_string()),
            actor_id: Some(self.client_id),
            created_at: self.created_at,
        }
    }

    /// Either party may write to the ledger until the engagement closes.
    pub fn ensure_can_message(&self, actor_id: Uuid) -> EngineResult<()> {
        self.ensure_open("post a message")?;
        self.ensure_party(actor_id)
    }

    pub fn ensure_can_schedule(&self, actor_id: Uuid) -> EngineResult<()> {
        self.ensure_open("propose a meeting")?;
        self.ensure_staged("propose a meeting")?;
        self.ensure_party(actor_id)
    }

    /// Wrap the mutated copy `next` with a fresh version and audit entry.
    fn transition_to(
        &self,
        mut next: Engagement,
        actor_id: Option<Uuid>,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Transition {
        next.version = self.version + 1;
        next.updated_at = now;

        let history = StatusHistoryEntry {
            id: Uuid::new_v4(),
            engagement_id: next.id,
            status: next.status,
            stage: next.stage,
            agreed_price: next.agreed_price,
            notes,
            actor_id,
            created_at: now,
        };

        Transition {
            expected_version: self.version,
            engagement: next,
            history,
        }
    }

    /// Record a price offer; the first offer opens negotiation.
    pub fn propose(&self, actor_id: Uuid, price: i64, now: DateTime<Utc>) -> EngineResult<Transition> {
        if !matches!(
            self.status,
            EngagementStatus::Pending | EngagementStatus::Negotiating
        ) {
            return Err(EngineError::invalid_transition(self.status, "propose a price"));
        }
        self.ensure_party(actor_id)?;
        ensure_price(price)?;

        let mut next = self.clone();
        next.proposed_price = Some(price);
        next.status = EngagementStatus::Negotiating;

        Ok(self.transition_to(
            next,
            Some(actor_id),
            Some(format!("Price offer of {}", price)),
            now,
        ))
    }

    /// Fix the agreed price. Returns `Ok(None)` when the same price was
    /// already agreed.
    pub fn accept_offer(&self, price: i64, now: DateTime<Utc>) -> EngineResult<Option<Transition>> {
        if let Some(agreed) = self.agreed_price {
            if agreed == price {
                return Ok(None);
            }
            return Err(EngineError::ConflictingAgreement {
                agreed,
                requested: price,
            });
        }
        if !matches!(
            self.status,
            EngagementStatus::Pending | EngagementStatus::Negotiating
        ) {
            return Err(EngineError::invalid_transition(self.status, "accept an offer"));
        }
        ensure_price(price)?;

        let mut next = self.clone();
        next.agreed_price = Some(price);
        next.status = EngagementStatus::Agreed;

        Ok(Some(self.transition_to(
            next,
            None,
            Some(format!("Agreed at {}", price)),
            now,
        )))
    }

    pub fn mark_paid(&self, now: DateTime<Utc>) -> EngineResult<Transition> {
        if self.status != EngagementStatus::Agreed {
            return Err(EngineError::invalid_transition(self.status, "mark as paid"));
        }

        let mut next = self.clone();
        next.payment_status = PaymentStatus::Paid;
        next.status = EngagementStatus::InProgress;

        Ok(self.transition_to(next, None, Some("Payment received".to_string()), now))
    }

    /// Move to `stage` in either direction; the terminal stage completes the
    /// engagement.
    pub fn advance_stage(
        &self,
        actor_id: Uuid,
        stage: Stage,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> EngineResult<Transition> {
        if self.status != EngagementStatus::InProgress {
            return Err(EngineError::invalid_transition(self.status, "advance the stage"));
        }
        if self.profile == EngagementProfile::Simple && !stage.is_terminal() {
            return Err(EngineError::invalid_transition(
                self.status,
                &format!("move a simple consultation to {}", stage),
            ));
        }
        self.ensure_party(actor_id)?;

        let mut next = self.clone();
        next.stage = Some(stage);
        if stage.is_terminal() {
            next.status = EngagementStatus::Completed;
        }

        let notes = notes.or_else(|| Some(format!("Stage set to {}", stage)));
        Ok(self.transition_to(next, Some(actor_id), notes, now))
    }

    pub fn cancel(&self, actor_id: Uuid, reason: &str, now: DateTime<Utc>) -> EngineResult<Transition> {
        if self.status.is_terminal() {
            return Err(EngineError::AlreadyTerminal(self.status.to_string()));
        }
        self.ensure_party(actor_id)?;
        ensure_reason(reason)?;

        let next = self.terminated(EngagementStatus::Cancelled, Some(actor_id), reason, false, now);
        Ok(self.transition_to(next, Some(actor_id), Some(reason.to_string()), now))
    }

    /// Provider declines the request before an agreement exists.
    pub fn reject(&self, actor_id: Uuid, reason: &str, now: DateTime<Utc>) -> EngineResult<Transition> {
        if self.status.is_terminal() {
            return Err(EngineError::AlreadyTerminal(self.status.to_string()));
        }
        if !matches!(
            self.status,
            EngagementStatus::Pending | EngagementStatus::Negotiating
        ) {
            return Err(EngineError::invalid_transition(self.status, "reject the request"));
        }
        if actor_id != self.provider_id {
            return Err(EngineError::Forbidden(
                "Only the provider can reject a request".to_string(),
            ));
        }
        ensure_reason(reason)?;

        let next = self.terminated(EngagementStatus::Rejected, Some(actor_id), reason, false, now);
        Ok(self.transition_to(next, Some(actor_id), Some(reason.to_string()), now))
    }

    /// System-driven close of a request that was never answered.
    pub fn expire(&self, now: DateTime<Utc>) -> EngineResult<Transition> {
        if self.status != EngagementStatus::Pending {
            return Err(EngineError::invalid_transition(self.status, "expire"));
        }

        let next = match self.profile {
            EngagementProfile::Simple => {
                self.terminated(EngagementStatus::Expired, None, AUTO_EXPIRY_REASON, false, now)
            }
            EngagementProfile::Staged => {
                self.terminated(EngagementStatus::Cancelled, None, AUTO_EXPIRY_REASON, true, now)
            }
        };
        Ok(self.transition_to(next, None, Some(AUTO_EXPIRY_REASON.to_string()), now))
    }

    /// Confirm an accepted meeting slot.
    pub fn confirm_meeting(
        &self,
        actor_id: Uuid,
        date: chrono::NaiveDate,
        time: chrono::NaiveTime,
        location: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<Transition> {
        self.ensure_open("schedule a meeting")?;
        self.ensure_staged("schedule a meeting")?;

        let mut next = self.clone();
        next.meeting_date = Some(date);
        next.meeting_time = Some(time);
        next.meeting_location = Some(location.to_string());
        next.meeting_confirmed_at = Some(now);

        Ok(self.transition_to(
            next,
            Some(actor_id),
            Some(format!("Meeting confirmed for {} {} at {}", date, time, location)),
            now,
        ))
    }

    pub fn attach_evidence(
        &self,
        actor_id: Uuid,
        evidence_ref: &str,
        signature_ref: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<Transition> {
        if !matches!(
            self.status,
            EngagementStatus::InProgress | EngagementStatus::Completed
        ) {
            return Err(EngineError::invalid_transition(self.status, "submit meeting evidence"));
        }
        self.ensure_staged("submit meeting evidence")?;
        if actor_id != self.provider_id {
            return Err(EngineError::Forbidden(
                "Only the provider can submit meeting evidence".to_string(),
            ));
        }
        if evidence_ref.trim().is_empty() || signature_ref.trim().is_empty() {
            return Err(EngineError::Validation(
                "Evidence and signature references are required".to_string(),
            ));
        }

        let mut next = self.clone();
        next.evidence_photo_ref = Some(evidence_ref.to_string());
        next.signature_photo_ref = Some(signature_ref.to_string());

        Ok(self.transition_to(
            next,
            Some(actor_id),
            Some("Meeting evidence submitted".to_string()),
            now,
        ))
    }

    pub fn verify_meeting(&self, reviewer_id: Uuid, now: DateTime<Utc>) -> EngineResult<Transition> {
        if self.status != EngagementStatus::Completed {
            return Err(EngineError::invalid_transition(self.status, "verify the meeting"));
        }
        self.ensure_staged("verify the meeting")?;

        let mut next = self.clone();
        next.meeting_verified = true;

        Ok(self.transition_to(
            next,
            Some(reviewer_id),
            Some("Meeting verified".to_string()),
            now,
        ))
    }

    fn ensure_staged(&self, action: &str) -> EngineResult<()> {
        if self.profile != EngagementProfile::Staged {
            return Err(EngineError::invalid_transition(
                "a simple consultation",
                action,
            ));
        }
        Ok(())
    }

    fn terminated(
        &self,
        status: EngagementStatus,
        actor_id: Option<Uuid>,
        reason: &str,
        auto_expired: bool,
        now: DateTime<Utc>,
    ) -> Engagement {
        let mut next = self.clone();
        next.status = status;
        // The previous price survives in the audit history.
        next.agreed_price = None;
        next.cancellation_reason = Some(reason.to_string());
        next.cancelled_by = actor_id;
        next.cancelled_at = Some(now);
        next.auto_expired = auto_expired;
        next
    }
}

fn ensure_price(price: i64) -> EngineResult<()> {
    if price <= 0 {
        return Err(EngineError::Validation("Price must be positive".to_string()));
    }
    if price > MAX_PRICE {
        return Err(EngineError::Validation(format!(
            "Price cannot exceed {}",
            MAX_PRICE
        )));
    }
    Ok(())
}

fn ensure_reason(reason: &str) -> EngineResult<()> {
    if reason.trim().is_empty() {
        return Err(EngineError::Validation("A reason is required".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, NaiveTime};

    fn engagement(profile: EngagementProfile) -> Engagement {
        Engagement::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            profile,
            "Tenancy dispute".to_string(),
            Utc::now(),
        )
    }

    fn agreement_invariant_holds(e: &Engagement) -> bool {
        e.agreed_price.is_some() == e.status.holds_agreement()
    }

    #[test]
    fn test_full_lifecycle() {
        let now = Utc::now();
        let e = engagement(EngagementProfile::Simple);

        let t = e.propose(e.client_id, 500, now).unwrap();
        assert_eq!(t.engagement.status, EngagementStatus::Negotiating);
        assert_eq!(t.expected_version, 0);
        assert_eq!(t.engagement.version, 1);

        let t = t.engagement.accept_offer(500, now).unwrap().unwrap();
        assert_eq!(t.engagement.status, EngagementStatus::Agreed);
        assert_eq!(t.engagement.agreed_price, Some(500));

        let t = t.engagement.mark_paid(now).unwrap();
        assert_eq!(t.engagement.status, EngagementStatus::InProgress);
        assert_eq!(t.engagement.payment_status, PaymentStatus::Paid);

        let t = t
            .engagement
            .advance_stage(e.provider_id, Stage::Completed, None, now)
            .unwrap();
        assert_eq!(t.engagement.status, EngagementStatus::Completed);
        assert_eq!(t.engagement.stage, Some(Stage::Completed));
        assert_eq!(t.engagement.agreed_price, Some(500));
        assert_eq!(t.history.status, EngagementStatus::Completed);
    }

    #[test]
    fn test_accept_is_idempotent_at_same_price() {
        let now = Utc::now();
        let e = engagement(EngagementProfile::Simple);
        let agreed = e.accept_offer(300, now).unwrap().unwrap().engagement;

        assert_eq!(agreed.accept_offer(300, now).unwrap(), None);
        assert_eq!(
            agreed.accept_offer(350, now).unwrap_err(),
            EngineError::ConflictingAgreement {
                agreed: 300,
                requested: 350
            }
        );
    }

    #[test]
    fn test_propose_rejected_after_agreement() {
        let now = Utc::now();
        let e = engagement(EngagementProfile::Simple);
        let agreed = e.accept_offer(300, now).unwrap().unwrap().engagement;
        assert!(matches!(
            agreed.propose(agreed.client_id, 400, now),
            Err(EngineError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_double_cancel_is_already_terminal() {
        let now = Utc::now();
        let e = engagement(EngagementProfile::Simple);
        let cancelled = e.cancel(e.client_id, "Changed my mind", now).unwrap().engagement;
        assert_eq!(cancelled.cancelled_by, Some(e.client_id));
        assert!(!cancelled.auto_expired);
        assert!(matches!(
            cancelled.cancel(e.client_id, "Again", now),
            Err(EngineError::AlreadyTerminal(_))
        ));
    }

    #[test]
    fn test_cancel_clears_agreed_price_but_history_keeps_it() {
        let now = Utc::now();
        let e = engagement(EngagementProfile::Simple);
        let agreed = e.accept_offer(250, now).unwrap().unwrap();
        assert_eq!(agreed.history.agreed_price, Some(250));

        let cancelled = agreed
            .engagement
            .cancel(e.provider_id, "Conflict of interest", now)
            .unwrap();
        assert_eq!(cancelled.engagement.agreed_price, None);
        assert!(agreement_invariant_holds(&cancelled.engagement));
    }

    #[test]
    fn test_stage_can_move_backwards() {
        let now = Utc::now();
        let e = engagement(EngagementProfile::Staged);
        let running = e
            .accept_offer(1000, now)
            .unwrap()
            .unwrap()
            .engagement
            .mark_paid(now)
            .unwrap()
            .engagement;

        let hearing = running.advance_stage(running.provider_id, Stage::Hearing, None, now).unwrap();
        let back = hearing
            .engagement
            .advance_stage(
                running.client_id,
                Stage::DocumentCollection,
                Some("Missing deed".to_string()),
                now,
            )
            .unwrap();
        assert_eq!(back.engagement.stage, Some(Stage::DocumentCollection));
        assert_eq!(back.engagement.status, EngagementStatus::InProgress);
        assert_eq!(back.history.notes.as_deref(), Some("Missing deed"));
    }

    #[test]
    fn test_simple_profile_only_accepts_terminal_stage() {
        let now = Utc::now();
        let e = engagement(EngagementProfile::Simple);
        let running = e
            .accept_offer(100, now)
            .unwrap()
            .unwrap()
            .engagement
            .mark_paid(now)
            .unwrap()
            .engagement;
        assert!(matches!(
            running.advance_stage(running.provider_id, Stage::Filing, None, now),
            Err(EngineError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_outsider_cannot_advance_stage() {
        let now = Utc::now();
        let e = engagement(EngagementProfile::Staged);
        let running = e
            .accept_offer(1000, now)
            .unwrap()
            .unwrap()
            .engagement
            .mark_paid(now)
            .unwrap()
            .engagement;
        assert!(matches!(
            running.advance_stage(Uuid::new_v4(), Stage::Completed, None, now),
            Err(EngineError::Forbidden(_))
        ));
        let t = running
            .advance_stage(running.client_id, Stage::Hearing, None, now)
            .unwrap();
        assert_eq!(t.history.actor_id, Some(running.client_id));
    }

    #[test]
    fn test_price_above_ceiling_is_rejected() {
        let now = Utc::now();
        let e = engagement(EngagementProfile::Simple);
        assert!(matches!(
            e.propose(e.client_id, MAX_PRICE + 1, now),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(e.accept_offer(i64::MAX, now), Err(EngineError::Validation(_))));
        assert!(e.propose(e.client_id, MAX_PRICE, now).is_ok());
    }

    #[test]
    fn test_expire_by_profile() {
        let now = Utc::now() + Duration::hours(2);

        let simple = engagement(EngagementProfile::Simple).expire(now).unwrap();
        assert_eq!(simple.engagement.status, EngagementStatus::Expired);
        assert!(!simple.engagement.auto_expired);
        assert_eq!(simple.history.actor_id, None);

        let staged = engagement(EngagementProfile::Staged).expire(now).unwrap();
        assert_eq!(staged.engagement.status, EngagementStatus::Cancelled);
        assert!(staged.engagement.auto_expired);
        assert_eq!(
            staged.engagement.cancellation_reason.as_deref(),
            Some(AUTO_EXPIRY_REASON)
        );
    }

    #[test]
    fn test_non_party_cannot_propose() {
        let e = engagement(EngagementProfile::Simple);
        assert!(matches!(
            e.propose(Uuid::new_v4(), 100, Utc::now()),
            Err(EngineError::Forbidden(_))
        ));
    }

    #[test]
    fn test_only_provider_rejects() {
        let now = Utc::now();
        let e = engagement(EngagementProfile::Simple);
        assert!(matches!(
            e.reject(e.client_id, "No", now),
            Err(EngineError::Forbidden(_))
        ));
        let rejected = e.reject(e.provider_id, "Outside my practice area", now).unwrap();
        assert_eq!(rejected.engagement.status, EngagementStatus::Rejected);
    }

    #[test]
    fn test_meeting_and_evidence_on_staged_only() {
        let now = Utc::now();
        let simple = engagement(EngagementProfile::Simple);
        let date = NaiveDate::from_ymd_opt(2026, 11, 2).unwrap();
        let time = NaiveTime::from_hms_opt(10, 30, 0).unwrap();
        assert!(simple
            .confirm_meeting(simple.client_id, date, time, "Court 4", now)
            .is_err());

        let staged = engagement(EngagementProfile::Staged);
        let confirmed = staged
            .confirm_meeting(staged.client_id, date, time, "Court 4", now)
            .unwrap();
        assert_eq!(confirmed.engagement.meeting_confirmed_at, Some(now));
        assert_eq!(confirmed.engagement.meeting_location.as_deref(), Some("Court 4"));

        // Evidence only once work has started
        assert!(matches!(
            staged.attach_evidence(staged.provider_id, "ev.jpg", "sig.jpg", now),
            Err(EngineError::InvalidTransition { .. })
        ));
    }

    /// Every operation from every status either lands on a defined status or
    /// fails without producing a record.
    #[test]
    fn test_transition_closure() {
        let now = Utc::now();
        for profile in [EngagementProfile::Simple, EngagementProfile::Staged] {
            for status in EngagementStatus::ALL {
                let mut e = engagement(profile);
                e.status = status;
                if status.holds_agreement() {
                    e.agreed_price = Some(100);
                }
                if status == EngagementStatus::Completed {
                    e.stage = Some(Stage::Completed);
                }

                let results = vec![
                    e.propose(e.client_id, 120, now),
                    e.accept_offer(150, now).and_then(|t| {
                        t.ok_or(EngineError::Validation("no-op".to_string()))
                    }),
                    e.mark_paid(now),
                    e.advance_stage(e.provider_id, Stage::Completed, None, now),
                    e.cancel(e.client_id, "reason", now),
                    e.reject(e.provider_id, "reason", now),
                    e.expire(now),
                ];

                for result in results {
                    match result {
                        Ok(t) => {
                            assert!(!status.is_terminal(), "{} must not transition", status);
                            assert!(EngagementStatus::ALL.contains(&t.engagement.status));
                            assert!(agreement_invariant_holds(&t.engagement));
                            if t.engagement.status == EngagementStatus::Completed {
                                assert_eq!(t.engagement.stage, Some(Stage::Completed));
                            }
                        }
                        Err(err) => assert!(matches!(
                            err,
                            EngineError::InvalidTransition { .. }
                                | EngineError::AlreadyTerminal(_)
                                | EngineError::ConflictingAgreement { .. }
                                | EngineError::Validation(_)
                        )),
                    }
                }
            }
        }
    }
}
