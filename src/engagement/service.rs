//! Engagement service layer
//!
//! Loads the current record, asks the state machine for a [`Transition`],
//! commits it through the store and publishes the resulting events.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use uuid::Uuid;

use super::machine::Transition;
use super::model::{
    CreateEngagementRequest, Engagement, EngagementStatus, ListEngagementsQuery, Stage,
    StatusHistoryEntry,
};
use crate::clock::Clock;
use crate::config::EngineSettings;
use crate::earnings::{ledger, Earning};
use crate::error::{EngineError, EngineResult};
use crate::negotiation::{MessageBody, NegotiationMessage};
use crate::store::{EngagementStore, EngagementWrite};
use crate::websocket::{DomainEvent, EntityKind, EventBus};

/// Engagement lifecycle and negotiation operations
pub struct EngagementService {
    store: Arc<dyn EngagementStore>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    settings: EngineSettings,
}

impl EngagementService {
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

    pub async fn create_engagement(&self, request: CreateEngagementRequest) -> EngineResult<Engagement> {
        request.check().map_err(EngineError::Validation)?;

        let engagement = Engagement::new(
            request.client_id,
            request.provider_id,
            request.profile,
            request.description,
            self.clock.now(),
        );
        self.store
            .insert_engagement(&engagement, &engagement.creation_entry())
            .await?;

        tracing::info!(
            engagement_id = %engagement.id,
            code = %engagement.display_code,
            profile = ?engagement.profile,
            "Engagement created"
        );
        self.publish_engagement(&engagement);
        Ok(engagement)
    }

    pub async fn get_engagement(&self, id: Uuid) -> EngineResult<Engagement> {
        self.store
            .get_engagement(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Engagement {}", id)))
    }

    pub async fn list_engagements(&self, query: &ListEngagementsQuery) -> EngineResult<Vec<Engagement>> {
        self.store.list_engagements(query).await
    }

    pub async fn engagement_history(&self, id: Uuid) -> EngineResult<Vec<StatusHistoryEntry>> {
        self.get_engagement(id).await?;
        self.store.engagement_history(id).await
    }

    /// Record a price offer in the ledger and move the engagement to
    /// `negotiating`.
    pub async fn propose_price(&self, id: Uuid, actor_id: Uuid, amount: i64) -> EngineResult<Engagement> {
        let current = self.get_engagement(id).await?;
        let now = self.clock.now();
        let transition = current.propose(actor_id, amount, now)?;
        let offer = NegotiationMessage::new(id, actor_id, MessageBody::PriceOffer { amount }, now);

        let write = EngagementWrite::new(transition).with_message(offer.clone());
        let engagement = self.apply(write).await?;

        tracing::info!(engagement_id = %id, actor_id = %actor_id, amount, "Price proposed");
        self.publish_message(&offer);
        Ok(engagement)
    }

    /// Fix the agreed price. Accepting the already agreed price returns the
    /// record unchanged.
    pub async fn accept_price(&self, id: Uuid, amount: i64) -> EngineResult<Engagement> {
        let current = self.get_engagement(id).await?;
        let Some(transition) = current.accept_offer(amount, self.clock.now())? else {
            tracing::debug!(engagement_id = %id, amount, "Price already agreed, nothing to do");
            return Ok(current);
        };

        let engagement = self.apply(EngagementWrite::new(transition)).await?;
        tracing::info!(engagement_id = %id, amount, "Price agreed");
        Ok(engagement)
    }

    pub async fn mark_paid(&self, id: Uuid) -> EngineResult<Engagement> {
        let current = self.get_engagement(id).await?;
        let transition = current.mark_paid(self.clock.now())?;

        let engagement = self.apply(EngagementWrite::new(transition)).await?;
        tracing::info!(engagement_id = %id, "Payment recorded, engagement in progress");
        Ok(engagement)
    }

    /// Set the fulfillment stage. Reaching the terminal stage completes the
    /// engagement and credits the provider in the same write.
    pub async fn advance_stage(
        &self,
        id: Uuid,
        actor_id: Uuid,
        stage: Stage,
        notes: Option<String>,
    ) -> EngineResult<Engagement> {
        let current = self.get_engagement(id).await?;
        let now = self.clock.now();
        let transition = current.advance_stage(actor_id, stage, notes, now)?;
        let earning = self.earning_for(&transition)?;

        let write = EngagementWrite::new(transition).with_earning(earning.clone());
        let engagement = self.apply(write).await?;

        tracing::info!(engagement_id = %id, stage = %stage, status = %engagement.status, "Stage updated");
        if let Some(earning) = earning {
            tracing::info!(
                engagement_id = %id,
                provider_id = %earning.provider_id,
                amount = earning.amount,
                "Earning recorded"
            );
        }
        Ok(engagement)
    }

    pub async fn cancel(&self, id: Uuid, actor_id: Uuid, reason: &str) -> EngineResult<Engagement> {
        let current = self.get_engagement(id).await?;
        let transition = current.cancel(actor_id, reason, self.clock.now())?;

        let engagement = self.apply(EngagementWrite::new(transition)).await?;
        tracing::info!(engagement_id = %id, actor_id = %actor_id, "Engagement cancelled");
        Ok(engagement)
    }

    pub async fn reject(&self, id: Uuid, actor_id: Uuid, reason: &str) -> EngineResult<Engagement> {
        let current = self.get_engagement(id).await?;
        let transition = current.reject(actor_id, reason, self.clock.now())?;

        let engagement = self.apply(EngagementWrite::new(transition)).await?;
        tracing::info!(engagement_id = %id, provider_id = %actor_id, "Engagement rejected by provider");
        Ok(engagement)
    }

    // ===== Negotiation ledger =====

    pub async fn post_message(
        &self,
        id: Uuid,
        sender_id: Uuid,
        content: String,
    ) -> EngineResult<NegotiationMessage> {
        if content.trim().is_empty() {
            return Err(EngineError::Validation("Message cannot be empty".to_string()));
        }
        let engagement = self.get_engagement(id).await?;
        engagement.ensure_can_message(sender_id)?;

        let message = NegotiationMessage::new(
            id,
            sender_id,
            MessageBody::Text { content },
            self.clock.now(),
        );
        self.store.append_message(&message).await?;

        tracing::debug!(engagement_id = %id, message_id = %message.id, "Message posted");
        self.publish_message(&message);
        Ok(message)
    }

    pub async fn propose_schedule(
        &self,
        id: Uuid,
        sender_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        location: String,
    ) -> EngineResult<NegotiationMessage> {
        if location.trim().is_empty() {
            return Err(EngineError::Validation("Location is required".to_string()));
        }
        let engagement = self.get_engagement(id).await?;
        engagement.ensure_can_schedule(sender_id)?;

        let message = NegotiationMessage::new(
            id,
            sender_id,
            MessageBody::ScheduleProposal {
                date,
                time,
                location,
            },
            self.clock.now(),
        );
        self.store.append_message(&message).await?;

        tracing::info!(engagement_id = %id, message_id = %message.id, %date, %time, "Meeting proposed");
        self.publish_message(&message);
        Ok(message)
    }

    /// Accept a schedule proposal. The proposal is marked accepted and the
    /// meeting details are copied onto the engagement in one write.
    pub async fn accept_schedule(
        &self,
        id: Uuid,
        message_id: Uuid,
        actor_id: Uuid,
    ) -> EngineResult<Engagement> {
        let current = self.get_engagement(id).await?;
        let proposal = self
            .store
            .get_message(message_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Message {}", message_id)))?;

        let now = self.clock.now();
        let accepted = proposal.accept_schedule(&current, actor_id, now)?;
        let MessageBody::ScheduleProposal {
            date,
            time,
            location,
        } = &accepted.body
        else {
            return Err(EngineError::invalid_transition(
                "a non-schedule message",
                "accept a schedule",
            ));
        };
        let transition = current.confirm_meeting(actor_id, *date, *time, location, now)?;

        let write = EngagementWrite::new(transition).with_accepted_message(accepted.clone());
        let engagement = self.apply(write).await?;

        tracing::info!(engagement_id = %id, message_id = %message_id, "Meeting schedule accepted");
        self.publish_message(&accepted);
        Ok(engagement)
    }

    pub async fn list_messages(&self, id: Uuid) -> EngineResult<Vec<NegotiationMessage>> {
        self.get_engagement(id).await?;
        self.store.list_messages(id).await
    }

    // ===== Meeting evidence =====

    pub async fn submit_meeting_evidence(
        &self,
        id: Uuid,
        actor_id: Uuid,
        evidence_ref: &str,
        signature_ref: &str,
    ) -> EngineResult<Engagement> {
        let current = self.get_engagement(id).await?;
        let transition =
            current.attach_evidence(actor_id, evidence_ref, signature_ref, self.clock.now())?;

        let engagement = self.apply(EngagementWrite::new(transition)).await?;
        tracing::info!(engagement_id = %id, provider_id = %actor_id, "Meeting evidence submitted");
        Ok(engagement)
    }

    pub async fn verify_meeting(&self, id: Uuid, reviewer_id: Uuid) -> EngineResult<Engagement> {
        let current = self.get_engagement(id).await?;
        let transition = current.verify_meeting(reviewer_id, self.clock.now())?;

        let engagement = self.apply(EngagementWrite::new(transition)).await?;
        tracing::info!(engagement_id = %id, reviewer_id = %reviewer_id, "Meeting verified");
        Ok(engagement)
    }

    // ===== Internals =====

    /// Earning credited when `transition` completes the engagement.
    fn earning_for(&self, transition: &Transition) -> EngineResult<Option<Earning>> {
        let engagement = &transition.engagement;
        let Some(price) = engagement.agreed_price else {
            return Ok(None);
        };
        if engagement.status != EngagementStatus::Completed {
            return Ok(None);
        }
        Ok(Some(Earning::new(
            engagement.provider_id,
            engagement.id,
            ledger::net_earning(price, self.settings.platform_fee_bps)?,
            transition.history.created_at,
        )))
    }

    async fn apply(&self, write: EngagementWrite) -> EngineResult<Engagement> {
        if let Err(e) = self.store.commit(&write).await {
            if e.is_retryable() {
                tracing::warn!(
                    engagement_id = %write.transition.engagement.id,
                    expected_version = write.transition.expected_version,
                    "Concurrent modification detected"
                );
            }
            return Err(e);
        }

        let engagement = write.transition.engagement;
        self.publish_engagement(&engagement);
        Ok(engagement)
    }

    fn publish_engagement(&self, engagement: &Engagement) {
        self.events.publish(
            DomainEvent::new(EntityKind::Engagement, engagement.id, engagement.status)
                .for_engagement(engagement.id),
        );
    }

    fn publish_message(&self, message: &NegotiationMessage) {
        let state = if message.accepted_at.is_some() {
            "accepted"
        } else {
            "posted"
        };
        self.events.publish(
            DomainEvent::new(EntityKind::Message, message.id, state)
                .for_engagement(message.engagement_id),
        );
    }
}
