//! Negotiation ledger models

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::engagement::Engagement;
use crate::error::{EngineError, EngineResult};

/// Message subtypes carried by the ledger
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    Text {
        content: String,
    },
    PriceOffer {
        amount: i64,
    },
    ScheduleProposal {
        date: NaiveDate,
        time: NaiveTime,
        location: String,
    },
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::Text { .. } => MessageKind::Text,
            MessageBody::PriceOffer { .. } => MessageKind::PriceOffer,
            MessageBody::ScheduleProposal { .. } => MessageKind::ScheduleProposal,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "message_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    PriceOffer,
    ScheduleProposal,
}

/// Append-only ledger entry belonging to exactly one engagement
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NegotiationMessage {
    pub id: Uuid,
    pub engagement_id: Uuid,
    pub sender_id: Uuid,
    #[serde(flatten)]
    pub body: MessageBody,
    /// Set once, only for schedule proposals
    pub accepted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl NegotiationMessage {
    pub fn new(engagement_id: Uuid, sender_id: Uuid, body: MessageBody, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            engagement_id,
            sender_id,
            body,
            accepted_at: None,
            created_at: now,
        }
    }

    /// Validate acceptance of a schedule proposal by `actor_id` and return the
    /// accepted copy.
    pub fn accept_schedule(
        &self,
        engagement: &Engagement,
        actor_id: Uuid,
        now: DateTime<Utc>,
    ) -> EngineResult<NegotiationMessage> {
        if self.engagement_id != engagement.id {
            return Err(EngineError::NotFound(format!("Message {}", self.id)));
        }
        if !matches!(self.body, MessageBody::ScheduleProposal { .. }) {
            return Err(EngineError::invalid_transition(
                "a non-schedule message",
                "accept a schedule",
            ));
        }
        if self.accepted_at.is_some() {
            return Err(EngineError::invalid_transition(
                "an accepted proposal",
                "accept a schedule",
            ));
        }
        engagement.ensure_party(actor_id)?;
        if actor_id == self.sender_id {
            return Err(EngineError::Forbidden(
                "A proposal must be accepted by the other party".to_string(),
            ));
        }

        let mut accepted = self.clone();
        accepted.accepted_at = Some(now);
        Ok(accepted)
    }
}

/// Flat storage form of [`NegotiationMessage`]
#[derive(Debug, sqlx::FromRow)]
pub struct MessageRow {
    pub id: Uuid,
    pub engagement_id: Uuid,
    pub sender_id: Uuid,
    pub kind: MessageKind,
    pub content: Option<String>,
    pub amount: Option<i64>,
    pub meeting_date: Option<NaiveDate>,
    pub meeting_time: Option<NaiveTime>,
    pub meeting_location: Option<String>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for NegotiationMessage {
    type Error = EngineError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let corrupt = || EngineError::Storage(format!("Malformed message row {}", row.id));
        let body = match row.kind {
            MessageKind::Text => MessageBody::Text {
                content: row.content.clone().ok_or_else(corrupt)?,
            },
            MessageKind::PriceOffer => MessageBody::PriceOffer {
                amount: row.amount.ok_or_else(corrupt)?,
            },
            MessageKind::ScheduleProposal => MessageBody::ScheduleProposal {
                date: row.meeting_date.ok_or_else(corrupt)?,
                time: row.meeting_time.ok_or_else(corrupt)?,
                location: row.meeting_location.clone().ok_or_else(corrupt)?,
            },
        };

        Ok(NegotiationMessage {
            id: row.id,
            engagement_id: row.engagement_id,
            sender_id: row.sender_id,
            body,
            accepted_at: row.accepted_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct PostMessageRequest {
    pub sender_id: Uuid,
    #[validate(length(min = 1, max = 4000, message = "Message must be between 1 and 4000 characters"))]
    pub content: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ProposeScheduleRequest {
    pub sender_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    #[validate(length(min = 1, max = 500, message = "Location is required"))]
    pub location: String,
}

#[derive(Debug, Deserialize)]
pub struct AcceptScheduleRequest {
    pub actor_id: Uuid,
}
