//! Engagement models and data structures

use chrono::{NaiveDate, NaiveTime};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

/// Lifecycle status of an engagement
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "engagement_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EngagementStatus {
    Pending,
    Negotiating,
    Agreed,
    InProgress,
    Completed,
    Cancelled,
    Rejected,
    Expired,
}

impl EngagementStatus {
    pub const ALL: [EngagementStatus; 8] = [
        EngagementStatus::Pending,
        EngagementStatus::Negotiating,
        EngagementStatus::Agreed,
        EngagementStatus::InProgress,
        EngagementStatus::Completed,
        EngagementStatus::Cancelled,
        EngagementStatus::Rejected,
        EngagementStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementStatus::Pending => "pending",
            EngagementStatus::Negotiating => "negotiating",
            EngagementStatus::Agreed => "agreed",
            EngagementStatus::InProgress => "in_progress",
            EngagementStatus::Completed => "completed",
            EngagementStatus::Cancelled => "cancelled",
            EngagementStatus::Rejected => "rejected",
            EngagementStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EngagementStatus::Completed
                | EngagementStatus::Cancelled
                | EngagementStatus::Rejected
                | EngagementStatus::Expired
        )
    }

    /// Statuses in which an agreed price must be present.
    pub fn holds_agreement(&self) -> bool {
        matches!(
            self,
            EngagementStatus::Agreed | EngagementStatus::InProgress | EngagementStatus::Completed
        )
    }
}

impl std::fmt::Display for EngagementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selects which stages and proof requirements apply to an engagement.
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "engagement_profile", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EngagementProfile {
    /// Single-step consultation
    Simple,
    /// Multi-stage representation with an in-person meeting
    Staged,
}

impl EngagementProfile {
    fn code_prefix(&self) -> &'static str {
        match self {
            EngagementProfile::Simple => "LC",
            EngagementProfile::Staged => "LR",
        }
    }
}

/// Progress marker within `in_progress`, in process order
#[derive(
    Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[sqlx(type_name = "engagement_stage", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    InitialConsultation,
    DocumentCollection,
    CaseReview,
    Filing,
    Hearing,
    Completed,
}

impl Stage {
    pub const TERMINAL: Stage = Stage::Completed;

    pub fn is_terminal(&self) -> bool {
        *self == Stage::TERMINAL
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::InitialConsultation => "initial_consultation",
            Stage::DocumentCollection => "document_collection",
            Stage::CaseReview => "case_review",
            Stage::Filing => "filing",
            Stage::Hearing => "hearing",
            Stage::Completed => "completed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
}

/// One client/provider service request and its full lifecycle record
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct Engagement {
    pub id: Uuid,
    pub display_code: String,
    pub client_id: Uuid,
    pub provider_id: Uuid,
    pub profile: EngagementProfile,
    pub description: String,
    pub proposed_price: Option<i64>,
    pub agreed_price: Option<i64>,
    pub payment_status: PaymentStatus,
    pub status: EngagementStatus,
    pub stage: Option<Stage>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<Uuid>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub auto_expired: bool,
    pub meeting_date: Option<NaiveDate>,
    pub meeting_time: Option<NaiveTime>,
    pub meeting_location: Option<String>,
    pub meeting_confirmed_at: Option<DateTime<Utc>>,
    pub evidence_photo_ref: Option<String>,
    pub signature_photo_ref: Option<String>,
    pub meeting_verified: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Engagement {
    /// Build a fresh `pending` engagement.
    pub fn new(
        client_id: Uuid,
        provider_id: Uuid,
        profile: EngagementProfile,
        description: String,
        now: DateTime<Utc>,
    ) -> Self {
        let stage = match profile {
            EngagementProfile::Simple => None,
            EngagementProfile::Staged => Some(Stage::InitialConsultation),
        };

        Self {
            id: Uuid::new_v4(),
            display_code: generate_display_code(profile),
            client_id,
            provider_id,
            profile,
            description,
            proposed_price: None,
            agreed_price: None,
            payment_status: PaymentStatus::Unpaid,
            status: EngagementStatus::Pending,
            stage,
            cancellation_reason: None,
            cancelled_by: None,
            cancelled_at: None,
            auto_expired: false,
            meeting_date: None,
            meeting_time: None,
            meeting_location: None,
            meeting_confirmed_at: None,
            evidence_photo_ref: None,
            signature_photo_ref: None,
            meeting_verified: false,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_party(&self, actor_id: Uuid) -> bool {
        actor_id == self.client_id || actor_id == self.provider_id
    }

    /// Both proof references are attached.
    pub fn has_meeting_evidence(&self) -> bool {
        self.evidence_photo_ref.is_some() && self.signature_photo_ref.is_some()
    }

    /// Completed staged engagement whose proof is neither verified nor complete.
    pub fn blocks_withdrawal(&self) -> bool {
        self.profile == EngagementProfile::Staged
            && self.status == EngagementStatus::Completed
            && !self.meeting_verified
            && !self.has_meeting_evidence()
    }
}

const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Human-readable code such as `LR-7KQ2M9`.
pub fn generate_display_code(profile: EngagementProfile) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", profile.code_prefix(), suffix)
}

/// Immutable audit record appended by every engagement write
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct StatusHistoryEntry {
    pub id: Uuid,
    pub engagement_id: Uuid,
    pub status: EngagementStatus,
    pub stage: Option<Stage>,
    pub agreed_price: Option<i64>,
    pub notes: Option<String>,
    /// `None` for system-driven changes
    pub actor_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Request DTO for creating an engagement
#[derive(Debug, Deserialize, Validate)]
pub struct CreateEngagementRequest {
    pub client_id: Uuid,
    pub provider_id: Uuid,
    pub profile: EngagementProfile,
    #[validate(length(min = 1, max = 4000, message = "Description must be between 1 and 4000 characters"))]
    pub description: String,
}

impl CreateEngagementRequest {
    /// Validate request
    pub fn check(&self) -> Result<(), String> {
        if let Err(e) = self.validate() {
            return Err(e.to_string());
        }
        if self.client_id == self.provider_id {
            return Err("Client and provider must be different".to_string());
        }
        Ok(())
    }
}

/// Query parameters for listing engagements
#[derive(Debug, Default, Deserialize)]
pub struct ListEngagementsQuery {
    pub client_id: Option<Uuid>,
    pub provider_id: Option<Uuid>,
    pub status: Option<EngagementStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl ListEngagementsQuery {
    /// `(limit, offset)` with the paging defaults applied
    pub fn window(&self) -> (i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self.limit.unwrap_or(20).clamp(1, 100);
        (limit, (page - 1) * limit)
    }
}

/// Largest price, in minor units, an engagement may carry
pub const MAX_PRICE: i64 = 1_000_000_000_000_000;

#[derive(Debug, Deserialize, Validate)]
pub struct ProposePriceRequest {
    pub actor_id: Uuid,
    #[validate(range(min = 1, max = 1_000_000_000_000_000, message = "Price is out of range"))]
    pub amount: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AcceptPriceRequest {
    #[validate(range(min = 1, max = 1_000_000_000_000_000, message = "Price is out of range"))]
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
pub struct AdvanceStageRequest {
    pub actor_id: Uuid,
    pub stage: Stage,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TerminateRequest {
    pub actor_id: Uuid,
    #[validate(length(min = 1, max = 1000, message = "Reason must be between 1 and 1000 characters"))]
    pub reason: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct MeetingEvidenceRequest {
    pub actor_id: Uuid,
    #[validate(length(min = 1, message = "Evidence reference is required"))]
    pub evidence_ref: String,
    #[validate(length(min = 1, message = "Signature reference is required"))]
    pub signature_ref: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyMeetingRequest {
    pub reviewer_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_code_format() {
        let code = generate_display_code(EngagementProfile::Staged);
        assert!(code.starts_with("LR-"));
        assert_eq!(code.len(), 9);
        assert!(code[3..]
            .bytes()
            .all(|b| CODE_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_new_engagement_defaults() {
        let now = Utc::now();
        let simple = Engagement::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            EngagementProfile::Simple,
            "Contract review".to_string(),
            now,
        );
        assert_eq!(simple.status, EngagementStatus::Pending);
        assert_eq!(simple.stage, None);
        assert_eq!(simple.payment_status, PaymentStatus::Unpaid);

        let staged = Engagement::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            EngagementProfile::Staged,
            "Court representation".to_string(),
            now,
        );
        assert_eq!(staged.stage, Some(Stage::InitialConsultation));
    }

    #[test]
    fn test_stage_ordering() {
        assert!(Stage::InitialConsultation < Stage::DocumentCollection);
        assert!(Stage::Hearing < Stage::Completed);
        assert!(Stage::Completed.is_terminal());
        assert!(!Stage::Filing.is_terminal());
    }

    #[test]
    fn test_create_request_rejects_same_party() {
        let id = Uuid::new_v4();
        let request = CreateEngagementRequest {
            client_id: id,
            provider_id: id,
            profile: EngagementProfile::Simple,
            description: "Need advice".to_string(),
        };
        assert!(request.check().is_err());
    }

    #[test]
    fn test_list_query_window() {
        let query = ListEngagementsQuery {
            page: Some(3),
            limit: Some(500),
            ..Default::default()
        };
        assert_eq!(query.window(), (100, 200));
        assert_eq!(ListEngagementsQuery::default().window(), (20, 0));
    }
}
