//! Capability activation models

use chrono::Duration;
use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

use super::cooldown;
use crate::error::{EngineError, EngineResult};

/// Provider features that require admin approval
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "provider_capability", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    InPersonMeetings,
    CourtRepresentation,
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "activation_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ActivationStatus {
    NotRequested,
    Pending,
    Approved,
    Rejected,
}

impl ActivationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivationStatus::NotRequested => "not_requested",
            ActivationStatus::Pending => "pending",
            ActivationStatus::Approved => "approved",
            ActivationStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for ActivationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Activation state of one capability for one provider
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct ActivationState {
    pub provider_id: Uuid,
    pub capability: Capability,
    pub status: ActivationStatus,
    pub enabled: bool,
    /// Monotonic; never reset
    pub rejection_count: i32,
    /// Overwritten on every rejection
    pub rejected_at: Option<DateTime<Utc>>,
    pub requested_at: Option<DateTime<Utc>>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<Uuid>,
    pub version: i64,
}

impl ActivationState {
    /// State of a capability that has never been requested.
    pub fn initial(provider_id: Uuid, capability: Capability) -> Self {
        Self {
            provider_id,
            capability,
            status: ActivationStatus::NotRequested,
            enabled: false,
            rejection_count: 0,
            rejected_at: None,
            requested_at: None,
            reviewed_at: None,
            reviewed_by: None,
            version: 0,
        }
    }

    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        cooldown::cooldown_remaining(self.rejected_at, self.rejection_count, now)
    }

    /// Validate a new request and return the `pending` state to write.
    pub fn request(&self, now: DateTime<Utc>) -> EngineResult<ActivationState> {
        match self.status {
            ActivationStatus::Pending => return Err(EngineError::AlreadyPending),
            ActivationStatus::Approved => {
                return Err(EngineError::invalid_transition(
                    self.status,
                    "request activation",
                ))
            }
            ActivationStatus::NotRequested | ActivationStatus::Rejected => {}
        }
        if let Some(remaining) = self.cooldown_remaining(now) {
            return Err(EngineError::CooldownActive { remaining });
        }

        let mut next = self.clone();
        next.status = ActivationStatus::Pending;
        next.requested_at = Some(now);
        next.version = self.version + 1;
        Ok(next)
    }

    /// Validate an admin decision on a pending request.
    pub fn review(
        &self,
        approve: bool,
        reviewer_id: Uuid,
        now: DateTime<Utc>,
    ) -> EngineResult<ActivationState> {
        if self.status != ActivationStatus::Pending {
            return Err(EngineError::invalid_transition(
                self.status,
                "review activation",
            ));
        }

        let mut next = self.clone();
        if approve {
            next.status = ActivationStatus::Approved;
            next.enabled = true;
        } else {
            next.status = ActivationStatus::Rejected;
            next.rejection_count = self.rejection_count + 1;
            next.rejected_at = Some(now);
        }
        next.reviewed_at = Some(now);
        next.reviewed_by = Some(reviewer_id);
        next.version = self.version + 1;
        Ok(next)
    }
}

/// Response for activation requests and status lookups
#[derive(Debug, Serialize, Clone)]
pub struct ActivationStatusResponse {
    pub status: ActivationStatus,
    pub enabled: bool,
    pub rejection_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining_seconds: Option<i64>,
}

impl ActivationStatusResponse {
    pub fn from_state(state: &ActivationState, now: DateTime<Utc>) -> Self {
        Self {
            status: state.status,
            enabled: state.enabled,
            rejection_count: state.rejection_count,
            cooldown_remaining_seconds: state.cooldown_remaining(now).map(|d| d.num_seconds()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RequestActivationRequest {
    pub capability: Capability,
}

#[derive(Debug, Deserialize)]
pub struct ReviewActivationRequest {
    pub capability: Capability,
    pub reviewer_id: Uuid,
    pub approve: bool,
}
