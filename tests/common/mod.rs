//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use uuid::Uuid;

use lexbridge_server::config::EngineSettings;
use lexbridge_server::engagement::{CreateEngagementRequest, Engagement, EngagementProfile, Stage};
use lexbridge_server::{AppState, ManualClock, MemoryStore};

/// In-memory application wired to a manual clock
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: ManualClock,
    pub state: AppState,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(EngineSettings::default())
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap());
        let state = AppState::new(store.clone(), Arc::new(clock.clone()), settings, None);
        Self {
            store,
            clock,
            state,
        }
    }

    pub async fn create(&self, profile: EngagementProfile) -> Engagement {
        self.state
            .engagement_service
            .create_engagement(CreateEngagementRequest {
                client_id: Uuid::new_v4(),
                provider_id: Uuid::new_v4(),
                profile,
                description: "Review of a commercial lease".to_string(),
            })
            .await
            .expect("create engagement")
    }

    pub async fn create_for_provider(&self, provider_id: Uuid, profile: EngagementProfile) -> Engagement {
        self.state
            .engagement_service
            .create_engagement(CreateEngagementRequest {
                client_id: Uuid::new_v4(),
                provider_id,
                profile,
                description: "Representation at hearing".to_string(),
            })
            .await
            .expect("create engagement")
    }

    /// Drive an engagement from `pending` to `completed` at `price`.
    pub async fn complete(&self, engagement: &Engagement, price: i64) -> Engagement {
        let service = &self.state.engagement_service;
        service
            .propose_price(engagement.id, engagement.client_id, price)
            .await
            .expect("propose");
        service.accept_price(engagement.id, price).await.expect("accept");
        service.mark_paid(engagement.id).await.expect("paid");
        service
            .advance_stage(engagement.id, engagement.provider_id, Stage::Completed, None)
            .await
            .expect("complete")
    }

    /// Completed engagement for `provider_id` with proof attached when
    /// `with_evidence` is set.
    pub async fn completed_for(
        &self,
        provider_id: Uuid,
        profile: EngagementProfile,
        price: i64,
        with_evidence: bool,
    ) -> Engagement {
        let engagement = self.create_for_provider(provider_id, profile).await;
        let completed = self.complete(&engagement, price).await;
        if with_evidence {
            return self
                .state
                .engagement_service
                .submit_meeting_evidence(completed.id, provider_id, "meeting.jpg", "signature.png")
                .await
                .expect("evidence");
        }
        completed
    }
}
