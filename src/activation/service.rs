//! Activation service layer

use std::sync::Arc;

use uuid::Uuid;

use super::model::{ActivationState, ActivationStatusResponse, Capability};
use crate::clock::Clock;
use crate::error::EngineResult;
use crate::store::EngagementStore;
use crate::websocket::{DomainEvent, EntityKind, EventBus};

pub struct ActivationService {
    store: Arc<dyn EngagementStore>,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl ActivationService {
    pub fn new(store: Arc<dyn EngagementStore>, clock: Arc<dyn Clock>, events: EventBus) -> Self {
        Self {
            store,
            clock,
            events,
        }
    }

    async fn load(&self, provider_id: Uuid, capability: Capability) -> EngineResult<ActivationState> {
        Ok(self
            .store
            .get_activation(provider_id, capability)
            .await?
            .unwrap_or_else(|| ActivationState::initial(provider_id, capability)))
    }

    /// Submit a new activation request. The cooldown is evaluated against the
    /// state read here and the write only lands if that state is unchanged.
    pub async fn request_activation(
        &self,
        provider_id: Uuid,
        capability: Capability,
    ) -> EngineResult<ActivationStatusResponse> {
        let current = self.load(provider_id, capability).await?;
        let now = self.clock.now();

        let next = match current.request(now) {
            Ok(next) => next,
            Err(e) => {
                tracing::info!(
                    provider_id = %provider_id,
                    capability = ?capability,
                    error = %e,
                    "Activation request refused"
                );
                return Err(e);
            }
        };
        self.store.save_activation(&next, current.version).await?;

        tracing::info!(provider_id = %provider_id, capability = ?capability, "Activation requested");
        self.publish(&next);
        Ok(ActivationStatusResponse::from_state(&next, now))
    }

    /// Record an admin decision on a pending request.
    pub async fn review_activation(
        &self,
        provider_id: Uuid,
        capability: Capability,
        reviewer_id: Uuid,
        approve: bool,
    ) -> EngineResult<ActivationStatusResponse> {
        let current = self.load(provider_id, capability).await?;
        let now = self.clock.now();

        let next = current.review(approve, reviewer_id, now)?;
        self.store.save_activation(&next, current.version).await?;

        if approve {
            tracing::info!(provider_id = %provider_id, capability = ?capability, reviewer_id = %reviewer_id, "Activation approved");
        } else {
            tracing::info!(
                provider_id = %provider_id,
                capability = ?capability,
                reviewer_id = %reviewer_id,
                rejection_count = next.rejection_count,
                "Activation rejected"
            );
        }
        self.publish(&next);
        Ok(ActivationStatusResponse::from_state(&next, now))
    }

    pub async fn activation_status(
        &self,
        provider_id: Uuid,
        capability: Capability,
    ) -> EngineResult<ActivationStatusResponse> {
        let current = self.load(provider_id, capability).await?;
        Ok(ActivationStatusResponse::from_state(&current, self.clock.now()))
    }

    fn publish(&self, state: &ActivationState) {
        self.events.publish(DomainEvent::new(
            EntityKind::Activation,
            state.provider_id,
            state.status,
        ));
    }
}
