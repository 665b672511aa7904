//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::PgPool;

use crate::activation::ActivationService;
use crate::clock::Clock;
use crate::config::EngineSettings;
use crate::earnings::EarningsService;
use crate::engagement::EngagementService;
use crate::store::EngagementStore;
use crate::sweeper::ExpirySweeper;
use crate::websocket::EventBus;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engagement_service: Arc<EngagementService>,
    pub activation_service: Arc<ActivationService>,
    pub earnings_service: Arc<EarningsService>,
    pub sweeper: Arc<ExpirySweeper>,
    pub events: EventBus,
    /// Present when running against PostgreSQL
    pub db_pool: Option<PgPool>,
}

impl AppState {
    /// Wire every service over one store, clock and event bus.
    pub fn new(
        store: Arc<dyn EngagementStore>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
        db_pool: Option<PgPool>,
    ) -> Self {
        let events = EventBus::new();

        Self {
            engagement_service: Arc::new(EngagementService::new(
                store.clone(),
                clock.clone(),
                events.clone(),
                settings,
            )),
            activation_service: Arc::new(ActivationService::new(
                store.clone(),
                clock.clone(),
                events.clone(),
            )),
            earnings_service: Arc::new(EarningsService::new(
                store.clone(),
                clock.clone(),
                events.clone(),
                settings,
            )),
            sweeper: Arc::new(ExpirySweeper::new(store, clock, events.clone(), settings)),
            events,
            db_pool,
        }
    }
}

impl FromRef<AppState> for EventBus {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.events.clone()
    }
}

impl FromRef<AppState> for Arc<EngagementService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.engagement_service.clone()
    }
}

impl FromRef<AppState> for Arc<ActivationService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.activation_service.clone()
    }
}

impl FromRef<AppState> for Arc<EarningsService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.earnings_service.clone()
    }
}

impl FromRef<AppState> for Arc<ExpirySweeper> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.sweeper.clone()
    }
}
