//! Route definitions for the LexBridge API

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{activation, earnings, engagement, system};
use crate::state::AppState;
use crate::websocket;

pub fn engagement_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/engagements",
            post(engagement::create_engagement).get(engagement::list_engagements),
        )
        .route("/api/engagements/:id", get(engagement::get_engagement))
        .route(
            "/api/engagements/:id/history",
            get(engagement::engagement_history),
        )
        .route("/api/engagements/:id/proposals", post(engagement::propose_price))
        .route("/api/engagements/:id/accept", post(engagement::accept_price))
        .route("/api/engagements/:id/payment", post(engagement::mark_paid))
        .route("/api/engagements/:id/stage", post(engagement::advance_stage))
        .route("/api/engagements/:id/cancel", post(engagement::cancel_engagement))
        .route("/api/engagements/:id/reject", post(engagement::reject_engagement))
        .route(
            "/api/engagements/:id/messages",
            get(engagement::list_messages).post(engagement::post_message),
        )
        .route(
            "/api/engagements/:id/messages/schedule",
            post(engagement::propose_schedule),
        )
        .route(
            "/api/engagements/:id/messages/:message_id/accept",
            post(engagement::accept_schedule),
        )
        .route(
            "/api/engagements/:id/evidence",
            post(engagement::submit_meeting_evidence),
        )
        .route("/api/engagements/:id/verify", post(engagement::verify_meeting))
}

pub fn provider_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/providers/:id/activations",
            post(activation::request_activation),
        )
        .route(
            "/api/providers/:id/activations/review",
            post(activation::review_activation),
        )
        .route(
            "/api/providers/:id/activations/:capability",
            get(activation::activation_status),
        )
        .route(
            "/api/providers/:id/eligibility",
            get(earnings::withdrawal_eligibility),
        )
        .route("/api/providers/:id/balance", get(earnings::balance))
        .route(
            "/api/providers/:id/withdrawals",
            post(earnings::request_withdrawal).get(earnings::list_withdrawals),
        )
        .route(
            "/api/withdrawals/:id/settle",
            post(earnings::settle_withdrawal),
        )
}

pub fn system_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(system::health_check))
        .route("/ws", get(websocket::ws_handler))
        .route("/api/sweeps/expiry", post(system::run_expiry_sweep))
}

/// Complete API router without transport layers
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .merge(engagement_routes())
        .merge(provider_routes())
        .merge(system_routes())
        .with_state(state)
}
