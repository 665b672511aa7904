//! Engagement and negotiation API handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::engagement::{
    AcceptPriceRequest, AdvanceStageRequest, CreateEngagementRequest, Engagement,
    EngagementService, ListEngagementsQuery, MeetingEvidenceRequest, ProposePriceRequest,
    StatusHistoryEntry, TerminateRequest, VerifyMeetingRequest,
};
use crate::error::{ApiError, ApiResult};
use crate::models::ApiResponse;
use crate::negotiation::{
    AcceptScheduleRequest, NegotiationMessage, PostMessageRequest, ProposeScheduleRequest,
};

type EngagementJson = Json<ApiResponse<Engagement>>;

pub async fn create_engagement(
    State(service): State<Arc<EngagementService>>,
    Json(request): Json<CreateEngagementRequest>,
) -> ApiResult<(StatusCode, EngagementJson)> {
    request.check().map_err(ApiError::ValidationError)?;
    let engagement = service.create_engagement(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(engagement))))
}

pub async fn get_engagement(
    State(service): State<Arc<EngagementService>>,
    Path(id): Path<Uuid>,
) -> ApiResult<EngagementJson> {
    let engagement = service.get_engagement(id).await?;
    Ok(Json(ApiResponse::ok(engagement)))
}

pub async fn list_engagements(
    State(service): State<Arc<EngagementService>>,
    Query(query): Query<ListEngagementsQuery>,
) -> ApiResult<Json<ApiResponse<Vec<Engagement>>>> {
    let engagements = service.list_engagements(&query).await?;
    Ok(Json(ApiResponse::ok(engagements)))
}

pub async fn engagement_history(
    State(service): State<Arc<EngagementService>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Vec<StatusHistoryEntry>>>> {
    let history = service.engagement_history(id).await?;
    Ok(Json(ApiResponse::ok(history)))
}

pub async fn propose_price(
    State(service): State<Arc<EngagementService>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ProposePriceRequest>,
) -> ApiResult<EngagementJson> {
    request.validate()?;
    let engagement = service
        .propose_price(id, request.actor_id, request.amount)
        .await?;
    Ok(Json(ApiResponse::ok(engagement)))
}

pub async fn accept_price(
    State(service): State<Arc<EngagementService>>,
    Path(id): Path<Uuid>,
    Json(request): Json<AcceptPriceRequest>,
) -> ApiResult<EngagementJson> {
    request.validate()?;
    let engagement = service.accept_price(id, request.amount).await?;
    Ok(Json(ApiResponse::ok(engagement)))
}

pub async fn mark_paid(
    State(service): State<Arc<EngagementService>>,
    Path(id): Path<Uuid>,
) -> ApiResult<EngagementJson> {
    let engagement = service.mark_paid(id).await?;
    Ok(Json(ApiResponse::ok(engagement)))
}

pub async fn advance_stage(
    State(service): State<Arc<EngagementService>>,
    Path(id): Path<Uuid>,
    Json(request): Json<AdvanceStageRequest>,
) -> ApiResult<EngagementJson> {
    let engagement = service
        .advance_stage(id, request.actor_id, request.stage, request.notes)
        .await?;
    Ok(Json(ApiResponse::ok(engagement)))
}

pub async fn cancel_engagement(
    State(service): State<Arc<EngagementService>>,
    Path(id): Path<Uuid>,
    Json(request): Json<TerminateRequest>,
) -> ApiResult<EngagementJson> {
    request.validate()?;
    let engagement = service.cancel(id, request.actor_id, &request.reason).await?;
    Ok(Json(ApiResponse::ok(engagement)))
}

pub async fn reject_engagement(
    State(service): State<Arc<EngagementService>>,
    Path(id): Path<Uuid>,
    Json(request): Json<TerminateRequest>,
) -> ApiResult<EngagementJson> {
    request.validate()?;
    let engagement = service.reject(id, request.actor_id, &request.reason).await?;
    Ok(Json(ApiResponse::ok(engagement)))
}

// ===== Negotiation ledger =====

pub async fn list_messages(
    State(service): State<Arc<EngagementService>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Vec<NegotiationMessage>>>> {
    let messages = service.list_messages(id).await?;
    Ok(Json(ApiResponse::ok(messages)))
}

pub async fn post_message(
    State(service): State<Arc<EngagementService>>,
    Path(id): Path<Uuid>,
    Json(request): Json<PostMessageRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<NegotiationMessage>>)> {
    request.validate()?;
    let message = service
        .post_message(id, request.sender_id, request.content)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(message))))
}

pub async fn propose_schedule(
    State(service): State<Arc<EngagementService>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ProposeScheduleRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<NegotiationMessage>>)> {
    request.validate()?;
    let message = service
        .propose_schedule(
            id,
            request.sender_id,
            request.date,
            request.time,
            request.location,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(message))))
}

pub async fn accept_schedule(
    State(service): State<Arc<EngagementService>>,
    Path((id, message_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<AcceptScheduleRequest>,
) -> ApiResult<EngagementJson> {
    let engagement = service
        .accept_schedule(id, message_id, request.actor_id)
        .await?;
    Ok(Json(ApiResponse::ok(engagement)))
}

// ===== Meeting evidence =====

pub async fn submit_meeting_evidence(
    State(service): State<Arc<EngagementService>>,
    Path(id): Path<Uuid>,
    Json(request): Json<MeetingEvidenceRequest>,
) -> ApiResult<EngagementJson> {
    request.validate()?;
    let engagement = service
        .submit_meeting_evidence(
            id,
            request.actor_id,
            &request.evidence_ref,
            &request.signature_ref,
        )
        .await?;
    Ok(Json(ApiResponse::ok(engagement)))
}

pub async fn verify_meeting(
    State(service): State<Arc<EngagementService>>,
    Path(id): Path<Uuid>,
    Json(request): Json<VerifyMeetingRequest>,
) -> ApiResult<EngagementJson> {
    let engagement = service.verify_meeting(id, request.reviewer_id).await?;
    Ok(Json(ApiResponse::ok(engagement)))
}
