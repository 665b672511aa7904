//! Capability activation API handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::activation::{
    ActivationService, ActivationStatusResponse, Capability, RequestActivationRequest,
    ReviewActivationRequest,
};
use crate::error::ApiResult;
use crate::models::ApiResponse;

pub async fn request_activation(
    State(service): State<Arc<ActivationService>>,
    Path(provider_id): Path<Uuid>,
    Json(request): Json<RequestActivationRequest>,
) -> ApiResult<Json<ApiResponse<ActivationStatusResponse>>> {
    let status = service
        .request_activation(provider_id, request.capability)
        .await?;
    Ok(Json(ApiResponse::ok(status)))
}

pub async fn review_activation(
    State(service): State<Arc<ActivationService>>,
    Path(provider_id): Path<Uuid>,
    Json(request): Json<ReviewActivationRequest>,
) -> ApiResult<Json<ApiResponse<ActivationStatusResponse>>> {
    let status = service
        .review_activation(
            provider_id,
            request.capability,
            request.reviewer_id,
            request.approve,
        )
        .await?;
    Ok(Json(ApiResponse::ok(status)))
}

pub async fn activation_status(
    State(service): State<Arc<ActivationService>>,
    Path((provider_id, capability)): Path<(Uuid, Capability)>,
) -> ApiResult<Json<ApiResponse<ActivationStatusResponse>>> {
    let status = service.activation_status(provider_id, capability).await?;
    Ok(Json(ApiResponse::ok(status)))
}
