//! Earnings and withdrawal API handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::earnings::{
    BalanceSummary, EarningsService, RequestWithdrawalRequest, SettleWithdrawalRequest,
    SettlementResult, Withdrawal, WithdrawalEligibility,
};
use crate::error::ApiResult;
use crate::models::ApiResponse;

pub async fn withdrawal_eligibility(
    State(service): State<Arc<EarningsService>>,
    Path(provider_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<WithdrawalEligibility>>> {
    let eligibility = service.can_withdraw(provider_id).await?;
    Ok(Json(ApiResponse::ok(eligibility)))
}

pub async fn balance(
    State(service): State<Arc<EarningsService>>,
    Path(provider_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<BalanceSummary>>> {
    let summary = service.balance(provider_id).await?;
    Ok(Json(ApiResponse::ok(summary)))
}

pub async fn request_withdrawal(
    State(service): State<Arc<EarningsService>>,
    Path(provider_id): Path<Uuid>,
    Json(request): Json<RequestWithdrawalRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Withdrawal>>)> {
    request.validate()?;
    let withdrawal = service
        .request_withdrawal(provider_id, request.amount, request.payout_destination)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(withdrawal))))
}

pub async fn list_withdrawals(
    State(service): State<Arc<EarningsService>>,
    Path(provider_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Vec<Withdrawal>>>> {
    let withdrawals = service.list_withdrawals(provider_id).await?;
    Ok(Json(ApiResponse::ok(withdrawals)))
}

pub async fn settle_withdrawal(
    State(service): State<Arc<EarningsService>>,
    Path(withdrawal_id): Path<Uuid>,
    Json(request): Json<SettleWithdrawalRequest>,
) -> ApiResult<Json<ApiResponse<SettlementResult>>> {
    let result = service
        .settle_withdrawal(withdrawal_id, request.status, request.processed_by)
        .await?;
    Ok(Json(ApiResponse::ok(result)))
}
