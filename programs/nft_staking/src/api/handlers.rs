//! Request handlers for the staking API.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;

use crate::api::types::*;
use crate::coordinator::{StakeRequest, StakingCoordinator, UnstakeRequest};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<StakingCoordinator>,
}

impl AppState {
    pub fn new(coordinator: Arc<StakingCoordinator>) -> Self {
        Self { coordinator }
    }
}

fn required_owner(query: Result<Query<OwnerQuery>, QueryRejection>) -> Result<String, ApiError> {
    let Query(query) = query.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    query
        .owner
        .filter(|owner| !owner.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing required query parameter: owner"))
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> ApiResult<HealthView> {
    let coordinator = &state.coordinator;
    Ok(Json(ApiResponse::ok(HealthView {
        status: "ok".to_string(),
        pools: coordinator.registry().len(),
        positions: coordinator.store().len(),
        now: coordinator.now(),
    })))
}

/// GET /staking/pools
pub async fn list_pools(State(state): State<AppState>) -> ApiResult<Vec<PoolView>> {
    let now = state.coordinator.now();
    let pools = state
        .coordinator
        .pools()
        .iter()
        .map(|pool| PoolView::new(pool, now))
        .collect();
    Ok(Json(ApiResponse::ok(pools)))
}

/// GET /staking/pools/eligible?assetId=&amount=
pub async fn eligible_pools(
    State(state): State<AppState>,
    query: Result<Query<EligibleQuery>, QueryRejection>,
) -> ApiResult<Vec<PoolView>> {
    let Query(query) = query.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let asset_id = query
        .asset_id
        .ok_or_else(|| ApiError::bad_request("Missing required query parameter: assetId"))?;
    let asset = staked_asset(parse_asset(&asset_id)?, query.amount);

    let now = state.coordinator.now();
    let pools = state
        .coordinator
        .eligible_pools(&asset)
        .iter()
        .map(|pool| PoolView::new(pool, now))
        .collect();
    Ok(Json(ApiResponse::ok(pools)))
}

/// GET /staking/pools/:pool_id/stats
pub async fn pool_stats(
    State(state): State<AppState>,
    pool_id: Result<Path<String>, PathRejection>,
) -> ApiResult<PoolStatsView> {
    let Path(pool_id) = pool_id.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let pool_id = parse_pool_id(&pool_id)?;
    let stats = state.coordinator.pool_stats(&pool_id)?;
    Ok(Json(ApiResponse::ok(PoolStatsView::from(&stats))))
}

/// GET /staking/positions?owner=
pub async fn list_positions(
    State(state): State<AppState>,
    query: Result<Query<OwnerQuery>, QueryRejection>,
) -> ApiResult<Vec<PositionView>> {
    let owner = parse_owner(&required_owner(query)?)?;
    let positions = state
        .coordinator
        .positions(&owner)
        .iter()
        .map(PositionView::from)
        .collect();
    Ok(Json(ApiResponse::ok(positions)))
}

/// POST /staking/stake
pub async fn stake(
    State(state): State<AppState>,
    payload: Result<Json<StakeBody>, JsonRejection>,
) -> ApiResult<PositionView> {
    let body = json_body(payload)?;
    let request = StakeRequest {
        owner: parse_owner(&body.owner)?,
        pool_id: parse_pool_id(&body.pool_id)?,
        asset: staked_asset(parse_asset(&body.asset_id)?, body.amount),
        lock_seconds: body.lock_seconds,
    };

    let position = state.coordinator.stake(request).await?;
    Ok(Json(ApiResponse::ok(PositionView::from(&position))))
}

/// POST /staking/unstake
pub async fn unstake(
    State(state): State<AppState>,
    payload: Result<Json<PositionBody>, JsonRejection>,
) -> ApiResult<UnstakeView> {
    let body = json_body(payload)?;
    let request = UnstakeRequest {
        owner: parse_owner(&body.owner)?,
        position_id: parse_position_id(&body.position_id)?,
    };

    let receipt = state.coordinator.unstake(request).await?;
    Ok(Json(ApiResponse::ok(UnstakeView::from(&receipt))))
}

/// POST /staking/claim
pub async fn claim(
    State(state): State<AppState>,
    payload: Result<Json<PositionBody>, JsonRejection>,
) -> ApiResult<ClaimView> {
    let body = json_body(payload)?;
    let owner = parse_owner(&body.owner)?;
    let position_id = parse_position_id(&body.position_id)?;

    let receipt = state.coordinator.claim(owner, &position_id).await?;
    Ok(Json(ApiResponse::ok(ClaimView::from(&receipt))))
}

/// GET /staking/stats?owner=
pub async fn owner_stats(
    State(state): State<AppState>,
    query: Result<Query<OwnerQuery>, QueryRejection>,
) -> ApiResult<OwnerStatsView> {
    let owner = parse_owner(&required_owner(query)?)?;
    let stats = state.coordinator.owner_stats(&owner)?;
    Ok(Json(ApiResponse::ok(OwnerStatsView::new(&owner, &stats))))
}

/// Any unmatched route.
pub async fn not_found() -> ApiError {
    ApiError::not_found("Route not found")
}

/// A known route called with the wrong method.
pub async fn method_not_allowed() -> ApiError {
    ApiError::method_not_allowed("Method not allowed")
}
