//! Wire types for the HTTP API.
//!
//! Every response is wrapped in [`ApiResponse`]; field names are camelCase
//! and keys are base58.

use std::str::FromStr;

use anchor_lang::prelude::Pubkey;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::coordinator::{ClaimReceipt, UnstakeReceipt};
use crate::error::{ErrorKind, StakingError};
use crate::state::{Pool, PoolId, Position, StakedAsset};
use crate::stats::{OwnerStats, PoolStats};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Error half of every handler result.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::METHOD_NOT_ALLOWED,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<StakingError> for ApiError {
    fn from(err: StakingError) -> Self {
        let status = match err.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if err.kind() == ErrorKind::Internal {
            error!(code = err.code(), "Request failed: {}", err);
        } else {
            debug!(code = err.code(), kind = %err.kind(), "Request rejected: {}", err);
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::<()>::failure(self.message))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, ApiError>;

pub fn parse_owner(value: &str) -> Result<Pubkey, StakingError> {
    Pubkey::from_str(value).map_err(|_| StakingError::InvalidOwner(value.to_string()))
}

pub fn parse_asset(value: &str) -> Result<Pubkey, StakingError> {
    Pubkey::from_str(value).map_err(|_| StakingError::InvalidAsset(value.to_string()))
}

pub fn parse_position_id(value: &str) -> Result<Pubkey, StakingError> {
    Pubkey::from_str(value).map_err(|_| StakingError::InvalidPositionId(value.to_string()))
}

pub fn parse_pool_id(value: &str) -> Result<PoolId, StakingError> {
    PoolId::new(value)
}

/// `amount` present means a fungible stake of that many units.
pub fn staked_asset(mint: Pubkey, amount: Option<u64>) -> StakedAsset {
    match amount {
        Some(amount) => StakedAsset::Tokens { mint, amount },
        None => StakedAsset::Nft { mint },
    }
}

// ========== Requests ==========

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeBody {
    pub owner: String,
    pub asset_id: String,
    pub pool_id: String,
    pub amount: Option<u64>,
    pub lock_seconds: Option<i64>,
}

/// Body of unstake and claim requests.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionBody {
    pub owner: String,
    pub position_id: String,
}

#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    pub owner: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibleQuery {
    pub asset_id: Option<String>,
    pub amount: Option<u64>,
}

// ========== Responses ==========

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolView {
    pub id: String,
    pub name: String,
    pub eligibility: String,
    pub reward_rate: u64,
    pub accrual: String,
    pub min_lock_seconds: i64,
    pub capacity: Option<u64>,
    pub total_staked: u64,
    pub active_positions: u64,
    pub early_exit_penalty_bps: Option<u16>,
    pub emission_cap: Option<u64>,
    pub total_distributed: u64,
    pub paused: bool,
}

impl PoolView {
    pub fn new(pool: &Pool, now: i64) -> Self {
        Self {
            id: pool.id.to_string(),
            name: pool.name.clone(),
            eligibility: pool.eligibility.describe(),
            reward_rate: pool.rate_at(now),
            accrual: pool.accrual.to_string(),
            min_lock_seconds: pool.min_lock_seconds,
            capacity: pool.capacity,
            total_staked: pool.total_staked,
            active_positions: pool.active_positions,
            early_exit_penalty_bps: pool.penalty_bps(),
            emission_cap: pool.emission_cap,
            total_distributed: pool.total_distributed,
            paused: pool.paused,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionView {
    pub id: String,
    pub owner: String,
    pub pool_id: String,
    pub asset_id: String,
    pub asset_kind: String,
    pub amount: u64,
    pub staked_at: i64,
    pub lock_expires_at: i64,
    pub accrued_rewards: u64,
    pub claimed_rewards: u64,
    pub forfeited_rewards: u64,
    pub pending_rewards: u64,
    pub last_checkpoint: i64,
    pub status: String,
    pub closed_at: Option<i64>,
}

impl From<&Position> for PositionView {
    fn from(position: &Position) -> Self {
        Self {
            id: position.id.to_string(),
            owner: position.owner.to_string(),
            pool_id: position.pool_id.to_string(),
            asset_id: position.asset.mint().to_string(),
            asset_kind: if position.asset.is_nft() { "nft" } else { "tokens" }.to_string(),
            amount: position.quantity(),
            staked_at: position.staked_at,
            lock_expires_at: position.lock_expires_at,
            accrued_rewards: position.accrued_rewards,
            claimed_rewards: position.claimed_rewards,
            forfeited_rewards: position.forfeited_rewards,
            pending_rewards: position.pending_rewards(),
            last_checkpoint: position.last_checkpoint,
            status: position.status.to_string(),
            closed_at: position.closed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnstakeView {
    pub position_id: String,
    pub rewards_claimed: u64,
    /// Left pending by the emission cap; claimable after the cap is raised.
    pub rewards_deferred: u64,
    pub penalty: u64,
}

impl From<&UnstakeReceipt> for UnstakeView {
    fn from(receipt: &UnstakeReceipt) -> Self {
        Self {
            position_id: receipt.position.id.to_string(),
            rewards_claimed: receipt.rewards_claimed,
            rewards_deferred: receipt.rewards_deferred,
            penalty: receipt.penalty,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimView {
    pub position_id: String,
    pub claimed: u64,
}

impl From<&ClaimReceipt> for ClaimView {
    fn from(receipt: &ClaimReceipt) -> Self {
        Self {
            position_id: receipt.position_id.to_string(),
            claimed: receipt.claimed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerStatsView {
    pub owner: String,
    pub total_staked: u64,
    pub total_rewards_accrued: u64,
    pub total_claimed: u64,
    pub total_forfeited: u64,
    pub total_pending: u64,
    pub active_positions: u64,
    pub as_of: i64,
}

impl OwnerStatsView {
    pub fn new(owner: &Pubkey, stats: &OwnerStats) -> Self {
        Self {
            owner: owner.to_string(),
            total_staked: stats.total_staked,
            total_rewards_accrued: stats.total_rewards_accrued,
            total_claimed: stats.total_claimed,
            total_forfeited: stats.total_forfeited,
            total_pending: stats.total_pending,
            active_positions: stats.active_positions,
            as_of: stats.as_of,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatsView {
    pub pool_id: String,
    pub total_staked: u64,
    pub capacity: Option<u64>,
    pub utilization_bps: Option<u64>,
    pub active_positions: u64,
    pub current_rate: u64,
    pub total_distributed: u64,
    pub total_pending: u64,
    pub as_of: i64,
}

impl From<&PoolStats> for PoolStatsView {
    fn from(stats: &PoolStats) -> Self {
        Self {
            pool_id: stats.pool_id.to_string(),
            total_staked: stats.total_staked,
            capacity: stats.capacity,
            utilization_bps: stats.utilization_bps,
            active_positions: stats.active_positions,
            current_rate: stats.current_rate,
            total_distributed: stats.total_distributed,
            total_pending: stats.total_pending,
            as_of: stats.as_of,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthView {
    pub status: String,
    pub pools: usize,
    pub positions: usize,
    pub now: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let ok = serde_json::to_value(ApiResponse::ok(UnstakeView {
            position_id: "abc".to_string(),
            rewards_claimed: 10,
            rewards_deferred: 0,
            penalty: 0,
        }))
        .unwrap();
        assert_eq!(ok["success"], true);
        assert_eq!(ok["data"]["rewardsClaimed"], 10);
        assert!(ok.get("error").is_none());

        let failed = serde_json::to_value(ApiResponse::<()>::failure("nope")).unwrap();
        assert_eq!(failed["success"], false);
        assert_eq!(failed["error"], "nope");
        assert!(failed.get("data").is_none());
    }

    #[test]
    fn test_status_mapping() {
        let position_id = Pubkey::new_from_array([1u8; 32]);
        let cases = [
            (StakingError::ZeroAmount, StatusCode::BAD_REQUEST),
            (StakingError::PositionNotFound { position_id }, StatusCode::NOT_FOUND),
            (StakingError::NothingToClaim { position_id }, StatusCode::CONFLICT),
            (
                StakingError::LockTimeout { resource: "pool P1".into() },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn test_parse_keys() {
        assert!(parse_owner("So11111111111111111111111111111111111111112").is_ok());
        assert!(matches!(parse_owner("0xdeadbeef"), Err(StakingError::InvalidOwner(_))));
        assert!(matches!(parse_asset(""), Err(StakingError::InvalidAsset(_))));
        assert!(matches!(
            staked_asset(Pubkey::default(), Some(5)),
            StakedAsset::Tokens { amount: 5, .. }
        ));
    }
}
