//! Error types for the NFT staking ledger.
//!
//! Every fallible ledger operation returns [`StakingError`]. Each variant
//! carries enough context (pool id, position id, owner) to be actionable and
//! belongs to one [`ErrorKind`], which decides the HTTP status and whether a
//! caller may retry.
//!
//! ## Error Code Ranges
//! - 6000-6019: Input validation errors
//! - 6020-6029: Not-found errors
//! - 6030-6049: Conflict errors
//! - 6050-6059: Internal errors

use std::fmt;

use anchor_lang::prelude::Pubkey;
use thiserror::Error;

use crate::state::{PoolId, PositionId, PositionStatus};

/// Broad classification of a [`StakingError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input, correctable by the caller.
    Validation,
    /// Unknown pool or position.
    NotFound,
    /// Request is well formed but conflicts with current ledger state.
    Conflict,
    /// Store, lock or arithmetic failure. Retryable with backoff.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Errors returned by the staking ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StakingError {
    // ========== Input Validation Errors (6000-6019) ==========

    /// [6000] Owner address is not a valid base58 public key.
    #[error("Invalid owner address: {0}")]
    InvalidOwner(String),

    /// [6001] Asset id is not a valid base58 mint address.
    #[error("Invalid asset id: {0}")]
    InvalidAsset(String),

    /// [6002] Position id is not a valid base58 key.
    #[error("Invalid position id: {0}")]
    InvalidPositionId(String),

    /// [6003] Pool id is empty, too long, or uses unsupported characters.
    #[error("Invalid pool id '{0}' (expected 1-64 characters of [A-Za-z0-9_-])")]
    InvalidPoolId(String),

    /// [6004] Fungible stakes must carry a positive amount.
    #[error("Stake amount must be greater than zero")]
    ZeroAmount,

    /// [6005] Reward rate exceeds the global maximum.
    #[error("Reward rate {rate} exceeds maximum of {max} per staked unit per day")]
    RateTooHigh { rate: u64, max: u64 },

    /// [6006] Lock duration below the pool minimum or above the global maximum.
    #[error("Lock duration {requested}s is invalid for pool {pool_id} (minimum {minimum}s)")]
    InvalidLockDuration {
        pool_id: PoolId,
        requested: i64,
        minimum: i64,
    },

    /// [6007] Early-exit penalty exceeds 100%.
    #[error("Early-exit penalty {0}bp exceeds 10000bp")]
    PenaltyTooHigh(u16),

    /// [6008] Pool parameters are inconsistent.
    #[error("Invalid configuration for pool {pool_id}: {reason}")]
    InvalidPoolParams { pool_id: PoolId, reason: String },

    /// [6009] Rate change would reach into an already elapsed interval.
    #[error("Rate change for pool {pool_id} effective at {effective_at} precedes current time {now}")]
    RetroactiveRateChange {
        pool_id: PoolId,
        effective_at: i64,
        now: i64,
    },

    /// [6010] Asset fails the pool's eligibility predicate.
    #[error("Asset {asset} is not eligible for pool {pool_id}")]
    IneligibleAsset { pool_id: PoolId, asset: Pubkey },

    /// [6011] Caller does not own the position.
    #[error("Position {position_id} is not owned by {owner}")]
    OwnerMismatch { position_id: PositionId, owner: Pubkey },

    /// [6012] Emission cap is zero or below what the pool already paid out.
    #[error("Emission cap {cap} for pool {pool_id} must be positive and at least the {distributed} already distributed")]
    InvalidEmissionCap {
        pool_id: PoolId,
        cap: u64,
        distributed: u64,
    },

    // ========== Not-Found Errors (6020-6029) ==========

    /// [6020] No pool registered under this id.
    #[error("Pool {pool_id} not found")]
    PoolNotFound { pool_id: PoolId },

    /// [6021] No position stored under this id.
    #[error("Position {position_id} not found")]
    PositionNotFound { position_id: PositionId },

    // ========== Conflict Errors (6030-6049) ==========

    /// [6030] A pool with this id is already registered.
    #[error("Pool {pool_id} is already registered")]
    DuplicatePool { pool_id: PoolId },

    /// [6031] Owner already holds a live position for this asset in this pool.
    #[error("Owner {owner} already stakes asset {asset} in pool {pool_id}")]
    DuplicateStake {
        pool_id: PoolId,
        owner: Pubkey,
        asset: Pubkey,
    },

    /// [6032] NFT is already locked in another live position.
    #[error("Asset {asset} is already staked in position {position_id}")]
    AssetAlreadyStaked { asset: Pubkey, position_id: PositionId },

    /// [6033] Staking would push the pool past its capacity.
    #[error("Pool {pool_id} capacity exceeded: {staked} staked + {requested} requested > {capacity}")]
    CapacityExceeded {
        pool_id: PoolId,
        capacity: u64,
        staked: u64,
        requested: u64,
    },

    /// [6034] Lock period has not ended and the pool forbids early exit.
    #[error("Position {position_id} is locked until {unlocks_at}")]
    LockPeriodNotEnded {
        position_id: PositionId,
        unlocks_at: i64,
    },

    /// [6035] Requested status change violates Active -> Unstaking -> Closed.
    #[error("Position {position_id} cannot move from {from} to {to}")]
    InvalidTransition {
        position_id: PositionId,
        from: PositionStatus,
        to: PositionStatus,
    },

    /// [6036] Operation requires a position in a different status.
    #[error("Position {position_id} is {status}")]
    PositionNotActive {
        position_id: PositionId,
        status: PositionStatus,
    },

    /// [6037] No pending rewards.
    #[error("No rewards available to claim for position {position_id}")]
    NothingToClaim { position_id: PositionId },

    /// [6038] Pool is paused by its operator.
    #[error("Staking into pool {pool_id} is paused")]
    StakingPaused { pool_id: PoolId },

    /// [6039] Paying out would exceed the pool's emission cap.
    #[error("Emission cap of pool {pool_id} would be exceeded: {distributed} distributed + {requested} requested > {cap}")]
    EmissionCapExceeded {
        pool_id: PoolId,
        cap: u64,
        distributed: u64,
        requested: u64,
    },

    // ========== Internal Errors (6050-6059) ==========

    /// [6050] Arithmetic overflow during reward or counter math.
    #[error("Arithmetic overflow occurred during calculation")]
    MathOverflow,

    /// [6051] Evaluation time precedes the position's last checkpoint.
    #[error("Clock skew on position {position_id}: now {now} precedes checkpoint {checkpoint}")]
    ClockSkew {
        position_id: PositionId,
        checkpoint: i64,
        now: i64,
    },

    /// [6052] A lock could not be acquired within the configured bound.
    #[error("Timed out waiting for lock on {resource}")]
    LockTimeout { resource: String },

    /// [6053] Pool counter moved between read and compare-and-swap.
    #[error("Counter for pool {pool_id} changed concurrently (expected {expected}, found {actual})")]
    CounterMismatch {
        pool_id: PoolId,
        expected: u64,
        actual: u64,
    },

    /// [6054] Journal read or write failed.
    #[error("Storage failure: {0}")]
    Storage(String),
}

impl StakingError {
    /// Classification used for HTTP status mapping and retry decisions.
    pub fn kind(&self) -> ErrorKind {
        use StakingError::*;
        match self {
            InvalidOwner(_)
            | InvalidAsset(_)
            | InvalidPositionId(_)
            | InvalidPoolId(_)
            | ZeroAmount
            | RateTooHigh { .. }
            | InvalidLockDuration { .. }
            | PenaltyTooHigh(_)
            | InvalidPoolParams { .. }
            | RetroactiveRateChange { .. }
            | IneligibleAsset { .. }
            | OwnerMismatch { .. }
            | InvalidEmissionCap { .. } => ErrorKind::Validation,

            PoolNotFound { .. } | PositionNotFound { .. } => ErrorKind::NotFound,

            DuplicatePool { .. }
            | DuplicateStake { .. }
            | AssetAlreadyStaked { .. }
            | CapacityExceeded { .. }
            | LockPeriodNotEnded { .. }
            | InvalidTransition { .. }
            | PositionNotActive { .. }
            | NothingToClaim { .. }
            | StakingPaused { .. }
            | EmissionCapExceeded { .. } => ErrorKind::Conflict,

            MathOverflow
            | ClockSkew { .. }
            | LockTimeout { .. }
            | CounterMismatch { .. }
            | Storage(_) => ErrorKind::Internal,
        }
    }

    /// Only internal failures are worth retrying; everything else needs the
    /// caller to change the request.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Internal
    }

    /// Stable numeric code, grouped by the ranges in the module docs.
    pub fn code(&self) -> u32 {
        use StakingError::*;
        match self {
            InvalidOwner(_) => 6000,
            InvalidAsset(_) => 6001,
            InvalidPositionId(_) => 6002,
            InvalidPoolId(_) => 6003,
            ZeroAmount => 6004,
            RateTooHigh { .. } => 6005,
            InvalidLockDuration { .. } => 6006,
            PenaltyTooHigh(_) => 6007,
            InvalidPoolParams { .. } => 6008,
            RetroactiveRateChange { .. } => 6009,
            IneligibleAsset { .. } => 6010,
            OwnerMismatch { .. } => 6011,
            InvalidEmissionCap { .. } => 6012,
            PoolNotFound { .. } => 6020,
            PositionNotFound { .. } => 6021,
            DuplicatePool { .. } => 6030,
            DuplicateStake { .. } => 6031,
            AssetAlreadyStaked { .. } => 6032,
            CapacityExceeded { .. } => 6033,
            LockPeriodNotEnded { .. } => 6034,
            InvalidTransition { .. } => 6035,
            PositionNotActive { .. } => 6036,
            NothingToClaim { .. } => 6037,
            StakingPaused { .. } => 6038,
            EmissionCapExceeded { .. } => 6039,
            MathOverflow => 6050,
            ClockSkew { .. } => 6051,
            LockTimeout { .. } => 6052,
            CounterMismatch { .. } => 6053,
            Storage(_) => 6054,
        }
    }
}

impl From<std::io::Error> for StakingError {
    fn from(err: std::io::Error) -> Self {
        StakingError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StakingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let pool_id = PoolId::new("P1").unwrap();
        let position_id = Pubkey::new_from_array([7u8; 32]);

        assert_eq!(StakingError::ZeroAmount.kind(), ErrorKind::Validation);
        assert_eq!(
            StakingError::PoolNotFound { pool_id: pool_id.clone() }.kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            StakingError::LockPeriodNotEnded { position_id, unlocks_at: 10 }.kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            StakingError::CapacityExceeded {
                pool_id,
                capacity: 1,
                staked: 1,
                requested: 1
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert!(StakingError::Storage("disk full".into()).is_retryable());
        assert!(!StakingError::NothingToClaim { position_id }.is_retryable());
    }

    #[test]
    fn test_codes_follow_ranges() {
        assert_eq!(StakingError::InvalidOwner("x".into()).code(), 6000);
        assert_eq!(StakingError::MathOverflow.code(), 6050);
        let conflict = StakingError::DuplicatePool {
            pool_id: PoolId::new("P1").unwrap(),
        };
        assert!((6030..6050).contains(&conflict.code()));
    }
}
