//! Unstake request handling.
//!
//! Ends a position in two journaled phases:
//! - Active: final checkpoint, early-exit penalty, move to Unstaking
//! - Unstaking: pay out pending rewards, close, return pool capacity
//!
//! A request interrupted between the phases leaves the position in
//! Unstaking, and repeating the request finishes it. The emission cap never
//! holds an asset in the pool: rewards past the cap stay pending on the
//! closed position and can be claimed once the operator raises the cap.

use anchor_lang::prelude::Pubkey;
use tracing::{debug, info, warn};

use crate::coordinator::{RequestStage, StakingCoordinator};
use crate::error::{Result, StakingError};
use crate::state::{Pool, Position, PositionId, PositionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnstakeRequest {
    pub owner: Pubkey,
    pub position_id: PositionId,
}

/// An unstake that passed validation. Only
/// [`StakingCoordinator::validate_unstake`] produces one.
#[derive(Debug, Clone)]
pub struct ValidatedUnstake {
    position: Position,
    pool: Pool,
    /// Set when the lock has not ended and the pool permits early exit.
    penalty_bps: Option<u16>,
}

impl ValidatedUnstake {
    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn is_early_exit(&self) -> bool {
        self.penalty_bps.is_some()
    }
}

/// Result of a completed unstake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnstakeReceipt {
    pub position: Position,
    pub rewards_claimed: u64,
    /// Pending rewards the emission cap left unpaid.
    pub rewards_deferred: u64,
    /// Rewards forfeited to the early-exit policy.
    pub penalty: u64,
}

impl StakingCoordinator {
    /// Checks an unstake request without changing the ledger.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The position does not exist or belongs to someone else
    /// - The position is already Closed
    /// - The lock has not ended and the pool has no early-exit policy
    pub fn validate_unstake(&self, request: &UnstakeRequest, now: i64) -> Result<ValidatedUnstake> {
        let position = self.store.get(&request.position_id)?;
        if position.owner != request.owner {
            return Err(StakingError::OwnerMismatch {
                position_id: position.id,
                owner: request.owner,
            });
        }
        if position.status == PositionStatus::Closed {
            return Err(StakingError::PositionNotActive {
                position_id: position.id,
                status: position.status,
            });
        }

        let pool = self.registry.get(&position.pool_id)?;

        let early = position.status == PositionStatus::Active && !position.is_lock_ended(now);
        let penalty_bps = match (early, pool.penalty_bps()) {
            (false, _) => None,
            (true, Some(bps)) => Some(bps),
            (true, None) => {
                return Err(StakingError::LockPeriodNotEnded {
                    position_id: position.id,
                    unlocks_at: position.lock_expires_at,
                })
            }
        };

        Ok(ValidatedUnstake {
            position,
            pool,
            penalty_bps,
        })
    }

    /// Unstakes a position, paying out its pending rewards up to the pool's
    /// emission cap.
    ///
    /// # Arguments
    /// * `request` - Caller and position to unstake
    ///
    /// # Errors
    /// Any validation error, `LockTimeout` when the position or pool lock is
    /// contended past the configured bound, or a storage failure.
    pub async fn unstake(&self, request: UnstakeRequest) -> Result<UnstakeReceipt> {
        debug!(
            position = %request.position_id,
            owner = %request.owner,
            stage = %RequestStage::Requested,
            "Unstake requested"
        );

        let _position_guard = self.position_locks.acquire(&request.position_id).await?;
        let pool_id = self.store.get(&request.position_id)?.pool_id;
        let _pool_guard = self.pool_locks.acquire(&pool_id).await?;

        let now = self.now();
        let outcome = self
            .validate_unstake(&request, now)
            .and_then(|validated| self.commit_unstake(validated, now));

        if let Err(err) = &outcome {
            debug!(
                position = %request.position_id,
                stage = %RequestStage::Rejected,
                "Unstake rejected: {}",
                err
            );
        }
        outcome
    }

    fn commit_unstake(&self, unstake: ValidatedUnstake, now: i64) -> Result<UnstakeReceipt> {
        let ValidatedUnstake {
            position,
            pool,
            penalty_bps,
        } = unstake;
        let position_id = position.id;

        let mut penalty = 0;
        if position.status == PositionStatus::Active {
            self.engine.checkpoint(&position_id, now)?;
            let (_, event) = self.engine.begin_exit(&position_id, penalty_bps, now)?;
            if let Some(event) = event {
                penalty = event.amount.unsigned_abs();
            }
        } else {
            info!(position = %position_id, "Resuming interrupted unstake");
        }

        let rewards_claimed = self.engine.claim_available(&position_id, now)?;

        let position = self
            .store
            .transition(&position_id, PositionStatus::Closed, now)?;
        self.registry.credit_capacity(&pool.id, position.quantity())?;

        let rewards_deferred = position.pending_rewards();
        if rewards_deferred > 0 {
            warn!(
                position = %position_id,
                pool = %pool.id,
                "Emission cap reached; {} reward units left pending",
                rewards_deferred
            );
        }

        info!(
            position = %position_id,
            pool = %pool.id,
            owner = %position.owner,
            stage = %RequestStage::Committed,
            "Unstaked - rewards claimed: {} penalty: {}",
            rewards_claimed,
            penalty
        );
        Ok(UnstakeReceipt {
            position,
            rewards_claimed,
            rewards_deferred,
            penalty,
        })
    }
}
