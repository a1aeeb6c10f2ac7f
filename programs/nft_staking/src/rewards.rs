//! Rewards accrual engine.
//!
//! Accrual is a pure function of elapsed time, staked quantity and rate,
//! selected per pool by its [`AccrualPolicy`]. Intervals that cross a
//! scheduled rate change are split at the change and each piece accrues
//! under its own rate. Checkpoints crystallize accrual into the position;
//! claims move pending rewards into the claimed total.
//!
//! Callers are expected to serialize operations per position (the staking
//! coordinator holds the position lock around every call here).

use std::iter;
use std::sync::Arc;

use tracing::{debug, info};

use crate::constants::*;
use crate::error::{Result, StakingError};
use crate::registry::PoolRegistry;
use crate::state::{AccrualPolicy, Pool, Position, PositionId, PositionStatus, RewardEvent};
use crate::store::PositionStore;

impl AccrualPolicy {
    /// Reward for `elapsed` seconds on `quantity` units at `rate` base units
    /// per unit per day.
    pub fn reward(&self, elapsed: i64, quantity: u64, rate: u64) -> Result<u64> {
        let reward = self.weight(elapsed, quantity, rate)? / SECONDS_PER_DAY as u128;
        u64::try_from(reward).map_err(|_| StakingError::MathOverflow)
    }

    /// Unrounded reward in units of `1 / SECONDS_PER_DAY`.
    pub fn weight(&self, elapsed: i64, quantity: u64, rate: u64) -> Result<u128> {
        let accruing = self.settled(elapsed);
        if accruing == 0 || quantity == 0 || rate == 0 {
            return Ok(0);
        }

        (quantity as u128)
            .checked_mul(rate as u128)
            .ok_or(StakingError::MathOverflow)?
            .checked_mul(accruing as u128)
            .ok_or(StakingError::MathOverflow)
    }

    /// Part of `elapsed` that accrues now; the remainder carries forward to
    /// the next checkpoint.
    pub fn settled(&self, elapsed: i64) -> i64 {
        let elapsed = elapsed.max(0);
        match *self {
            AccrualPolicy::Linear => elapsed,
            AccrualPolicy::Stepped { step_seconds } => (elapsed / step_seconds) * step_seconds,
        }
    }

    /// First instant at or after `at` on the step grid anchored at `from`.
    fn align(&self, from: i64, at: i64) -> i64 {
        match *self {
            AccrualPolicy::Linear => at,
            AccrualPolicy::Stepped { step_seconds } => {
                let offset = at - from;
                let steps = (offset + step_seconds - 1) / step_seconds;
                from + steps * step_seconds
            }
        }
    }
}

/// Result of accruing over an interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accrual {
    pub amount: u64,
    /// New checkpoint: the end of the interval, or the last completed step.
    pub settled_to: i64,
    /// Sub-unit remainder to carry into the next interval.
    pub carry: u64,
}

/// Accrues `quantity` units in `pool` over `[from, to)`, starting from a
/// sub-unit `carry` left by the previous interval.
///
/// Each piece between rate changes accrues under the rate in force at its
/// start. For stepped pools, a step accrues at the rate in force when the
/// step began. Only whole base units are paid out; the fraction carries, so
/// splitting an interval never changes the total.
pub fn accrue(pool: &Pool, quantity: u64, from: i64, to: i64, carry: u64) -> Result<Accrual> {
    if to <= from {
        return Ok(Accrual {
            amount: 0,
            settled_to: from,
            carry,
        });
    }

    let policy = pool.accrual;
    let settled_to = from + policy.settled(to - from);

    let boundaries = pool
        .rate_boundaries(from, settled_to)
        .map(|at| policy.align(from, at).min(settled_to));

    let mut weight = carry as u128;
    let mut start = from;
    for end in boundaries.chain(iter::once(settled_to)) {
        if end <= start {
            continue;
        }
        let piece = policy.weight(end - start, quantity, pool.rate_at(start))?;
        weight = weight.checked_add(piece).ok_or(StakingError::MathOverflow)?;
        start = end;
    }

    let per_unit = SECONDS_PER_DAY as u128;
    Ok(Accrual {
        amount: u64::try_from(weight / per_unit).map_err(|_| StakingError::MathOverflow)?,
        settled_to,
        carry: (weight % per_unit) as u64,
    })
}

/// Share of `pending` forfeited under a `penalty_bps` early-exit policy.
pub fn penalty_for(pending: u64, penalty_bps: u16) -> Result<u64> {
    let penalty = (pending as u128)
        .checked_mul(penalty_bps as u128)
        .ok_or(StakingError::MathOverflow)?
        / BASIS_POINTS_DENOMINATOR as u128;
    u64::try_from(penalty).map_err(|_| StakingError::MathOverflow)
}

fn signed(amount: u64) -> Result<i64> {
    i64::try_from(amount).map_err(|_| StakingError::MathOverflow)
}

/// Outcome of a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub position: Position,
    pub event: RewardEvent,
}

pub struct RewardsEngine {
    store: Arc<PositionStore>,
    registry: Arc<PoolRegistry>,
}

impl RewardsEngine {
    pub fn new(store: Arc<PositionStore>, registry: Arc<PoolRegistry>) -> Self {
        Self { store, registry }
    }

    /// Dry-run checkpoint: what a checkpoint at `now` would add, without
    /// touching the store. Non-active positions accrue nothing.
    pub fn preview(&self, position: &Position, pool: &Pool, now: i64) -> Result<Accrual> {
        if position.status != PositionStatus::Active {
            return Ok(Accrual {
                amount: 0,
                settled_to: position.last_checkpoint,
                carry: position.accrual_carry,
            });
        }
        if now < position.last_checkpoint {
            return Err(StakingError::ClockSkew {
                position_id: position.id,
                checkpoint: position.last_checkpoint,
                now,
            });
        }
        accrue(
            pool,
            position.quantity(),
            position.last_checkpoint,
            now,
            position.accrual_carry,
        )
    }

    /// Crystallizes rewards accrued since the last checkpoint.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The position does not exist or is not Active
    /// - `now` precedes the last checkpoint
    pub fn checkpoint(&self, position_id: &PositionId, now: i64) -> Result<Checkpoint> {
        let mut position = self.store.get(position_id)?;
        if position.status != PositionStatus::Active {
            return Err(StakingError::PositionNotActive {
                position_id: *position_id,
                status: position.status,
            });
        }

        let pool = self.registry.get(&position.pool_id)?;
        let accrual = self.preview(&position, &pool, now)?;

        position.accrued_rewards = position
            .accrued_rewards
            .checked_add(accrual.amount)
            .ok_or(StakingError::MathOverflow)?;
        position.last_checkpoint = accrual.settled_to;
        position.accrual_carry = accrual.carry;

        let event = RewardEvent::accrual(*position_id, signed(accrual.amount)?, now);
        self.store.record(&position, Some(event.clone()))?;

        debug!(
            position = %position_id,
            pool = %position.pool_id,
            amount = accrual.amount,
            accrued = position.accrued_rewards,
            "Checkpoint recorded"
        );
        Ok(Checkpoint { position, event })
    }

    /// Pays out all pending rewards of a position.
    ///
    /// # Errors
    /// Returns an error if:
    /// - Pending rewards are zero
    /// - The pool's emission cap would be exceeded
    pub fn claim(&self, position_id: &PositionId, now: i64) -> Result<u64> {
        let position = self.store.get(position_id)?;
        let amount = position.pending_rewards();
        if amount == 0 {
            return Err(StakingError::NothingToClaim {
                position_id: *position_id,
            });
        }

        self.registry.record_distribution(&position.pool_id, amount)?;
        self.pay(position, amount, now)
    }

    /// Pays out as much of the pending rewards as the pool's emission cap
    /// still allows. Whatever does not fit stays pending on the position.
    pub fn claim_available(&self, position_id: &PositionId, now: i64) -> Result<u64> {
        let position = self.store.get(position_id)?;
        let pending = position.pending_rewards();
        if pending == 0 {
            return Ok(0);
        }

        let amount = self
            .registry
            .record_distribution_up_to(&position.pool_id, pending)?;
        if amount == 0 {
            return Ok(0);
        }
        self.pay(position, amount, now)
    }

    /// Records a payout already counted against the emission cap.
    fn pay(&self, mut position: Position, amount: u64, now: i64) -> Result<u64> {
        let position_id = position.id;
        position.claimed_rewards = position
            .claimed_rewards
            .checked_add(amount)
            .ok_or(StakingError::MathOverflow)?;
        let event = RewardEvent::claim(position_id, signed(amount)?, now);

        if let Err(err) = self.store.record(&position, Some(event)) {
            self.registry.revert_distribution(&position.pool_id, amount);
            return Err(err);
        }

        info!(
            position = %position_id,
            owner = %position.owner,
            "Claimed {} reward units (total claimed {})",
            amount,
            position.claimed_rewards
        );
        Ok(amount)
    }

    /// Forfeits `penalty_bps` of pending rewards as a negative accrual.
    /// Returns `None` when the penalty rounds to zero.
    pub fn apply_penalty(
        &self,
        position_id: &PositionId,
        penalty_bps: u16,
        now: i64,
    ) -> Result<Option<RewardEvent>> {
        let (_, event) = self.settle(position_id, Some(penalty_bps), None, now)?;
        Ok(event)
    }

    /// Moves an Active position to Unstaking, forfeiting `penalty_bps` of
    /// pending rewards in the same journal entry when the exit is early.
    pub fn begin_exit(
        &self,
        position_id: &PositionId,
        penalty_bps: Option<u16>,
        now: i64,
    ) -> Result<(Position, Option<RewardEvent>)> {
        self.settle(position_id, penalty_bps, Some(PositionStatus::Unstaking), now)
    }

    fn settle(
        &self,
        position_id: &PositionId,
        penalty_bps: Option<u16>,
        next: Option<PositionStatus>,
        now: i64,
    ) -> Result<(Position, Option<RewardEvent>)> {
        let mut position = self.store.get(position_id)?;

        let penalty = match penalty_bps {
            Some(bps) => penalty_for(position.pending_rewards(), bps)?,
            None => 0,
        };
        let event = if penalty > 0 {
            position.forfeited_rewards = position
                .forfeited_rewards
                .checked_add(penalty)
                .ok_or(StakingError::MathOverflow)?;
            Some(RewardEvent::accrual(*position_id, -signed(penalty)?, now))
        } else {
            None
        };

        if let Some(next) = next {
            if !position.status.can_transition_to(next) {
                return Err(StakingError::InvalidTransition {
                    position_id: *position_id,
                    from: position.status,
                    to: next,
                });
            }
            position.status = next;
        }

        if event.is_none() && next.is_none() {
            return Ok((position, None));
        }
        self.store.record(&position, event.clone())?;

        if penalty > 0 {
            info!(
                position = %position_id,
                penalty_bps = penalty_bps.unwrap_or_default(),
                "Early exit forfeited {} reward units",
                penalty
            );
        }
        Ok((position, event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{PoolId, PoolParams};

    const DAY: i64 = SECONDS_PER_DAY;

    fn pool(rate: u64, accrual: AccrualPolicy) -> Pool {
        let mut params = PoolParams::new(PoolId::new("P1").unwrap(), rate);
        params.accrual = accrual;
        Pool::new(params, 0).unwrap()
    }

    #[test]
    fn test_linear_accrual() {
        let pool = pool(10, AccrualPolicy::Linear);
        assert_eq!(
            accrue(&pool, 1, 0, DAY, 0).unwrap(),
            Accrual { amount: 10, settled_to: DAY, carry: 0 }
        );
        assert_eq!(accrue(&pool, 3, 0, DAY / 2, 0).unwrap().amount, 15);
        assert_eq!(accrue(&pool, 1, DAY, DAY, 0).unwrap().amount, 0);
        assert_eq!(accrue(&pool, 1, DAY, 0, 0).unwrap().settled_to, DAY);
    }

    #[test]
    fn test_linear_accrual_carries_fractions() {
        let pool = pool(10, AccrualPolicy::Linear);

        // 8,000s at 10/day is 0.925 of a unit.
        let first = accrue(&pool, 1, 0, 8_000, 0).unwrap();
        assert_eq!(first, Accrual { amount: 0, settled_to: 8_000, carry: 80_000 });

        let second = accrue(&pool, 1, 8_000, 16_000, first.carry).unwrap();
        assert_eq!(second.amount, 1);
        assert_eq!(second.carry, 160_000 - DAY as u64);

        // Nothing elapsed keeps the carry as it was.
        assert_eq!(accrue(&pool, 1, 16_000, 16_000, second.carry).unwrap().carry, second.carry);
    }

    #[test]
    fn test_stepped_accrual_carries_partial_steps() {
        let pool = pool(10, AccrualPolicy::Stepped { step_seconds: DAY });

        let partial = accrue(&pool, 1, 0, DAY + DAY / 2, 0).unwrap();
        assert_eq!(partial, Accrual { amount: 10, settled_to: DAY, carry: 0 });

        // The half day left over is picked up by the next checkpoint.
        let next = accrue(&pool, 1, partial.settled_to, 2 * DAY, 0).unwrap();
        assert_eq!(next, Accrual { amount: 10, settled_to: 2 * DAY, carry: 0 });

        assert_eq!(accrue(&pool, 1, 0, DAY - 1, 0).unwrap().amount, 0);
    }

    #[test]
    fn test_rate_change_splits_interval() {
        let mut pool = pool(10, AccrualPolicy::Linear);
        pool.schedule_rate_change(20, DAY, 0).unwrap();

        // One day at 10, one day at 20.
        assert_eq!(accrue(&pool, 1, 0, 2 * DAY, 0).unwrap().amount, 30);
        // Entirely after the change.
        assert_eq!(accrue(&pool, 1, DAY, 2 * DAY, 0).unwrap().amount, 20);
        // Entirely before the change.
        assert_eq!(accrue(&pool, 1, 0, DAY / 2, 0).unwrap().amount, 5);
    }

    #[test]
    fn test_stepped_rate_change_uses_rate_at_step_start() {
        let mut pool = pool(10, AccrualPolicy::Stepped { step_seconds: DAY });
        // Change lands mid-way through the second step.
        pool.schedule_rate_change(40, DAY + DAY / 2, 0).unwrap();

        // Steps start at 0, DAY (rate 10) and 2*DAY (rate 40).
        let accrual = accrue(&pool, 1, 0, 3 * DAY, 0).unwrap();
        assert_eq!(accrual.amount, 10 + 10 + 40);
        assert_eq!(accrual.settled_to, 3 * DAY);
    }

    #[test]
    fn test_policy_is_pure() {
        let policy = AccrualPolicy::Linear;
        assert_eq!(policy.reward(DAY, 2, 10).unwrap(), 20);
        assert_eq!(policy.reward(DAY, 2, 10).unwrap(), 20);
        assert_eq!(policy.reward(-5, 2, 10).unwrap(), 0);

        let stepped = AccrualPolicy::Stepped { step_seconds: 3_600 };
        assert_eq!(stepped.settled(7_199), 3_600);
        assert_eq!(stepped.align(0, 3_601), 7_200);
        assert_eq!(stepped.align(0, 3_600), 3_600);
    }

    #[test]
    fn test_overflow_reported() {
        let policy = AccrualPolicy::Linear;
        assert_eq!(
            policy.reward(i64::MAX, u64::MAX, MAX_REWARD_RATE).unwrap_err(),
            StakingError::MathOverflow
        );
    }

    fn engine() -> (RewardsEngine, Arc<PositionStore>, Pool) {
        let store = Arc::new(PositionStore::in_memory());
        let registry = Arc::new(PoolRegistry::new());
        let mut params = PoolParams::new(PoolId::new("P1").unwrap(), 10);
        params.emission_cap = Some(15);
        let pool = registry.register(params, 0).unwrap();
        (RewardsEngine::new(store.clone(), registry), store, pool)
    }

    fn stake(store: &PositionStore, pool: &Pool, seed: u8) -> Position {
        let owner = anchor_lang::prelude::Pubkey::new_from_array([1u8; 32]);
        let mint = anchor_lang::prelude::Pubkey::new_from_array([seed; 32]);
        store
            .create(owner, pool, crate::state::StakedAsset::Nft { mint }, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_checkpoint_is_idempotent_at_same_instant() {
        let (engine, store, pool) = engine();
        let position = stake(&store, &pool, 2);

        let first = engine.checkpoint(&position.id, DAY).unwrap();
        assert_eq!(first.event.amount, 10);
        assert_eq!(first.position.accrued_rewards, 10);

        let second = engine.checkpoint(&position.id, DAY).unwrap();
        assert_eq!(second.event.amount, 0);
        assert_eq!(second.position.accrued_rewards, 10);
        assert_eq!(store.events(&position.id).len(), 2);
    }

    #[test]
    fn test_frequent_checkpoints_match_one_long_checkpoint() {
        let (engine, store, pool) = engine();
        let polled = stake(&store, &pool, 2);
        let untouched = stake(&store, &pool, 3);

        let mut now = 0;
        while now < 10 * DAY {
            now += 8_000;
            engine.checkpoint(&polled.id, now).unwrap();
        }
        let once = engine.checkpoint(&untouched.id, 10 * DAY).unwrap();

        let polled = store.get(&polled.id).unwrap();
        assert_eq!(polled.last_checkpoint, 10 * DAY);
        assert_eq!(polled.accrued_rewards, 100);
        assert_eq!(once.position.accrued_rewards, 100);
        assert_eq!(polled.accrual_carry, once.position.accrual_carry);
    }

    #[test]
    fn test_claim_available_stops_at_emission_cap() {
        let (engine, store, pool) = engine();
        let position = stake(&store, &pool, 2);

        assert_eq!(engine.claim_available(&position.id, 0).unwrap(), 0);

        engine.checkpoint(&position.id, 2 * DAY).unwrap();
        // 20 pending against a cap of 15.
        assert_eq!(engine.claim_available(&position.id, 2 * DAY).unwrap(), 15);
        let stored = store.get(&position.id).unwrap();
        assert_eq!(stored.claimed_rewards, 15);
        assert_eq!(stored.pending_rewards(), 5);

        assert_eq!(engine.claim_available(&position.id, 2 * DAY).unwrap(), 0);
        assert_eq!(store.events(&position.id).len(), 2);
    }

    #[test]
    fn test_checkpoint_rejects_clock_skew() {
        let (engine, store, pool) = engine();
        let position = stake(&store, &pool, 2);
        engine.checkpoint(&position.id, DAY).unwrap();

        let err = engine.checkpoint(&position.id, DAY - 1).unwrap_err();
        assert!(matches!(err, StakingError::ClockSkew { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_claim_and_emission_cap() {
        let (engine, store, pool) = engine();
        let first = stake(&store, &pool, 2);
        let second = stake(&store, &pool, 3);

        engine.checkpoint(&first.id, DAY).unwrap();
        assert_eq!(engine.claim(&first.id, DAY).unwrap(), 10);
        assert_eq!(store.get(&first.id).unwrap().pending_rewards(), 0);
        assert!(matches!(
            engine.claim(&first.id, DAY),
            Err(StakingError::NothingToClaim { .. })
        ));

        // 10 already distributed against a cap of 15.
        engine.checkpoint(&second.id, DAY).unwrap();
        assert!(matches!(
            engine.claim(&second.id, DAY),
            Err(StakingError::EmissionCapExceeded { .. })
        ));
        assert_eq!(store.get(&second.id).unwrap().pending_rewards(), 10);
    }

    #[test]
    fn test_penalty_event_is_negative_accrual() {
        let (engine, store, pool) = engine();
        let position = stake(&store, &pool, 2);
        engine.checkpoint(&position.id, DAY).unwrap();

        let event = engine.apply_penalty(&position.id, 5_000, DAY).unwrap().unwrap();
        assert!(event.is_penalty());
        assert_eq!(event.amount, -5);

        let stored = store.get(&position.id).unwrap();
        assert_eq!(stored.accrued_rewards, 10);
        assert_eq!(stored.forfeited_rewards, 5);
        assert_eq!(stored.pending_rewards(), 5);

        let (exited, event) = engine.begin_exit(&position.id, None, DAY).unwrap();
        assert_eq!(exited.status, PositionStatus::Unstaking);
        assert!(event.is_none());
        assert!(matches!(
            engine.checkpoint(&position.id, DAY),
            Err(StakingError::PositionNotActive { .. })
        ));
    }

    #[test]
    fn test_penalty_for() {
        assert_eq!(penalty_for(100, 2_500).unwrap(), 25);
        assert_eq!(penalty_for(3, 1_000).unwrap(), 0);
        assert_eq!(penalty_for(100, 0).unwrap(), 0);
        assert_eq!(penalty_for(100, 10_000).unwrap(), 100);
    }
}
