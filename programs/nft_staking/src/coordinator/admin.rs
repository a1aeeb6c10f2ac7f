//! Operator handlers.
//!
//! Pool registration, rate schedule, emission cap and pause control. Pause
//! blocks new stakes only; unstaking and claiming remain available.

use tracing::info;

use crate::coordinator::StakingCoordinator;
use crate::error::Result;
use crate::state::{Pool, PoolId, PoolParams};

impl StakingCoordinator {
    /// Registers a pool.
    ///
    /// # Errors
    /// Returns an error if the parameters are invalid or the id is taken.
    pub fn register_pool(&self, params: PoolParams) -> Result<Pool> {
        self.registry.register(params, self.now())
    }

    /// Schedules a new reward rate.
    ///
    /// # Arguments
    /// * `pool_id` - Pool to update
    /// * `rate` - New rate, base units per staked unit per day
    /// * `effective_at` - First second the new rate applies; must not be in the past
    ///
    /// # Returns
    /// The pool with the updated schedule
    pub async fn update_rate(&self, pool_id: &PoolId, rate: u64, effective_at: i64) -> Result<Pool> {
        let _pool_guard = self.pool_locks.acquire(pool_id).await?;
        self.registry
            .update_rate(pool_id, rate, effective_at, self.now())
    }

    /// Replaces the emission cap of a pool.
    ///
    /// # Arguments
    /// * `pool_id` - Pool to update
    /// * `new_cap` - New cap; may not undercut what was already distributed
    pub async fn update_emission_cap(&self, pool_id: &PoolId, new_cap: u64) -> Result<Pool> {
        let _pool_guard = self.pool_locks.acquire(pool_id).await?;
        self.registry
            .update_emission_cap(pool_id, new_cap, self.now())
    }

    /// Sets the paused state of a pool.
    ///
    /// # Arguments
    /// * `pool_id` - Pool to update
    /// * `paused` - True to pause, false to resume
    pub async fn set_paused(&self, pool_id: &PoolId, paused: bool) -> Result<Pool> {
        let _pool_guard = self.pool_locks.acquire(pool_id).await?;
        let pool = self.registry.set_paused(pool_id, paused, self.now())?;
        info!(
            pool = %pool_id,
            staked = pool.total_staked,
            positions = pool.active_positions,
            "Pool state updated"
        );
        Ok(pool)
    }
}
