//! Pool registry.
//!
//! Holds every pool's terms, rate schedule and counters. Reads hand out
//! snapshots; counter updates go through compare-and-swap style methods so
//! the coordinator can detect a counter that moved under it.

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::{Result, StakingError};
use crate::state::{Pool, PoolId, PoolParams, StakedAsset};
use crate::store::PositionStore;

#[derive(Debug, Default)]
pub struct PoolRegistry {
    pools: RwLock<IndexMap<PoolId, Pool>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new pool.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The parameters are invalid (rate, lock, penalty, step, allowlist)
    /// - A pool with the same id already exists
    pub fn register(&self, params: PoolParams, now: i64) -> Result<Pool> {
        let pool = Pool::new(params, now)?;

        let mut pools = self.pools.write();
        if pools.contains_key(&pool.id) {
            return Err(StakingError::DuplicatePool { pool_id: pool.id });
        }
        pools.insert(pool.id.clone(), pool.clone());

        info!(
            pool = %pool.id,
            rate = pool.rate_at(now),
            accrual = %pool.accrual,
            eligibility = %pool.eligibility.describe(),
            "Pool registered"
        );
        Ok(pool)
    }

    pub fn get(&self, pool_id: &PoolId) -> Result<Pool> {
        self.pools
            .read()
            .get(pool_id)
            .cloned()
            .ok_or_else(|| StakingError::PoolNotFound {
                pool_id: pool_id.clone(),
            })
    }

    /// All pools in registration order.
    pub fn list(&self) -> Vec<Pool> {
        self.pools.read().values().cloned().collect()
    }

    /// Pools that would accept `asset` right now: eligible, not paused and
    /// with room for its quantity.
    pub fn get_eligible_pools(&self, asset: &StakedAsset) -> Vec<Pool> {
        self.pools
            .read()
            .values()
            .filter(|pool| {
                !pool.paused
                    && pool.eligibility.accepts(asset)
                    && pool.check_capacity(asset.quantity()).is_ok()
            })
            .cloned()
            .collect()
    }

    /// Schedules a new reward rate effective at `effective_at`.
    pub fn update_rate(
        &self,
        pool_id: &PoolId,
        rate: u64,
        effective_at: i64,
        now: i64,
    ) -> Result<Pool> {
        self.modify(pool_id, |pool| {
            let previous = pool.rate_at(effective_at);
            pool.schedule_rate_change(rate, effective_at, now)?;
            info!(
                pool = %pool_id,
                effective_at,
                "Rate change scheduled - Old: {} New: {}",
                previous,
                rate
            );
            Ok(())
        })
    }

    /// Pauses or resumes new stakes. Unstaking and claiming stay available.
    pub fn set_paused(&self, pool_id: &PoolId, paused: bool, now: i64) -> Result<Pool> {
        self.modify(pool_id, |pool| {
            let previous = pool.paused;
            pool.paused = paused;
            pool.last_updated = now;
            info!(
                pool = %pool_id,
                "Staking {} (was {})",
                if paused { "PAUSED" } else { "RESUMED" },
                if previous { "paused" } else { "active" }
            );
            Ok(())
        })
    }

    /// Takes `quantity` of capacity, provided the staked counter still reads
    /// `expected_staked`.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The counter moved since the caller read it
    /// - The pool's capacity would be exceeded
    pub fn debit_capacity(&self, pool_id: &PoolId, quantity: u64, expected_staked: u64) -> Result<Pool> {
        self.modify(pool_id, |pool| {
            if pool.total_staked != expected_staked {
                return Err(StakingError::CounterMismatch {
                    pool_id: pool_id.clone(),
                    expected: expected_staked,
                    actual: pool.total_staked,
                });
            }
            pool.check_capacity(quantity)?;

            pool.total_staked = pool
                .total_staked
                .checked_add(quantity)
                .ok_or(StakingError::MathOverflow)?;
            pool.active_positions = pool
                .active_positions
                .checked_add(1)
                .ok_or(StakingError::MathOverflow)?;
            Ok(())
        })
    }

    /// Returns `quantity` of capacity freed by a closed position.
    pub fn credit_capacity(&self, pool_id: &PoolId, quantity: u64) -> Result<Pool> {
        self.modify(pool_id, |pool| {
            if pool.total_staked < quantity || pool.active_positions == 0 {
                warn!(
                    pool = %pool_id,
                    staked = pool.total_staked,
                    positions = pool.active_positions,
                    quantity,
                    "Capacity credit exceeds recorded stake"
                );
            }
            pool.total_staked = pool.total_staked.saturating_sub(quantity);
            pool.active_positions = pool.active_positions.saturating_sub(1);
            Ok(())
        })
    }

    /// Counts `amount` against the pool's emission cap.
    pub fn record_distribution(&self, pool_id: &PoolId, amount: u64) -> Result<u64> {
        let mut distributed = 0;
        self.modify(pool_id, |pool| {
            distributed = pool.check_emission(amount)?;
            pool.total_distributed = distributed;
            Ok(())
        })?;
        Ok(distributed)
    }

    /// Counts as much of `amount` against the emission cap as still fits and
    /// returns that part.
    pub fn record_distribution_up_to(&self, pool_id: &PoolId, amount: u64) -> Result<u64> {
        let mut granted = 0;
        self.modify(pool_id, |pool| {
            granted = match pool.remaining_emission() {
                Some(remaining) => amount.min(remaining),
                None => amount,
            };
            pool.total_distributed = pool
                .total_distributed
                .checked_add(granted)
                .ok_or(StakingError::MathOverflow)?;
            Ok(())
        })?;
        Ok(granted)
    }

    /// Replaces the emission cap.
    ///
    /// # Errors
    /// Returns an error if the new cap is zero or below the rewards the pool
    /// already distributed.
    pub fn update_emission_cap(&self, pool_id: &PoolId, new_cap: u64, now: i64) -> Result<Pool> {
        self.modify(pool_id, |pool| {
            if new_cap == 0 || new_cap < pool.total_distributed {
                return Err(StakingError::InvalidEmissionCap {
                    pool_id: pool_id.clone(),
                    cap: new_cap,
                    distributed: pool.total_distributed,
                });
            }

            let previous = pool.emission_cap;
            pool.emission_cap = Some(new_cap);
            pool.last_updated = now;
            info!(
                pool = %pool_id,
                distributed = pool.total_distributed,
                remaining = new_cap - pool.total_distributed,
                "Emission cap updated - Old: {:?} New: {}",
                previous,
                new_cap
            );
            Ok(())
        })
    }

    /// Undoes a [`record_distribution`](Self::record_distribution) whose
    /// claim failed to persist.
    pub fn revert_distribution(&self, pool_id: &PoolId, amount: u64) {
        if let Some(pool) = self.pools.write().get_mut(pool_id) {
            pool.total_distributed = pool.total_distributed.saturating_sub(amount);
        }
    }

    /// Rebuilds every pool's counters from the positions in `store`.
    pub fn restore_counters(&self, store: &PositionStore) {
        let totals = store.live_totals();
        let mut pools = self.pools.write();

        for pool in pools.values_mut() {
            let pool_totals = totals.get(&pool.id).copied().unwrap_or_default();
            pool.total_staked = pool_totals.staked;
            pool.active_positions = pool_totals.live_positions;
            pool.total_distributed = pool_totals.distributed;
        }

        for pool_id in totals.keys().filter(|id| !pools.contains_key(*id)) {
            warn!(pool = %pool_id, "Stored positions reference an unregistered pool");
        }

        info!(pools = pools.len(), "Pool counters restored from position store");
    }

    pub fn len(&self) -> usize {
        self.pools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn modify<F>(&self, pool_id: &PoolId, update: F) -> Result<Pool>
    where
        F: FnOnce(&mut Pool) -> Result<()>,
    {
        let mut pools = self.pools.write();
        let pool = pools
            .get_mut(pool_id)
            .ok_or_else(|| StakingError::PoolNotFound {
                pool_id: pool_id.clone(),
            })?;
        update(pool)?;
        Ok(pool.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Eligibility, PositionStatus};
    use anchor_lang::prelude::Pubkey;

    fn key(seed: u8) -> Pubkey {
        Pubkey::new_from_array([seed; 32])
    }

    fn params(id: &str, capacity: Option<u64>) -> PoolParams {
        let mut params = PoolParams::new(PoolId::new(id).unwrap(), 10);
        params.capacity = capacity;
        params
    }

    #[test]
    fn test_register_and_duplicate() {
        let registry = PoolRegistry::new();
        registry.register(params("P1", None), 0).unwrap();

        let err = registry.register(params("P1", Some(3)), 0).unwrap_err();
        assert!(matches!(err, StakingError::DuplicatePool { .. }));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&PoolId::new("P1").unwrap()).unwrap().capacity, None);
    }

    #[test]
    fn test_unknown_pool() {
        let registry = PoolRegistry::new();
        let id = PoolId::new("missing").unwrap();
        assert_eq!(
            registry.get(&id).unwrap_err(),
            StakingError::PoolNotFound { pool_id: id.clone() }
        );
        assert!(registry.set_paused(&id, true, 0).is_err());
    }

    #[test]
    fn test_debit_is_compare_and_swap() {
        let registry = PoolRegistry::new();
        let id = registry.register(params("P1", Some(2)), 0).unwrap().id;

        registry.debit_capacity(&id, 1, 0).unwrap();
        let err = registry.debit_capacity(&id, 1, 0).unwrap_err();
        assert_eq!(
            err,
            StakingError::CounterMismatch { pool_id: id.clone(), expected: 0, actual: 1 }
        );

        registry.debit_capacity(&id, 1, 1).unwrap();
        assert!(matches!(
            registry.debit_capacity(&id, 1, 2),
            Err(StakingError::CapacityExceeded { .. })
        ));

        let pool = registry.credit_capacity(&id, 1).unwrap();
        assert_eq!(pool.total_staked, 1);
        assert_eq!(pool.active_positions, 1);
    }

    #[test]
    fn test_eligible_pools() {
        let registry = PoolRegistry::new();
        registry.register(params("open", None), 0).unwrap();
        let full = registry.register(params("full", Some(1)), 0).unwrap().id;
        registry.debit_capacity(&full, 1, 0).unwrap();
        let paused = registry.register(params("paused", None), 0).unwrap().id;
        registry.set_paused(&paused, true, 0).unwrap();

        let mut gated = params("gated", None);
        gated.eligibility = Eligibility::NftAllowlist([key(9)].into_iter().collect());
        registry.register(gated, 0).unwrap();

        let ids: Vec<String> = registry
            .get_eligible_pools(&StakedAsset::Nft { mint: key(1) })
            .into_iter()
            .map(|pool| pool.id.to_string())
            .collect();
        assert_eq!(ids, vec!["open"]);

        let ids: Vec<String> = registry
            .get_eligible_pools(&StakedAsset::Nft { mint: key(9) })
            .into_iter()
            .map(|pool| pool.id.to_string())
            .collect();
        assert_eq!(ids, vec!["open", "gated"]);
    }

    #[test]
    fn test_emission_cap() {
        let registry = PoolRegistry::new();
        let mut capped = params("P1", None);
        capped.emission_cap = Some(50);
        let id = registry.register(capped, 0).unwrap().id;

        assert_eq!(registry.record_distribution(&id, 30).unwrap(), 30);
        assert!(matches!(
            registry.record_distribution(&id, 21),
            Err(StakingError::EmissionCapExceeded { .. })
        ));
        registry.revert_distribution(&id, 30);
        assert_eq!(registry.get(&id).unwrap().total_distributed, 0);
    }

    #[test]
    fn test_partial_distribution_and_cap_update() {
        let registry = PoolRegistry::new();
        let mut capped = params("P1", None);
        capped.emission_cap = Some(50);
        let id = registry.register(capped, 0).unwrap().id;

        assert_eq!(registry.record_distribution_up_to(&id, 40).unwrap(), 40);
        assert_eq!(registry.record_distribution_up_to(&id, 40).unwrap(), 10);
        assert_eq!(registry.record_distribution_up_to(&id, 40).unwrap(), 0);
        assert_eq!(registry.get(&id).unwrap().remaining_emission(), Some(0));

        assert_eq!(
            registry.update_emission_cap(&id, 49, 5).unwrap_err(),
            StakingError::InvalidEmissionCap { pool_id: id.clone(), cap: 49, distributed: 50 }
        );
        assert!(matches!(
            registry.update_emission_cap(&id, 0, 5),
            Err(StakingError::InvalidEmissionCap { .. })
        ));

        let pool = registry.update_emission_cap(&id, 80, 5).unwrap();
        assert_eq!(pool.emission_cap, Some(80));
        assert_eq!(pool.last_updated, 5);
        assert_eq!(registry.record_distribution_up_to(&id, 40).unwrap(), 30);

        let uncapped = registry.register(params("P2", None), 0).unwrap().id;
        assert_eq!(registry.record_distribution_up_to(&uncapped, 40).unwrap(), 40);
    }

    #[test]
    fn test_update_rate_not_retroactive() {
        let registry = PoolRegistry::new();
        let id = registry.register(params("P1", None), 0).unwrap().id;

        let pool = registry.update_rate(&id, 20, 100, 100).unwrap();
        assert_eq!(pool.rate_at(99), 10);
        assert_eq!(pool.rate_at(100), 20);
        assert!(matches!(
            registry.update_rate(&id, 30, 50, 100),
            Err(StakingError::RetroactiveRateChange { .. })
        ));
    }

    #[test]
    fn test_restore_counters() {
        let registry = PoolRegistry::new();
        let pool = registry.register(params("P1", Some(5)), 0).unwrap();
        let store = PositionStore::in_memory();

        let kept = store
            .create(key(1), &pool, StakedAsset::Nft { mint: key(2) }, 0, 0)
            .unwrap();
        let closed = store
            .create(key(1), &pool, StakedAsset::Nft { mint: key(3) }, 0, 0)
            .unwrap();
        let mut paid = closed.clone();
        paid.accrued_rewards = 7;
        paid.claimed_rewards = 7;
        store.record(&paid, None).unwrap();
        store.transition(&closed.id, PositionStatus::Unstaking, 1).unwrap();
        store.transition(&closed.id, PositionStatus::Closed, 1).unwrap();

        registry.restore_counters(&store);
        let restored = registry.get(&pool.id).unwrap();
        assert_eq!(restored.total_staked, 1);
        assert_eq!(restored.active_positions, 1);
        assert_eq!(restored.total_distributed, 7);
        assert!(store.get(&kept.id).is_ok());
    }
}
