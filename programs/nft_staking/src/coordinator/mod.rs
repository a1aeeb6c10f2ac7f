//! Staking coordinator.
//!
//! Orchestrates stake, unstake, claim and checkpoint requests over the pool
//! registry, the position store and the rewards engine. Requests move
//! through [`RequestStage`]s; validation is read-only and commit sections
//! never await, so a cancelled request has either committed fully or not
//! at all.
//!
//! ## Locking
//! - stake: asset lock, then pool lock
//! - unstake: position lock, then pool lock
//! - claim / checkpoint: position lock
//!
//! Every wait is bounded and surfaces as `LockTimeout`.

pub mod admin;
pub mod claim_rewards;
pub mod locks;
pub mod stake;
pub mod unstake;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anchor_lang::prelude::Pubkey;

use crate::clock::Clock;
use crate::error::Result;
use crate::registry::PoolRegistry;
use crate::rewards::{Checkpoint, RewardsEngine};
use crate::state::{Pool, PoolId, Position, PositionId, StakedAsset};
use crate::store::PositionStore;

pub use claim_rewards::ClaimReceipt;
pub use locks::LockTable;
pub use stake::{StakeRequest, ValidatedStake};
pub use unstake::{UnstakeReceipt, UnstakeRequest, ValidatedUnstake};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStage {
    Requested,
    Validated,
    Committed,
    Rejected,
}

impl fmt::Display for RequestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestStage::Requested => "requested",
            RequestStage::Validated => "validated",
            RequestStage::Committed => "committed",
            RequestStage::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

pub struct StakingCoordinator {
    pub(crate) registry: Arc<PoolRegistry>,
    pub(crate) store: Arc<PositionStore>,
    pub(crate) engine: RewardsEngine,
    clock: Arc<dyn Clock>,
    asset_locks: LockTable<Pubkey>,
    pool_locks: LockTable<PoolId>,
    position_locks: LockTable<PositionId>,
}

impl StakingCoordinator {
    pub fn new(
        registry: Arc<PoolRegistry>,
        store: Arc<PositionStore>,
        clock: Arc<dyn Clock>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            engine: RewardsEngine::new(store.clone(), registry.clone()),
            registry,
            store,
            clock,
            asset_locks: LockTable::new("asset", lock_timeout),
            pool_locks: LockTable::new("pool", lock_timeout),
            position_locks: LockTable::new("position", lock_timeout),
        }
    }

    pub fn now(&self) -> i64 {
        self.clock.unix_timestamp()
    }

    pub fn registry(&self) -> &PoolRegistry {
        &self.registry
    }

    pub fn store(&self) -> &PositionStore {
        &self.store
    }

    pub fn engine(&self) -> &RewardsEngine {
        &self.engine
    }

    /// Serialized checkpoint of one position at the current time.
    pub async fn checkpoint(&self, position_id: &PositionId) -> Result<Checkpoint> {
        let _position_guard = self.position_locks.acquire(position_id).await?;
        self.engine.checkpoint(position_id, self.now())
    }

    pub fn pools(&self) -> Vec<Pool> {
        self.registry.list()
    }

    pub fn pool(&self, pool_id: &PoolId) -> Result<Pool> {
        self.registry.get(pool_id)
    }

    pub fn positions(&self, owner: &Pubkey) -> Vec<Position> {
        self.store.list_by_owner(owner)
    }

    pub fn position(&self, position_id: &PositionId) -> Result<Position> {
        self.store.get(position_id)
    }

    pub fn eligible_pools(&self, asset: &StakedAsset) -> Vec<Pool> {
        self.registry.get_eligible_pools(asset)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::state::PoolParams;

    pub(crate) fn key(seed: u8) -> Pubkey {
        Pubkey::new_from_array([seed; 32])
    }

    pub(crate) fn coordinator(params: Vec<PoolParams>) -> (StakingCoordinator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let registry = Arc::new(PoolRegistry::new());
        for params in params {
            registry.register(params, 0).unwrap();
        }
        let coordinator = StakingCoordinator::new(
            registry,
            Arc::new(PositionStore::in_memory()),
            clock.clone(),
            Duration::from_millis(200),
        );
        (coordinator, clock)
    }

    pub(crate) fn pool_params(id: &str, rate: u64) -> PoolParams {
        PoolParams::new(PoolId::new(id).unwrap(), rate)
    }

    #[tokio::test]
    async fn test_checkpoint_uses_clock() {
        let (coordinator, clock) = coordinator(vec![pool_params("P1", 10)]);
        let position = coordinator
            .stake(StakeRequest::nft(key(1), PoolId::new("P1").unwrap(), key(2)))
            .await
            .unwrap();

        clock.advance(crate::constants::SECONDS_PER_DAY);
        let checkpoint = coordinator.checkpoint(&position.id).await.unwrap();
        assert_eq!(checkpoint.event.amount, 10);
        assert_eq!(checkpoint.event.timestamp, crate::constants::SECONDS_PER_DAY);
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(RequestStage::Rejected.to_string(), "rejected");
        assert_eq!(RequestStage::Committed.to_string(), "committed");
    }
}
