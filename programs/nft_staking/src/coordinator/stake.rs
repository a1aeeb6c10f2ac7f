//! Stake request handling.
//!
//! Creates a position for an NFT or token amount in a pool.

use anchor_lang::prelude::Pubkey;
use tracing::{debug, info, warn};

use crate::coordinator::{RequestStage, StakingCoordinator};
use crate::error::{Result, StakingError};
use crate::state::{Pool, PoolId, Position, StakedAsset};

/// A stake as requested by the caller, not yet checked against the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakeRequest {
    pub owner: Pubkey,
    pub pool_id: PoolId,
    pub asset: StakedAsset,
    /// Lock in seconds; the pool minimum applies when absent.
    pub lock_seconds: Option<i64>,
}

impl StakeRequest {
    pub fn nft(owner: Pubkey, pool_id: PoolId, mint: Pubkey) -> Self {
        Self {
            owner,
            pool_id,
            asset: StakedAsset::Nft { mint },
            lock_seconds: None,
        }
    }

    pub fn tokens(owner: Pubkey, pool_id: PoolId, mint: Pubkey, amount: u64) -> Self {
        Self {
            owner,
            pool_id,
            asset: StakedAsset::Tokens { mint, amount },
            lock_seconds: None,
        }
    }

    pub fn with_lock(mut self, lock_seconds: i64) -> Self {
        self.lock_seconds = Some(lock_seconds);
        self
    }
}

/// A stake that passed validation. Only
/// [`StakingCoordinator::validate_stake`] produces one.
#[derive(Debug, Clone)]
pub struct ValidatedStake {
    request: StakeRequest,
    pool: Pool,
    lock_duration: i64,
}

impl ValidatedStake {
    pub fn request(&self) -> &StakeRequest {
        &self.request
    }

    /// Pool snapshot the stake was validated against.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn lock_duration(&self) -> i64 {
        self.lock_duration
    }
}

impl StakingCoordinator {
    /// Checks a stake request against current ledger state without
    /// changing it.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The pool does not exist or is paused
    /// - The asset is ineligible or has zero quantity
    /// - The lock duration is out of range
    /// - The pool has no room for the asset
    /// - The owner already stakes this asset in this pool
    /// - The NFT is already staked anywhere
    pub fn validate_stake(&self, request: StakeRequest, now: i64) -> Result<ValidatedStake> {
        let pool = self.registry.get(&request.pool_id)?;
        let mint = request.asset.mint();

        if pool.paused {
            return Err(StakingError::StakingPaused { pool_id: pool.id });
        }
        if request.asset.quantity() == 0 {
            return Err(StakingError::ZeroAmount);
        }
        if !pool.eligibility.accepts(&request.asset) {
            return Err(StakingError::IneligibleAsset {
                pool_id: pool.id,
                asset: mint,
            });
        }
        let lock_duration = pool.lock_duration_for(request.lock_seconds)?;
        pool.check_capacity(request.asset.quantity())?;

        if self
            .store
            .find_live(&request.owner, &pool.id, &mint)
            .is_some()
        {
            return Err(StakingError::DuplicateStake {
                pool_id: pool.id,
                owner: request.owner,
                asset: mint,
            });
        }
        if request.asset.is_nft() {
            if let Some(holder) = self.store.find_live_nft(&mint) {
                return Err(StakingError::AssetAlreadyStaked {
                    asset: mint,
                    position_id: holder.id,
                });
            }
        }

        debug!(
            pool = %pool.id,
            owner = %request.owner,
            asset = %mint,
            stage = %RequestStage::Validated,
            now,
            "Stake validated"
        );
        Ok(ValidatedStake {
            request,
            pool,
            lock_duration,
        })
    }

    /// Stakes an asset into a pool.
    ///
    /// # Arguments
    /// * `request` - Owner, pool, asset and optional lock
    ///
    /// # Errors
    /// Any validation error, `LockTimeout` when the asset or pool lock is
    /// contended past the configured bound, or a storage failure.
    pub async fn stake(&self, request: StakeRequest) -> Result<Position> {
        debug!(
            pool = %request.pool_id,
            owner = %request.owner,
            stage = %RequestStage::Requested,
            "Stake requested"
        );

        let _asset_guard = self.asset_locks.acquire(&request.asset.mint()).await?;
        let _pool_guard = self.pool_locks.acquire(&request.pool_id).await?;

        let now = self.now();
        let pool_id = request.pool_id.clone();
        let outcome = self
            .validate_stake(request, now)
            .and_then(|validated| self.commit_stake(validated, now));

        if let Err(err) = &outcome {
            debug!(pool = %pool_id, stage = %RequestStage::Rejected, "Stake rejected: {}", err);
        }
        outcome
    }

    /// Debits pool capacity, then creates the position. A failed create
    /// returns the capacity. Runs under the pool lock with no await points.
    fn commit_stake(&self, stake: ValidatedStake, now: i64) -> Result<Position> {
        let ValidatedStake {
            request,
            pool,
            lock_duration,
        } = stake;
        let quantity = request.asset.quantity();

        self.registry
            .debit_capacity(&pool.id, quantity, pool.total_staked)?;

        let position = match self
            .store
            .create(request.owner, &pool, request.asset, lock_duration, now)
        {
            Ok(position) => position,
            Err(err) => {
                warn!(
                    pool = %pool.id,
                    owner = %request.owner,
                    "Position create failed, returning capacity: {}",
                    err
                );
                self.registry.credit_capacity(&pool.id, quantity)?;
                return Err(err);
            }
        };

        info!(
            position = %position.id,
            pool = %pool.id,
            owner = %position.owner,
            asset = %position.asset.mint(),
            quantity = position.quantity(),
            stage = %RequestStage::Committed,
            "Staked until {}",
            position.lock_expires_at
        );
        Ok(position)
    }
}
