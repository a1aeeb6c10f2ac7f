//! Claim rewards handler.
//!
//! Pays out pending rewards without unstaking.

use anchor_lang::prelude::Pubkey;
use tracing::debug;

use crate::coordinator::StakingCoordinator;
use crate::error::{Result, StakingError};
use crate::state::{PositionId, PositionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimReceipt {
    pub position_id: PositionId,
    pub claimed: u64,
}

impl StakingCoordinator {
    /// Checkpoints the position at the current time, then claims everything
    /// pending.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The position does not exist or belongs to someone else
    /// - Nothing is pending after the checkpoint
    /// - The pool's emission cap would be exceeded
    pub async fn claim(&self, owner: Pubkey, position_id: &PositionId) -> Result<ClaimReceipt> {
        let _position_guard = self.position_locks.acquire(position_id).await?;
        let now = self.now();

        let position = self.store.get(position_id)?;
        if position.owner != owner {
            return Err(StakingError::OwnerMismatch {
                position_id: *position_id,
                owner,
            });
        }
        if position.status == PositionStatus::Active {
            self.engine.checkpoint(position_id, now)?;
        }

        let claimed = self.engine.claim(position_id, now)?;
        debug!(position = %position_id, claimed, "Claim complete");

        Ok(ClaimReceipt {
            position_id: *position_id,
            claimed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SECONDS_PER_DAY;
    use crate::coordinator::tests::{coordinator, key, pool_params};
    use crate::coordinator::StakeRequest;
    use crate::state::PoolId;

    #[tokio::test]
    async fn test_claim_without_unstake() {
        let (coordinator, clock) = coordinator(vec![pool_params("P1", 10)]);
        let position = coordinator
            .stake(StakeRequest::nft(key(1), PoolId::new("P1").unwrap(), key(2)))
            .await
            .unwrap();

        let err = coordinator.claim(key(1), &position.id).await.unwrap_err();
        assert!(matches!(err, StakingError::NothingToClaim { .. }));

        clock.set(SECONDS_PER_DAY);
        let receipt = coordinator.claim(key(1), &position.id).await.unwrap();
        assert_eq!(receipt.claimed, 10);

        let stored = coordinator.position(&position.id).unwrap();
        assert_eq!(stored.status, PositionStatus::Active);
        assert_eq!(stored.claimed_rewards, 10);
        assert_eq!(stored.pending_rewards(), 0);
    }

    #[tokio::test]
    async fn test_claim_requires_owner() {
        let (coordinator, _) = coordinator(vec![pool_params("P1", 10)]);
        let position = coordinator
            .stake(StakeRequest::nft(key(1), PoolId::new("P1").unwrap(), key(2)))
            .await
            .unwrap();

        let err = coordinator.claim(key(5), &position.id).await.unwrap_err();
        assert!(matches!(err, StakingError::OwnerMismatch { .. }));
    }
}
