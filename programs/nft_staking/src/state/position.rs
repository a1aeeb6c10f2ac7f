use std::fmt;

use anchor_lang::prelude::*;

use crate::constants::*;
use crate::state::PoolId;

pub type PositionId = Pubkey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AnchorSerialize, AnchorDeserialize)]
pub enum StakedAsset {
    Nft { mint: Pubkey },
    Tokens { mint: Pubkey, amount: u64 },
}

impl StakedAsset {
    pub fn mint(&self) -> Pubkey {
        match self {
            StakedAsset::Nft { mint } | StakedAsset::Tokens { mint, .. } => *mint,
        }
    }

    /// Units counted against pool capacity and used for accrual.
    pub fn quantity(&self) -> u64 {
        match self {
            StakedAsset::Nft { .. } => NFT_QUANTITY,
            StakedAsset::Tokens { amount, .. } => *amount,
        }
    }

    pub fn is_nft(&self) -> bool {
        matches!(self, StakedAsset::Nft { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AnchorSerialize, AnchorDeserialize)]
pub enum PositionStatus {
    Active,
    Unstaking,
    Closed,
}

impl PositionStatus {
    /// Only Active -> Unstaking -> Closed, one step at a time.
    pub fn can_transition_to(self, next: PositionStatus) -> bool {
        matches!(
            (self, next),
            (PositionStatus::Active, PositionStatus::Unstaking)
                | (PositionStatus::Unstaking, PositionStatus::Closed)
        )
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PositionStatus::Active => "active",
            PositionStatus::Unstaking => "unstaking",
            PositionStatus::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, AnchorSerialize, AnchorDeserialize)]
pub struct Position {
    pub id: PositionId,
    pub owner: Pubkey,
    pub pool_id: PoolId,
    pub asset: StakedAsset,

    pub staked_at: i64,
    pub lock_expires_at: i64,

    pub accrued_rewards: u64,
    pub claimed_rewards: u64,
    pub forfeited_rewards: u64,
    pub last_checkpoint: i64,
    /// Accrual not yet worth a whole base unit, in units of
    /// `1 / SECONDS_PER_DAY`. Always below `SECONDS_PER_DAY`.
    pub accrual_carry: u64,

    pub status: PositionStatus,
    pub closed_at: Option<i64>,
}

impl Position {
    pub fn quantity(&self) -> u64 {
        self.asset.quantity()
    }

    /// Accrued but neither claimed nor forfeited.
    pub fn pending_rewards(&self) -> u64 {
        self.accrued_rewards
            .saturating_sub(self.claimed_rewards)
            .saturating_sub(self.forfeited_rewards)
    }

    pub fn is_lock_ended(&self, now: i64) -> bool {
        now >= self.lock_expires_at
    }

    /// Still counted against pool capacity.
    pub fn is_live(&self) -> bool {
        self.status != PositionStatus::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_order() {
        use PositionStatus::*;

        assert!(Active.can_transition_to(Unstaking));
        assert!(Unstaking.can_transition_to(Closed));

        assert!(!Active.can_transition_to(Closed));
        assert!(!Active.can_transition_to(Active));
        assert!(!Unstaking.can_transition_to(Active));
        assert!(!Closed.can_transition_to(Active));
        assert!(!Closed.can_transition_to(Unstaking));
    }

    #[test]
    fn test_pending_rewards() {
        let position = Position {
            id: Pubkey::new_from_array([9u8; 32]),
            owner: Pubkey::new_from_array([1u8; 32]),
            pool_id: PoolId::new("P1").unwrap(),
            asset: StakedAsset::Tokens {
                mint: Pubkey::new_from_array([2u8; 32]),
                amount: 500,
            },
            staked_at: 0,
            lock_expires_at: 100,
            accrued_rewards: 50,
            claimed_rewards: 20,
            forfeited_rewards: 5,
            last_checkpoint: 10,
            accrual_carry: 0,
            status: PositionStatus::Active,
            closed_at: None,
        };

        assert_eq!(position.pending_rewards(), 25);
        assert_eq!(position.quantity(), 500);
        assert!(!position.is_lock_ended(99));
        assert!(position.is_lock_ended(100));
        assert!(position.is_live());
    }
}
