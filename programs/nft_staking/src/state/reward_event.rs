use anchor_lang::prelude::*;

use crate::state::PositionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, AnchorSerialize, AnchorDeserialize)]
pub enum RewardEventKind {
    Accrual,
    Claim,
}

/// Append-only reward record. Early-exit penalties are Accrual events with a
/// negative amount.
#[derive(Debug, Clone, PartialEq, Eq, AnchorSerialize, AnchorDeserialize)]
pub struct RewardEvent {
    pub position_id: PositionId,
    pub amount: i64,
    pub timestamp: i64,
    pub kind: RewardEventKind,
}

impl RewardEvent {
    pub fn accrual(position_id: PositionId, amount: i64, timestamp: i64) -> Self {
        Self {
            position_id,
            amount,
            timestamp,
            kind: RewardEventKind::Accrual,
        }
    }

    pub fn claim(position_id: PositionId, amount: i64, timestamp: i64) -> Self {
        Self {
            position_id,
            amount,
            timestamp,
            kind: RewardEventKind::Claim,
        }
    }

    pub fn is_penalty(&self) -> bool {
        self.kind == RewardEventKind::Accrual && self.amount < 0
    }
}
