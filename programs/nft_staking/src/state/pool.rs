use std::fmt;

use anchor_lang::prelude::*;
use indexmap::IndexSet;

use crate::constants::*;
use crate::error::{Result, StakingError};
use crate::state::StakedAsset;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, AnchorSerialize, AnchorDeserialize)]
pub struct PoolId(String);

impl PoolId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.len() <= MAX_POOL_ID_LEN
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StakingError::InvalidPoolId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which assets a pool accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    AnyNft,
    /// A fixed collection of NFT mints.
    NftAllowlist(IndexSet<Pubkey>),
    /// Fungible stake of a single mint.
    Token { mint: Pubkey, min_amount: u64 },
}

impl Eligibility {
    pub fn accepts(&self, asset: &StakedAsset) -> bool {
        match (self, asset) {
            (Eligibility::AnyNft, StakedAsset::Nft { .. }) => true,
            (Eligibility::NftAllowlist(mints), StakedAsset::Nft { mint }) => mints.contains(mint),
            (Eligibility::Token { mint, min_amount }, StakedAsset::Tokens { mint: staked, amount }) => {
                mint == staked && amount >= min_amount
            }
            _ => false,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Eligibility::AnyNft => "any NFT".to_string(),
            Eligibility::NftAllowlist(mints) => format!("{} allowlisted NFTs", mints.len()),
            Eligibility::Token { mint, min_amount } => {
                format!("at least {} of token {}", min_amount, mint)
            }
        }
    }
}

/// How elapsed time turns into rewards. See `rewards.rs` for the math.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccrualPolicy {
    Linear,
    /// Rewards accrue only for whole steps of `step_seconds`.
    Stepped { step_seconds: i64 },
}

impl fmt::Display for AccrualPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccrualPolicy::Linear => f.write_str("linear"),
            AccrualPolicy::Stepped { step_seconds } => write!(f, "stepped({}s)", step_seconds),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EarlyExit {
    /// Share of pending rewards forfeited on early exit.
    pub penalty_bps: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateChange {
    pub effective_at: i64,
    pub rate: u64,
}

/// Terms for a new pool, validated by [`Pool::new`].
#[derive(Debug, Clone)]
pub struct PoolParams {
    pub id: PoolId,
    pub name: String,
    pub eligibility: Eligibility,
    /// Base units per staked unit per day.
    pub reward_rate: u64,
    pub accrual: AccrualPolicy,
    pub min_lock_seconds: i64,
    pub capacity: Option<u64>,
    pub early_exit: Option<EarlyExit>,
    pub emission_cap: Option<u64>,
}

impl PoolParams {
    /// Linear, uncapped, no lock, any NFT.
    pub fn new(id: PoolId, reward_rate: u64) -> Self {
        Self {
            name: id.to_string(),
            id,
            eligibility: Eligibility::AnyNft,
            reward_rate,
            accrual: AccrualPolicy::Linear,
            min_lock_seconds: 0,
            capacity: None,
            early_exit: None,
            emission_cap: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Pool {
    pub id: PoolId,
    pub name: String,
    pub eligibility: Eligibility,
    pub accrual: AccrualPolicy,
    pub min_lock_seconds: i64,
    pub capacity: Option<u64>,
    pub early_exit: Option<EarlyExit>,
    pub emission_cap: Option<u64>,

    base_rate: u64,
    rate_changes: Vec<RateChange>,

    pub total_staked: u64,
    pub active_positions: u64,
    pub total_distributed: u64,

    pub paused: bool,

    pub created_at: i64,
    pub last_updated: i64,
}

impl Pool {
    pub fn new(params: PoolParams, now: i64) -> Result<Self> {
        let PoolParams {
            id,
            name,
            eligibility,
            reward_rate,
            accrual,
            min_lock_seconds,
            capacity,
            early_exit,
            emission_cap,
        } = params;

        let invalid = |reason: &str| StakingError::InvalidPoolParams {
            pool_id: id.clone(),
            reason: reason.to_string(),
        };

        if reward_rate > MAX_REWARD_RATE {
            return Err(StakingError::RateTooHigh {
                rate: reward_rate,
                max: MAX_REWARD_RATE,
            });
        }
        if !(0..=MAX_LOCK_DURATION).contains(&min_lock_seconds) {
            return Err(StakingError::InvalidLockDuration {
                pool_id: id,
                requested: min_lock_seconds,
                minimum: 0,
            });
        }
        if capacity == Some(0) {
            return Err(invalid("capacity must be greater than zero"));
        }
        if emission_cap == Some(0) {
            return Err(invalid("emission cap must be greater than zero"));
        }
        if let Some(exit) = early_exit {
            if exit.penalty_bps > MAX_PENALTY_BPS {
                return Err(StakingError::PenaltyTooHigh(exit.penalty_bps));
            }
        }
        if let AccrualPolicy::Stepped { step_seconds } = accrual {
            if step_seconds <= 0 {
                return Err(invalid("accrual step must be positive"));
            }
        }
        if let Eligibility::NftAllowlist(mints) = &eligibility {
            if mints.is_empty() {
                return Err(invalid("NFT allowlist is empty"));
            }
        }

        Ok(Self {
            name: if name.trim().is_empty() { id.to_string() } else { name },
            id,
            eligibility,
            accrual,
            min_lock_seconds,
            capacity,
            early_exit,
            emission_cap,
            base_rate: reward_rate,
            rate_changes: Vec::new(),
            total_staked: 0,
            active_positions: 0,
            total_distributed: 0,
            paused: false,
            created_at: now,
            last_updated: now,
        })
    }

    /// Rate in force at `at`.
    pub fn rate_at(&self, at: i64) -> u64 {
        self.rate_changes
            .iter()
            .rev()
            .find(|change| change.effective_at <= at)
            .map(|change| change.rate)
            .unwrap_or(self.base_rate)
    }

    pub fn rate_changes(&self) -> &[RateChange] {
        &self.rate_changes
    }

    /// Instants strictly inside `(from, to)` where the rate changes.
    pub fn rate_boundaries(&self, from: i64, to: i64) -> impl Iterator<Item = i64> + '_ {
        self.rate_changes
            .iter()
            .map(|change| change.effective_at)
            .filter(move |at| *at > from && *at < to)
    }

    /// Schedules `rate` from `effective_at` on. Intervals before `now` are
    /// never touched; a second change at the same instant replaces the first.
    pub fn schedule_rate_change(&mut self, rate: u64, effective_at: i64, now: i64) -> Result<()> {
        if rate > MAX_REWARD_RATE {
            return Err(StakingError::RateTooHigh {
                rate,
                max: MAX_REWARD_RATE,
            });
        }
        if effective_at < now {
            return Err(StakingError::RetroactiveRateChange {
                pool_id: self.id.clone(),
                effective_at,
                now,
            });
        }

        let change = RateChange { effective_at, rate };
        match self
            .rate_changes
            .binary_search_by_key(&effective_at, |c| c.effective_at)
        {
            Ok(index) => self.rate_changes[index] = change,
            Err(index) => self.rate_changes.insert(index, change),
        }
        self.last_updated = now;
        Ok(())
    }

    /// Lock applied to a new position: the requested duration, or the pool
    /// minimum when none is requested.
    pub fn lock_duration_for(&self, requested: Option<i64>) -> Result<i64> {
        let duration = requested.unwrap_or(self.min_lock_seconds);
        if duration < self.min_lock_seconds || duration > MAX_LOCK_DURATION {
            return Err(StakingError::InvalidLockDuration {
                pool_id: self.id.clone(),
                requested: duration,
                minimum: self.min_lock_seconds,
            });
        }
        Ok(duration)
    }

    pub fn check_capacity(&self, quantity: u64) -> Result<()> {
        if let Some(capacity) = self.capacity {
            let after = self
                .total_staked
                .checked_add(quantity)
                .ok_or(StakingError::MathOverflow)?;
            if after > capacity {
                return Err(StakingError::CapacityExceeded {
                    pool_id: self.id.clone(),
                    capacity,
                    staked: self.total_staked,
                    requested: quantity,
                });
            }
        }
        Ok(())
    }

    /// Total distributed after paying `amount`, if the emission cap allows it.
    pub fn check_emission(&self, amount: u64) -> Result<u64> {
        let after = self
            .total_distributed
            .checked_add(amount)
            .ok_or(StakingError::MathOverflow)?;
        if let Some(cap) = self.emission_cap {
            if after > cap {
                return Err(StakingError::EmissionCapExceeded {
                    pool_id: self.id.clone(),
                    cap,
                    distributed: self.total_distributed,
                    requested: amount,
                });
            }
        }
        Ok(after)
    }

    /// Rewards the emission cap still allows, if the pool has one.
    pub fn remaining_emission(&self) -> Option<u64> {
        self.emission_cap
            .map(|cap| cap.saturating_sub(self.total_distributed))
    }

    pub fn remaining_capacity(&self) -> Option<u64> {
        self.capacity
            .map(|capacity| capacity.saturating_sub(self.total_staked))
    }

    pub fn penalty_bps(&self) -> Option<u16> {
        self.early_exit.map(|exit| exit.penalty_bps)
    }
}
