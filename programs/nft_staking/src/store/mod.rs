//! Position store.
//!
//! Sole owner of positions and their reward events. Every mutation is
//! journaled before it becomes visible, so a store reopened from the same
//! journal sees exactly the committed history. Callers receive clones.
//!
//! Writers take the writer mutex for check, append and apply; the ledger
//! lock is held for writing only while an appended entry is applied, so
//! reads never wait on a journal sync.

pub mod journal;

use std::collections::HashMap;
use std::path::Path;

use anchor_lang::prelude::Pubkey;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::constants::*;
use crate::error::{Result, StakingError};
use crate::state::{Pool, PoolId, Position, PositionId, PositionStatus, RewardEvent, StakedAsset};

pub use journal::{FileJournal, Journal, JournalEntry, MemoryJournal};

/// Live totals per pool, used to rebuild registry counters after replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolTotals {
    pub staked: u64,
    pub live_positions: u64,
    pub distributed: u64,
}

#[derive(Debug, Default)]
struct Ledger {
    positions: IndexMap<PositionId, Position>,
    by_owner: HashMap<Pubkey, Vec<PositionId>>,
    events: HashMap<PositionId, Vec<RewardEvent>>,
    /// NFT mint -> live position holding it.
    live_nfts: HashMap<Pubkey, PositionId>,
    sequence: u64,
}

impl Ledger {
    fn apply(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::Created(position) => {
                self.sequence += 1;
                if position.asset.is_nft() && position.is_live() {
                    self.live_nfts.insert(position.asset.mint(), position.id);
                }
                self.by_owner
                    .entry(position.owner)
                    .or_default()
                    .push(position.id);
                self.positions.insert(position.id, position);
            }
            JournalEntry::Updated { position, event } => {
                if position.asset.is_nft() && !position.is_live() {
                    self.live_nfts.remove(&position.asset.mint());
                }
                if let Some(event) = event {
                    self.events.entry(position.id).or_default().push(event);
                }
                self.positions.insert(position.id, position);
            }
        }
    }

    fn get(&self, id: &PositionId) -> Result<&Position> {
        self.positions
            .get(id)
            .ok_or(StakingError::PositionNotFound { position_id: *id })
    }
}

pub struct PositionStore {
    ledger: RwLock<Ledger>,
    writer: Mutex<()>,
    journal: Box<dyn Journal>,
}

impl PositionStore {
    /// Store whose journal lives in memory only.
    pub fn in_memory() -> Self {
        Self {
            ledger: RwLock::new(Ledger::default()),
            writer: Mutex::new(()),
            journal: Box::new(MemoryJournal::new()),
        }
    }

    /// Store backed by a journal file, replaying any existing history.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let journal = FileJournal::open(path)?;
        Self::with_journal(Box::new(journal))
    }

    pub fn with_journal(journal: Box<dyn Journal>) -> Result<Self> {
        let entries = journal.load()?;
        let replayed = entries.len();

        let mut ledger = Ledger::default();
        for entry in entries {
            ledger.apply(entry);
        }

        info!(
            entries = replayed,
            positions = ledger.positions.len(),
            "Position store ready"
        );

        Ok(Self {
            ledger: RwLock::new(ledger),
            writer: Mutex::new(()),
            journal,
        })
    }

    /// Creates an Active position for `asset` in `pool`.
    ///
    /// # Arguments
    /// * `owner` - Wallet staking the asset
    /// * `pool` - Snapshot of the target pool (terms and current counters)
    /// * `asset` - NFT or token amount being staked
    /// * `lock_duration` - Seconds before the position may exit without penalty
    /// * `now` - Stake timestamp
    ///
    /// # Errors
    /// Returns an error if:
    /// - The asset quantity is zero
    /// - The asset fails the pool's eligibility predicate
    /// - The lock duration is below the pool minimum
    /// - The pool's capacity would be exceeded
    pub fn create(
        &self,
        owner: Pubkey,
        pool: &Pool,
        asset: StakedAsset,
        lock_duration: i64,
        now: i64,
    ) -> Result<Position> {
        if asset.quantity() == 0 {
            return Err(StakingError::ZeroAmount);
        }
        if !pool.eligibility.accepts(&asset) {
            return Err(StakingError::IneligibleAsset {
                pool_id: pool.id.clone(),
                asset: asset.mint(),
            });
        }
        if lock_duration < pool.min_lock_seconds || lock_duration > MAX_LOCK_DURATION {
            return Err(StakingError::InvalidLockDuration {
                pool_id: pool.id.clone(),
                requested: lock_duration,
                minimum: pool.min_lock_seconds,
            });
        }
        pool.check_capacity(asset.quantity())?;

        let _writer = self.writer.lock();
        let sequence = self.ledger.read().sequence;
        let position = Position {
            id: derive_position_id(&pool.id, &owner, &asset.mint(), sequence),
            owner,
            pool_id: pool.id.clone(),
            asset,
            staked_at: now,
            lock_expires_at: now
                .checked_add(lock_duration)
                .ok_or(StakingError::MathOverflow)?,
            accrued_rewards: 0,
            claimed_rewards: 0,
            forfeited_rewards: 0,
            last_checkpoint: now,
            accrual_carry: 0,
            status: PositionStatus::Active,
            closed_at: None,
        };

        let entry = JournalEntry::Created(position.clone());
        self.journal.append(&entry)?;
        self.ledger.write().apply(entry);

        debug!(position = %position.id, pool = %pool.id, owner = %owner, "Position created");
        Ok(position)
    }

    pub fn get(&self, id: &PositionId) -> Result<Position> {
        self.ledger.read().get(id).cloned()
    }

    /// Owner's positions in creation order.
    pub fn list_by_owner(&self, owner: &Pubkey) -> Vec<Position> {
        let ledger = self.ledger.read();
        ledger
            .by_owner
            .get(owner)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| ledger.positions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn list_by_pool(&self, pool_id: &PoolId) -> Vec<Position> {
        self.ledger
            .read()
            .positions
            .values()
            .filter(|position| &position.pool_id == pool_id)
            .cloned()
            .collect()
    }

    /// Live position of `owner` staking `mint` in `pool_id`, if any.
    pub fn find_live(&self, owner: &Pubkey, pool_id: &PoolId, mint: &Pubkey) -> Option<Position> {
        self.list_by_owner(owner).into_iter().find(|position| {
            position.is_live() && &position.pool_id == pool_id && &position.asset.mint() == mint
        })
    }

    /// Live position holding the NFT `mint`, in any pool.
    pub fn find_live_nft(&self, mint: &Pubkey) -> Option<Position> {
        let ledger = self.ledger.read();
        ledger
            .live_nfts
            .get(mint)
            .and_then(|id| ledger.positions.get(id).cloned())
    }

    /// Moves a position one step along Active -> Unstaking -> Closed.
    pub fn transition(&self, id: &PositionId, next: PositionStatus, now: i64) -> Result<Position> {
        let _writer = self.writer.lock();
        let mut position = self.get(id)?;

        if !position.status.can_transition_to(next) {
            return Err(StakingError::InvalidTransition {
                position_id: *id,
                from: position.status,
                to: next,
            });
        }
        position.status = next;
        if next == PositionStatus::Closed {
            position.closed_at = Some(now);
        }

        let entry = JournalEntry::Updated {
            position: position.clone(),
            event: None,
        };
        self.journal.append(&entry)?;
        self.ledger.write().apply(entry);

        debug!(position = %id, status = %next, "Position transitioned");
        Ok(position)
    }

    /// Persists an updated position together with the reward event that
    /// produced it, as one journal entry.
    pub(crate) fn record(&self, position: &Position, event: Option<RewardEvent>) -> Result<()> {
        let _writer = self.writer.lock();
        let stored = self.get(&position.id)?;

        if stored.status != position.status && !stored.status.can_transition_to(position.status) {
            return Err(StakingError::InvalidTransition {
                position_id: position.id,
                from: stored.status,
                to: position.status,
            });
        }
        debug_assert!(
            stored.status != PositionStatus::Active
                || position.accrued_rewards >= stored.accrued_rewards
        );

        let entry = JournalEntry::Updated {
            position: position.clone(),
            event,
        };
        self.journal.append(&entry)?;
        self.ledger.write().apply(entry);
        Ok(())
    }

    /// Reward events of a position in append order.
    pub fn events(&self, id: &PositionId) -> Vec<RewardEvent> {
        self.ledger
            .read()
            .events
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn live_totals(&self) -> HashMap<PoolId, PoolTotals> {
        let ledger = self.ledger.read();
        let mut totals: HashMap<PoolId, PoolTotals> = HashMap::new();
        for position in ledger.positions.values() {
            let entry = totals.entry(position.pool_id.clone()).or_default();
            entry.distributed = entry.distributed.saturating_add(position.claimed_rewards);
            if position.is_live() {
                entry.staked = entry.staked.saturating_add(position.quantity());
                entry.live_positions += 1;
            }
        }
        totals
    }

    pub fn len(&self) -> usize {
        self.ledger.read().positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Position ids follow the pool/owner/asset seeds plus the store sequence,
/// so restaking the same asset later yields a fresh id.
pub fn derive_position_id(pool_id: &PoolId, owner: &Pubkey, mint: &Pubkey, sequence: u64) -> PositionId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(POSITION_SEED);
    hasher.update(pool_id.as_str().as_bytes());
    hasher.update(owner.as_ref());
    hasher.update(mint.as_ref());
    hasher.update(&sequence.to_le_bytes());
    Pubkey::new_from_array(*hasher.finalize().as_bytes())
}
