//! # NFT Staking Ledger
//!
//! A staking ledger and rewards-accrual engine for NFT and token staking
//! pools, served over HTTP.
//!
//! - **Pools** define eligibility (any NFT, an NFT allowlist, or a fungible
//!   token), a reward rate per staked unit per day, a minimum lock, optional
//!   capacity, early-exit penalty and emission cap.
//! - **Positions** move Active -> Unstaking -> Closed and accrue rewards
//!   linearly or in whole steps, checkpointed on demand.
//!
//! ## Features
//! - Rate changes apply only to future intervals
//! - Claim rewards without unstaking
//! - Early exit with a penalty on pending rewards, where the pool allows it
//! - Per-pool and per-position serialization with bounded lock waits
//! - Append-only journal with replay on startup
//! - Safe math with overflow protection
//!
//! ## Layout
//! - [`store`] owns positions and reward events
//! - [`rewards`] turns elapsed time into rewards
//! - [`registry`] holds pools and their counters
//! - [`coordinator`] runs stake, unstake, claim and admin requests
//! - [`stats`] folds positions into owner and pool summaries
//! - [`api`] exposes it all over HTTP

pub mod api;
pub mod clock;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod registry;
pub mod rewards;
pub mod state;
pub mod stats;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{StakeRequest, StakingCoordinator, UnstakeRequest};
pub use error::{ErrorKind, Result, StakingError};
pub use registry::PoolRegistry;
pub use rewards::RewardsEngine;
pub use store::PositionStore;
