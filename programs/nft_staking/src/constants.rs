//! Ledger constants for the NFT staking service.
//!
//! This module defines the constant values used throughout the ledger,
//! including time periods, rate limits, and service defaults.

/// Seed for deriving position ids
pub const POSITION_SEED: &[u8] = b"position";

/// Number of seconds in a day
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Upper bound on lock durations (5 years)
pub const MAX_LOCK_DURATION: i64 = 5 * 365 * SECONDS_PER_DAY;

/// Maximum allowed reward rate, in base units per staked unit per day
pub const MAX_REWARD_RATE: u64 = 1_000_000_000_000;

/// Basis points denominator (100% = 10000 basis points)
pub const BASIS_POINTS_DENOMINATOR: u64 = 10_000;

/// Maximum early-exit penalty (100% of pending rewards)
pub const MAX_PENALTY_BPS: u16 = 10_000;

/// Quantity contributed by a single staked NFT
pub const NFT_QUANTITY: u64 = 1;

/// Longest accepted pool id
pub const MAX_POOL_ID_LEN: usize = 64;

/// Default bound on waiting for a pool, position or asset lock
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2_000;

/// Default HTTP request timeout
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default maximum HTTP request body size (64 KiB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

/// Default listen address for the HTTP service
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Lock tables are pruned of idle entries once they grow past this size
pub const LOCK_TABLE_PRUNE_THRESHOLD: usize = 1_024;
