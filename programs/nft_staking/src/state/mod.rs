//! State structures for the NFT staking ledger.
//!
//! This module defines pools, positions and the reward events recorded
//! against them.

pub mod pool;
pub mod position;
pub mod reward_event;

pub use pool::*;
pub use position::*;
pub use reward_event::*;
