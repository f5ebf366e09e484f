//! delegated-swap - swaps and transfers through a delegated-authority wallet
//!
//! A root keypair acts for a role in an on-chain wallet's permission tree.
//! Quotes are raced across liquidity providers, the winning route is wrapped
//! so the role authorizes it, then assembled, signed, sent and confirmed.
//!
//! ## Pipeline
//!
//! 1. `canonical`: provider-agnostic instruction model
//! 2. `providers`: Metis (HTTP) and Titan (WebSocket) adapters
//! 3. `aggregator`: provider race and best-route selection
//! 4. `authority`: role lookup, permission oracle, sign envelope
//! 5. `tx_builder`: compute budget, lookup tables, v0 compile, size check
//! 6. `supervisor`: send once, poll until confirmed, expired or failed
//!
//! `swap_engine` runs the stages in order for each command.

pub mod aggregator;
pub mod authority;
pub mod canonical;
pub mod compat;
pub mod config;
pub mod metrics;
pub mod observability;
pub mod providers;
pub mod streaming;
pub mod structured_logging;
pub mod supervisor;
pub mod swap_engine;
pub mod tx_builder;
pub mod types;
pub mod wallet;

#[path = "rpc manager/mod.rs"]
pub mod rpc_manager;

pub mod test_utils;

// Re-export commonly used types
pub use solana_sdk::{pubkey::Pubkey, signature::Signature};
pub use swap_engine::{EngineError, EngineSettings, Receipt, SwapEngine, SwapOrder};
