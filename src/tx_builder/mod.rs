//! Transaction assembly
//!
//! ## Architecture
//!
//! - **errors**: error taxonomy with retryability and metric categories
//! - **context**: blockhash validity window and compute budget settings
//! - **instructions**: compute-budget planning and order validation
//! - **builder**: lookup-table resolution, v0 compilation, signing, size check
//! - **output**: the immutable signed result
//!
//! ## Instruction layout
//!
//! Every transaction starts with `SetComputeUnitLimit` and
//! `SetComputeUnitPrice`, followed by the wrapped instructions unchanged and in
//! order. The unit limit is the route estimate when known, otherwise 300 000,
//! and never above 1 400 000.
//!
//! ## Size limit
//!
//! The serialized transaction must fit in 1232 bytes. Oversized transactions
//! fail with `TransactionTooLarge` before anything reaches the network.

pub mod errors;
pub use errors::TransactionBuilderError;

mod builder;
mod context;
mod instructions;
mod output;

pub use builder::{assemble_with_tables, TransactionAssembler, MAX_TRANSACTION_SIZE};
pub use context::{
    BlockhashContext, ComputeBudget, DEFAULT_COMPUTE_UNIT_LIMIT, DEFAULT_COMPUTE_UNIT_PRICE,
    MAX_COMPUTE_UNIT_LIMIT,
};
pub use instructions::{
    plan_compute_budget, plan_transaction_instructions, sanity_check_ix_order, InstructionPlan,
};
pub use output::AssembledTransaction;
