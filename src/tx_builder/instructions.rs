//! Instruction planning and ordering validation
//!
//! Every assembled transaction has the same shape:
//! 1. `SetComputeUnitLimit`
//! 2. `SetComputeUnitPrice`
//! 3. Wrapped instructions, in the order the wrapper returned them

use solana_sdk::{compute_budget::ComputeBudgetInstruction, instruction::Instruction};

use crate::canonical::CanonicalInstruction;
use crate::tx_builder::context::ComputeBudget;
use crate::tx_builder::errors::TransactionBuilderError;

/// Ordered instructions for one transaction
#[derive(Debug, Clone)]
pub struct InstructionPlan {
    pub instructions: Vec<Instruction>,
    pub compute_unit_limit: u32,
    pub compute_unit_price: u64,
}

/// The two compute-budget instructions: unit limit, then unit price
pub fn plan_compute_budget(estimate: Option<u32>, budget: &ComputeBudget) -> [Instruction; 2] {
    [
        ComputeBudgetInstruction::set_compute_unit_limit(budget.unit_limit_for(estimate)),
        ComputeBudgetInstruction::set_compute_unit_price(budget.unit_price_micro_lamports),
    ]
}

/// Plan the full instruction list for wrapped instructions
///
/// # Errors
///
/// `Configuration` when `wrapped` is empty or itself contains compute-budget
/// instructions.
pub fn plan_transaction_instructions(
    wrapped: &[CanonicalInstruction],
    estimate: Option<u32>,
    budget: &ComputeBudget,
) -> Result<InstructionPlan, TransactionBuilderError> {
    if wrapped.is_empty() {
        return Err(TransactionBuilderError::Configuration(
            "No instructions to assemble".to_string(),
        ));
    }
    if let Some(position) = wrapped
        .iter()
        .position(|ix| *ix.program_id() == solana_sdk::compute_budget::id())
    {
        return Err(TransactionBuilderError::Configuration(format!(
            "Wrapped instruction {} targets the compute budget program",
            position
        )));
    }

    let mut instructions = Vec::with_capacity(wrapped.len() + 2);
    instructions.extend(plan_compute_budget(estimate, budget));
    instructions.extend(wrapped.iter().map(CanonicalInstruction::to_instruction));

    Ok(InstructionPlan {
        instructions,
        compute_unit_limit: budget.unit_limit_for(estimate),
        compute_unit_price: budget.unit_price_micro_lamports,
    })
}

/// Validate instruction ordering (debug/test only)
///
/// Checks that exactly the first two instructions target the compute budget
/// program and that at least one instruction follows them.
#[cfg(debug_assertions)]
pub fn sanity_check_ix_order(instructions: &[Instruction]) -> Result<(), TransactionBuilderError> {
    let is_budget = |ix: &Instruction| ix.program_id == solana_sdk::compute_budget::id();

    if instructions.len() < 3 {
        return Err(TransactionBuilderError::invalid_order(format!(
            "Expected compute budget pair plus instructions, got {} instructions",
            instructions.len()
        )));
    }
    if !is_budget(&instructions[0]) || !is_budget(&instructions[1]) {
        return Err(TransactionBuilderError::invalid_order(
            "Transaction must start with two compute budget instructions",
        ));
    }
    if let Some(idx) = instructions.iter().skip(2).position(is_budget) {
        return Err(TransactionBuilderError::invalid_order(format!(
            "Compute budget instruction found at position {}",
            idx + 2
        )));
    }
    Ok(())
}

/// No-op version of sanity_check_ix_order for release builds
#[cfg(not(debug_assertions))]
#[inline]
pub fn sanity_check_ix_order(_instructions: &[Instruction]) -> Result<(), TransactionBuilderError> {
    Ok(())
}
