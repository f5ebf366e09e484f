//! Transaction assembler
//!
//! Turns wrapped instructions into a signed v0 transaction: compute budget
//! pair first, lookup tables resolved concurrently, payer signature, then a
//! wire-size check. Nothing here sends.

use std::sync::Arc;

use futures::future::try_join_all;
use solana_sdk::{
    address_lookup_table::AddressLookupTableAccount,
    message::{v0, VersionedMessage},
    pubkey::Pubkey,
    signature::Keypair,
    signer::Signer,
    transaction::VersionedTransaction,
};
use tracing::{debug, instrument, warn, Instrument};

use crate::canonical::CanonicalInstruction;
use crate::metrics::{metrics, Timer};
use crate::rpc_manager::LedgerClient;
use crate::tx_builder::context::{BlockhashContext, ComputeBudget};
use crate::tx_builder::errors::TransactionBuilderError;
use crate::tx_builder::instructions::{plan_transaction_instructions, sanity_check_ix_order};
use crate::tx_builder::output::AssembledTransaction;

/// Largest transaction the network accepts, in bytes
pub const MAX_TRANSACTION_SIZE: usize = 1232;

/// Builds signed transactions against a ledger
pub struct TransactionAssembler {
    ledger: Arc<dyn LedgerClient>,
    budget: ComputeBudget,
}

impl TransactionAssembler {
    pub fn new(ledger: Arc<dyn LedgerClient>, budget: ComputeBudget) -> Self {
        Self { ledger, budget }
    }

    pub fn budget(&self) -> &ComputeBudget {
        &self.budget
    }

    /// Fetch every referenced lookup table concurrently
    ///
    /// Duplicate references are fetched once; output follows first-reference
    /// order. Any missing table fails the whole call.
    pub async fn resolve_lookup_tables(
        &self,
        refs: &[Pubkey],
    ) -> Result<Vec<AddressLookupTableAccount>, TransactionBuilderError> {
        let mut unique: Vec<Pubkey> = Vec::with_capacity(refs.len());
        for address in refs {
            if !unique.contains(address) {
                unique.push(*address);
            }
        }

        let ledger = &self.ledger;
        let fetched = try_join_all(unique.iter().map(|address| async move {
            ledger
                .get_lookup_table(address)
                .await
                .map(|table| (*address, table))
        }))
        .await?;

        fetched
            .into_iter()
            .map(|(address, table)| {
                table.ok_or_else(|| {
                    warn!(target: "tx_builder", table = %address, "lookup table missing");
                    TransactionBuilderError::UnresolvedLookupTable { address }
                })
            })
            .collect()
    }

    /// Assemble and sign a transaction for `wrapped`
    #[instrument(skip_all, fields(payer = %payer.pubkey(), wrapped = wrapped.len()))]
    pub async fn assemble(
        &self,
        payer: &Keypair,
        wrapped: &[CanonicalInstruction],
        lookup_table_refs: &[Pubkey],
        compute_units_estimate: Option<u32>,
        blockhash: &BlockhashContext,
    ) -> Result<AssembledTransaction, TransactionBuilderError> {
        async {
            let timer = Timer::start();
            let tables = self.resolve_lookup_tables(lookup_table_refs).await?;
            let result = assemble_with_tables(
                payer,
                wrapped,
                tables,
                compute_units_estimate,
                blockhash,
                &self.budget,
            );
            timer.observe_duration(&metrics().assembly_latency);
            result
        }
        .instrument(blockhash.stage_span())
        .await
    }
}

/// Assemble with lookup tables already resolved
pub fn assemble_with_tables(
    payer: &Keypair,
    wrapped: &[CanonicalInstruction],
    lookup_tables: Vec<AddressLookupTableAccount>,
    compute_units_estimate: Option<u32>,
    blockhash: &BlockhashContext,
    budget: &ComputeBudget,
) -> Result<AssembledTransaction, TransactionBuilderError> {
    let plan = plan_transaction_instructions(wrapped, compute_units_estimate, budget)?;
    sanity_check_ix_order(&plan.instructions)?;

    let fee_payer = payer.pubkey();
    let message = v0::Message::try_compile(
        &fee_payer,
        &plan.instructions,
        &lookup_tables,
        blockhash.blockhash,
    )
    .map_err(|e| TransactionBuilderError::Compile(e.to_string()))?;

    let transaction = VersionedTransaction::try_new(VersionedMessage::V0(message), &[payer])
        .map_err(|e| TransactionBuilderError::Signing(e.to_string()))?;

    let size = crate::compat::get_serialized_size(&transaction)
        .map_err(|e| TransactionBuilderError::internal(format!("serialize: {}", e)))?;
    if size > MAX_TRANSACTION_SIZE {
        warn!(target: "tx_builder", size, limit = MAX_TRANSACTION_SIZE, "transaction too large");
        return Err(TransactionBuilderError::TransactionTooLarge {
            size,
            limit: MAX_TRANSACTION_SIZE,
        });
    }

    debug!(
        target: "tx_builder",
        size,
        cu_limit = plan.compute_unit_limit,
        cu_price = plan.compute_unit_price,
        tables = lookup_tables.len(),
        "transaction assembled"
    );

    Ok(AssembledTransaction::new(
        fee_payer,
        blockhash.blockhash,
        blockhash.last_valid_block_height,
        plan.instructions,
        lookup_tables,
        transaction,
        size,
    ))
}
