//! Assembled transaction
//!
//! Holds a signed v0 transaction together with the metadata the supervisor
//! needs. Fields are private; nothing can change the transaction after signing.

use solana_sdk::{
    address_lookup_table::AddressLookupTableAccount, hash::Hash, instruction::Instruction,
    pubkey::Pubkey, signature::Signature, transaction::VersionedTransaction,
};

/// Signed transaction ready for submission
#[derive(Debug, Clone)]
pub struct AssembledTransaction {
    fee_payer: Pubkey,
    recent_blockhash: Hash,
    last_valid_block_height: u64,
    instructions: Vec<Instruction>,
    lookup_tables: Vec<AddressLookupTableAccount>,
    transaction: VersionedTransaction,
    serialized_size: usize,
    required_signers: Vec<Pubkey>,
}

impl AssembledTransaction {
    pub(crate) fn new(
        fee_payer: Pubkey,
        recent_blockhash: Hash,
        last_valid_block_height: u64,
        instructions: Vec<Instruction>,
        lookup_tables: Vec<AddressLookupTableAccount>,
        transaction: VersionedTransaction,
        serialized_size: usize,
    ) -> Self {
        let required_signers = crate::compat::get_required_signers(&transaction.message).to_vec();

        Self {
            fee_payer,
            recent_blockhash,
            last_valid_block_height,
            instructions,
            lookup_tables,
            transaction,
            serialized_size,
            required_signers,
        }
    }

    pub fn fee_payer(&self) -> &Pubkey {
        &self.fee_payer
    }

    pub fn recent_blockhash(&self) -> &Hash {
        &self.recent_blockhash
    }

    /// Block height after which the transaction can no longer land
    pub fn last_valid_block_height(&self) -> u64 {
        self.last_valid_block_height
    }

    /// Compute-budget pair followed by the wrapped instructions
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn lookup_tables(&self) -> &[AddressLookupTableAccount] {
        &self.lookup_tables
    }

    pub fn transaction(&self) -> &VersionedTransaction {
        &self.transaction
    }

    pub fn serialized_size(&self) -> usize {
        self.serialized_size
    }

    pub fn required_signers(&self) -> &[Pubkey] {
        &self.required_signers
    }

    /// Fee payer signature, which is also the transaction id
    pub fn signature(&self) -> Signature {
        self.transaction.signatures.first().copied().unwrap_or_default()
    }

    /// Consume self and extract the transaction
    pub fn into_transaction(self) -> VersionedTransaction {
        self.transaction
    }
}
