//! RPC Manager Module
//!
//! Ledger access behind the [`LedgerClient`] trait. The pipeline only reads
//! balances, blockhashes, lookup tables and signature statuses, and sends
//! already signed transactions; confirmation polling lives in the supervisor.

use async_trait::async_trait;
use solana_sdk::{
    address_lookup_table::AddressLookupTableAccount,
    commitment_config::CommitmentLevel,
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::{TransactionError, VersionedTransaction},
};

pub mod rpc_errors;
pub mod rpc_ledger;

pub use rpc_errors::RpcManagerError;
pub use rpc_ledger::RpcLedgerClient;

/// Options for a single send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    pub skip_preflight: bool,
    pub preflight_commitment: CommitmentLevel,
    /// Node-side rebroadcast attempts; `Some(0)` disables them
    pub max_retries: Option<usize>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            skip_preflight: true,
            preflight_commitment: CommitmentLevel::Confirmed,
            max_retries: None,
        }
    }
}

/// Status of a sent signature as seen by the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSignatureStatus {
    pub slot: u64,
    /// Execution error, if the transaction landed and failed
    pub err: Option<TransactionError>,
    /// Reached confirmed commitment or higher
    pub confirmed: bool,
}

/// Ledger operations the pipeline needs
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn get_balance(&self, address: &Pubkey) -> Result<u64, RpcManagerError>;

    /// Latest blockhash and the last block height it stays valid for
    async fn get_latest_blockhash(&self) -> Result<(Hash, u64), RpcManagerError>;

    /// `None` when the table account does not exist
    async fn get_lookup_table(
        &self,
        address: &Pubkey,
    ) -> Result<Option<AddressLookupTableAccount>, RpcManagerError>;

    async fn send_transaction(
        &self,
        transaction: &VersionedTransaction,
        opts: SendOptions,
    ) -> Result<Signature, RpcManagerError>;

    async fn get_block_height(&self) -> Result<u64, RpcManagerError>;

    /// `None` while the signature is unknown to the node
    async fn get_signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<LedgerSignatureStatus>, RpcManagerError>;

    /// Raw token amount held by a token account; `None` if it does not exist
    async fn get_token_balance(&self, token_account: &Pubkey) -> Result<Option<u64>, RpcManagerError>;

    async fn account_exists(&self, address: &Pubkey) -> Result<bool, RpcManagerError>;
}
