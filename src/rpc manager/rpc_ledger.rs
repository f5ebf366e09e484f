//! JSON-RPC backed ledger client

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use solana_client::{nonblocking::rpc_client::RpcClient, rpc_config::RpcSendTransactionConfig};
use solana_sdk::{
    address_lookup_table::{state::AddressLookupTable, AddressLookupTableAccount},
    commitment_config::CommitmentConfig,
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
use solana_transaction_status::TransactionStatus;
use spl_token::solana_program::program_pack::Pack;
use tracing::{debug, instrument};

use super::{LedgerClient, LedgerSignatureStatus, RpcManagerError, SendOptions};

/// Ledger client over a single RPC endpoint
pub struct RpcLedgerClient {
    client: Arc<RpcClient>,
    endpoint: String,
    commitment: CommitmentConfig,
}

impl std::fmt::Debug for RpcLedgerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcLedgerClient")
            .field("endpoint", &self.endpoint)
            .field("commitment", &self.commitment)
            .finish_non_exhaustive()
    }
}

impl RpcLedgerClient {
    pub fn new(url: impl Into<String>, timeout: Duration, commitment: CommitmentConfig) -> Self {
        let endpoint = url.into();
        Self {
            client: Arc::new(RpcClient::new_with_timeout_and_commitment(
                endpoint.clone(),
                timeout,
                commitment,
            )),
            endpoint,
            commitment,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn map_err(&self, err: solana_client::client_error::ClientError) -> RpcManagerError {
        RpcManagerError::from_client_error(err, &self.endpoint)
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn get_balance(&self, address: &Pubkey) -> Result<u64, RpcManagerError> {
        self.client
            .get_balance_with_commitment(address, self.commitment)
            .await
            .map(|response| response.value)
            .map_err(|e| self.map_err(e))
    }

    async fn get_latest_blockhash(&self) -> Result<(Hash, u64), RpcManagerError> {
        self.client
            .get_latest_blockhash_with_commitment(self.commitment)
            .await
            .map_err(|e| self.map_err(e))
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn get_lookup_table(
        &self,
        address: &Pubkey,
    ) -> Result<Option<AddressLookupTableAccount>, RpcManagerError> {
        let account = self
            .client
            .get_account_with_commitment(address, self.commitment)
            .await
            .map_err(|e| self.map_err(e))?
            .value;

        let Some(account) = account else {
            debug!(table = %address, "lookup table not found");
            return Ok(None);
        };

        let table = AddressLookupTable::deserialize(&account.data).map_err(|e| {
            RpcManagerError::InvalidAccountData {
                account: address.to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(Some(AddressLookupTableAccount {
            key: *address,
            addresses: table.addresses.to_vec(),
        }))
    }

    async fn send_transaction(
        &self,
        transaction: &VersionedTransaction,
        opts: SendOptions,
    ) -> Result<Signature, RpcManagerError> {
        let config = RpcSendTransactionConfig {
            skip_preflight: opts.skip_preflight,
            preflight_commitment: Some(opts.preflight_commitment),
            max_retries: opts.max_retries,
            ..Default::default()
        };
        self.client
            .send_transaction_with_config(transaction, config)
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn get_block_height(&self) -> Result<u64, RpcManagerError> {
        self.client
            .get_block_height_with_commitment(self.commitment)
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn get_signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<LedgerSignatureStatus>, RpcManagerError> {
        let response = self
            .client
            .get_signature_statuses(&[*signature])
            .await
            .map_err(|e| self.map_err(e))?;

        Ok(response
            .value
            .into_iter()
            .next()
            .flatten()
            .map(signature_status_from))
    }

    async fn get_token_balance(&self, token_account: &Pubkey) -> Result<Option<u64>, RpcManagerError> {
        let account = self
            .client
            .get_account_with_commitment(token_account, self.commitment)
            .await
            .map_err(|e| self.map_err(e))?
            .value;

        match account {
            None => Ok(None),
            Some(account) => spl_token::state::Account::unpack(&account.data)
                .map(|state| Some(state.amount))
                .map_err(|e| RpcManagerError::InvalidAccountData {
                    account: token_account.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    async fn account_exists(&self, address: &Pubkey) -> Result<bool, RpcManagerError> {
        self.client
            .get_account_with_commitment(address, self.commitment)
            .await
            .map(|response| response.value.is_some())
            .map_err(|e| self.map_err(e))
    }
}

fn signature_status_from(status: TransactionStatus) -> LedgerSignatureStatus {
    LedgerSignatureStatus {
        slot: status.slot,
        confirmed: status.satisfies_commitment(CommitmentConfig::confirmed()),
        err: status.err,
    }
}
