//! Submission and confirmation supervisor
//!
//! Sends a signed transaction exactly once, then polls until one of three
//! terminal states:
//!
//! - `Expired`: block height passed the blockhash's last valid height
//! - `OnChainError`: the transaction executed and failed
//! - `Confirmed`: the transaction reached confirmed commitment
//!
//! Block height is checked before the signature status on every poll, so a
//! confirmation first observed after expiry still reports `Expired`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use solana_sdk::{
    instruction::InstructionError,
    signature::Signature,
    transaction::TransactionError,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::metrics::metrics;
use crate::rpc_manager::{LedgerClient, RpcManagerError, SendOptions};
use crate::tx_builder::AssembledTransaction;

/// Supervisor settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitConfig {
    /// Delay between confirmation polls
    pub poll_interval_ms: u64,
    /// Consecutive transient RPC failures tolerated while polling
    pub max_poll_errors: u32,
    /// Node-side rebroadcast attempts (`None` leaves the node default)
    pub max_retries: Option<usize>,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            max_poll_errors: 5,
            max_retries: None,
        }
    }
}

impl SubmitConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn send_options(&self) -> SendOptions {
        SendOptions {
            max_retries: self.max_retries,
            ..SendOptions::default()
        }
    }
}

/// Structured on-chain failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainError {
    /// Index of the failing instruction, when the error names one
    pub instruction_index: Option<u8>,
    /// Raw custom program error code
    pub custom_code: Option<u32>,
    pub error: TransactionError,
}

impl From<TransactionError> for OnChainError {
    fn from(error: TransactionError) -> Self {
        let (instruction_index, custom_code) = match &error {
            TransactionError::InstructionError(index, InstructionError::Custom(code)) => {
                (Some(*index), Some(*code))
            }
            TransactionError::InstructionError(index, _) => (Some(*index), None),
            _ => (None, None),
        };
        Self {
            instruction_index,
            custom_code,
            error,
        }
    }
}

impl std::fmt::Display for OnChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.custom_code {
            Some(code) => write!(f, "{} (custom program error {:#x})", self.error, code),
            None => write!(f, "{}", self.error),
        }
    }
}

/// Terminal state of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Confirmed,
    Expired,
    OnChainError,
}

impl SubmissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionState::Confirmed => "confirmed",
            SubmissionState::Expired => "expired",
            SubmissionState::OnChainError => "on_chain_error",
        }
    }
}

/// Result of one submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOutcome {
    pub signature: Signature,
    pub state: SubmissionState,
    pub on_chain_error: Option<OnChainError>,
    pub last_valid_block_height: u64,
    /// Slot the transaction landed in, when observed
    pub slot: Option<u64>,
    pub elapsed: Duration,
}

impl SubmissionOutcome {
    pub fn confirmed(&self) -> bool {
        self.state == SubmissionState::Confirmed
    }

    /// Map non-confirmed outcomes to typed errors
    pub fn into_result(self) -> Result<Signature, SubmissionError> {
        match self.state {
            SubmissionState::Confirmed => Ok(self.signature),
            SubmissionState::Expired => Err(SubmissionError::Expired {
                signature: self.signature,
                last_valid_block_height: self.last_valid_block_height,
            }),
            SubmissionState::OnChainError => match self.on_chain_error {
                Some(error) => Err(SubmissionError::OnChain {
                    signature: self.signature,
                    error,
                }),
                None => Err(SubmissionError::Internal(
                    "on-chain failure without error detail".to_string(),
                )),
            },
        }
    }
}

/// Submission errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubmissionError {
    /// The send itself failed; nothing reached the network
    #[error("Send failed: {0}")]
    Send(RpcManagerError),

    /// Polling failed too many times in a row
    #[error("Confirmation polling failed for {signature}: {source}")]
    Poll {
        signature: Signature,
        source: RpcManagerError,
    },

    /// Blockhash expired before confirmation
    #[error("Transaction {signature} expired (last valid block height {last_valid_block_height})")]
    Expired {
        signature: Signature,
        last_valid_block_height: u64,
    },

    /// Executed with an error
    #[error("Transaction {signature} failed on chain: {error}")]
    OnChain {
        signature: Signature,
        error: OnChainError,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SubmissionError {
    /// Whether re-running the pipeline may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            SubmissionError::Send(e) => e.is_retryable(),
            SubmissionError::Poll { .. } => false,
            SubmissionError::Expired { .. } => true,
            SubmissionError::OnChain { .. } => false,
            SubmissionError::Internal(_) => false,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            SubmissionError::Send(_) => "send",
            SubmissionError::Poll { .. } => "poll",
            SubmissionError::Expired { .. } => "expired",
            SubmissionError::OnChain { .. } => "on_chain",
            SubmissionError::Internal(_) => "internal",
        }
    }
}

/// Sends and confirms assembled transactions
pub struct SubmissionSupervisor {
    ledger: Arc<dyn LedgerClient>,
    config: SubmitConfig,
}

impl SubmissionSupervisor {
    pub fn new(ledger: Arc<dyn LedgerClient>, config: SubmitConfig) -> Self {
        Self { ledger, config }
    }

    pub fn config(&self) -> &SubmitConfig {
        &self.config
    }

    /// Send once and poll to a terminal state
    pub async fn submit(
        &self,
        transaction: &AssembledTransaction,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        let started = Instant::now();
        let last_valid_block_height = transaction.last_valid_block_height();

        let signature = self
            .ledger
            .send_transaction(transaction.transaction(), self.config.send_options())
            .await
            .map_err(|e| {
                error!(target: "supervisor", error = %e, "❌ Send failed");
                SubmissionError::Send(e)
            })?;

        info!(target: "supervisor", %signature, last_valid_block_height, "📤 Transaction sent");

        let (state, on_chain_error, slot) = self
            .poll_until_terminal(&signature, last_valid_block_height)
            .await?;

        let elapsed = started.elapsed();
        metrics().confirmation_latency.observe(elapsed.as_secs_f64());
        match state {
            SubmissionState::Confirmed => {
                metrics().submissions_confirmed.inc();
                info!(target: "supervisor", %signature, ?slot, elapsed_ms = elapsed.as_millis() as u64, "✅ Confirmed");
            }
            SubmissionState::Expired => {
                metrics().submissions_expired.inc();
                warn!(target: "supervisor", %signature, last_valid_block_height, "⌛ Blockhash expired before confirmation");
            }
            SubmissionState::OnChainError => {
                metrics().submissions_failed.inc();
                if let Some(err) = &on_chain_error {
                    error!(target: "supervisor", %signature, error = %err, "❌ Transaction failed on chain");
                }
            }
        }

        Ok(SubmissionOutcome {
            signature,
            state,
            on_chain_error,
            last_valid_block_height,
            slot,
            elapsed,
        })
    }

    async fn poll_until_terminal(
        &self,
        signature: &Signature,
        last_valid_block_height: u64,
    ) -> Result<(SubmissionState, Option<OnChainError>, Option<u64>), SubmissionError> {
        let mut consecutive_errors = 0u32;
        let mut polls = 0u64;

        loop {
            polls += 1;
            match self.poll_once(signature, last_valid_block_height).await {
                Ok(Some(terminal)) => {
                    debug!(target: "supervisor", %signature, polls, "terminal state reached");
                    return Ok(terminal);
                }
                Ok(None) => consecutive_errors = 0,
                Err(e) if e.is_retryable() && consecutive_errors < self.config.max_poll_errors => {
                    consecutive_errors += 1;
                    warn!(target: "supervisor", %signature, error = %e, consecutive_errors, "poll failed");
                }
                Err(e) => {
                    return Err(SubmissionError::Poll {
                        signature: *signature,
                        source: e,
                    })
                }
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    async fn poll_once(
        &self,
        signature: &Signature,
        last_valid_block_height: u64,
    ) -> Result<Option<(SubmissionState, Option<OnChainError>, Option<u64>)>, RpcManagerError> {
        let height = self.ledger.get_block_height().await?;
        if height > last_valid_block_height {
            return Ok(Some((SubmissionState::Expired, None, None)));
        }

        let Some(status) = self.ledger.get_signature_status(signature).await? else {
            return Ok(None);
        };

        if let Some(err) = status.err {
            return Ok(Some((
                SubmissionState::OnChainError,
                Some(OnChainError::from(err)),
                Some(status.slot),
            )));
        }
        if status.confirmed {
            return Ok(Some((SubmissionState::Confirmed, None, Some(status.slot))));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{AccountRef, CanonicalInstruction};
    use crate::rpc_manager::LedgerSignatureStatus;
    use crate::test_utils::MockLedger;
    use crate::tx_builder::{assemble_with_tables, BlockhashContext, ComputeBudget};
    use solana_sdk::{hash::Hash, pubkey::Pubkey, signature::Keypair};

    fn assembled(last_valid: u64) -> AssembledTransaction {
        let ix = CanonicalInstruction::new(
            Pubkey::new_unique(),
            vec![AccountRef::writable(Pubkey::new_unique())],
            vec![1],
        );
        assemble_with_tables(
            &Keypair::new(),
            &[ix],
            Vec::new(),
            None,
            &BlockhashContext::new(Hash::new_unique(), last_valid),
            &ComputeBudget::default(),
        )
        .unwrap()
    }

    fn supervisor(ledger: Arc<MockLedger>) -> SubmissionSupervisor {
        SubmissionSupervisor::new(
            ledger,
            SubmitConfig {
                poll_interval_ms: 10,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_confirmed_after_pending_polls() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_block_height(100);
        ledger.script_statuses(vec![
            None,
            Some(LedgerSignatureStatus { slot: 5, err: None, confirmed: false }),
            Some(LedgerSignatureStatus { slot: 5, err: None, confirmed: true }),
        ]);

        let tx = assembled(150);
        let outcome = supervisor(ledger.clone()).submit(&tx).await.unwrap();

        assert!(outcome.confirmed());
        assert_eq!(outcome.signature, tx.signature());
        assert_eq!(outcome.slot, Some(5));
        assert_eq!(ledger.sent().len(), 1);
        assert_eq!(outcome.into_result().unwrap(), tx.signature());
    }

    #[tokio::test]
    async fn test_expired_wins_over_late_confirmation() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_block_height(151);
        ledger.script_statuses(vec![Some(LedgerSignatureStatus {
            slot: 5,
            err: None,
            confirmed: true,
        })]);

        let outcome = supervisor(ledger.clone()).submit(&assembled(150)).await.unwrap();
        assert_eq!(outcome.state, SubmissionState::Expired);
        assert!(matches!(
            outcome.into_result(),
            Err(SubmissionError::Expired { last_valid_block_height: 150, .. })
        ));
    }

    #[tokio::test]
    async fn test_on_chain_error_carries_custom_code() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_block_height(1);
        ledger.script_statuses(vec![Some(LedgerSignatureStatus {
            slot: 9,
            err: Some(TransactionError::InstructionError(2, InstructionError::Custom(0x1771))),
            confirmed: true,
        })]);

        let outcome = supervisor(ledger).submit(&assembled(150)).await.unwrap();
        assert_eq!(outcome.state, SubmissionState::OnChainError);
        let err = outcome.on_chain_error.clone().unwrap();
        assert_eq!(err.instruction_index, Some(2));
        assert_eq!(err.custom_code, Some(0x1771));
        assert!(!outcome.into_result().unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_send_failure_is_not_polled() {
        let ledger = Arc::new(MockLedger::new());
        ledger.fail_sends(RpcManagerError::RateLimitExceeded {
            endpoint: "mock".to_string(),
        });

        let err = supervisor(ledger.clone()).submit(&assembled(150)).await.unwrap_err();
        assert!(matches!(err, SubmissionError::Send(_)));
        assert!(err.is_retryable());
        assert_eq!(ledger.status_polls(), 0);
    }

    #[test]
    fn test_on_chain_error_from_non_instruction_error() {
        let err = OnChainError::from(TransactionError::AccountNotFound);
        assert_eq!(err.instruction_index, None);
        assert_eq!(err.custom_code, None);
    }
}
