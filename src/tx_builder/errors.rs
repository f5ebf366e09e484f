//! Error types for transaction assembly
//!
//! Errors carry enough context to be logged as is and expose a category for
//! metrics labels. Size and lookup-table failures are raised before anything
//! is sent.

use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use crate::rpc_manager::RpcManagerError;

/// Error type for transaction assembly
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionBuilderError {
    /// Failed to build an instruction for a specific program
    #[error("Instruction build error (program={program}): {reason}")]
    InstructionBuild {
        /// The program ID that failed to build an instruction
        program: String,
        /// Detailed reason for the failure
        reason: String,
    },

    /// A referenced address lookup table does not exist
    #[error("Address lookup table {address} could not be resolved")]
    UnresolvedLookupTable { address: Pubkey },

    /// Serialized transaction exceeds the packet limit
    #[error("Transaction is {size} bytes, limit is {limit}")]
    TransactionTooLarge { size: usize, limit: usize },

    /// v0 message compilation failed
    #[error("Message compilation failed: {0}")]
    Compile(String),

    /// Failed to sign the transaction
    ///
    /// Typically a signer required by the message is not available.
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Failed to fetch or use a recent blockhash
    #[error("Blockhash error: {0}")]
    Blockhash(String),

    /// Instruction list does not have the expected shape
    #[error("Invalid instruction order: {0}")]
    InvalidInstructionOrder(String),

    /// Invalid compute budget or other settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// RPC client error
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransactionBuilderError {
    /// Check if this error is potentially retryable
    ///
    /// A retry here means re-running the pipeline; nothing inside the
    /// assembler retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Blockhash(_) => true,
            Self::Rpc(_) => true,

            Self::InstructionBuild { .. } => false,
            Self::UnresolvedLookupTable { .. } => false,
            Self::TransactionTooLarge { .. } => false,
            Self::Compile(_) => false,
            Self::Signing(_) => false,
            Self::InvalidInstructionOrder(_) => false,
            Self::Configuration(_) => false,
            Self::Internal(_) => false,
        }
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::InstructionBuild { .. } => "instruction",
            Self::UnresolvedLookupTable { .. } => "lookup_table",
            Self::TransactionTooLarge { .. } => "size",
            Self::Compile(_) => "compile",
            Self::Signing(_) => "signing",
            Self::Blockhash(_) => "blockhash",
            Self::InvalidInstructionOrder(_) => "validation",
            Self::Configuration(_) => "config",
            Self::Rpc(_) => "rpc",
            Self::Internal(_) => "internal",
        }
    }
}

// Convenience constructors for common error scenarios
impl TransactionBuilderError {
    /// Create an instruction build error for a specific program
    pub fn instruction_failed(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InstructionBuild {
            program: program.into(),
            reason: reason.into(),
        }
    }

    /// Create a blockhash error
    pub fn blockhash_unavailable(reason: impl Into<String>) -> Self {
        Self::Blockhash(reason.into())
    }

    /// Create an invalid instruction order error
    pub fn invalid_order(reason: impl Into<String>) -> Self {
        Self::InvalidInstructionOrder(reason.into())
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }
}

impl From<RpcManagerError> for TransactionBuilderError {
    fn from(err: RpcManagerError) -> Self {
        match err {
            RpcManagerError::BlockhashNotFound { .. } => Self::Blockhash(err.to_string()),
            other => Self::Rpc(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransactionBuilderError::TransactionTooLarge { size: 1300, limit: 1232 };
        assert_eq!(err.to_string(), "Transaction is 1300 bytes, limit is 1232");

        let err = TransactionBuilderError::InstructionBuild {
            program: "swap_program".to_string(),
            reason: "invalid accounts".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Instruction build error (program=swap_program): invalid accounts"
        );
    }

    #[test]
    fn test_error_retryability() {
        assert!(TransactionBuilderError::Blockhash("test".to_string()).is_retryable());
        assert!(TransactionBuilderError::Rpc("test".to_string()).is_retryable());

        assert!(!TransactionBuilderError::Signing("test".to_string()).is_retryable());
        assert!(!TransactionBuilderError::TransactionTooLarge { size: 2000, limit: 1232 }.is_retryable());
        assert!(!TransactionBuilderError::UnresolvedLookupTable { address: Pubkey::new_unique() }
            .is_retryable());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            TransactionBuilderError::UnresolvedLookupTable { address: Pubkey::new_unique() }.category(),
            "lookup_table"
        );
        assert_eq!(
            TransactionBuilderError::TransactionTooLarge { size: 1, limit: 0 }.category(),
            "size"
        );
        assert_eq!(TransactionBuilderError::internal("x").category(), "internal");
    }

    #[test]
    fn test_from_rpc_error() {
        let err: TransactionBuilderError = RpcManagerError::BlockhashNotFound {
            endpoint: "test".to_string(),
        }
        .into();
        assert!(matches!(err, TransactionBuilderError::Blockhash(_)));

        let err: TransactionBuilderError = RpcManagerError::Internal("boom".to_string()).into();
        assert!(matches!(err, TransactionBuilderError::Rpc(_)));
    }
}
