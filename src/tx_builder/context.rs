//! Assembly context: blockhash validity window and compute budget settings

use serde::{Deserialize, Serialize};
use solana_sdk::hash::Hash;

use crate::observability::TraceContext;
use crate::rpc_manager::LedgerClient;
use crate::tx_builder::errors::TransactionBuilderError;

/// Conservative unit limit when a route carries no estimate
pub const DEFAULT_COMPUTE_UNIT_LIMIT: u32 = 300_000;

/// Runtime ceiling on compute units per transaction
pub const MAX_COMPUTE_UNIT_LIMIT: u32 = 1_400_000;

/// Default priority fee in micro-lamports per compute unit
pub const DEFAULT_COMPUTE_UNIT_PRICE: u64 = 100;

/// Recent blockhash plus the last block height it is valid for
///
/// The supervisor uses `last_valid_block_height` to decide expiry, so the pair
/// must come from the same RPC response.
#[derive(Debug, Clone)]
pub struct BlockhashContext {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
    pub trace_context: Option<TraceContext>,
}

impl BlockhashContext {
    pub fn new(blockhash: Hash, last_valid_block_height: u64) -> Self {
        Self {
            blockhash,
            last_valid_block_height,
            trace_context: None,
        }
    }

    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace_context = Some(trace);
        self
    }

    /// Span for the pipeline stage this context was fetched for
    pub fn stage_span(&self) -> tracing::Span {
        self.trace_context
            .as_ref()
            .map(TraceContext::span)
            .unwrap_or_else(tracing::Span::none)
    }

    /// Fetch the latest blockhash from the ledger
    pub async fn fetch(ledger: &dyn LedgerClient) -> Result<Self, TransactionBuilderError> {
        let (blockhash, last_valid_block_height) = ledger
            .get_latest_blockhash()
            .await
            .map_err(|e| TransactionBuilderError::blockhash_unavailable(e.to_string()))?;
        Ok(Self::new(blockhash, last_valid_block_height))
    }
}

/// Compute budget settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeBudget {
    /// Priority fee, micro-lamports per unit
    pub unit_price_micro_lamports: u64,
    /// Limit used when a route has no estimate
    pub default_unit_limit: u32,
    /// Upper bound applied to every limit
    pub max_unit_limit: u32,
}

impl Default for ComputeBudget {
    fn default() -> Self {
        Self {
            unit_price_micro_lamports: DEFAULT_COMPUTE_UNIT_PRICE,
            default_unit_limit: DEFAULT_COMPUTE_UNIT_LIMIT,
            max_unit_limit: MAX_COMPUTE_UNIT_LIMIT,
        }
    }
}

impl ComputeBudget {
    /// Unit limit for a route estimate
    pub fn unit_limit_for(&self, estimate: Option<u32>) -> u32 {
        let limit = match estimate {
            Some(units) if units > 0 => units,
            _ => self.default_unit_limit,
        };
        limit.min(self.max_unit_limit)
    }

    pub fn validate(&self) -> Result<(), TransactionBuilderError> {
        if self.max_unit_limit == 0 || self.max_unit_limit > MAX_COMPUTE_UNIT_LIMIT {
            return Err(TransactionBuilderError::Configuration(format!(
                "max_unit_limit must be in 1..={}",
                MAX_COMPUTE_UNIT_LIMIT
            )));
        }
        if self.default_unit_limit == 0 {
            return Err(TransactionBuilderError::Configuration(
                "default_unit_limit must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockLedger;

    #[test]
    fn test_unit_limit_selection() {
        let budget = ComputeBudget::default();
        assert_eq!(budget.unit_limit_for(None), 300_000);
        assert_eq!(budget.unit_limit_for(Some(0)), 300_000);
        assert_eq!(budget.unit_limit_for(Some(180_000)), 180_000);
        assert_eq!(budget.unit_limit_for(Some(2_000_000)), 1_400_000);
    }

    #[test]
    fn test_validate() {
        assert!(ComputeBudget::default().validate().is_ok());
        let bad = ComputeBudget {
            max_unit_limit: 2_000_000,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[tokio::test]
    async fn test_fetch_blockhash_context() {
        let ledger = MockLedger::new();
        ledger.set_blockhash(Hash::new_unique(), 500);
        let ctx = BlockhashContext::fetch(&ledger).await.unwrap();
        assert_eq!(ctx.last_valid_block_height, 500);
        assert!(ctx.trace_context.is_none());
        assert!(ctx.stage_span().is_none());
    }

    #[test]
    fn test_stage_span_carries_trace_ids() {
        let trace = TraceContext::new("assemble");
        let ctx = BlockhashContext::new(Hash::new_unique(), 10).with_trace(trace.clone());

        tracing::subscriber::with_default(tracing_subscriber::registry(), || {
            let span = ctx.stage_span();
            assert!(!span.is_none());
            let meta = span.metadata().unwrap();
            assert_eq!(meta.name(), "pipeline");
            assert!(meta.fields().field("correlation_id").is_some());
        });
        assert_eq!(ctx.trace_context.unwrap().correlation_id(), trace.correlation_id());
    }
}
