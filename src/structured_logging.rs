//! Structured logging for pipeline milestones

use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::time::Instant;

use crate::observability::{CorrelationId, TraceContext};
use crate::providers::QuoteRoute;
use crate::supervisor::SubmissionOutcome;
use crate::tx_builder::AssembledTransaction;

/// Logs the milestones of one pipeline invocation under a single correlation id
#[derive(Debug, Clone)]
pub struct PipelineLogger {
    trace: TraceContext,
    started: Instant,
}

impl PipelineLogger {
    pub fn new(operation: &str) -> Self {
        Self {
            trace: TraceContext::new(operation),
            started: Instant::now(),
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        self.trace.correlation_id()
    }

    pub fn trace(&self) -> &TraceContext {
        &self.trace
    }

    /// Child context for one stage
    pub fn stage(&self, operation: &str) -> TraceContext {
        self.trace.child_span(operation)
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn log_race_started(&self, providers: &[&str], amount: u64) {
        tracing::info!(
            correlation_id = %self.correlation_id(),
            providers = ?providers,
            amount,
            "🏁 Racing providers"
        );
    }

    pub fn log_route_selected(&self, route: &QuoteRoute) {
        tracing::info!(
            correlation_id = %self.correlation_id(),
            provider = %route.provider(),
            in_amount = route.in_amount(),
            out_amount = route.out_amount(),
            slippage_bps = route.slippage_bps(),
            instructions = route.instructions().len(),
            lookup_tables = route.lookup_tables().len(),
            elapsed_ms = self.elapsed_ms(),
            "🏆 Route selected"
        );
    }

    pub fn log_wrapped(&self, wallet: &Pubkey, role_id: u32, wrapped: usize) {
        tracing::debug!(
            correlation_id = %self.correlation_id(),
            wallet = %wallet,
            role_id,
            wrapped,
            "Instructions wrapped"
        );
    }

    pub fn log_assembled(&self, tx: &AssembledTransaction) {
        tracing::debug!(
            correlation_id = %self.correlation_id(),
            signature = %tx.signature(),
            size = tx.serialized_size(),
            last_valid_block_height = tx.last_valid_block_height(),
            "Transaction assembled"
        );
    }

    pub fn log_submitted(&self, signature: &Signature) {
        tracing::info!(
            correlation_id = %self.correlation_id(),
            signature = %signature,
            "📤 Transaction sent"
        );
    }

    pub fn log_outcome(&self, outcome: &SubmissionOutcome) {
        if outcome.confirmed() {
            tracing::info!(
                correlation_id = %self.correlation_id(),
                signature = %outcome.signature,
                slot = ?outcome.slot,
                latency_ms = self.elapsed_ms(),
                "✅ Transaction confirmed"
            );
        } else {
            tracing::warn!(
                correlation_id = %self.correlation_id(),
                signature = %outcome.signature,
                state = outcome.state.as_str(),
                error = ?outcome.on_chain_error.as_ref().map(|e| e.to_string()),
                latency_ms = self.elapsed_ms(),
                "Transaction not confirmed"
            );
        }
    }

    pub fn log_failure(&self, stage: &str, category: &str, error: &dyn std::fmt::Display) {
        tracing::warn!(
            correlation_id = %self.correlation_id(),
            stage,
            category,
            error = %error,
            latency_ms = self.elapsed_ms(),
            "❌ Pipeline failed"
        );
    }
}
