//! Liquidity provider adapters
//!
//! Each adapter speaks one provider's native protocol and hands back routes
//! whose instructions are already in canonical form. The aggregator only sees
//! the [`QuoteProvider`] trait; adding a provider never touches it.

pub mod metis;
#[cfg(feature = "ws-stream")]
pub mod titan;

use async_trait::async_trait;
use solana_sdk::{compute_budget, pubkey::Pubkey};
use thiserror::Error;

use crate::canonical::{CanonicalInstruction, MalformedInstruction};
use crate::streaming::RouteStream;
use crate::types::{QuoteRequest, SwapMode};

/// ComputeBudget opcode for SetComputeUnitLimit
const CB_SET_UNIT_LIMIT: u8 = 2;
/// ComputeBudget opcode for SetComputeUnitPrice
const CB_SET_UNIT_PRICE: u8 = 3;

/// Provider adapter errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The request can never be routed, or the provider has no route for it
    #[error("No route: {0}")]
    NoRoute(String),

    /// The provider no longer honours the quote; re-quote and retry
    #[error("Quote expired: {0}")]
    QuoteExpired(String),

    /// Non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Connection-level failure (DNS, TLS, socket, timeout)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response could not be understood
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Provider sent an instruction that does not decode
    #[error("Malformed instruction from provider: {0}")]
    Malformed(#[from] MalformedInstruction),

    /// Streaming provider reported an error and ended the stream
    #[error("Stream error: {0}")]
    Stream(String),

    /// Route cannot be executed through delegated signing
    #[error("Incompatible route: {0}")]
    IncompatibleRoute(String),

    /// Adapter is missing configuration it needs
    #[error("Provider configuration error: {0}")]
    Configuration(String),
}

impl ProviderError {
    /// Whether re-running the quote may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::QuoteExpired(_)
            | ProviderError::Transport(_)
            | ProviderError::Stream(_) => true,
            ProviderError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            ProviderError::NoRoute(_) => "no_route",
            ProviderError::QuoteExpired(_) => "quote_expired",
            ProviderError::Http { .. } => "http",
            ProviderError::Transport(_) => "transport",
            ProviderError::Protocol(_) => "protocol",
            ProviderError::Malformed(_) => "malformed",
            ProviderError::Stream(_) => "stream",
            ProviderError::IncompatibleRoute(_) => "incompatible",
            ProviderError::Configuration(_) => "configuration",
        }
    }
}

/// A quote source raced by the aggregator
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Stable provider label used in logs and metrics
    fn name(&self) -> &str;

    /// Open a quote subscription for `request`
    ///
    /// Fails immediately with [`ProviderError::NoRoute`] when the request can
    /// never be routed.
    async fn get_routes(&self, request: &QuoteRequest) -> Result<RouteStream, ProviderError>;
}

/// One executable route offered by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRoute {
    provider: String,
    input_mint: Pubkey,
    output_mint: Pubkey,
    swap_mode: SwapMode,
    in_amount: u64,
    out_amount: u64,
    slippage_bps: u16,
    instructions: Vec<CanonicalInstruction>,
    lookup_tables: Vec<Pubkey>,
    compute_units_estimate: Option<u32>,
}

impl QuoteRoute {
    /// Start a route for `request`, inheriting its mints and mode
    pub fn builder(provider: impl Into<String>, request: &QuoteRequest) -> QuoteRouteBuilder {
        QuoteRouteBuilder {
            route: QuoteRoute {
                provider: provider.into(),
                input_mint: request.input_mint,
                output_mint: request.output_mint,
                swap_mode: request.mode,
                in_amount: request.amount,
                out_amount: 0,
                slippage_bps: request.max_slippage_bps,
                instructions: Vec::new(),
                lookup_tables: Vec::new(),
                compute_units_estimate: None,
            },
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn input_mint(&self) -> &Pubkey {
        &self.input_mint
    }

    pub fn output_mint(&self) -> &Pubkey {
        &self.output_mint
    }

    pub fn swap_mode(&self) -> SwapMode {
        self.swap_mode
    }

    pub fn in_amount(&self) -> u64 {
        self.in_amount
    }

    pub fn out_amount(&self) -> u64 {
        self.out_amount
    }

    pub fn slippage_bps(&self) -> u16 {
        self.slippage_bps
    }

    pub fn instructions(&self) -> &[CanonicalInstruction] {
        &self.instructions
    }

    pub fn lookup_tables(&self) -> &[Pubkey] {
        &self.lookup_tables
    }

    pub fn compute_units_estimate(&self) -> Option<u32> {
        self.compute_units_estimate
    }

    /// Whether this route answers `request` (same mints and mode)
    pub fn matches(&self, request: &QuoteRequest) -> bool {
        self.input_mint == request.input_mint
            && self.output_mint == request.output_mint
            && self.swap_mode == request.mode
    }
}

/// Builder for [`QuoteRoute`]
#[derive(Debug)]
pub struct QuoteRouteBuilder {
    route: QuoteRoute,
}

impl QuoteRouteBuilder {
    pub fn amounts(mut self, in_amount: u64, out_amount: u64) -> Self {
        self.route.in_amount = in_amount;
        self.route.out_amount = out_amount;
        self
    }

    pub fn slippage_bps(mut self, slippage_bps: u16) -> Self {
        self.route.slippage_bps = slippage_bps;
        self
    }

    pub fn mints(mut self, input_mint: Pubkey, output_mint: Pubkey) -> Self {
        self.route.input_mint = input_mint;
        self.route.output_mint = output_mint;
        self
    }

    pub fn swap_mode(mut self, mode: SwapMode) -> Self {
        self.route.swap_mode = mode;
        self
    }

    /// Set instructions, stripping compute-budget ones
    ///
    /// A stripped unit limit becomes the estimate unless one was already given.
    pub fn instructions(mut self, instructions: Vec<CanonicalInstruction>) -> Self {
        let (kept, limit) = strip_compute_budget(instructions);
        self.route.instructions = kept;
        if self.route.compute_units_estimate.is_none() {
            self.route.compute_units_estimate = limit;
        }
        self
    }

    pub fn lookup_tables(mut self, tables: Vec<Pubkey>) -> Self {
        self.route.lookup_tables = tables;
        self
    }

    /// Explicit provider estimate; takes precedence over a stripped limit
    pub fn compute_units(mut self, estimate: Option<u32>) -> Self {
        if estimate.is_some() {
            self.route.compute_units_estimate = estimate;
        }
        self
    }

    pub fn build(self) -> QuoteRoute {
        self.route
    }
}

/// Reject requests no provider can route
pub fn ensure_routable(request: &QuoteRequest) -> Result<(), ProviderError> {
    match request.unroutable_reason() {
        Some(reason) => Err(ProviderError::NoRoute(reason.to_string())),
        None => Ok(()),
    }
}

/// Requested slippage plus a random jitter in `0..=jitter_bps`
pub fn jittered_slippage_bps(base_bps: u16, jitter_bps: u16) -> u16 {
    if jitter_bps == 0 {
        return base_bps;
    }
    base_bps.saturating_add(fastrand::u16(0..=jitter_bps))
}

/// Remove compute-budget instructions, returning the last unit limit seen
pub fn strip_compute_budget(
    instructions: Vec<CanonicalInstruction>,
) -> (Vec<CanonicalInstruction>, Option<u32>) {
    let mut limit = None;
    let mut kept = Vec::with_capacity(instructions.len());
    for ix in instructions {
        if *ix.program_id() == compute_budget::id() {
            if let Some(units) = parse_compute_unit_limit(&ix) {
                limit = Some(units);
            }
            if let Some(price) = parse_compute_unit_price(&ix) {
                tracing::debug!(target: "providers", price, "dropping provider compute unit price");
            }
            continue;
        }
        kept.push(ix);
    }
    (kept, limit)
}

/// Unit limit carried by a SetComputeUnitLimit instruction
pub fn parse_compute_unit_limit(ix: &CanonicalInstruction) -> Option<u32> {
    if *ix.program_id() != compute_budget::id() {
        return None;
    }
    let data = ix.data();
    if data.first().copied()? == CB_SET_UNIT_LIMIT && data.len() >= 5 {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&data[1..5]);
        return Some(u32::from_le_bytes(buf));
    }
    None
}

/// Micro-lamport price carried by a SetComputeUnitPrice instruction
pub fn parse_compute_unit_price(ix: &CanonicalInstruction) -> Option<u64> {
    if *ix.program_id() != compute_budget::id() {
        return None;
    }
    let data = ix.data();
    if data.first().copied()? == CB_SET_UNIT_PRICE && data.len() >= 9 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&data[1..9]);
        return Some(u64::from_le_bytes(buf));
    }
    None
}
