//! Test Utilities Module
//!
//! In-memory stand-ins for quote providers, wallet state and the ledger, so
//! races, wrapping, assembly and submission can be driven deterministically.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use solana_sdk::{
    address_lookup_table::AddressLookupTableAccount, hash::Hash, pubkey::Pubkey,
    signature::Signature, transaction::VersionedTransaction,
};

use crate::authority::{AuthorityError, WalletState, WalletStateProvider};
use crate::canonical::{AccountRef, CanonicalInstruction};
use crate::providers::{ProviderError, QuoteProvider, QuoteRoute};
use crate::rpc_manager::{LedgerClient, LedgerSignatureStatus, RpcManagerError, SendOptions};
use crate::streaming::{RouteStream, DEFAULT_STREAM_CAPACITY};
use crate::types::{QuoteRequest, SwapMode, USDC_MINT, WSOL_MINT};

/// SOL -> USDC, ExactIn, 0.1 SOL
pub fn sample_request() -> QuoteRequest {
    QuoteRequest {
        input_mint: WSOL_MINT,
        output_mint: USDC_MINT,
        amount: 100_000_000,
        mode: SwapMode::ExactIn,
        max_slippage_bps: 50,
        slippage_jitter_bps: 0,
        user: Pubkey::new_unique(),
    }
}

/// Route for `request` with one instruction touching the requesting user
pub fn sample_route(provider: &str, request: &QuoteRequest, out_amount: u64) -> QuoteRoute {
    let ix = CanonicalInstruction::new(
        Pubkey::new_unique(),
        vec![AccountRef::writable(request.user)],
        out_amount.to_le_bytes().to_vec(),
    );
    QuoteRoute::builder(provider, request)
        .amounts(request.amount, out_amount)
        .instructions(vec![ix])
        .build()
}

/// Provider answering every request with one fixed batch, or one fixed error
pub struct StaticProvider {
    name: String,
    answer: Result<Vec<QuoteRoute>, ProviderError>,
}

impl StaticProvider {
    pub fn new(name: &str, routes: Vec<QuoteRoute>) -> Self {
        Self {
            name: name.to_string(),
            answer: Ok(routes),
        }
    }

    pub fn failing(name: &str, error: ProviderError) -> Self {
        Self {
            name: name.to_string(),
            answer: Err(error),
        }
    }
}

#[async_trait]
impl QuoteProvider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_routes(&self, _request: &QuoteRequest) -> Result<RouteStream, ProviderError> {
        Ok(match &self.answer {
            Ok(routes) if routes.is_empty() => RouteStream::empty(self.name.clone()),
            Ok(routes) => RouteStream::once(self.name.clone(), routes.clone()),
            Err(e) => RouteStream::failed(self.name.clone(), e.clone()),
        })
    }
}

/// Streaming provider that emits batches after scripted delays
///
/// Records whether the consumer closed the stream before the script ran out.
pub struct ScriptedProvider {
    name: String,
    script: Vec<(Duration, Vec<QuoteRoute>)>,
    closed_by_consumer: Arc<AtomicBool>,
}

impl ScriptedProvider {
    pub fn new(name: &str, script: Vec<(Duration, Vec<QuoteRoute>)>) -> Self {
        Self {
            name: name.to_string(),
            script,
            closed_by_consumer: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn was_closed(&self) -> bool {
        self.closed_by_consumer.load(Ordering::SeqCst)
    }

    /// Panic unless the consumer closes the stream within `timeout`
    pub async fn wait_closed(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.was_closed() {
            if tokio::time::Instant::now() >= deadline {
                panic!("stream of {} was not closed within {:?}", self.name, timeout);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl QuoteProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_routes(&self, _request: &QuoteRequest) -> Result<RouteStream, ProviderError> {
        let (sink, stream) = RouteStream::channel(self.name.clone(), DEFAULT_STREAM_CAPACITY);
        let script = self.script.clone();
        let closed = self.closed_by_consumer.clone();

        tokio::spawn(async move {
            for (delay, batch) in script {
                tokio::select! {
                    _ = sink.closed() => {
                        closed.store(true, Ordering::SeqCst);
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                if !sink.send(Ok(batch)).await {
                    closed.store(true, Ordering::SeqCst);
                    return;
                }
            }
        });

        Ok(stream)
    }
}

/// Wallet states held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticWalletProvider {
    wallets: HashMap<Pubkey, WalletState>,
}

impl StaticWalletProvider {
    pub fn new(wallets: Vec<WalletState>) -> Self {
        Self {
            wallets: wallets.into_iter().map(|w| (w.address, w)).collect(),
        }
    }
}

#[async_trait]
impl WalletStateProvider for StaticWalletProvider {
    async fn fetch_wallet(&self, address: &Pubkey) -> Result<WalletState, AuthorityError> {
        self.wallets
            .get(address)
            .cloned()
            .ok_or(AuthorityError::WalletNotFound(*address))
    }
}

#[derive(Default)]
struct LedgerState {
    balances: HashMap<Pubkey, u64>,
    token_balances: HashMap<Pubkey, u64>,
    accounts: HashSet<Pubkey>,
    lookup_tables: HashMap<Pubkey, AddressLookupTableAccount>,
    blockhash: Option<(Hash, u64)>,
    block_height: u64,
    statuses: VecDeque<Option<LedgerSignatureStatus>>,
    sent: Vec<VersionedTransaction>,
    send_error: Option<RpcManagerError>,
    status_polls: usize,
}

/// In-memory ledger
///
/// Signature statuses are served from a script; the last scripted entry
/// repeats forever. With no script every signature stays unknown.
#[derive(Default)]
pub struct MockLedger {
    state: Mutex<LedgerState>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_blockhash(&self, blockhash: Hash, last_valid_block_height: u64) {
        self.state.lock().blockhash = Some((blockhash, last_valid_block_height));
    }

    pub fn set_block_height(&self, height: u64) {
        self.state.lock().block_height = height;
    }

    pub fn script_statuses(&self, statuses: Vec<Option<LedgerSignatureStatus>>) {
        self.state.lock().statuses = statuses.into();
    }

    /// Make every send fail with `error`
    pub fn fail_sends(&self, error: RpcManagerError) {
        self.state.lock().send_error = Some(error);
    }

    pub fn sent(&self) -> Vec<VersionedTransaction> {
        self.state.lock().sent.clone()
    }

    pub fn status_polls(&self) -> usize {
        self.state.lock().status_polls
    }

    pub fn add_lookup_table(&self, table: AddressLookupTableAccount) {
        let mut state = self.state.lock();
        state.accounts.insert(table.key);
        state.lookup_tables.insert(table.key, table);
    }

    pub fn set_balance(&self, address: Pubkey, lamports: u64) {
        let mut state = self.state.lock();
        state.accounts.insert(address);
        state.balances.insert(address, lamports);
    }

    pub fn set_token_balance(&self, token_account: Pubkey, amount: u64) {
        let mut state = self.state.lock();
        state.accounts.insert(token_account);
        state.token_balances.insert(token_account, amount);
    }

    pub fn add_account(&self, address: Pubkey) {
        self.state.lock().accounts.insert(address);
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn get_balance(&self, address: &Pubkey) -> Result<u64, RpcManagerError> {
        Ok(self.state.lock().balances.get(address).copied().unwrap_or(0))
    }

    async fn get_latest_blockhash(&self) -> Result<(Hash, u64), RpcManagerError> {
        let mut state = self.state.lock();
        let height = state.block_height;
        Ok(*state
            .blockhash
            .get_or_insert_with(|| (Hash::new_unique(), height + 150)))
    }

    async fn get_lookup_table(
        &self,
        address: &Pubkey,
    ) -> Result<Option<AddressLookupTableAccount>, RpcManagerError> {
        Ok(self.state.lock().lookup_tables.get(address).cloned())
    }

    async fn send_transaction(
        &self,
        transaction: &VersionedTransaction,
        _options: SendOptions,
    ) -> Result<Signature, RpcManagerError> {
        let mut state = self.state.lock();
        if let Some(error) = &state.send_error {
            return Err(error.clone());
        }
        state.sent.push(transaction.clone());
        Ok(transaction.signatures.first().copied().unwrap_or_default())
    }

    async fn get_block_height(&self) -> Result<u64, RpcManagerError> {
        Ok(self.state.lock().block_height)
    }

    async fn get_signature_status(
        &self,
        _signature: &Signature,
    ) -> Result<Option<LedgerSignatureStatus>, RpcManagerError> {
        let mut state = self.state.lock();
        state.status_polls += 1;
        let status = if state.statuses.len() > 1 {
            state.statuses.pop_front().flatten()
        } else {
            state.statuses.front().cloned().flatten()
        };
        Ok(status)
    }

    async fn get_token_balance(&self, token_account: &Pubkey) -> Result<Option<u64>, RpcManagerError> {
        Ok(self.state.lock().token_balances.get(token_account).copied())
    }

    async fn account_exists(&self, address: &Pubkey) -> Result<bool, RpcManagerError> {
        Ok(self.state.lock().accounts.contains(address))
    }
}
