//! Delegated swap and transfer pipelines
//!
//! Strings the components together for each flow:
//!
//! ```text
//! swap:      race providers -> wrap route -> assemble -> submit
//! transfer:  build system / token instructions -> wrap -> assemble -> submit
//! ```
//!
//! Every flow runs under one [`PipelineLogger`], so all its log lines share a
//! correlation id. Nothing here retries: a retryable [`EngineError`] means the
//! caller may run the whole flow again.

use std::sync::Arc;
use std::time::{Duration, Instant};

use solana_sdk::{pubkey::Pubkey, signature::Keypair, signature::Signature, signer::Signer, system_instruction};
use spl_associated_token_account::{
    get_associated_token_address, instruction::create_associated_token_account_idempotent,
};
use thiserror::Error;
use tracing::{info, instrument, Instrument};

use crate::aggregator::{race_routes, AggregatorError, RacePolicy};
use crate::authority::{
    AuthorityError, AuthorityWrapper, PermissionOracle, WalletState, WalletStateProvider, WrapOptions,
};
use crate::canonical::CanonicalInstruction;
use crate::config::Config;
use crate::observability::CorrelationId;
use crate::providers::{QuoteProvider, QuoteRoute};
use crate::rpc_manager::{LedgerClient, RpcManagerError};
use crate::structured_logging::PipelineLogger;
use crate::supervisor::{SubmissionError, SubmissionOutcome, SubmissionSupervisor, SubmitConfig};
use crate::tx_builder::{BlockhashContext, ComputeBudget, TransactionAssembler, TransactionBuilderError};
use crate::types::{Asset, QuoteRequest, SwapMode, LAMPORTS_PER_SOL};

/// Minimum payer balance before a swap: 0.005 SOL
pub const DEFAULT_MIN_PAYER_BALANCE: u64 = LAMPORTS_PER_SOL / 200;

/// Engine-level failure, wrapping the component that failed
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Quote(#[from] AggregatorError),

    #[error(transparent)]
    Authority(#[from] AuthorityError),

    #[error(transparent)]
    Build(#[from] TransactionBuilderError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Ledger(#[from] RpcManagerError),

    /// The signing key holds no role on the wallet
    #[error("{signer} holds no role on wallet {wallet}")]
    NoRole { wallet: Pubkey, signer: Pubkey },

    #[error("Insufficient funds in {account}: {available} available, {required} required")]
    InsufficientFunds {
        account: Pubkey,
        required: u64,
        available: u64,
    },

    #[error("Token account {0} not found")]
    TokenAccountNotFound(Pubkey),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Quote(e) => e.is_retryable(),
            EngineError::Authority(e) => e.is_retryable(),
            EngineError::Build(e) => e.is_retryable(),
            EngineError::Submission(e) => e.is_retryable(),
            EngineError::Ledger(e) => e.is_retryable(),
            EngineError::NoRole { .. }
            | EngineError::InsufficientFunds { .. }
            | EngineError::TokenAccountNotFound(_)
            | EngineError::InvalidRequest(_) => false,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            EngineError::Quote(e) => e.category(),
            EngineError::Authority(e) => e.category(),
            EngineError::Build(e) => e.category(),
            EngineError::Submission(e) => e.category(),
            EngineError::Ledger(e) => e.category(),
            EngineError::NoRole { .. } => "no_role",
            EngineError::InsufficientFunds { .. } => "insufficient_funds",
            EngineError::TokenAccountNotFound(_) => "token_account",
            EngineError::InvalidRequest(_) => "invalid_request",
        }
    }

    /// Pipeline stage the error came from
    pub fn stage(&self) -> &'static str {
        match self {
            EngineError::Quote(_) => "quote",
            EngineError::Authority(_) | EngineError::NoRole { .. } => "wrap",
            EngineError::Build(_) => "assemble",
            EngineError::Submission(_) => "submit",
            EngineError::Ledger(_) => "ledger",
            EngineError::InsufficientFunds { .. }
            | EngineError::TokenAccountNotFound(_)
            | EngineError::InvalidRequest(_) => "preflight",
        }
    }
}

/// Engine settings, usually taken from [`Config`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub race: RacePolicy,
    pub budget: ComputeBudget,
    pub submit: SubmitConfig,
    pub min_payer_balance_lamports: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            race: RacePolicy::default(),
            budget: ComputeBudget::default(),
            submit: SubmitConfig::default(),
            min_payer_balance_lamports: DEFAULT_MIN_PAYER_BALANCE,
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            race: config.race.policy(),
            budget: config.compute,
            submit: config.submit,
            min_payer_balance_lamports: config.wallet.min_payer_balance_lamports,
        }
    }
}

/// What to swap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapOrder {
    pub input: Asset,
    pub output: Asset,
    /// Base units of the fixed side
    pub amount: u64,
    pub mode: SwapMode,
}

/// A confirmed pipeline run
#[derive(Debug, Clone)]
pub struct Receipt {
    pub signature: Signature,
    pub slot: Option<u64>,
    /// Winning route, for swaps
    pub route: Option<QuoteRoute>,
    pub spend_wallet: Pubkey,
    pub correlation_id: CorrelationId,
    pub elapsed: Duration,
}

/// Balance of one asset held by a wallet's spend account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetBalance {
    pub asset: Asset,
    /// Account actually holding the funds (spend wallet or its token account)
    pub holder: Pubkey,
    /// Base units; `None` when the token account does not exist
    pub amount: Option<u64>,
}

/// Runs swaps and transfers on behalf of a delegated-authority wallet
pub struct SwapEngine {
    ledger: Arc<dyn LedgerClient>,
    wrapper: AuthorityWrapper,
    assembler: TransactionAssembler,
    supervisor: SubmissionSupervisor,
    providers: Vec<Arc<dyn QuoteProvider>>,
    settings: EngineSettings,
}

impl SwapEngine {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        wallets: Arc<dyn WalletStateProvider>,
        oracle: Arc<dyn PermissionOracle>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            wrapper: AuthorityWrapper::new(wallets, oracle),
            assembler: TransactionAssembler::new(ledger.clone(), settings.budget),
            supervisor: SubmissionSupervisor::new(ledger.clone(), settings.submit),
            ledger,
            providers: Vec::new(),
            settings,
        }
    }

    pub fn with_providers(mut self, providers: Vec<Arc<dyn QuoteProvider>>) -> Self {
        self.providers = providers;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Race providers for `order` and execute the best route through `signer`'s role
    #[instrument(skip_all, fields(wallet = %wallet, input = %order.input, output = %order.output))]
    pub async fn execute_swap(
        &self,
        signer: &Keypair,
        wallet: &Pubkey,
        order: &SwapOrder,
    ) -> Result<Receipt, EngineError> {
        let logger = PipelineLogger::new("swap");
        let result = self.run_swap(&logger, signer, wallet, order).await;
        if let Err(e) = &result {
            logger.log_failure(e.stage(), e.category(), e);
        }
        result
    }

    async fn run_swap(
        &self,
        logger: &PipelineLogger,
        signer: &Keypair,
        wallet: &Pubkey,
        order: &SwapOrder,
    ) -> Result<Receipt, EngineError> {
        let started = Instant::now();
        let state = self.wrapper.fetch_wallet(wallet).await?;
        let spend_wallet = state.spend_wallet();

        let request = QuoteRequest {
            input_mint: order.input.mint(),
            output_mint: order.output.mint(),
            amount: order.amount,
            mode: order.mode,
            max_slippage_bps: self.settings.race.slippage_bps,
            slippage_jitter_bps: self.settings.race.slippage_jitter_bps,
            user: spend_wallet,
        };
        if let Some(reason) = request.unroutable_reason() {
            return Err(EngineError::InvalidRequest(reason.to_string()));
        }

        self.ensure_payer_funded(&signer.pubkey()).await?;

        let providers: Vec<&dyn QuoteProvider> = self.providers.iter().map(|p| p.as_ref()).collect();
        logger.log_race_started(&self.provider_names(), order.amount);
        let route = race_routes(&providers, &request, &self.settings.race).await?;
        logger.log_route_selected(&route);

        let outcome = self
            .execute(
                logger,
                signer,
                &state,
                route.instructions(),
                route.lookup_tables(),
                route.compute_units_estimate(),
            )
            .await?;

        Ok(Receipt {
            slot: outcome.slot,
            signature: outcome.into_result()?,
            route: Some(route),
            spend_wallet,
            correlation_id: logger.correlation_id().clone(),
            elapsed: started.elapsed(),
        })
    }

    /// Move lamports out of the spend wallet
    #[instrument(skip_all, fields(wallet = %wallet, recipient = %recipient, lamports = lamports))]
    pub async fn transfer_sol(
        &self,
        signer: &Keypair,
        wallet: &Pubkey,
        recipient: &Pubkey,
        lamports: u64,
    ) -> Result<Receipt, EngineError> {
        let logger = PipelineLogger::new("transfer");
        let result = self.run_transfer_sol(&logger, signer, wallet, recipient, lamports).await;
        if let Err(e) = &result {
            logger.log_failure(e.stage(), e.category(), e);
        }
        result
    }

    async fn run_transfer_sol(
        &self,
        logger: &PipelineLogger,
        signer: &Keypair,
        wallet: &Pubkey,
        recipient: &Pubkey,
        lamports: u64,
    ) -> Result<Receipt, EngineError> {
        let started = Instant::now();
        if lamports == 0 {
            return Err(EngineError::InvalidRequest("transfer amount is zero".to_string()));
        }
        let state = self.wrapper.fetch_wallet(wallet).await?;
        let spend_wallet = state.spend_wallet();

        let available = self.ledger.get_balance(&spend_wallet).await?;
        if available < lamports {
            return Err(EngineError::InsufficientFunds {
                account: spend_wallet,
                required: lamports,
                available,
            });
        }

        let transfer: CanonicalInstruction =
            system_instruction::transfer(&spend_wallet, recipient, lamports).into();
        let outcome = self
            .execute(logger, signer, &state, &[transfer], &[], None)
            .await?;

        Ok(Receipt {
            slot: outcome.slot,
            signature: outcome.into_result()?,
            route: None,
            spend_wallet,
            correlation_id: logger.correlation_id().clone(),
            elapsed: started.elapsed(),
        })
    }

    /// Move tokens out of the spend wallet's associated token account
    ///
    /// The recipient's associated token account is created in the same
    /// transaction when absent, funded by the signer.
    #[instrument(skip_all, fields(wallet = %wallet, recipient = %recipient, asset = %asset, amount = amount))]
    pub async fn transfer_spl(
        &self,
        signer: &Keypair,
        wallet: &Pubkey,
        recipient: &Pubkey,
        asset: Asset,
        amount: u64,
    ) -> Result<Receipt, EngineError> {
        let logger = PipelineLogger::new("transfer_spl");
        let result = self
            .run_transfer_spl(&logger, signer, wallet, recipient, asset, amount)
            .await;
        if let Err(e) = &result {
            logger.log_failure(e.stage(), e.category(), e);
        }
        result
    }

    async fn run_transfer_spl(
        &self,
        logger: &PipelineLogger,
        signer: &Keypair,
        wallet: &Pubkey,
        recipient: &Pubkey,
        asset: Asset,
        amount: u64,
    ) -> Result<Receipt, EngineError> {
        let started = Instant::now();
        if amount == 0 {
            return Err(EngineError::InvalidRequest("transfer amount is zero".to_string()));
        }
        let state = self.wrapper.fetch_wallet(wallet).await?;
        let spend_wallet = state.spend_wallet();
        let mint = asset.mint();

        let source = get_associated_token_address(&spend_wallet, &mint);
        let available = self
            .ledger
            .get_token_balance(&source)
            .await?
            .ok_or(EngineError::TokenAccountNotFound(source))?;
        if available < amount {
            return Err(EngineError::InsufficientFunds {
                account: source,
                required: amount,
                available,
            });
        }

        let destination = get_associated_token_address(recipient, &mint);
        let mut instructions: Vec<CanonicalInstruction> = Vec::with_capacity(2);
        if !self.ledger.account_exists(&destination).await? {
            info!(target: "swap_engine", %destination, "recipient token account missing, creating it");
            instructions.push(
                create_associated_token_account_idempotent(
                    &signer.pubkey(),
                    recipient,
                    &mint,
                    &spl_token::id(),
                )
                .into(),
            );
        }
        let transfer = spl_token::instruction::transfer_checked(
            &spl_token::id(),
            &source,
            &mint,
            &destination,
            &spend_wallet,
            &[],
            amount,
            asset.decimals(),
        )
        .map_err(|e| EngineError::InvalidRequest(format!("token transfer: {}", e)))?;
        instructions.push(transfer.into());

        let outcome = self
            .execute(logger, signer, &state, &instructions, &[], None)
            .await?;

        Ok(Receipt {
            slot: outcome.slot,
            signature: outcome.into_result()?,
            route: None,
            spend_wallet,
            correlation_id: logger.correlation_id().clone(),
            elapsed: started.elapsed(),
        })
    }

    /// Balance of `asset` held by the wallet's spend account
    pub async fn balance(&self, wallet: &Pubkey, asset: Asset) -> Result<AssetBalance, EngineError> {
        let state = self.wrapper.fetch_wallet(wallet).await?;
        let spend_wallet = state.spend_wallet();
        match asset {
            Asset::Sol => Ok(AssetBalance {
                asset,
                holder: spend_wallet,
                amount: Some(self.ledger.get_balance(&spend_wallet).await?),
            }),
            _ => {
                let holder = get_associated_token_address(&spend_wallet, &asset.mint());
                Ok(AssetBalance {
                    asset,
                    holder,
                    amount: self.ledger.get_token_balance(&holder).await?,
                })
            }
        }
    }

    async fn ensure_payer_funded(&self, payer: &Pubkey) -> Result<(), EngineError> {
        let required = self.settings.min_payer_balance_lamports;
        let available = self.ledger.get_balance(payer).await?;
        if available < required {
            return Err(EngineError::InsufficientFunds {
                account: *payer,
                required,
                available,
            });
        }
        Ok(())
    }

    fn role_for(&self, state: &WalletState, signer: &Pubkey) -> Result<u32, EngineError> {
        state
            .find_role_by_signer(signer)
            .map(|role| role.id)
            .ok_or(EngineError::NoRole {
                wallet: state.address,
                signer: *signer,
            })
    }

    /// Wrap, assemble and submit; the signer pays fees and rent
    async fn execute(
        &self,
        logger: &PipelineLogger,
        signer: &Keypair,
        state: &WalletState,
        instructions: &[CanonicalInstruction],
        lookup_tables: &[Pubkey],
        compute_units_estimate: Option<u32>,
    ) -> Result<SubmissionOutcome, EngineError> {
        let signer_key = signer.pubkey();
        let role_id = self.role_for(state, &signer_key)?;
        let opts = WrapOptions::new(signer_key).with_payer(signer_key);

        let wrapped = self
            .wrapper
            .wrap_with_state(state, role_id, instructions, &opts)?;
        logger.log_wrapped(&state.address, role_id, wrapped.len());

        let blockhash = BlockhashContext::fetch(self.ledger.as_ref())
            .await?
            .with_trace(logger.stage("assemble"));
        let tx = self
            .assembler
            .assemble(signer, &wrapped, lookup_tables, compute_units_estimate, &blockhash)
            .await?;
        logger.log_assembled(&tx);

        logger.log_submitted(&tx.signature());
        let outcome = self
            .supervisor
            .submit(&tx)
            .instrument(logger.stage("submit").span())
            .await?;
        logger.log_outcome(&outcome);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{Permission, Role, RoleOracle, DEFAULT_WALLET_PROGRAM_ID};
    use crate::rpc_manager::LedgerSignatureStatus;
    use crate::test_utils::{MockLedger, StaticWalletProvider};
    use solana_sdk::hash::Hash;

    struct Fixture {
        ledger: Arc<MockLedger>,
        engine: SwapEngine,
        root: Keypair,
        wallet: WalletState,
    }

    fn fixture(permissions: Vec<Permission>) -> Fixture {
        let root = Keypair::new();
        let wallet = WalletState {
            address: Pubkey::new_unique(),
            program_id: DEFAULT_WALLET_PROGRAM_ID,
            roles: vec![Role { id: 0, signer: root.pubkey(), permissions }],
        };
        let ledger = Arc::new(MockLedger::new());
        ledger.set_blockhash(Hash::new_unique(), 1_000);
        ledger.set_block_height(10);
        ledger.set_balance(root.pubkey(), LAMPORTS_PER_SOL);
        ledger.script_statuses(vec![Some(LedgerSignatureStatus {
            slot: 42,
            err: None,
            confirmed: true,
        })]);

        let engine = SwapEngine::new(
            ledger.clone(),
            Arc::new(StaticWalletProvider::new(vec![wallet.clone()])),
            Arc::new(RoleOracle::new(DEFAULT_WALLET_PROGRAM_ID)),
            EngineSettings {
                submit: SubmitConfig { poll_interval_ms: 5, ..Default::default() },
                ..Default::default()
            },
        );
        Fixture { ledger, engine, root, wallet }
    }

    #[tokio::test]
    async fn test_transfer_sol_confirms() {
        let f = fixture(vec![Permission::All]);
        f.ledger.set_balance(f.wallet.spend_wallet(), 2 * LAMPORTS_PER_SOL);

        let receipt = f
            .engine
            .transfer_sol(&f.root, &f.wallet.address, &Pubkey::new_unique(), LAMPORTS_PER_SOL)
            .await
            .unwrap();

        assert_eq!(receipt.slot, Some(42));
        assert_eq!(receipt.spend_wallet, f.wallet.spend_wallet());
        let sent = f.ledger.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].signatures[0], receipt.signature);
    }

    #[tokio::test]
    async fn test_transfer_sol_insufficient_spend_balance() {
        let f = fixture(vec![Permission::All]);
        f.ledger.set_balance(f.wallet.spend_wallet(), 10);

        let err = f
            .engine
            .transfer_sol(&f.root, &f.wallet.address, &Pubkey::new_unique(), 11)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::InsufficientFunds { required: 11, available: 10, .. }));
        assert_eq!(err.stage(), "preflight");
        assert!(f.ledger.sent().is_empty());
    }

    #[tokio::test]
    async fn test_sol_limit_exceeded_is_denied() {
        let f = fixture(vec![Permission::SolLimit { lamports: 100 }]);
        f.ledger.set_balance(f.wallet.spend_wallet(), LAMPORTS_PER_SOL);

        let err = f
            .engine
            .transfer_sol(&f.root, &f.wallet.address, &Pubkey::new_unique(), 101)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Authority(AuthorityError::PermissionDenied { .. })));
        assert!(!err.is_retryable());
        assert!(f.ledger.sent().is_empty());
    }

    #[tokio::test]
    async fn test_transfer_spl_creates_missing_recipient_account() {
        let f = fixture(vec![Permission::All]);
        let source = get_associated_token_address(&f.wallet.spend_wallet(), &Asset::Usdc.mint());
        f.ledger.set_token_balance(source, 5_000_000);

        let recipient = Pubkey::new_unique();
        f.engine
            .transfer_spl(&f.root, &f.wallet.address, &recipient, Asset::Usdc, 1_000_000)
            .await
            .unwrap();

        let sent = f.ledger.sent();
        let keys = crate::compat::get_static_account_keys(&sent[0].message);
        assert!(keys.contains(&get_associated_token_address(&recipient, &Asset::Usdc.mint())));
        assert!(keys.contains(&spl_associated_token_account::id()));
    }

    #[tokio::test]
    async fn test_transfer_spl_existing_recipient_skips_creation() {
        let f = fixture(vec![Permission::All]);
        let source = get_associated_token_address(&f.wallet.spend_wallet(), &Asset::Usdc.mint());
        f.ledger.set_token_balance(source, 5_000_000);
        let recipient = Pubkey::new_unique();
        f.ledger
            .add_account(get_associated_token_address(&recipient, &Asset::Usdc.mint()));

        f.engine
            .transfer_spl(&f.root, &f.wallet.address, &recipient, Asset::Usdc, 1_000_000)
            .await
            .unwrap();

        let sent = f.ledger.sent();
        let keys = crate::compat::get_static_account_keys(&sent[0].message);
        assert!(!keys.contains(&spl_associated_token_account::id()));
    }

    #[tokio::test]
    async fn test_transfer_spl_missing_source_account() {
        let f = fixture(vec![Permission::All]);
        let err = f
            .engine
            .transfer_spl(&f.root, &f.wallet.address, &Pubkey::new_unique(), Asset::Usdc, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TokenAccountNotFound(_)));
    }

    #[tokio::test]
    async fn test_signer_without_role() {
        let f = fixture(vec![Permission::All]);
        f.ledger.set_balance(f.wallet.spend_wallet(), LAMPORTS_PER_SOL);
        let stranger = Keypair::new();

        let err = f
            .engine
            .transfer_sol(&stranger, &f.wallet.address, &Pubkey::new_unique(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoRole { .. }));
        assert_eq!(err.category(), "no_role");
    }

    #[tokio::test]
    async fn test_balance_reads_spend_wallet() {
        let f = fixture(vec![Permission::All]);
        f.ledger.set_balance(f.wallet.spend_wallet(), 7);

        let sol = f.engine.balance(&f.wallet.address, Asset::Sol).await.unwrap();
        assert_eq!(sol.holder, f.wallet.spend_wallet());
        assert_eq!(sol.amount, Some(7));

        let usdc = f.engine.balance(&f.wallet.address, Asset::Usdc).await.unwrap();
        assert_eq!(usdc.amount, None);
    }

    #[tokio::test]
    async fn test_swap_requires_funded_payer() {
        let f = fixture(vec![Permission::All]);
        f.ledger.set_balance(f.root.pubkey(), DEFAULT_MIN_PAYER_BALANCE - 1);
        let order = SwapOrder {
            input: Asset::Sol,
            output: Asset::Usdc,
            amount: 1_000,
            mode: SwapMode::ExactIn,
        };

        let err = f
            .engine
            .execute_swap(&f.root, &f.wallet.address, &order)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));
    }

    #[tokio::test]
    async fn test_swap_rejects_identical_assets() {
        let f = fixture(vec![Permission::All]);
        let order = SwapOrder {
            input: Asset::Usdc,
            output: Asset::Usdc,
            amount: 1_000,
            mode: SwapMode::ExactIn,
        };
        let err = f
            .engine
            .execute_swap(&f.root, &f.wallet.address, &order)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
    }
}
