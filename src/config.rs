//! Configuration module
//!
//! Loaded from a TOML file, then overridden from the environment (a `.env`
//! file is honoured). Every section has defaults, so an empty file is valid.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use solana_sdk::commitment_config::CommitmentConfig;

use crate::aggregator::{BatchTarget, RacePolicy};
use crate::supervisor::SubmitConfig;
use crate::tx_builder::ComputeBudget;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ledger RPC endpoint
    pub rpc: RpcConfig,

    /// Keys, wallet manifest and role
    pub wallet: WalletConfig,

    /// Quote providers
    pub providers: ProvidersConfig,

    /// Quote race policy
    pub race: RaceConfig,

    /// Compute budget for assembled transactions
    pub compute: ComputeBudget,

    /// Submission and confirmation
    pub submit: SubmitConfig,

    /// Logging and metrics
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// JSON-RPC endpoint
    #[serde(default = "default_rpc_url")]
    pub url: String,

    /// Request timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,

    /// processed | confirmed | finalized
    #[serde(default = "default_commitment")]
    pub commitment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Path to the root keypair file (role signer and fee payer)
    #[serde(default = "default_keypair_path")]
    pub keypair_path: String,

    /// TOML manifest describing wallets and roles
    #[serde(default)]
    pub manifest_path: Option<String>,

    /// Wallet used when the CLI is not given one
    #[serde(default)]
    pub default_wallet: Option<String>,

    /// Delegated-authority wallet program
    #[serde(default)]
    pub program_id: Option<String>,

    /// Minimum fee payer balance before a swap, in lamports
    #[serde(default = "default_min_payer_balance")]
    pub min_payer_balance_lamports: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub metis: MetisConfig,
    pub titan: TitanConfig,
}

/// Jupiter Metis HTTP API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetisConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_metis_url")]
    pub base_url: String,

    /// Sent as `x-api-key` when set
    #[serde(default)]
    pub api_key: Option<String>,

    /// Account budget passed to the router
    #[serde(default = "default_max_accounts")]
    pub max_accounts: u32,

    #[serde(default = "default_true")]
    pub wrap_and_unwrap_sol: bool,

    #[serde(default = "default_true")]
    pub use_shared_accounts: bool,

    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

/// Titan WebSocket API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TitanConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_titan_url")]
    pub ws_url: String,

    /// Appended as `?auth=` when set
    #[serde(default)]
    pub api_token: Option<String>,

    /// Quotes per stream update
    #[serde(default = "default_num_quotes")]
    pub num_quotes: u32,

    #[serde(default = "default_true")]
    pub create_output_token_account: bool,

    #[serde(default = "default_http_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceConfig {
    /// Batches each provider must deliver before the race may stop
    #[serde(default = "default_min_batches")]
    pub min_batches: usize,

    /// Wait for every stream to close instead
    #[serde(default)]
    pub until_closed: bool,

    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u16,

    #[serde(default = "default_slippage_jitter_bps")]
    pub slippage_jitter_bps: u16,

    /// Upper bound on the race, in milliseconds
    #[serde(default)]
    pub decision_window_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,

    /// Dump the metrics registry after each command
    #[serde(default)]
    pub print_metrics: bool,
}

// Default value functions
fn default_rpc_url() -> String { "https://api.mainnet-beta.solana.com".to_string() }
fn default_rpc_timeout() -> u64 { 30 }
fn default_commitment() -> String { "confirmed".to_string() }
fn default_keypair_path() -> String { "~/.config/solana/id.json".to_string() }
fn default_min_payer_balance() -> u64 { 5_000_000 }
fn default_metis_url() -> String { "https://lite-api.jup.ag/swap/v1".to_string() }
fn default_titan_url() -> String { "wss://us1.api.demo.titan.exchange/api/v1/ws".to_string() }
fn default_max_accounts() -> u32 { 64 }
fn default_http_timeout_ms() -> u64 { 10_000 }
fn default_num_quotes() -> u32 { 3 }
fn default_min_batches() -> usize { 1 }
fn default_slippage_bps() -> u16 { 50 }
fn default_slippage_jitter_bps() -> u16 { 10 }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: default_rpc_url(),
            timeout_secs: default_rpc_timeout(),
            commitment: default_commitment(),
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            keypair_path: default_keypair_path(),
            manifest_path: None,
            default_wallet: None,
            program_id: None,
            min_payer_balance_lamports: default_min_payer_balance(),
        }
    }
}

impl Default for MetisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_metis_url(),
            api_key: None,
            max_accounts: default_max_accounts(),
            wrap_and_unwrap_sol: true,
            use_shared_accounts: true,
            timeout_ms: default_http_timeout_ms(),
        }
    }
}

impl Default for TitanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ws_url: default_titan_url(),
            api_token: None,
            num_quotes: default_num_quotes(),
            create_output_token_account: true,
            connect_timeout_ms: default_http_timeout_ms(),
        }
    }
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            min_batches: default_min_batches(),
            until_closed: false,
            slippage_bps: default_slippage_bps(),
            slippage_jitter_bps: default_slippage_jitter_bps(),
            decision_window_ms: None,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            print_metrics: false,
        }
    }
}

impl RpcConfig {
    pub fn commitment_config(&self) -> CommitmentConfig {
        match self.commitment.as_str() {
            "processed" => CommitmentConfig::processed(),
            "finalized" => CommitmentConfig::finalized(),
            _ => CommitmentConfig::confirmed(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RaceConfig {
    pub fn policy(&self) -> RacePolicy {
        RacePolicy {
            batch_target: if self.until_closed {
                BatchTarget::UntilClosed
            } else {
                BatchTarget::MinBatches(self.min_batches)
            },
            slippage_bps: self.slippage_bps,
            slippage_jitter_bps: self.slippage_jitter_bps,
            decision_window: self.decision_window_ms.map(Duration::from_millis),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with `.env` and environment variable overrides
    pub fn from_file_with_env<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment, for runs without a config file
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `DSWAP_*` and provider credential variables
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(url) = get("DSWAP_RPC_URL") {
            self.rpc.url = url;
        }
        if let Some(path) = get("DSWAP_KEYPAIR_PATH") {
            self.wallet.keypair_path = path;
        }
        if let Some(path) = get("DSWAP_WALLET_MANIFEST") {
            self.wallet.manifest_path = Some(path);
        }
        if let Some(wallet) = get("DSWAP_WALLET") {
            self.wallet.default_wallet = Some(wallet);
        }
        if let Some(key) = get("JUPITER_API_KEY") {
            self.providers.metis.api_key = Some(key);
        }
        if let Some(token) = get("TITAN_API_TOKEN") {
            self.providers.titan.api_token = Some(token);
        }
        if let Some(url) = get("TITAN_WS_URL") {
            self.providers.titan.ws_url = url;
        }
    }

    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rpc.url.is_empty() {
            anyhow::bail!("rpc.url must not be empty");
        }
        if !matches!(self.rpc.commitment.as_str(), "processed" | "confirmed" | "finalized") {
            anyhow::bail!("rpc.commitment must be processed, confirmed or finalized");
        }
        if self.race.min_batches == 0 {
            anyhow::bail!("race.min_batches must be at least 1");
        }
        if self.race.slippage_bps > 10_000 {
            anyhow::bail!("race.slippage_bps must be <= 10000");
        }
        if matches!(self.race.decision_window_ms, Some(0)) {
            anyhow::bail!("race.decision_window_ms must be > 0 when set");
        }
        if self.providers.titan.num_quotes == 0 {
            anyhow::bail!("providers.titan.num_quotes must be at least 1");
        }
        if self.submit.poll_interval_ms == 0 {
            anyhow::bail!("submit.poll_interval_ms must be > 0");
        }
        self.compute
            .validate()
            .map_err(|e| anyhow::anyhow!("compute: {}", e))?;
        Ok(())
    }
}
