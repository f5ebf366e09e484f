//! delegated-swap command line
//!
//! Swaps and transfers through a delegated-authority wallet. Progress goes to
//! stdout, errors to stderr; any failure exits non-zero.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use delegated_swap::authority::{
    ManifestWalletProvider, Permission, Role, RoleOracle, WalletState, DEFAULT_WALLET_PROGRAM_ID,
};
use delegated_swap::config::{Config, MonitoringConfig};
use delegated_swap::providers::metis::MetisProvider;
use delegated_swap::providers::QuoteProvider;
use delegated_swap::rpc_manager::RpcLedgerClient;
use delegated_swap::swap_engine::{AssetBalance, EngineSettings, Receipt, SwapEngine, SwapOrder};
use delegated_swap::types::{format_base_units, Asset, SwapMode};
use delegated_swap::wallet::RootSigner;
use delegated_swap::Pubkey;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Swap through the best route across providers
    Swap {
        /// Decimal amount of the fixed side
        amount: String,
        /// Wallet address (defaults to wallet.default_wallet)
        #[arg(short, long)]
        wallet: Option<String>,
        /// Input asset: sol, usdc or <mint>:<decimals>
        #[arg(long, default_value = "sol")]
        from: String,
        /// Output asset: sol, usdc or <mint>:<decimals>
        #[arg(long, default_value = "usdc")]
        to: String,
        #[arg(long, value_enum, default_value_t = ProviderChoice::All)]
        provider: ProviderChoice,
        /// Batches each provider must deliver before choosing
        #[arg(long)]
        min_batches: Option<usize>,
        /// Wait for every provider to finish before choosing
        #[arg(long)]
        until_closed: bool,
        /// The amount fixes the output instead of the input
        #[arg(long)]
        exact_out: bool,
    },
    /// Send SOL from the spend wallet
    Transfer {
        recipient: String,
        /// Decimal SOL amount
        amount: String,
        #[arg(short, long)]
        wallet: Option<String>,
    },
    /// Send an SPL token from the spend wallet
    TransferSpl {
        recipient: String,
        /// usdc or <mint>:<decimals>
        token: String,
        /// Decimal token amount
        amount: String,
        #[arg(short, long)]
        wallet: Option<String>,
    },
    /// Show spend wallet balances
    Balance {
        #[arg(short, long)]
        wallet: Option<String>,
        /// sol, usdc or <mint>:<decimals>; SOL and USDC when omitted
        #[arg(long)]
        asset: Option<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ProviderChoice {
    Metis,
    Titan,
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args.config)?;
    init_logging(args.verbose, args.json_logs, &config.monitoring)?;
    info!(version = env!("CARGO_PKG_VERSION"), "🚀 delegated-swap");

    let result = run(args.command, &config).await;

    if config.monitoring.print_metrics {
        print_metrics();
    }
    result
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool, monitoring: &MonitoringConfig) -> Result<()> {
    let default_filter = if verbose {
        "delegated_swap=debug,info".to_string()
    } else {
        monitoring.log_level.clone()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json || monitoring.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()?;
    }
    Ok(())
}

/// Load configuration from file with fallback to defaults
fn load_config(path: &str) -> Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file_with_env(path).with_context(|| format!("Failed to load config from {}", path))
    } else {
        Config::from_env().context("Failed to load configuration from environment")
    }
}

fn print_metrics() {
    use prometheus::Encoder;
    let mut buffer = Vec::new();
    let families = delegated_swap::metrics::metrics().registry().gather();
    if prometheus::TextEncoder::new().encode(&families, &mut buffer).is_ok() {
        print!("{}", String::from_utf8_lossy(&buffer));
    }
}

async fn run(command: Command, config: &Config) -> Result<()> {
    let signer = RootSigner::from_file(&config.wallet.keypair_path).context("Failed to load root keypair")?;
    info!(root = %signer.pubkey(), "🔑 Root keypair loaded");

    match command {
        Command::Swap {
            amount,
            wallet,
            from,
            to,
            provider,
            min_batches,
            until_closed,
            exact_out,
        } => {
            let wallet = resolve_wallet(wallet, config)?;
            let input = Asset::from_str(&from)?;
            let output = Asset::from_str(&to)?;
            let mode = if exact_out { SwapMode::ExactOut } else { SwapMode::ExactIn };
            let fixed = if exact_out { output } else { input };
            let order = SwapOrder {
                input,
                output,
                amount: fixed.to_base_units(&amount)?,
                mode,
            };

            let mut config = config.clone();
            if let Some(n) = min_batches {
                config.race.min_batches = n;
            }
            if until_closed {
                config.race.until_closed = true;
            }
            config.validate()?;

            let engine = build_engine(&config, &signer, &wallet)?.with_providers(build_providers(&config, provider)?);
            println!(
                "Swapping {} {} -> {} via {:?} (wallet {})",
                amount,
                input,
                output,
                engine.provider_names(),
                wallet
            );

            let receipt = engine.execute_swap(signer.keypair(), &wallet, &order).await?;
            print_receipt(&receipt);
            if let Some(route) = &receipt.route {
                println!(
                    "  route: {} in {} out {}",
                    route.provider(),
                    format_base_units(route.in_amount(), input.decimals()),
                    format_base_units(route.out_amount(), output.decimals())
                );
            }
            print_balance(&engine.balance(&wallet, output).await?);
        }
        Command::Transfer { recipient, amount, wallet } => {
            let wallet = resolve_wallet(wallet, config)?;
            let recipient = parse_pubkey(&recipient, "recipient")?;
            let lamports = Asset::Sol.to_base_units(&amount)?;

            let engine = build_engine(config, &signer, &wallet)?;
            println!("Transferring {} SOL to {}", amount, recipient);
            let receipt = engine
                .transfer_sol(signer.keypair(), &wallet, &recipient, lamports)
                .await?;
            print_receipt(&receipt);
            print_balance(&engine.balance(&wallet, Asset::Sol).await?);
        }
        Command::TransferSpl {
            recipient,
            token,
            amount,
            wallet,
        } => {
            let wallet = resolve_wallet(wallet, config)?;
            let recipient = parse_pubkey(&recipient, "recipient")?;
            let asset = Asset::from_str(&token)?;
            let base_units = asset.to_base_units(&amount)?;

            let engine = build_engine(config, &signer, &wallet)?;
            println!("Transferring {} {} to {}", amount, asset, recipient);
            let receipt = engine
                .transfer_spl(signer.keypair(), &wallet, &recipient, asset, base_units)
                .await?;
            print_receipt(&receipt);
            print_balance(&engine.balance(&wallet, asset).await?);
        }
        Command::Balance { wallet, asset } => {
            let wallet = resolve_wallet(wallet, config)?;
            let engine = build_engine(config, &signer, &wallet)?;
            let assets = match asset {
                Some(asset) => vec![Asset::from_str(&asset)?],
                None => vec![Asset::Sol, Asset::Usdc],
            };
            for asset in assets {
                print_balance(&engine.balance(&wallet, asset).await?);
            }
        }
    }
    Ok(())
}

fn parse_pubkey(value: &str, what: &str) -> Result<Pubkey> {
    Pubkey::from_str(value.trim()).with_context(|| format!("Invalid {} address: {}", what, value))
}

fn resolve_wallet(arg: Option<String>, config: &Config) -> Result<Pubkey> {
    let value = arg
        .or_else(|| config.wallet.default_wallet.clone())
        .context("No wallet given: pass --wallet or set wallet.default_wallet / DSWAP_WALLET")?;
    parse_pubkey(&value, "wallet")
}

fn build_engine(config: &Config, signer: &RootSigner, wallet: &Pubkey) -> Result<SwapEngine> {
    let program_id = match &config.wallet.program_id {
        Some(id) => parse_pubkey(id, "wallet program")?,
        None => DEFAULT_WALLET_PROGRAM_ID,
    };

    let wallets = match &config.wallet.manifest_path {
        Some(path) => ManifestWalletProvider::from_file(path, program_id)?,
        None => {
            warn!(%wallet, "no wallet manifest configured, assuming the root key holds role 0 with full permissions");
            ManifestWalletProvider::default().with_wallet(WalletState {
                address: *wallet,
                program_id,
                roles: vec![Role {
                    id: 0,
                    signer: signer.pubkey(),
                    permissions: vec![Permission::All],
                }],
            })
        }
    };

    let ledger = Arc::new(RpcLedgerClient::new(
        config.rpc.url.clone(),
        config.rpc.timeout(),
        config.rpc.commitment_config(),
    ));
    info!(endpoint = %ledger.endpoint(), "🌐 Ledger client ready");

    Ok(SwapEngine::new(
        ledger,
        Arc::new(wallets),
        Arc::new(RoleOracle::new(program_id)),
        EngineSettings::from_config(config),
    ))
}

fn build_providers(config: &Config, choice: ProviderChoice) -> Result<Vec<Arc<dyn QuoteProvider>>> {
    let mut providers: Vec<Arc<dyn QuoteProvider>> = Vec::new();

    let metis = &config.providers.metis;
    if choice == ProviderChoice::Metis || (choice == ProviderChoice::All && metis.enabled) {
        providers.push(Arc::new(MetisProvider::new(metis.clone())?));
    }

    #[cfg(feature = "ws-stream")]
    {
        let titan = &config.providers.titan;
        if choice == ProviderChoice::Titan || (choice == ProviderChoice::All && titan.enabled) {
            providers.push(Arc::new(delegated_swap::providers::titan::TitanProvider::new(titan.clone())));
        }
    }
    #[cfg(not(feature = "ws-stream"))]
    {
        if choice == ProviderChoice::Titan {
            anyhow::bail!("Titan support requires the ws-stream feature");
        }
    }

    if providers.is_empty() {
        anyhow::bail!("No quote provider enabled");
    }
    Ok(providers)
}

fn print_receipt(receipt: &Receipt) {
    println!("✓ Confirmed: {}", receipt.signature);
    if let Some(slot) = receipt.slot {
        println!("  slot: {}", slot);
    }
    println!(
        "  spend wallet: {} ({} ms, id {})",
        receipt.spend_wallet,
        receipt.elapsed.as_millis(),
        receipt.correlation_id.short()
    );
}

fn print_balance(balance: &AssetBalance) {
    match balance.amount {
        Some(amount) => println!(
            "{} balance: {} ({})",
            balance.asset,
            format_base_units(amount, balance.asset.decimals()),
            balance.holder
        ),
        None => println!("{} balance: no token account ({})", balance.asset, balance.holder),
    }
}
