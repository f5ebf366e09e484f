//! Common types used throughout the pipeline

use serde::{Deserialize, Serialize};
use solana_sdk::{pubkey, pubkey::Pubkey};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Wrapped SOL mint
pub const WSOL_MINT: Pubkey = pubkey!("So11111111111111111111111111111111111111112");

/// USDC mint
pub const USDC_MINT: Pubkey = pubkey!("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v");

/// Lamports per SOL
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Errors raised while interpreting human-entered amounts and asset symbols
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("Invalid amount '{0}'")]
    Invalid(String),

    #[error("Amount '{0}' overflows the asset's integer unit")]
    Overflow(String),

    #[error("Unknown asset '{0}' (expected sol, usdc or <mint>:<decimals>)")]
    UnknownAsset(String),
}

/// An asset addressed by the command surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Asset {
    Sol,
    Usdc,
    Mint { mint: Pubkey, decimals: u8 },
}

impl Asset {
    pub fn mint(&self) -> Pubkey {
        match self {
            Asset::Sol => WSOL_MINT,
            Asset::Usdc => USDC_MINT,
            Asset::Mint { mint, .. } => *mint,
        }
    }

    pub fn decimals(&self) -> u8 {
        match self {
            Asset::Sol => 9,
            Asset::Usdc => 6,
            Asset::Mint { decimals, .. } => *decimals,
        }
    }

    /// Convert a decimal string into base units of this asset (truncating)
    pub fn to_base_units(&self, amount: &str) -> Result<u64, AmountError> {
        parse_ui_amount(amount, self.decimals())
    }
}

impl FromStr for Asset {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sol" | "wsol" => Ok(Asset::Sol),
            "usdc" => Ok(Asset::Usdc),
            _ => {
                let (mint, decimals) = s
                    .split_once(':')
                    .ok_or_else(|| AmountError::UnknownAsset(s.to_string()))?;
                let mint = Pubkey::from_str(mint.trim())
                    .map_err(|_| AmountError::UnknownAsset(s.to_string()))?;
                let decimals = decimals
                    .trim()
                    .parse::<u8>()
                    .map_err(|_| AmountError::UnknownAsset(s.to_string()))?;
                Ok(Asset::Mint { mint, decimals })
            }
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::Sol => write!(f, "SOL"),
            Asset::Usdc => write!(f, "USDC"),
            Asset::Mint { mint, .. } => write!(f, "{}", mint),
        }
    }
}

/// Which side of the swap the amount fixes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SwapMode {
    #[default]
    ExactIn,
    ExactOut,
}

impl SwapMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapMode::ExactIn => "ExactIn",
            SwapMode::ExactOut => "ExactOut",
        }
    }
}

impl fmt::Display for SwapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A quote request shared by every provider in one race
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRequest {
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    /// Amount in base units of the fixed side
    pub amount: u64,
    pub mode: SwapMode,
    pub max_slippage_bps: u16,
    /// Upper bound of random slippage an adapter may add on top
    pub slippage_jitter_bps: u16,
    /// Account the provider should build instructions for
    pub user: Pubkey,
}

impl QuoteRequest {
    /// Reason this request can never be routed, if any
    pub fn unroutable_reason(&self) -> Option<&'static str> {
        if self.amount == 0 {
            Some("amount truncates to zero base units")
        } else if self.input_mint == self.output_mint {
            Some("input and output assets are identical")
        } else {
            None
        }
    }
}

/// Parse a human-entered decimal amount into integer base units
///
/// Digits beyond `decimals` are truncated, never rounded. No floating point is
/// involved so "0.1" of a 9-decimal asset is exactly 100_000_000.
pub fn parse_ui_amount(amount: &str, decimals: u8) -> Result<u64, AmountError> {
    let trimmed = amount.trim();
    let invalid = || AmountError::Invalid(amount.to_string());
    let overflow = || AmountError::Overflow(amount.to_string());

    let (whole, fraction) = match trimmed.split_once('.') {
        Some((w, f)) => (w, f),
        None => (trimmed, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return Err(invalid());
    }

    let scale = 10u64.checked_pow(decimals as u32).ok_or_else(overflow)?;
    let whole_units = if whole.is_empty() {
        0
    } else {
        whole.parse::<u64>().map_err(|_| overflow())?
    };

    let kept: String = fraction.chars().take(decimals as usize).collect();
    let fraction_units = if kept.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", kept, width = decimals as usize);
        padded.parse::<u64>().map_err(|_| overflow())?
    };

    whole_units
        .checked_mul(scale)
        .and_then(|w| w.checked_add(fraction_units))
        .ok_or_else(overflow)
}

/// Render base units as a decimal string for progress output
pub fn format_base_units(amount: u64, decimals: u8) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let scale = 10u128.pow(decimals as u32);
    let whole = amount as u128 / scale;
    let fraction = amount as u128 % scale;
    let fraction = format!("{:0>width$}", fraction, width = decimals as usize);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        whole.to_string()
    } else {
        format!("{}.{}", whole, fraction)
    }
}
