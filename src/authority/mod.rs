//! Delegated-authority wallet
//!
//! A wallet is an account governed by a set of roles. Each role names the key
//! allowed to act for it and the permissions it carries. Funds sit in the
//! wallet's spend account, a PDA of the wallet program, and move only through
//! sign instructions the wallet program checks against a role.
//!
//! The permission tree itself is an external collaborator reached through
//! [`WalletStateProvider`] and [`PermissionOracle`]; [`AuthorityWrapper`]
//! combines the two and guarantees caller instruction order survives wrapping.

pub mod envelope;
pub mod manifest;
pub mod oracle;
pub mod wrapper;

pub use envelope::{EnvelopeError, SignEnvelope};
pub use manifest::ManifestWalletProvider;
pub use oracle::RoleOracle;
pub use wrapper::AuthorityWrapper;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use solana_sdk::{pubkey, pubkey::Pubkey};
use thiserror::Error;

use crate::canonical::CanonicalInstruction;

/// Default delegated-authority wallet program
pub const DEFAULT_WALLET_PROGRAM_ID: Pubkey =
    pubkey!("swigypWHEksbC64pWKwah1WTeh9JXwx8H1rJHLdbQMB");

/// Seed prefix for the spend account PDA
pub const SPEND_WALLET_SEED: &[u8] = b"swig-wallet-address";

/// What a role may do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Permission {
    /// Unrestricted
    All,
    /// May invoke one program
    ProgramLimit {
        #[serde(with = "crate::canonical::serde_pubkey")]
        program_id: Pubkey,
    },
    /// May move up to `lamports` out of the spend account per wrap
    SolLimit { lamports: u64 },
}

/// One entry in a wallet's permission tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: u32,
    #[serde(with = "crate::canonical::serde_pubkey")]
    pub signer: Pubkey,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

impl Role {
    pub fn is_unrestricted(&self) -> bool {
        self.permissions.contains(&Permission::All)
    }

    pub fn allows_program(&self, program_id: &Pubkey) -> bool {
        self.is_unrestricted()
            || self.permissions.iter().any(|p| {
                matches!(p, Permission::ProgramLimit { program_id: allowed } if allowed == program_id)
            })
    }

    /// Combined lamport allowance across SolLimit entries
    pub fn sol_allowance(&self) -> Option<u64> {
        let mut total: Option<u64> = None;
        for permission in &self.permissions {
            if let Permission::SolLimit { lamports } = permission {
                total = Some(total.unwrap_or(0).saturating_add(*lamports));
            }
        }
        total
    }
}

/// Snapshot of a wallet's roles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletState {
    pub address: Pubkey,
    pub program_id: Pubkey,
    pub roles: Vec<Role>,
}

impl WalletState {
    /// First role whose signer is `signer`
    pub fn find_role_by_signer(&self, signer: &Pubkey) -> Option<&Role> {
        self.roles.iter().find(|role| role.signer == *signer)
    }

    pub fn role(&self, role_id: u32) -> Option<&Role> {
        self.roles.iter().find(|role| role.id == role_id)
    }

    /// Spend account holding the wallet's funds
    pub fn spend_wallet(&self) -> Pubkey {
        spend_wallet_address(&self.address, &self.program_id)
    }
}

/// Derive the spend account of `wallet` under `program_id`
pub fn spend_wallet_address(wallet: &Pubkey, program_id: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[SPEND_WALLET_SEED, wallet.as_ref()], program_id).0
}

/// Options for one wrap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrapOptions {
    /// Key acting for the role; must sign the outer transaction
    pub signer: Pubkey,
    /// Account funding rent for accounts the inner instructions create
    pub payer: Option<Pubkey>,
}

impl WrapOptions {
    pub fn new(signer: Pubkey) -> Self {
        Self {
            signer,
            payer: None,
        }
    }

    pub fn with_payer(mut self, payer: Pubkey) -> Self {
        self.payer = Some(payer);
        self
    }
}

/// Authority errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthorityError {
    /// No wallet at the given address
    #[error("Wallet {0} not found")]
    WalletNotFound(Pubkey),

    /// Wallet state could not be read
    #[error("Failed to load wallet state: {0}")]
    StateUnavailable(String),

    /// Role missing, or not held by the invoking signer
    #[error("Role {role_id} on wallet {wallet} is not held by {signer}")]
    UnauthorizedRole {
        wallet: Pubkey,
        role_id: u32,
        signer: Pubkey,
    },

    /// Role exists but may not perform the instruction
    #[error("Role {role_id} may not execute instruction {index} (program {program_id}): {reason}")]
    PermissionDenied {
        role_id: u32,
        index: usize,
        program_id: Pubkey,
        reason: String,
    },

    /// Wrapped output does not preserve caller instructions in order
    #[error("Wrapped instructions violate caller order: {0}")]
    OrderViolation(String),

    /// Sign instruction could not be encoded
    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
}

impl AuthorityError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthorityError::StateUnavailable(_))
    }

    pub fn category(&self) -> &'static str {
        match self {
            AuthorityError::WalletNotFound(_) => "wallet_not_found",
            AuthorityError::StateUnavailable(_) => "state",
            AuthorityError::UnauthorizedRole { .. } => "unauthorized_role",
            AuthorityError::PermissionDenied { .. } => "permission_denied",
            AuthorityError::OrderViolation(_) => "order",
            AuthorityError::Envelope(_) => "envelope",
        }
    }
}

/// Source of wallet state
#[async_trait]
pub trait WalletStateProvider: Send + Sync {
    async fn fetch_wallet(&self, address: &Pubkey) -> Result<WalletState, AuthorityError>;
}

/// Decides whether a role may execute instructions and emits the wrapped form
pub trait PermissionOracle: Send + Sync {
    /// Wrap `instructions` for `role_id`
    ///
    /// Output may start with bookkeeping instructions; the caller's
    /// instructions must be recoverable through [`inner_instructions`] in
    /// their original order.
    ///
    /// [`inner_instructions`]: PermissionOracle::inner_instructions
    fn authorize(
        &self,
        wallet: &WalletState,
        role_id: u32,
        instructions: &[CanonicalInstruction],
        opts: &WrapOptions,
    ) -> Result<Vec<CanonicalInstruction>, AuthorityError>;

    /// Caller instructions carried by `wrapped`; `None` for bookkeeping
    fn inner_instructions(&self, wrapped: &CanonicalInstruction) -> Option<Vec<CanonicalInstruction>>;
}
