//! Authority signing wrapper

use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use tracing::{info, warn};

use super::{AuthorityError, PermissionOracle, WalletState, WalletStateProvider, WrapOptions};
use crate::canonical::CanonicalInstruction;
use crate::metrics::metrics;

/// Binds caller instructions to a wallet role
pub struct AuthorityWrapper {
    wallets: Arc<dyn WalletStateProvider>,
    oracle: Arc<dyn PermissionOracle>,
}

impl AuthorityWrapper {
    pub fn new(wallets: Arc<dyn WalletStateProvider>, oracle: Arc<dyn PermissionOracle>) -> Self {
        Self { wallets, oracle }
    }

    pub async fn fetch_wallet(&self, wallet: &Pubkey) -> Result<WalletState, AuthorityError> {
        self.wallets.fetch_wallet(wallet).await
    }

    /// Wrap `instructions` so role `role_id` of `wallet` authorizes them
    ///
    /// Fails with `UnauthorizedRole` when the role does not exist or is not held
    /// by `opts.signer`. `PermissionDenied` from the oracle is returned as is.
    pub async fn wrap(
        &self,
        wallet: &Pubkey,
        role_id: u32,
        instructions: &[CanonicalInstruction],
        opts: &WrapOptions,
    ) -> Result<Vec<CanonicalInstruction>, AuthorityError> {
        let state = self.wallets.fetch_wallet(wallet).await?;
        self.wrap_with_state(&state, role_id, instructions, opts)
    }

    /// Same as [`wrap`](Self::wrap) against an already fetched wallet state
    pub fn wrap_with_state(
        &self,
        state: &WalletState,
        role_id: u32,
        instructions: &[CanonicalInstruction],
        opts: &WrapOptions,
    ) -> Result<Vec<CanonicalInstruction>, AuthorityError> {
        let holds_role = state
            .role(role_id)
            .map(|role| role.signer == opts.signer)
            .unwrap_or(false);
        if !holds_role {
            return Err(AuthorityError::UnauthorizedRole {
                wallet: state.address,
                role_id,
                signer: opts.signer,
            });
        }

        let wrapped = match self.oracle.authorize(state, role_id, instructions, opts) {
            Ok(wrapped) => wrapped,
            Err(e) => {
                if matches!(e, AuthorityError::PermissionDenied { .. }) {
                    metrics().permission_denials.inc();
                    warn!(target: "authority", wallet = %state.address, role_id, error = %e, "🚫 Permission denied");
                }
                return Err(e);
            }
        };

        verify_order(self.oracle.as_ref(), instructions, &wrapped)?;

        info!(
            target: "authority",
            wallet = %state.address,
            role_id,
            inner = instructions.len(),
            wrapped = wrapped.len(),
            "🔐 Instructions wrapped"
        );
        Ok(wrapped)
    }
}

/// Check that `wrapped` carries exactly `original`, in order
///
/// Bookkeeping instructions are only accepted before the first instruction
/// that carries caller instructions.
pub fn verify_order(
    oracle: &dyn PermissionOracle,
    original: &[CanonicalInstruction],
    wrapped: &[CanonicalInstruction],
) -> Result<(), AuthorityError> {
    let mut recovered: Vec<CanonicalInstruction> = Vec::with_capacity(original.len());
    let mut carrying_started = false;

    for (position, ix) in wrapped.iter().enumerate() {
        match oracle.inner_instructions(ix) {
            Some(inner) => {
                carrying_started = true;
                recovered.extend(inner);
            }
            None if carrying_started => {
                return Err(AuthorityError::OrderViolation(format!(
                    "bookkeeping instruction at position {} follows caller instructions",
                    position
                )));
            }
            None => {}
        }
    }

    if recovered.len() != original.len() {
        return Err(AuthorityError::OrderViolation(format!(
            "expected {} caller instructions, found {}",
            original.len(),
            recovered.len()
        )));
    }

    if let Some(index) = original
        .iter()
        .zip(recovered.iter())
        .position(|(expected, found)| expected != found)
    {
        return Err(AuthorityError::OrderViolation(format!(
            "caller instruction {} was reordered or altered",
            index
        )));
    }

    Ok(())
}
