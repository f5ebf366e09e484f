//! Bundled permission oracle
//!
//! Checks instructions against the role's permission entries and emits a
//! single sign instruction carrying all of them.

#![allow(deprecated)]

use solana_sdk::{pubkey::Pubkey, system_instruction::SystemInstruction, system_program};
use tracing::debug;

use super::{
    AuthorityError, PermissionOracle, Role, SignEnvelope, WalletState, WrapOptions,
    DEFAULT_WALLET_PROGRAM_ID,
};
use crate::canonical::CanonicalInstruction;

/// Oracle for wallets owned by `program_id`
#[derive(Debug, Clone)]
pub struct RoleOracle {
    program_id: Pubkey,
}

impl Default for RoleOracle {
    fn default() -> Self {
        Self::new(DEFAULT_WALLET_PROGRAM_ID)
    }
}

impl RoleOracle {
    pub fn new(program_id: Pubkey) -> Self {
        Self { program_id }
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    /// Verify every instruction against `role`
    fn check(
        &self,
        role: &Role,
        spend_wallet: &Pubkey,
        instructions: &[CanonicalInstruction],
    ) -> Result<(), AuthorityError> {
        if role.is_unrestricted() {
            return Ok(());
        }

        let allowance = role.sol_allowance();
        let mut spent: u64 = 0;

        for (index, ix) in instructions.iter().enumerate() {
            let denied = |reason: String| AuthorityError::PermissionDenied {
                role_id: role.id,
                index,
                program_id: *ix.program_id(),
                reason,
            };

            if let Some(lamports) = spend_wallet_transfer(ix, spend_wallet) {
                match allowance {
                    Some(limit) => {
                        spent = spent.saturating_add(lamports);
                        if spent > limit {
                            return Err(denied(format!(
                                "transfers {} lamports, over the {} lamport limit",
                                spent, limit
                            )));
                        }
                        continue;
                    }
                    None if role.allows_program(ix.program_id()) => continue,
                    None => return Err(denied("no SOL allowance".to_string())),
                }
            }

            if !role.allows_program(ix.program_id()) {
                return Err(denied("program not permitted for role".to_string()));
            }
        }

        debug!(target: "authority", role_id = role.id, instructions = instructions.len(), spent, "role permits instructions");
        Ok(())
    }
}

impl PermissionOracle for RoleOracle {
    fn authorize(
        &self,
        wallet: &WalletState,
        role_id: u32,
        instructions: &[CanonicalInstruction],
        opts: &WrapOptions,
    ) -> Result<Vec<CanonicalInstruction>, AuthorityError> {
        let role = wallet
            .role(role_id)
            .filter(|role| role.signer == opts.signer)
            .ok_or(AuthorityError::UnauthorizedRole {
                wallet: wallet.address,
                role_id,
                signer: opts.signer,
            })?;

        self.check(role, &wallet.spend_wallet(), instructions)?;

        let outer = SignEnvelope::new(role_id, instructions.to_vec()).encode(wallet, opts)?;
        Ok(vec![outer])
    }

    fn inner_instructions(&self, wrapped: &CanonicalInstruction) -> Option<Vec<CanonicalInstruction>> {
        SignEnvelope::decode(wrapped, &self.program_id)
            .ok()
            .map(|envelope| envelope.inner)
    }
}

/// Lamports moved out of `spend_wallet` by a system transfer
fn spend_wallet_transfer(ix: &CanonicalInstruction, spend_wallet: &Pubkey) -> Option<u64> {
    if *ix.program_id() != system_program::id() {
        return None;
    }
    let source = ix.accounts().first()?;
    if source.address != *spend_wallet {
        return None;
    }
    match bincode::deserialize::<SystemInstruction>(ix.data()).ok()? {
        SystemInstruction::Transfer { lamports } => Some(lamports),
        _ => None,
    }
}
