//! Sign instruction encoding
//!
//! A sign instruction carries a batch of inner instructions that the wallet
//! program executes on behalf of a role. Inner account references are stored
//! as indexes into the outer account list, each with its own flag byte, so the
//! inner instructions decode back exactly as the caller built them.
//!
//! Data layout:
//!
//! ```text
//! u8   discriminator (SIGN_V1)
//! u32  role id (LE)
//! u8   inner instruction count
//! per inner instruction:
//!   u8   program index
//!   u8   account count
//!   per account: u8 index, u8 flags (bit 0 signer, bit 1 writable)
//!   u16  data length (LE)
//!   data
//! [32] sha256 over every preceding byte followed by the outer account addresses
//! ```
//!
//! Outer accounts start with the wallet, its spend account and the role signer,
//! then the payer when one is given, then every account the inner
//! instructions touch in first-use order.
//!
//! This layout is this crate's own framing, checked by [`SignEnvelope::decode`]
//! and the permission oracle. It is not the instruction format of any deployed
//! wallet program; executing against a live program needs an encoder for that
//! program's sign instruction behind [`PermissionOracle`](super::PermissionOracle).

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use super::{WalletState, WrapOptions};
use crate::canonical::{AccountRef, CanonicalInstruction};

/// Instruction discriminator for a role-signed batch
pub const SIGN_V1: u8 = 4;

const DIGEST_LEN: usize = 32;
const MAX_INDEX: usize = u8::MAX as usize;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("Instruction targets {found}, not the wallet program {expected}")]
    WrongProgram { expected: Pubkey, found: Pubkey },

    #[error("Not a sign instruction (discriminator {0})")]
    NotSignInstruction(u8),

    #[error("Sign instruction truncated at byte {0}")]
    Truncated(usize),

    #[error("Sign instruction digest mismatch")]
    DigestMismatch,

    #[error("Account index {0} out of range")]
    IndexOutOfRange(u8),

    #[error("Too many accounts for one sign instruction: {0}")]
    TooManyAccounts(usize),

    #[error("Too many inner instructions: {0}")]
    TooManyInstructions(usize),

    #[error("Inner instruction data too long: {0} bytes")]
    DataTooLong(usize),
}

/// Inner instructions bound to a role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignEnvelope {
    pub role_id: u32,
    pub inner: Vec<CanonicalInstruction>,
}

/// Outer account list under construction
struct AccountTable {
    entries: Vec<AccountRef>,
    positions: HashMap<Pubkey, usize>,
    /// Program-derived addresses that can never sign the outer transaction
    unsignable: [Pubkey; 2],
}

impl AccountTable {
    fn add(&mut self, account: AccountRef) -> Result<u8, EnvelopeError> {
        let mut account = account;
        if self.unsignable.contains(&account.address) {
            account.is_signer = false;
        }
        let index = match self.positions.get(&account.address) {
            Some(&index) => {
                self.entries[index] = self.entries[index].union(account);
                index
            }
            None => {
                let index = self.entries.len();
                self.positions.insert(account.address, index);
                self.entries.push(account);
                index
            }
        };
        if index > MAX_INDEX {
            return Err(EnvelopeError::TooManyAccounts(index + 1));
        }
        Ok(index as u8)
    }
}

impl SignEnvelope {
    pub fn new(role_id: u32, inner: Vec<CanonicalInstruction>) -> Self {
        Self { role_id, inner }
    }

    /// Encode into a sign instruction for `wallet`
    pub fn encode(
        &self,
        wallet: &WalletState,
        opts: &WrapOptions,
    ) -> Result<CanonicalInstruction, EnvelopeError> {
        if self.inner.len() > MAX_INDEX {
            return Err(EnvelopeError::TooManyInstructions(self.inner.len()));
        }

        let spend_wallet = wallet.spend_wallet();
        let mut table = AccountTable {
            entries: Vec::new(),
            positions: HashMap::new(),
            unsignable: [wallet.address, spend_wallet],
        };
        table.add(AccountRef::writable(wallet.address))?;
        table.add(AccountRef::writable(spend_wallet))?;
        table.add(AccountRef::new(opts.signer, true, false))?;
        if let Some(payer) = opts.payer {
            table.add(AccountRef::new(payer, true, true))?;
        }

        let mut data = Vec::with_capacity(64);
        data.push(SIGN_V1);
        data.extend_from_slice(&self.role_id.to_le_bytes());
        data.push(self.inner.len() as u8);

        for ix in &self.inner {
            let program_index = table.add(AccountRef::readonly(*ix.program_id()))?;
            if ix.accounts().len() > MAX_INDEX {
                return Err(EnvelopeError::TooManyAccounts(ix.accounts().len()));
            }
            if ix.data().len() > u16::MAX as usize {
                return Err(EnvelopeError::DataTooLong(ix.data().len()));
            }

            data.push(program_index);
            data.push(ix.accounts().len() as u8);
            for account in ix.accounts() {
                let index = table.add(*account)?;
                data.push(index);
                data.push(account.flag_bits());
            }
            data.extend_from_slice(&(ix.data().len() as u16).to_le_bytes());
            data.extend_from_slice(ix.data());
        }

        let digest = digest(&data, &table.entries);
        data.extend_from_slice(&digest);

        Ok(CanonicalInstruction::new(wallet.program_id, table.entries, data))
    }

    /// Decode a sign instruction produced by [`SignEnvelope::encode`]
    pub fn decode(outer: &CanonicalInstruction, program_id: &Pubkey) -> Result<Self, EnvelopeError> {
        if outer.program_id() != program_id {
            return Err(EnvelopeError::WrongProgram {
                expected: *program_id,
                found: *outer.program_id(),
            });
        }

        let data = outer.data();
        let first = *data.first().ok_or(EnvelopeError::Truncated(0))?;
        if first != SIGN_V1 {
            return Err(EnvelopeError::NotSignInstruction(first));
        }
        if data.len() < 1 + 4 + 1 + DIGEST_LEN {
            return Err(EnvelopeError::Truncated(data.len()));
        }

        let (body, stored) = data.split_at(data.len() - DIGEST_LEN);
        if digest(body, outer.accounts()).as_slice() != stored {
            return Err(EnvelopeError::DigestMismatch);
        }

        let mut reader = Reader { bytes: body, pos: 1 };
        let role_id = u32::from_le_bytes(reader.array::<4>()?);
        let count = reader.u8()? as usize;

        let lookup = |index: u8| -> Result<Pubkey, EnvelopeError> {
            outer
                .accounts()
                .get(index as usize)
                .map(|a| a.address)
                .ok_or(EnvelopeError::IndexOutOfRange(index))
        };

        let mut inner = Vec::with_capacity(count);
        for _ in 0..count {
            let program = lookup(reader.u8()?)?;
            let account_count = reader.u8()? as usize;
            let mut accounts = Vec::with_capacity(account_count);
            for _ in 0..account_count {
                let address = lookup(reader.u8()?)?;
                let flags = reader.u8()?;
                accounts.push(AccountRef::from_flag_bits(address, flags));
            }
            let len = u16::from_le_bytes(reader.array::<2>()?) as usize;
            let ix_data = reader.take(len)?.to_vec();
            inner.push(CanonicalInstruction::new(program, accounts, ix_data));
        }

        if reader.pos != body.len() {
            return Err(EnvelopeError::Truncated(reader.pos));
        }

        Ok(Self { role_id, inner })
    }
}

fn digest(body: &[u8], accounts: &[AccountRef]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(body);
    for account in accounts {
        hasher.update(account.address.as_ref());
    }
    hasher.finalize().into()
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], EnvelopeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(EnvelopeError::Truncated(self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, EnvelopeError> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], EnvelopeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{Permission, Role, DEFAULT_WALLET_PROGRAM_ID};

    fn wallet(signer: Pubkey) -> WalletState {
        WalletState {
            address: Pubkey::new_unique(),
            program_id: DEFAULT_WALLET_PROGRAM_ID,
            roles: vec![Role {
                id: 3,
                signer,
                permissions: vec![Permission::All],
            }],
        }
    }

    #[test]
    fn test_encode_decode_preserves_inner_flags() {
        let signer = Pubkey::new_unique();
        let state = wallet(signer);
        let spend = state.spend_wallet();
        let shared = Pubkey::new_unique();

        let first = CanonicalInstruction::new(
            Pubkey::new_unique(),
            vec![AccountRef::new(spend, true, true), AccountRef::readonly(shared)],
            vec![1, 2, 3],
        );
        let second = CanonicalInstruction::new(
            Pubkey::new_unique(),
            vec![AccountRef::writable(shared), AccountRef::new(signer, true, false)],
            vec![],
        );

        let envelope = SignEnvelope::new(3, vec![first.clone(), second.clone()]);
        let outer = envelope.encode(&state, &WrapOptions::new(signer)).unwrap();

        // spend account is a PDA and never signs the outer transaction
        let spend_meta = outer.accounts().iter().find(|a| a.address == spend).unwrap();
        assert!(!spend_meta.is_signer);
        assert!(spend_meta.is_writable);
        // shared account carries the union of inner flags
        let shared_meta = outer.accounts().iter().find(|a| a.address == shared).unwrap();
        assert!(shared_meta.is_writable);
        // head order
        assert_eq!(outer.accounts()[0].address, state.address);
        assert_eq!(outer.accounts()[1].address, spend);
        assert_eq!(outer.accounts()[2], AccountRef::new(signer, true, false));

        let decoded = SignEnvelope::decode(&outer, &state.program_id).unwrap();
        assert_eq!(decoded.role_id, 3);
        assert_eq!(decoded.inner, vec![first, second]);
    }

    #[test]
    fn test_payer_is_writable_signer() {
        let signer = Pubkey::new_unique();
        let payer = Pubkey::new_unique();
        let state = wallet(signer);
        let outer = SignEnvelope::new(3, vec![])
            .encode(&state, &WrapOptions::new(signer).with_payer(payer))
            .unwrap();
        assert_eq!(outer.accounts()[3], AccountRef::new(payer, true, true));
    }

    #[test]
    fn test_tampered_data_fails_digest() {
        let signer = Pubkey::new_unique();
        let state = wallet(signer);
        let ix = CanonicalInstruction::new(Pubkey::new_unique(), vec![], vec![9; 4]);
        let outer = SignEnvelope::new(3, vec![ix])
            .encode(&state, &WrapOptions::new(signer))
            .unwrap();

        let mut data = outer.data().to_vec();
        data[1] ^= 0xFF;
        let tampered = CanonicalInstruction::new(*outer.program_id(), outer.accounts().to_vec(), data);
        assert_eq!(
            SignEnvelope::decode(&tampered, &state.program_id),
            Err(EnvelopeError::DigestMismatch)
        );
    }

    #[test]
    fn test_decode_rejects_foreign_instructions() {
        let other = CanonicalInstruction::new(Pubkey::new_unique(), vec![], vec![SIGN_V1]);
        assert!(matches!(
            SignEnvelope::decode(&other, &DEFAULT_WALLET_PROGRAM_ID),
            Err(EnvelopeError::WrongProgram { .. })
        ));

        let wrong_tag = CanonicalInstruction::new(DEFAULT_WALLET_PROGRAM_ID, vec![], vec![7, 0]);
        assert_eq!(
            SignEnvelope::decode(&wrong_tag, &DEFAULT_WALLET_PROGRAM_ID),
            Err(EnvelopeError::NotSignInstruction(7))
        );
    }
}
