//! Canonical instruction model
//!
//! Every liquidity provider ships instructions in its own wire shape: base58
//! strings with base64 payloads, raw 32-byte arrays, short field names. This
//! module defines the one representation the rest of the pipeline consumes.
//!
//! ## Invariants
//!
//! - A [`CanonicalInstruction`] is immutable once constructed: fields are
//!   private and only exposed through read-only accessors.
//! - Account order is significant and preserved exactly as the provider sent it.
//! - Repeated references to one address stay in place on the instruction
//!   itself. Its wire encoding collapses them into one entry at the first
//!   occurrence, carrying the logical OR of every occurrence's flags, which is
//!   how the network resolves a compiled message.
//!
//! ## Conversion contract
//!
//! Adapters implement [`ToCanonical`] for their native instruction type. The
//! conversion fails with [`MalformedInstruction`] when the program id or any
//! account address does not decode to 32 bytes, or when a signer/writable flag
//! the provider format requires is absent.

use std::collections::HashMap;
use std::str::FromStr;

use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};
use thiserror::Error;

/// Width of an on-chain address in bytes
pub const ADDRESS_LEN: usize = 32;

const FLAG_SIGNER: u8 = 0b01;
const FLAG_WRITABLE: u8 = 0b10;

/// Decoding failure while converting a provider instruction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedInstruction {
    /// Program identifier is not a valid 32-byte address
    #[error("Invalid program id: {0}")]
    ProgramId(String),

    /// Account address at `index` is not a valid 32-byte address
    #[error("Invalid account address at index {index}: {reason}")]
    Account { index: usize, reason: String },

    /// Provider format requires a flag that was not present
    #[error("Account {index} is missing the {flag} flag")]
    MissingFlag { index: usize, flag: &'static str },

    /// Instruction payload could not be decoded
    #[error("Invalid instruction data: {0}")]
    Data(String),
}

/// One account reference inside an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountRef {
    pub address: Pubkey,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountRef {
    pub fn new(address: Pubkey, is_signer: bool, is_writable: bool) -> Self {
        Self {
            address,
            is_signer,
            is_writable,
        }
    }

    /// Writable, non-signer reference
    pub fn writable(address: Pubkey) -> Self {
        Self::new(address, false, true)
    }

    /// Read-only, non-signer reference
    pub fn readonly(address: Pubkey) -> Self {
        Self::new(address, false, false)
    }

    /// Conservative union of two references to the same address
    pub fn union(self, other: AccountRef) -> AccountRef {
        debug_assert_eq!(self.address, other.address);
        AccountRef {
            address: self.address,
            is_signer: self.is_signer || other.is_signer,
            is_writable: self.is_writable || other.is_writable,
        }
    }

    pub(crate) fn flag_bits(&self) -> u8 {
        let mut bits = 0;
        if self.is_signer {
            bits |= FLAG_SIGNER;
        }
        if self.is_writable {
            bits |= FLAG_WRITABLE;
        }
        bits
    }

    pub(crate) fn from_flag_bits(address: Pubkey, bits: u8) -> Self {
        Self::new(address, bits & FLAG_SIGNER != 0, bits & FLAG_WRITABLE != 0)
    }
}

impl From<&AccountMeta> for AccountRef {
    fn from(meta: &AccountMeta) -> Self {
        Self::new(meta.pubkey, meta.is_signer, meta.is_writable)
    }
}

impl From<AccountRef> for AccountMeta {
    fn from(account: AccountRef) -> Self {
        AccountMeta {
            pubkey: account.address,
            is_signer: account.is_signer,
            is_writable: account.is_writable,
        }
    }
}

/// Provider-agnostic (program, accounts, data) triple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalInstruction {
    program_id: Pubkey,
    accounts: Vec<AccountRef>,
    data: Vec<u8>,
}

impl CanonicalInstruction {
    pub fn new(program_id: Pubkey, accounts: Vec<AccountRef>, data: Vec<u8>) -> Self {
        Self {
            program_id,
            accounts,
            data,
        }
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    /// Account references in provider order, duplicates included
    pub fn accounts(&self) -> &[AccountRef] {
        &self.accounts
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Distinct accounts in first-occurrence order with unioned flags
    pub fn unique_accounts(&self) -> Vec<AccountRef> {
        collapse_account_refs(self.accounts.iter().copied())
    }

    /// Deterministic byte encoding of the resolved instruction
    ///
    /// Layout: program id, `u16` account count, per distinct account the
    /// address and a flag byte (bit 0 signer, bit 1 writable), `u32` data
    /// length, data.
    pub fn wire_bytes(&self) -> Vec<u8> {
        let resolved = self.unique_accounts();
        let mut out = Vec::with_capacity(
            ADDRESS_LEN + 2 + resolved.len() * (ADDRESS_LEN + 1) + 4 + self.data.len(),
        );
        out.extend_from_slice(self.program_id.as_ref());
        out.extend_from_slice(&(resolved.len() as u16).to_le_bytes());
        for account in &resolved {
            out.extend_from_slice(account.address.as_ref());
            out.push(account.flag_bits());
        }
        out.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    /// Convert to the SDK instruction type used for message compilation
    pub fn to_instruction(&self) -> Instruction {
        Instruction {
            program_id: self.program_id,
            accounts: self.accounts.iter().copied().map(AccountMeta::from).collect(),
            data: self.data.clone(),
        }
    }
}

impl From<&Instruction> for CanonicalInstruction {
    fn from(ix: &Instruction) -> Self {
        Self::new(
            ix.program_id,
            ix.accounts.iter().map(AccountRef::from).collect(),
            ix.data.clone(),
        )
    }
}

impl From<Instruction> for CanonicalInstruction {
    fn from(ix: Instruction) -> Self {
        Self::from(&ix)
    }
}

/// Conversion from a provider's native instruction shape
pub trait ToCanonical {
    fn to_canonical(&self) -> Result<CanonicalInstruction, MalformedInstruction>;
}

impl ToCanonical for Instruction {
    fn to_canonical(&self) -> Result<CanonicalInstruction, MalformedInstruction> {
        Ok(CanonicalInstruction::from(self))
    }
}

/// Collapse duplicate addresses, keeping first-occurrence order and OR-ing flags
pub fn collapse_account_refs(accounts: impl IntoIterator<Item = AccountRef>) -> Vec<AccountRef> {
    let mut order: Vec<AccountRef> = Vec::new();
    let mut positions: HashMap<Pubkey, usize> = HashMap::new();
    for account in accounts {
        match positions.get(&account.address) {
            Some(&pos) => order[pos] = order[pos].union(account),
            None => {
                positions.insert(account.address, order.len());
                order.push(account);
            }
        }
    }
    order
}

/// Decode a raw byte slice into an address
pub fn address_from_bytes(bytes: &[u8]) -> Result<Pubkey, String> {
    let array: [u8; ADDRESS_LEN] = bytes
        .try_into()
        .map_err(|_| format!("expected {} bytes, got {}", ADDRESS_LEN, bytes.len()))?;
    Ok(Pubkey::new_from_array(array))
}

/// Decode a base58 string into an address
pub fn address_from_str(value: &str) -> Result<Pubkey, String> {
    Pubkey::from_str(value).map_err(|e| format!("{value}: {e}"))
}

/// Serde adapter encoding an address as a base58 string
pub mod serde_pubkey {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use solana_sdk::pubkey::Pubkey;
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(key: &Pubkey, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(key)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Pubkey, D::Error> {
        let value = String::deserialize(deserializer)?;
        Pubkey::from_str(&value).map_err(|e| D::Error::custom(format!("{value}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ix_with(accounts: Vec<AccountRef>) -> CanonicalInstruction {
        CanonicalInstruction::new(Pubkey::new_unique(), accounts, vec![9, 8, 7])
    }

    #[test]
    fn test_wire_bytes_collapse_duplicates() {
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let ix = ix_with(vec![
            AccountRef::new(a, true, false),
            AccountRef::readonly(b),
            AccountRef::new(a, false, true),
        ]);

        let bytes = ix.wire_bytes();
        assert_eq!(u16::from_le_bytes([bytes[32], bytes[33]]), 2);
        assert_eq!(&bytes[34..66], a.as_ref());
        assert_eq!(bytes[66], FLAG_SIGNER | FLAG_WRITABLE);
        assert_eq!(&bytes[67..99], b.as_ref());
        assert_eq!(bytes[99], 0);

        // original keeps every occurrence
        assert_eq!(ix.accounts().len(), 3);
        assert_eq!(ix.accounts()[0], AccountRef::new(a, true, false));
    }

    #[test]
    fn test_unique_accounts_keep_first_occurrence_order() {
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let ix = ix_with(vec![
            AccountRef::readonly(b),
            AccountRef::readonly(a),
            AccountRef::writable(b),
        ]);

        let unique = ix.unique_accounts();
        assert_eq!(unique, vec![AccountRef::writable(b), AccountRef::readonly(a)]);
    }

    #[test]
    fn test_sdk_round_trip() {
        let ix = Instruction {
            program_id: Pubkey::new_unique(),
            accounts: vec![
                AccountMeta::new(Pubkey::new_unique(), true),
                AccountMeta::new_readonly(Pubkey::new_unique(), false),
            ],
            data: vec![1, 2, 3],
        };
        let canonical = ix.to_canonical().unwrap();
        assert_eq!(canonical.to_instruction(), ix);
    }

    #[test]
    fn test_wire_bytes_layout() {
        let program = Pubkey::new_unique();
        let acct = Pubkey::new_unique();
        let ix = CanonicalInstruction::new(program, vec![AccountRef::new(acct, true, true)], vec![0xAA]);

        let bytes = ix.wire_bytes();
        assert_eq!(&bytes[..32], program.as_ref());
        assert_eq!(u16::from_le_bytes([bytes[32], bytes[33]]), 1);
        assert_eq!(&bytes[34..66], acct.as_ref());
        assert_eq!(bytes[66], FLAG_SIGNER | FLAG_WRITABLE);
        assert_eq!(u32::from_le_bytes(bytes[67..71].try_into().unwrap()), 1);
        assert_eq!(bytes[71], 0xAA);
    }

    #[test]
    fn test_address_decoding() {
        assert!(address_from_bytes(&[1u8; 32]).is_ok());
        assert!(address_from_bytes(&[1u8; 31]).is_err());
        assert!(address_from_str("So11111111111111111111111111111111111111112").is_ok());
        assert!(address_from_str("not-an-address").is_err());
    }

    proptest! {
        #[test]
        fn prop_collapse_is_flag_union(flags in proptest::collection::vec((0usize..4, any::<bool>(), any::<bool>()), 1..24)) {
            let keys: Vec<Pubkey> = (0..4).map(|_| Pubkey::new_unique()).collect();
            let refs: Vec<AccountRef> = flags
                .iter()
                .map(|(k, s, w)| AccountRef::new(keys[*k], *s, *w))
                .collect();

            let collapsed = collapse_account_refs(refs.clone());

            let distinct: std::collections::HashSet<_> = refs.iter().map(|r| r.address).collect();
            prop_assert_eq!(collapsed.len(), distinct.len());
            for entry in &collapsed {
                let expected_signer = refs.iter().any(|r| r.address == entry.address && r.is_signer);
                let expected_writable = refs.iter().any(|r| r.address == entry.address && r.is_writable);
                prop_assert_eq!(entry.is_signer, expected_signer);
                prop_assert_eq!(entry.is_writable, expected_writable);
            }
        }
    }
}
