//! Compatibility layer for Solana SDK message types
//!
//! Uniform accessors over `VersionedMessage` so callers do not match on
//! Legacy vs V0 themselves. The assembler only produces V0 messages, but
//! transactions read back from elsewhere may be either.

use solana_sdk::{
    message::{MessageHeader, VersionedMessage},
    pubkey::Pubkey,
    transaction::VersionedTransaction,
};

/// Get the message header from a `VersionedMessage`.
#[inline]
#[must_use]
pub fn get_message_header(message: &VersionedMessage) -> &MessageHeader {
    match message {
        VersionedMessage::Legacy(legacy_msg) => &legacy_msg.header,
        VersionedMessage::V0(v0_msg) => &v0_msg.header,
    }
}

/// Get the static account keys from a `VersionedMessage`.
///
/// For V0 messages this excludes addresses loaded from lookup tables.
#[inline]
#[must_use]
pub fn get_static_account_keys(message: &VersionedMessage) -> &[Pubkey] {
    match message {
        VersionedMessage::Legacy(legacy_msg) => &legacy_msg.account_keys,
        VersionedMessage::V0(v0_msg) => &v0_msg.account_keys,
    }
}

/// Get the required signers from a `VersionedMessage`.
///
/// Required signers are always the first `num_required_signatures` static keys.
#[inline]
#[must_use]
pub fn get_required_signers(message: &VersionedMessage) -> &[Pubkey] {
    let header = get_message_header(message);
    let account_keys = get_static_account_keys(message);
    let num_signers = header.num_required_signatures as usize;

    &account_keys[..num_signers.min(account_keys.len())]
}

/// Lookup tables referenced by the message (empty for Legacy)
#[must_use]
pub fn get_lookup_table_addresses(message: &VersionedMessage) -> Vec<Pubkey> {
    match message {
        VersionedMessage::Legacy(_) => Vec::new(),
        VersionedMessage::V0(v0_msg) => v0_msg
            .address_table_lookups
            .iter()
            .map(|lookup| lookup.account_key)
            .collect(),
    }
}

/// Program id of every compiled instruction, in order
///
/// Program ids are always static keys, so this never needs the lookup tables.
/// Returns `None` if an instruction indexes outside the static keys.
#[must_use]
pub fn get_program_ids(message: &VersionedMessage) -> Option<Vec<Pubkey>> {
    let keys = get_static_account_keys(message);
    message
        .instructions()
        .iter()
        .map(|ix| keys.get(ix.program_id_index as usize).copied())
        .collect()
}

/// Wire size of a transaction in bytes
pub fn get_serialized_size(tx: &VersionedTransaction) -> Result<usize, bincode::Error> {
    bincode::serialized_size(tx).map(|size| size as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::{
        address_lookup_table::AddressLookupTableAccount,
        hash::Hash,
        instruction::{AccountMeta, Instruction},
        message::{v0, Message},
        signature::Keypair,
        signer::Signer,
    };

    fn instruction(payer: &Pubkey, program: Pubkey, extra: Pubkey) -> Instruction {
        Instruction::new_with_bytes(
            program,
            &[1, 2, 3],
            vec![AccountMeta::new(*payer, true), AccountMeta::new(extra, false)],
        )
    }

    #[test]
    fn test_legacy_and_v0_accessors_agree() {
        let payer = Keypair::new();
        let program = Pubkey::new_unique();
        let ix = instruction(&payer.pubkey(), program, Pubkey::new_unique());

        let legacy = VersionedMessage::Legacy(Message::new(&[ix.clone()], Some(&payer.pubkey())));
        let v0 = VersionedMessage::V0(
            v0::Message::try_compile(&payer.pubkey(), &[ix], &[], Hash::default()).unwrap(),
        );

        for message in [&legacy, &v0] {
            assert_eq!(get_required_signers(message), &[payer.pubkey()]);
            assert_eq!(get_program_ids(message), Some(vec![program]));
            assert!(get_lookup_table_addresses(message).is_empty());
        }
    }

    #[test]
    fn test_lookup_table_addresses() {
        let payer = Keypair::new();
        let looked_up = Pubkey::new_unique();
        let table = AddressLookupTableAccount {
            key: Pubkey::new_unique(),
            addresses: vec![looked_up],
        };
        let ix = instruction(&payer.pubkey(), Pubkey::new_unique(), looked_up);
        let message = VersionedMessage::V0(
            v0::Message::try_compile(&payer.pubkey(), &[ix], &[table.clone()], Hash::default())
                .unwrap(),
        );

        assert_eq!(get_lookup_table_addresses(&message), vec![table.key]);
        assert!(!get_static_account_keys(&message).contains(&looked_up));
    }

    #[test]
    fn test_serialized_size_matches_bincode() {
        let payer = Keypair::new();
        let ix = instruction(&payer.pubkey(), Pubkey::new_unique(), Pubkey::new_unique());
        let message = VersionedMessage::V0(
            v0::Message::try_compile(&payer.pubkey(), &[ix], &[], Hash::default()).unwrap(),
        );
        let tx = VersionedTransaction::try_new(message, &[&payer]).unwrap();

        assert_eq!(
            get_serialized_size(&tx).unwrap(),
            bincode::serialize(&tx).unwrap().len()
        );
    }
}
